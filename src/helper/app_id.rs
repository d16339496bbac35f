use crate::model::HELPER_KIND;
use std::path::{Path, PathBuf};

const DESKTOP_SUFFIX: &str = ".desktop";

/// Directory where the helper's package hook drops its `.desktop` entry. The
/// entry's file stem is the helper's application id.
#[derive(Debug, Clone)]
pub struct HelperDirectory {
    dir: Option<PathBuf>,
}

impl HelperDirectory {
    /// Use `dir` when given, otherwise `<cache dir>/pay-service/pay-ui`.
    pub fn new(dir: Option<PathBuf>) -> Self {
        let dir = dir.or_else(|| dirs::cache_dir().map(|c| c.join("pay-service").join(HELPER_KIND)));
        Self { dir }
    }

    pub fn path(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn app_id(&self) -> Option<String> {
        let dir = self.dir.as_deref()?;
        tracing::debug!(dir = %dir.display(), "looking for helper entry");
        discover_app_id(dir)
    }
}

/// First `.desktop` entry in `dir`, by name, without its suffix. Only one
/// entry is expected.
fn discover_app_id(dir: &Path) -> Option<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.ends_with(DESKTOP_SUFFIX))
        .collect();
    names.sort();
    let chosen = names.into_iter().next()?;
    let app_id = chosen.strip_suffix(DESKTOP_SUFFIX)?.to_string();
    (!app_id.is_empty()).then_some(app_id)
}
