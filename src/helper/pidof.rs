use crate::helper::PidLookup;
use anyhow::{anyhow, bail, Context, Result};
use std::process::Command;

/// Looks processes up by name through the `pidof` tool.
#[derive(Debug, Clone, Default)]
pub struct Pidof;

impl PidLookup for Pidof {
    fn pids_of(&self, process_name: &str) -> Result<Vec<u32>> {
        let output = Command::new("pidof")
            .arg(process_name)
            .output()
            .with_context(|| format!("Unable to get PID for process \"{process_name}\""))?;
        if !output.status.success() {
            bail!("Unable to get PID for process \"{process_name}\": {}", output.status);
        }
        parse_pidof_output(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Parse whitespace-separated PIDs.
pub(crate) fn parse_pidof_output(output: &str) -> Result<Vec<u32>> {
    output
        .split_whitespace()
        .map(|pid| {
            pid.parse::<u32>()
                .map_err(|_| anyhow!("Unable to convert \"{pid}\" into a valid PID"))
        })
        .collect()
}
