//! Local socket front end.
//!
//! Each connection carries newline-delimited JSON calls. The caller's uid and
//! pid come from the socket's peer credentials. Requests address a package by
//! object path below [`BASE_OBJECT_PATH`], with bytes outside `[A-Za-z0-9]`
//! escaped as `_XX`.

use crate::error::PurchaseError;
use crate::idle::IdleTimer;
use crate::model::ApplicationIdentity;
use crate::orchestrator::PayService;
use crate::store::ItemDetails;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::signal::unix::{signal, SignalKind};

pub const BASE_OBJECT_PATH: &str = "/com/canonical/pay/store";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallMethod {
    GetItem,
    GetPurchasedItems,
    PurchaseItem,
    AcknowledgeItem,
    RefundItem,
}

#[derive(Debug, Deserialize)]
pub struct CallRequest {
    pub path: String,
    pub method: CallMethod,
    #[serde(default)]
    pub item: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallResponse {
    Item(ItemDetails),
    Items(Vec<ItemDetails>),
    Error { name: String, message: String },
}

impl From<PurchaseError> for CallResponse {
    fn from(err: PurchaseError) -> Self {
        CallResponse::Error {
            name: err.name().to_string(),
            message: err.to_string(),
        }
    }
}

/// Credentials of the connected process.
#[derive(Debug, Clone, Copy)]
pub struct Caller {
    pub uid: u32,
    pub pid: u32,
}

/// Undo `_XX` escaping. Malformed escapes are kept as written.
pub fn decode_object_path(path: &str) -> String {
    let bytes = path.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'_'
            && i + 2 < bytes.len()
            && bytes[i + 1].is_ascii_hexdigit()
            && bytes[i + 2].is_ascii_hexdigit()
        {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(b) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Package name addressed by `path`: the decoded last segment below the
/// base path.
pub fn package_name_from_path(path: &str) -> Result<String, PurchaseError> {
    let segment = path
        .strip_prefix(BASE_OBJECT_PATH)
        .and_then(|rest| rest.strip_prefix('/'))
        .filter(|rest| !rest.is_empty() && !rest.contains('/'))
        .ok_or_else(|| PurchaseError::InvalidRequest(format!("invalid object path \"{path}\"")))?;
    Ok(decode_object_path(segment))
}

fn required_item(request: &CallRequest) -> Result<&str, PurchaseError> {
    request
        .item
        .as_deref()
        .filter(|item| !item.is_empty())
        .ok_or_else(|| PurchaseError::InvalidRequest("missing item name".into()))
}

pub async fn handle_call(service: &PayService, request: CallRequest, caller: Caller) -> CallResponse {
    let result = dispatch(service, &request, caller).await;
    if let Err(e) = &result {
        tracing::debug!(method = ?request.method, path = %request.path, "call failed: {e}");
    }
    result.unwrap_or_else(CallResponse::from)
}

async fn dispatch(service: &PayService, request: &CallRequest, caller: Caller) -> Result<CallResponse, PurchaseError> {
    let package = package_name_from_path(&request.path)?;
    let response = match request.method {
        CallMethod::GetItem => CallResponse::Item(service.get_item(&package, required_item(request)?).await?),
        CallMethod::GetPurchasedItems => CallResponse::Items(service.get_purchased_items(&package).await?),
        CallMethod::PurchaseItem => {
            let requester = ApplicationIdentity::resolve(&package, caller.uid, caller.pid);
            CallResponse::Item(service.purchase_item(&package, required_item(request)?, requester).await?)
        }
        CallMethod::AcknowledgeItem => {
            CallResponse::Item(service.acknowledge_item(&package, required_item(request)?).await?)
        }
        CallMethod::RefundItem => CallResponse::Item(service.refund_item(&package, required_item(request)?).await?),
    };
    Ok(response)
}

async fn handle_connection(stream: UnixStream, service: Arc<PayService>) -> Result<()> {
    let cred = stream.peer_cred().context("failed to read peer credentials")?;
    let caller = Caller {
        uid: cred.uid(),
        pid: cred.pid().map(|p| p as u32).unwrap_or(0),
    };
    tracing::debug!(uid = caller.uid, pid = caller.pid, "client connected");

    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<CallRequest>(&line) {
            Ok(request) => handle_call(&service, request, caller).await,
            Err(e) => CallResponse::Error {
                name: "ParseError".into(),
                message: format!("ParseError: {e}"),
            },
        };
        let mut out = serde_json::to_vec(&response)?;
        out.push(b'\n');
        write.write_all(&out).await?;
    }
    Ok(())
}

/// Accept connections until the idle timer fires or the process is asked to
/// stop.
pub async fn serve(listener: UnixListener, service: Arc<PayService>, idle: IdleTimer) -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    tracing::trace!(idle_armed = idle.is_armed(), "accepted connection");
                    let service = Arc::clone(&service);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, service).await {
                            tracing::warn!("connection closed with error: {e:#}");
                        }
                    });
                }
                Err(e) => tracing::warn!("accept failed: {e}"),
            },
            _ = idle.elapsed() => {
                tracing::info!("idle timeout reached, shutting down");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                tracing::info!("terminated, shutting down");
                break;
            }
        }
    }
    Ok(())
}
