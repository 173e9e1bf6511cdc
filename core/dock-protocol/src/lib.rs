//! IPC protocol types and validation for edgedockd.
//!
//! This crate is shared by the daemon and its clients to prevent schema drift.
//! Requests and responses are single JSON objects terminated by a newline.

use edgedock_session::DockPosition;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 64 * 1024;
pub const MAX_TOKEN_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    GetStatus,
    Touch,
    Block,
    Unblock,
    Pointer,
    ToggleFullScreen,
    Reload,
    Exit,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(method: Method, params: Option<Value>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            method,
            id: None,
            params,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl From<edgedock_session::DockError> for ErrorInfo {
    fn from(err: edgedock_session::DockError) -> Self {
        ErrorInfo::new(err.code(), err.to_string())
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

/// Where a touch came from. Fold touches are the thin strip left on screen
/// while the dock is hidden.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TouchSource {
    #[default]
    Dock,
    Fold,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TouchParams {
    pub position: DockPosition,
    #[serde(default)]
    pub source: TouchSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlockParams {
    pub position: DockPosition,
    pub token: String,
}

impl BlockParams {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if self.token.trim().is_empty() {
            return Err(ErrorInfo::new("invalid_token", "token is required"));
        }
        if self.token.len() > MAX_TOKEN_LEN {
            return Err(ErrorInfo::new(
                "invalid_token",
                format!("token must be {} characters or fewer", MAX_TOKEN_LEN),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PointerParams {
    pub position: DockPosition,
    pub inside: bool,
}

fn parse_params<T>(method: &str, params: Option<Value>) -> Result<T, ErrorInfo>
where
    T: for<'de> Deserialize<'de>,
{
    let params = params.ok_or_else(|| {
        ErrorInfo::new("invalid_params", format!("{} requires params", method))
    })?;
    if !params.is_object() {
        return Err(ErrorInfo::new("invalid_params", "params must be an object"));
    }
    serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("{} params are invalid: {}", method, err),
        )
    })
}

pub fn parse_touch(params: Option<Value>) -> Result<TouchParams, ErrorInfo> {
    parse_params("touch", params)
}

pub fn parse_block(params: Option<Value>) -> Result<BlockParams, ErrorInfo> {
    let parsed: BlockParams = parse_params("block", params)?;
    parsed.validate()?;
    Ok(parsed)
}

pub fn parse_pointer(params: Option<Value>) -> Result<PointerParams, ErrorInfo> {
    parse_params("pointer", params)
}
