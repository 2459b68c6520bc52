//! Wire shapes for the line-oriented request protocol
//!
//! One JSON object per line in each direction. Requests are tagged by `op`.

use crate::errors::HsmError;
use crate::policy::TxSummary;
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn default_persist() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Validate and stage a policy document
    LoadPolicy { policy: Value },
    /// Stage the policy saved by an earlier activation
    LoadSaved,
    Activate {
        #[serde(default = "default_persist")]
        persist: bool,
    },
    /// Capture a remote user's credential for the next decision
    AuthUser {
        username: String,
        token: String,
        counter: u64,
    },
    LocalCode { code: String },
    SignTxn {
        tx: TxSummary,
        /// SHA-256 of the transaction, hex
        digest: String,
        #[serde(default)]
        narrative: String,
    },
    SignMsg {
        text: String,
        address: String,
        subpath: String,
    },
    ShareXpub { subpath: String },
    ShareAddr {
        #[serde(default)]
        subpath: String,
        #[serde(default)]
        p2sh: bool,
    },
    FetchSecret,
    Status,
    Backup,
    Restore { policy: String },
}

impl Request {
    pub fn op(&self) -> &'static str {
        match self {
            Request::LoadPolicy { .. } => "load_policy",
            Request::LoadSaved => "load_saved",
            Request::Activate { .. } => "activate",
            Request::AuthUser { .. } => "auth_user",
            Request::LocalCode { .. } => "local_code",
            Request::SignTxn { .. } => "sign_txn",
            Request::SignMsg { .. } => "sign_msg",
            Request::ShareXpub { .. } => "share_xpub",
            Request::ShareAddr { .. } => "share_addr",
            Request::FetchSecret => "fetch_secret",
            Request::Status => "status",
            Request::Backup => "backup",
            Request::Restore { .. } => "restore",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Machine-readable error class
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
}

impl Response {
    pub fn ok(result: Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
            kind: None,
        }
    }

    pub fn empty() -> Self {
        Self {
            ok: true,
            result: None,
            error: None,
            kind: None,
        }
    }

    pub fn from_error(err: &HsmError) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(err.to_string()),
            kind: Some(error_kind(err)),
        }
    }

    pub fn to_line(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"ok":false,"error":"unencodable response"}"#.to_string())
    }
}

fn error_kind(err: &HsmError) -> &'static str {
    match err {
        HsmError::Validation(_) => "invalid_policy",
        HsmError::Refused(_) => "refused",
        HsmError::BadRequest(_) => "bad_request",
        HsmError::AlreadyActive | HsmError::NotActive | HsmError::NothingStaged => "state",
        HsmError::Storage(_) | HsmError::SecretStore(_) => "storage",
        HsmError::Config(_) => "config",
        HsmError::Internal(_) => "internal",
    }
}

/// Parse a 64-character hex digest
pub fn parse_digest(text: &str) -> Result<[u8; 32], HsmError> {
    let raw = hex::decode(text.trim())
        .map_err(|e| HsmError::BadRequest(format!("digest: {}", e)))?;
    raw.try_into()
        .map_err(|_| HsmError::BadRequest("digest: need 32 bytes".to_string()))
}
