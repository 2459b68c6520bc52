//! Request layer for autosign
//!
//! Provides:
//! - JSON-lines request and response shapes
//! - `AppState`, which serializes every request against the device session

pub mod requests;

pub use requests::{Request, Response};

use crate::device::DeviceSession;
use crate::errors::{HsmError, Result};
use crate::security::new_credential_proof;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use zeroize::Zeroize;

/// Shared application state
pub struct AppState {
    /// Held for the whole of each request; decisions never interleave
    session: Mutex<DeviceSession>,
}

impl AppState {
    pub fn new(session: DeviceSession) -> Self {
        Self {
            session: Mutex::new(session),
        }
    }

    /// Handle one raw request line and produce one response line.
    pub async fn handle_line(&self, line: &str) -> String {
        let response = match serde_json::from_str::<Request>(line) {
            Ok(req) => self.handle(req).await,
            Err(e) => {
                warn!("Unparseable request: {}", e);
                Response::from_error(&HsmError::BadRequest(e.to_string()))
            }
        };
        response.to_line()
    }

    pub async fn handle(&self, req: Request) -> Response {
        let op = req.op();
        debug!("Request: {}", op);

        let mut session = self.session.lock().await;
        match dispatch(&mut session, req) {
            Ok(Some(result)) => Response::ok(result),
            Ok(None) => Response::empty(),
            Err(e) => {
                info!("{} failed: {}", op, e);
                Response::from_error(&e)
            }
        }
    }
}

fn dispatch(session: &mut DeviceSession, req: Request) -> Result<Option<Value>> {
    match req {
        Request::LoadPolicy { policy } => {
            let store = session.stage(policy)?;
            Ok(Some(json!({ "summary": store.summary() })))
        }
        Request::LoadSaved => {
            let store = session.stage_saved()?;
            Ok(Some(json!({ "summary": store.summary() })))
        }
        Request::Activate { persist } => {
            session.activate(persist)?;
            Ok(None)
        }
        Request::AuthUser {
            username,
            mut token,
            counter,
        } => {
            let proof = new_credential_proof(&token);
            token.zeroize();
            session.active_mut()?.submit_credential(&username, proof, counter)?;
            Ok(None)
        }
        Request::LocalCode { code } => {
            session.active_mut()?.enter_local_code(&code);
            Ok(None)
        }
        Request::SignTxn {
            tx,
            digest,
            narrative,
        } => {
            let digest = requests::parse_digest(&digest)?;
            let verdict = session
                .active_mut()?
                .approve_transaction(&tx, &digest, &narrative);
            Ok(Some(serde_json::to_value(verdict)?))
        }
        Request::SignMsg {
            text,
            address,
            subpath,
        } => {
            let verdict = session
                .active_mut()?
                .approve_message(text.as_bytes(), &address, &subpath);
            Ok(Some(serde_json::to_value(verdict)?))
        }
        Request::ShareXpub { subpath } => {
            let allowed = session.active_mut()?.approve_xpub_share(&subpath);
            Ok(Some(json!({ "allowed": allowed })))
        }
        Request::ShareAddr { subpath, p2sh } => {
            let allowed = session.active_mut()?.approve_address_share(&subpath, p2sh);
            Ok(Some(json!({ "allowed": allowed })))
        }
        Request::FetchSecret => {
            let secret = session.active_mut()?.fetch_secret()?;
            Ok(Some(json!({ "secret": STANDARD.encode(secret.expose()) })))
        }
        Request::Status => Ok(Some(serde_json::to_value(session.status())?)),
        Request::Backup => Ok(Some(json!({ "policy": session.capture_backup() }))),
        Request::Restore { policy } => {
            session.restore_backup(&policy)?;
            Ok(None)
        }
    }
}
