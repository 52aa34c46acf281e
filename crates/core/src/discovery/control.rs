//! Typed control messages carried over [`Discovery::exchange`].
//!
//! ## Messages
//!
//! | Request | Reply |
//! |---------|-------|
//! | announce: `"ip:port"` of our stream listener | the camera's settings document |
//! | submit: a full settings document | `[accepted, document]` |
//!
//! On announce, the camera connects back to the announced address and
//! starts streaming. On submit, it applies what it can and always answers
//! with the document it actually ended up with.

use std::net::SocketAddr;

use serde_json::Value;

use super::Discovery;
use crate::error::{CameraError, Result};
use crate::settings::SettingsDocument;

/// Tell the camera where to stream to. Returns its current settings.
pub fn announce(
    discovery: &dyn Discovery,
    camera: SocketAddr,
    listener: SocketAddr,
) -> Result<SettingsDocument> {
    tracing::debug!(%camera, %listener, "announcing stream listener");
    let reply = discovery.exchange(camera, &Value::String(listener.to_string()))?;
    serde_json::from_value(reply)
        .map_err(|e| CameraError::exchange(format!("announce reply is not a settings document: {e}")))
}

/// Submit a settings document. Returns the camera's verdict and its
/// authoritative document, which may differ from what was sent.
pub fn submit(
    discovery: &dyn Discovery,
    camera: SocketAddr,
    document: &SettingsDocument,
) -> Result<(bool, SettingsDocument)> {
    let request = serde_json::to_value(document)?;
    let reply = discovery.exchange(camera, &request)?;
    serde_json::from_value(reply)
        .map_err(|e| CameraError::exchange(format!("submit reply is not [accepted, document]: {e}")))
}
