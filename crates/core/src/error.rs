//! Error types for the remote camera client library.

use std::time::Duration;

/// Errors that can occur in the camera client library.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Discovery**: [`DiscoveryTimeout`](Self::DiscoveryTimeout),
///   [`NotFound`](Self::NotFound): the camera name could not be resolved.
/// - **Control channel**: [`Exchange`](Self::Exchange),
///   [`Json`](Self::Json): a request/reply exchange failed or returned
///   something that is not the expected message.
/// - **Usage**: [`NotConnected`](Self::NotConnected),
///   [`AlreadyConnected`](Self::AlreadyConnected): an operation was called
///   in the wrong session state. These indicate a caller bug.
/// - **Settings**: [`UnknownParameter`](Self::UnknownParameter),
///   [`ParameterKind`](Self::ParameterKind),
///   [`InvalidValue`](Self::InvalidValue).
/// - **Transport**: [`Io`](Self::Io): socket failures outside the image stream.
///
/// Faults on the image stream itself are not errors; they are reported as
/// [`StreamFault`](crate::codec::StreamFault) and absorbed by the session.
#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A control message could not be encoded or decoded as JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Encoding a decoded frame to a file failed.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// No camera answered within the discovery timeout.
    #[error("no camera named {name:?} answered within {timeout:?}")]
    DiscoveryTimeout { name: String, timeout: Duration },

    /// A discovery responder answered, but does not know the camera.
    #[error("camera {0:?} is not advertised")]
    NotFound(String),

    /// The remote replied with something other than the expected message.
    #[error("control exchange failed: {reason}")]
    Exchange { reason: String },

    /// The operation requires a connected session.
    #[error("session is not connected")]
    NotConnected,

    /// `connect` was called on a session that is not idle.
    #[error("session is already connected")]
    AlreadyConnected,

    /// The settings document has no parameter at this path.
    #[error("unknown parameter: {0}")]
    UnknownParameter(String),

    /// The parameter exists but is of a different kind than the write expects.
    #[error("parameter {name} is not a {expected}")]
    ParameterKind { name: String, expected: &'static str },

    /// A textual value could not be parsed for the parameter's kind.
    #[error("invalid value {value:?} for parameter {name}")]
    InvalidValue { name: String, value: String },

    /// A connect retry loop was cancelled before it succeeded.
    #[error("connect cancelled")]
    Cancelled,

    /// A background connect or capture thread panicked.
    #[error("background worker thread panicked")]
    WorkerPanicked,
}

impl CameraError {
    pub(crate) fn exchange(reason: impl Into<String>) -> Self {
        Self::Exchange {
            reason: reason.into(),
        }
    }

    /// Whether a connect attempt that failed with this error is worth retrying.
    ///
    /// Discovery misses and control-channel hiccups are transient: the camera
    /// may simply not be up yet. Usage violations and settings errors are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DiscoveryTimeout { .. }
                | Self::NotFound(_)
                | Self::Exchange { .. }
                | Self::Json(_)
                | Self::Io(_)
        )
    }
}

/// Convenience alias for `Result<T, CameraError>`.
pub type Result<T> = std::result::Result<T, CameraError>;
