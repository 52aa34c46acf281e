pub mod channel;
pub mod codec;
pub mod discovery;
pub mod error;
pub mod session;
pub mod settings;

pub use channel::FrameChannel;
pub use codec::{Frame, StreamEvent, StreamFault};
pub use discovery::{BeaconConfig, BeaconDiscovery, Discovery};
pub use error::{CameraError, Result};
pub use session::{
    CameraSession, CaptureHandle, ConnectOutcome, ConnectTask, RemoteControl, SessionConfig, SessionState,
    SessionStatus,
};
pub use settings::{Parameter, SettingsDocument, SettingsStore};
