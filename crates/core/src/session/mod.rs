//! Camera session: connection lifecycle and stream state machine.
//!
//! A [`CameraSession`] owns everything needed to talk to one named camera:
//! the discovery client, the settings mirror, and, while connected, the
//! stream listener and the accepted stream connection.
//!
//! ## Connect sequence
//!
//! ```text
//! viewer                         discovery / camera
//!   |-- resolve(name, timeout) ------>|
//!   |<------------- control address --|
//!   |  bind stream listener            |
//!   |-- announce("ip:port") --------->|
//!   |<------------ settings document --|
//!   |<======= camera connects back ====|   (accept, blocks)
//!   |<======= [len][image] ... ========|   (get_image loop)
//! ```
//!
//! ## State machine
//!
//! ```text
//! Idle --connect--> Connecting --ok--> Connected --disconnect / stream end--> Idle
//!                       \--error--> Idle
//! ```
//!
//! The accepted connection exists if and only if the state is `Connected`.
//! Every transition back to `Idle` closes the connection, then the listener.

pub mod capture;
pub mod connector;

use std::fmt;
use std::io::BufReader;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::codec::{DEFAULT_MAX_FRAME_LEN, Frame, FrameReader, StreamEvent};
use crate::discovery::{Discovery, control};
use crate::error::{CameraError, Result};
use crate::settings::{SettingsDocument, SettingsStore};

pub use capture::CaptureHandle;
pub use connector::{ConnectOutcome, ConnectTask};

/// Camera service name used when none is configured.
pub const DEFAULT_CAMERA_NAME: &str = "picam";

/// Stream listener port used when none is configured.
pub const DEFAULT_STREAM_PORT: u16 = 7896;

/// Per-camera session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Logical name the camera service advertises.
    pub camera_name: String,
    /// Local port the stream listener binds. `0` picks an ephemeral port.
    pub port: u16,
    /// Local interface the stream listener binds.
    pub bind_host: IpAddr,
    /// Address announced to the camera. When `None`, it is the bind host if
    /// that is a concrete address, otherwise the local interface that routes
    /// to the camera.
    pub advertise_host: Option<IpAddr>,
    /// Largest frame accepted from the stream, in bytes.
    pub max_frame_len: usize,
}

impl SessionConfig {
    pub fn new(camera_name: &str, port: u16) -> Self {
        Self {
            camera_name: camera_name.to_string(),
            port,
            ..Self::default()
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            camera_name: DEFAULT_CAMERA_NAME.to_string(),
            port: DEFAULT_STREAM_PORT,
            bind_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            advertise_host: None,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

/// Connection state of a [`CameraSession`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    /// No sockets open. Initial state, and the state after any disconnect.
    #[default]
    Idle,
    /// A connect sequence is running (discovery, announce, or accept).
    Connecting,
    /// The camera's stream connection is accepted and readable.
    Connected,
}

/// Shared, read-only view of a session's state.
///
/// Handed to status displays so they can follow the state machine while
/// another thread owns the session itself.
#[derive(Debug, Clone, Default)]
pub struct SessionStatus {
    state: Arc<RwLock<SessionState>>,
}

impl SessionStatus {
    pub fn get(&self) -> SessionState {
        *self.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.get() == SessionState::Connected
    }

    fn set(&self, state: SessionState) {
        let mut current = self.state.write();
        if *current != state {
            tracing::debug!(old_state = ?*current, new_state = ?state, "state transition");
            *current = state;
        }
    }
}

/// Settings updates that can run from any thread.
///
/// Updates travel over the control channel to the camera's resolved
/// address, never over the stream socket, so the consumer can push settings
/// while the capture thread blocks on a frame read.
#[derive(Clone)]
pub struct RemoteControl {
    discovery: Arc<dyn Discovery>,
    remote: Arc<RwLock<Option<SocketAddr>>>,
    settings: SettingsStore,
}

impl RemoteControl {
    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    /// The camera's control address, while connected.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        *self.remote.read()
    }

    /// Send the local settings document and adopt the camera's reply.
    ///
    /// The local document is replaced with the camera's authoritative one
    /// whether or not the camera accepted the change. The return value is
    /// the camera's verdict; on `false` the caller should compare the
    /// mirrored document with what it wanted and decide whether to retry.
    ///
    /// Fails with [`CameraError::NotConnected`] when there is no resolved
    /// camera address. If the exchange itself fails, the local draft is
    /// left untouched.
    pub fn update_settings(&self) -> Result<bool> {
        let camera = self.remote_addr().ok_or(CameraError::NotConnected)?;
        let draft = self.settings.snapshot();

        let (accepted, authoritative) = control::submit(self.discovery.as_ref(), camera, &draft)?;
        if accepted {
            tracing::info!(%camera, "settings applied");
        } else {
            tracing::warn!(%camera, "camera rejected settings update");
        }

        self.settings.replace(authoritative);
        Ok(accepted)
    }
}

impl fmt::Debug for RemoteControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteControl")
            .field("remote", &self.remote_addr())
            .finish_non_exhaustive()
    }
}

/// Sockets held while connected.
struct Link {
    listener: TcpListener,
    reader: FrameReader<BufReader<TcpStream>>,
    peer: SocketAddr,
}

/// One remote camera's connection lifecycle.
///
/// Created idle. Methods that change connection state take `&mut self`, so
/// exactly one thread drives the state machine at a time; hand the session
/// to a [`ConnectTask`] or [`CaptureHandle`] to drive it in the background,
/// and use [`status`](Self::status) / [`control`](Self::control) from the
/// consumer side meanwhile.
pub struct CameraSession {
    config: SessionConfig,
    discovery: Arc<dyn Discovery>,
    settings: SettingsStore,
    status: SessionStatus,
    remote: Arc<RwLock<Option<SocketAddr>>>,
    link: Option<Link>,
}

impl CameraSession {
    /// Create an idle session. Settings start at the camera's factory
    /// defaults until the first connect replaces them.
    pub fn new(config: SessionConfig, discovery: Arc<dyn Discovery>) -> Self {
        Self {
            config,
            discovery,
            settings: SettingsStore::new(SettingsDocument::picam_defaults()),
            status: SessionStatus::default(),
            remote: Arc::new(RwLock::new(None)),
            link: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn camera_name(&self) -> &str {
        &self.config.camera_name
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn status(&self) -> SessionStatus {
        self.status.clone()
    }

    pub fn state(&self) -> SessionState {
        self.status.get()
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// The camera's control address, while connected.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        *self.remote.read()
    }

    /// The camera's end of the stream connection, while connected.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.link.as_ref().map(|link| link.peer)
    }

    /// Local address of the stream listener, while connected.
    pub fn listener_addr(&self) -> Option<SocketAddr> {
        self.link
            .as_ref()
            .and_then(|link| link.listener.local_addr().ok())
    }

    /// A handle for pushing settings from another thread.
    pub fn control(&self) -> RemoteControl {
        RemoteControl {
            discovery: self.discovery.clone(),
            remote: self.remote.clone(),
            settings: self.settings.clone(),
        }
    }

    /// Find the camera, announce our stream listener, and accept the
    /// camera's stream connection.
    ///
    /// `timeout` bounds discovery only. Accepting blocks until the camera
    /// connects back. On any failure the session stays `Idle` with no
    /// sockets open.
    pub fn connect(&mut self, timeout: Duration) -> Result<()> {
        if self.link.is_some() {
            return Err(CameraError::AlreadyConnected);
        }

        tracing::debug!(camera = %self.config.camera_name, ?timeout, "connecting");
        self.status.set(SessionState::Connecting);

        match self.establish(timeout) {
            Ok((link, remote)) => {
                tracing::info!(
                    camera = %self.config.camera_name,
                    %remote,
                    peer = %link.peer,
                    "connected"
                );
                *self.remote.write() = Some(remote);
                self.link = Some(link);
                self.status.set(SessionState::Connected);
                Ok(())
            }
            Err(e) => {
                tracing::debug!(camera = %self.config.camera_name, error = %e, "connect failed");
                self.status.set(SessionState::Idle);
                Err(e)
            }
        }
    }

    /// The fallible part of `connect`. Sockets opened here are dropped on
    /// every early return.
    fn establish(&self, timeout: Duration) -> Result<(Link, SocketAddr)> {
        let remote = self.discovery.resolve(&self.config.camera_name, timeout)?;

        let listener = TcpListener::bind((self.config.bind_host, self.config.port))?;
        let listen_addr = listener.local_addr()?;
        let advertised = SocketAddr::new(self.reachable_ip(remote)?, listen_addr.port());
        tracing::debug!(listen = %listen_addr, %advertised, "stream listener bound");

        let document = control::announce(self.discovery.as_ref(), remote, advertised)?;
        self.settings.replace(document);

        let (stream, peer) = listener.accept()?;
        let reader = FrameReader::with_max_frame_len(BufReader::new(stream), self.config.max_frame_len);

        Ok((
            Link {
                listener,
                reader,
                peer,
            },
            remote,
        ))
    }

    /// Local address the camera can reach us on.
    fn reachable_ip(&self, remote: SocketAddr) -> Result<IpAddr> {
        if let Some(host) = self.config.advertise_host {
            return Ok(host);
        }
        if !self.config.bind_host.is_unspecified() {
            return Ok(self.config.bind_host);
        }

        // Connecting a UDP socket only consults the routing table; nothing is sent.
        let unspecified = match remote {
            SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        let route = UdpSocket::bind((unspecified, 0))?;
        route.connect(remote)?;
        Ok(route.local_addr()?.ip())
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` when the stream ends or breaks; the session has
    /// then already closed both sockets and is `Idle`. Only calling this
    /// while not connected is an error.
    pub fn get_image(&mut self) -> Result<Option<Frame>> {
        match self.next_event()? {
            StreamEvent::Frame(frame) => Ok(Some(frame)),
            StreamEvent::EndOfStream | StreamEvent::Fault(_) => Ok(None),
        }
    }

    /// Like [`get_image`](Self::get_image), but tells a clean end of stream
    /// apart from a fault.
    pub fn next_event(&mut self) -> Result<StreamEvent> {
        let link = self.link.as_mut().ok_or(CameraError::NotConnected)?;
        let event = link.reader.next_event();

        match &event {
            StreamEvent::Frame(_) => {}
            StreamEvent::EndOfStream => {
                tracing::info!(camera = %self.config.camera_name, "camera ended the stream");
                self.release("end of stream");
            }
            StreamEvent::Fault(fault) => {
                tracing::warn!(camera = %self.config.camera_name, error = %fault, "stream fault");
                self.release("stream fault");
            }
        }

        Ok(event)
    }

    /// Push the local settings document to the camera. See
    /// [`RemoteControl::update_settings`].
    pub fn update_settings(&self) -> Result<bool> {
        self.control().update_settings()
    }

    /// Close the stream connection and the listener.
    ///
    /// Calling this while idle is a usage error.
    pub fn disconnect(&mut self) -> Result<()> {
        if self.link.is_none() {
            return Err(CameraError::NotConnected);
        }
        self.release("disconnect requested");
        Ok(())
    }

    /// A second handle on the stream socket, used to unblock a pending read
    /// from another thread via `shutdown`.
    pub(crate) fn stream_handle(&self) -> Result<TcpStream> {
        let link = self.link.as_ref().ok_or(CameraError::NotConnected)?;
        Ok(link.reader.get_ref().get_ref().try_clone()?)
    }

    fn release(&mut self, reason: &'static str) {
        let Some(link) = self.link.take() else {
            return;
        };
        let Link {
            listener,
            reader,
            peer,
        } = link;

        // Handles cloned from the stream (see `stream_handle`) would keep the
        // connection open after the drop; shutdown closes it for all of them.
        if let Err(e) = reader.get_ref().get_ref().shutdown(Shutdown::Both) {
            tracing::trace!(error = %e, "stream shutdown");
        }
        drop(reader);
        drop(listener);
        *self.remote.write() = None;
        self.status.set(SessionState::Idle);

        tracing::info!(camera = %self.config.camera_name, %peer, reason, "disconnected");
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        self.release("session dropped");
    }
}

impl fmt::Debug for CameraSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraSession")
            .field("camera", &self.config.camera_name)
            .field("port", &self.config.port)
            .field("state", &self.state())
            .field("remote", &self.remote_addr())
            .field("peer", &self.peer_addr())
            .finish()
    }
}
