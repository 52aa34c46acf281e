//! Capture thread: drains a connected session's stream into a
//! [`FrameChannel`].
//!
//! ```text
//! camera ==[len][image]==> capture thread --push--> FrameChannel --try_pop--> consumer
//!                               ^                                         |
//!                               +------ pause / resume / stop ------------+
//! ```
//!
//! While paused, frames are still read off the socket, so the camera never
//! backs up, but they are dropped instead of queued.

use std::fmt;
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use super::{CameraSession, SessionStatus};
use crate::channel::FrameChannel;
use crate::error::{CameraError, Result};

struct Shared {
    stop: AtomicBool,
    paused: AtomicBool,
    captured: AtomicU64,
    dropped: AtomicU64,
}

/// Handle to a running capture thread.
///
/// The thread owns the session until it exits, then hands it back through
/// [`join`](Self::join), disconnected and idle.
pub struct CaptureHandle {
    shared: Arc<Shared>,
    status: SessionStatus,
    stream: TcpStream,
    handle: JoinHandle<CameraSession>,
}

impl CaptureHandle {
    /// Start reading frames from `session` into `channel`.
    ///
    /// Fails with [`CameraError::NotConnected`] unless the session is
    /// connected.
    pub fn spawn(mut session: CameraSession, channel: FrameChannel) -> Result<Self> {
        let stream = session.stream_handle()?;
        let status = session.status();
        let shared = Arc::new(Shared {
            stop: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            captured: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });

        let worker = shared.clone();
        let handle = thread::spawn(move || {
            tracing::info!(camera = session.camera_name(), "capture started");

            while !worker.stop.load(Ordering::SeqCst) {
                match session.get_image() {
                    Ok(Some(frame)) => {
                        if worker.paused.load(Ordering::SeqCst) {
                            worker.dropped.fetch_add(1, Ordering::Relaxed);
                            tracing::trace!(sequence = frame.sequence(), "paused, frame dropped");
                            continue;
                        }
                        tracing::trace!(sequence = frame.sequence(), bytes = frame.encoded_len(), "frame captured");
                        worker.captured.fetch_add(1, Ordering::Relaxed);
                        if channel.push(frame).is_some() {
                            tracing::trace!("channel full, oldest frame evicted");
                        }
                    }
                    // Stream ended or broke; the session already went idle.
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!(error = %e, "capture loop exiting");
                        break;
                    }
                }
            }

            // No-op when the stream already ended; otherwise stop was requested
            // while it was still healthy.
            session.release("capture stopped");

            tracing::info!(
                camera = session.camera_name(),
                captured = worker.captured.load(Ordering::Relaxed),
                dropped = worker.dropped.load(Ordering::Relaxed),
                "capture stopped"
            );
            session
        });

        Ok(Self {
            shared,
            status,
            stream,
            handle,
        })
    }

    /// Keep reading the stream but discard frames.
    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::SeqCst);
        tracing::debug!("capture paused");
    }

    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::SeqCst);
        tracing::debug!("capture resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    /// Frames pushed to the channel so far.
    pub fn frames_captured(&self) -> u64 {
        self.shared.captured.load(Ordering::Relaxed)
    }

    /// Frames read while paused and discarded.
    pub fn frames_dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Ask the thread to exit. Does not wait.
    ///
    /// Shutting down the socket wakes a read that is blocked waiting for
    /// the next frame.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            // Already closed when the stream ended on its own.
            tracing::trace!(error = %e, "stream shutdown");
        }
    }

    /// Wait for the thread to exit and take the idle session back.
    pub fn join(self) -> Result<CameraSession> {
        self.handle.join().map_err(|_| CameraError::WorkerPanicked)
    }

    /// [`stop`](Self::stop), then [`join`](Self::join).
    pub fn stop_and_join(self) -> Result<CameraSession> {
        self.stop();
        self.join()
    }
}

impl fmt::Debug for CaptureHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureHandle")
            .field("paused", &self.is_paused())
            .field("captured", &self.frames_captured())
            .field("dropped", &self.frames_dropped())
            .field("state", &self.status.get())
            .finish()
    }
}
