//! Background connect loop.
//!
//! [`ConnectTask`] moves a session onto a worker thread and calls
//! [`CameraSession::connect`] until it succeeds, fails for good, or is
//! cancelled. The session comes back through [`ConnectTask::join`] in every
//! case.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{CameraSession, SessionStatus};
use crate::error::{CameraError, Result};

/// Pause between a failed attempt and the next one.
const RETRY_DELAY: Duration = Duration::from_millis(200);

/// How a [`ConnectTask`] finished.
#[derive(Debug)]
pub enum ConnectOutcome {
    Connected(CameraSession),
    /// Cancelled between attempts. The session is idle.
    Cancelled(CameraSession),
    /// An attempt failed with a non-retryable error. The session is idle.
    Failed(CameraSession, CameraError),
}

impl ConnectOutcome {
    pub fn session(&self) -> &CameraSession {
        match self {
            Self::Connected(session) | Self::Cancelled(session) | Self::Failed(session, _) => session,
        }
    }

    pub fn into_session(self) -> CameraSession {
        match self {
            Self::Connected(session) | Self::Cancelled(session) | Self::Failed(session, _) => session,
        }
    }

    /// The connected session, or why there isn't one.
    pub fn into_result(self) -> Result<CameraSession> {
        match self {
            Self::Connected(session) => Ok(session),
            Self::Cancelled(_) => Err(CameraError::Cancelled),
            Self::Failed(_, e) => Err(e),
        }
    }
}

struct Shared {
    cancelled: AtomicBool,
    attempts: AtomicU32,
}

/// Handle to a running connect loop.
pub struct ConnectTask {
    shared: Arc<Shared>,
    status: SessionStatus,
    handle: JoinHandle<ConnectOutcome>,
}

impl ConnectTask {
    /// Start retrying `session.connect(attempt_timeout)` on a new thread.
    ///
    /// Each attempt waits at most `attempt_timeout` for discovery. Cancel is
    /// checked between attempts, so it takes effect within one attempt.
    pub fn spawn(mut session: CameraSession, attempt_timeout: Duration) -> Self {
        let shared = Arc::new(Shared {
            cancelled: AtomicBool::new(false),
            attempts: AtomicU32::new(0),
        });
        let status = session.status();

        let worker = shared.clone();
        let handle = thread::spawn(move || {
            loop {
                if worker.cancelled.load(Ordering::SeqCst) {
                    tracing::info!(camera = session.camera_name(), "connect cancelled");
                    return ConnectOutcome::Cancelled(session);
                }

                let attempt = worker.attempts.fetch_add(1, Ordering::SeqCst) + 1;
                match session.connect(attempt_timeout) {
                    Ok(()) => return ConnectOutcome::Connected(session),
                    Err(e) if e.is_retryable() => {
                        tracing::debug!(
                            camera = session.camera_name(),
                            attempt,
                            error = %e,
                            "connect attempt failed, retrying"
                        );
                        if !worker.cancelled.load(Ordering::SeqCst) {
                            thread::sleep(RETRY_DELAY);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(camera = session.camera_name(), attempt, error = %e, "connect failed");
                        return ConnectOutcome::Failed(session, e);
                    }
                }
            }
        });

        Self {
            shared,
            status,
            handle,
        }
    }

    /// Stop retrying. An attempt already in progress runs to completion.
    pub fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Attempts started so far.
    pub fn attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    /// Wait for the loop to finish and take the session back.
    pub fn join(self) -> Result<ConnectOutcome> {
        self.handle.join().map_err(|_| CameraError::WorkerPanicked)
    }
}

impl fmt::Debug for ConnectTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectTask")
            .field("attempts", &self.attempts())
            .field("cancelled", &self.is_cancelled())
            .field("state", &self.status.get())
            .finish()
    }
}
