//! Session state machine that gates scanning and sending.
//!
//! The two flags live in a single [`watch`] value owned by the
//! [`Controller`]; everything else reads them through the controller and
//! changes them only through its transition methods. Long-running dispatch
//! runs subscribe to the same value so that `/stop` wakes them out of a
//! pacing wait instead of waiting for the timer.

use tokio::sync::watch;
use tracing::info;

/// Snapshot of the two session flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionState {
    /// Room messages are being collected.
    pub scanning: bool,
    /// The audience is being notified.
    pub sending: bool,
}

/// Handle identifying one dispatch run started by `/start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunTicket(u64);

/// Result of asking to begin scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanTransition {
    /// Scanning was off and is now on.
    Started,
    /// Scanning was already on; nothing changed.
    AlreadyScanning,
}

/// Why `/start` was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StartRefusal {
    /// Sending requires an active scan.
    #[error("start parsing first")]
    NotScanning,
    /// A dispatch run is already in progress.
    #[error("sending is already active")]
    AlreadySending,
}

#[derive(Debug, Clone, Copy, Default)]
struct Inner {
    session: SessionState,
    run: u64,
}

impl Inner {
    fn owns(&self, ticket: RunTicket) -> bool {
        self.session.sending && self.run == ticket.0
    }
}

/// Owner of the session flags.
#[derive(Debug)]
pub struct Controller {
    inner: watch::Sender<Inner>,
}

impl Controller {
    /// Create a controller in the idle state.
    pub fn new() -> Self {
        let (inner, _) = watch::channel(Inner::default());
        Self { inner }
    }

    /// Current flags.
    pub fn state(&self) -> SessionState {
        self.inner.borrow().session
    }

    /// Whether room messages should be processed right now.
    pub fn is_scanning(&self) -> bool {
        self.inner.borrow().session.scanning
    }

    /// Whether a dispatch run is active.
    pub fn is_sending(&self) -> bool {
        self.inner.borrow().session.sending
    }

    /// `/parse`: turn scanning on.
    pub fn begin_scan(&self) -> ScanTransition {
        let started = self.inner.send_if_modified(|s| {
            if s.session.scanning {
                return false;
            }
            s.session.scanning = true;
            true
        });
        if started {
            info!("scanning enabled");
            ScanTransition::Started
        } else {
            ScanTransition::AlreadyScanning
        }
    }

    /// `/start`: turn sending on and issue a ticket for the new run.
    ///
    /// # Errors
    ///
    /// Refuses when scanning is off or a run is already active.
    pub fn begin_sending(&self) -> Result<RunTicket, StartRefusal> {
        let mut outcome = Err(StartRefusal::NotScanning);
        self.inner.send_if_modified(|s| {
            if !s.session.scanning {
                return false;
            }
            if s.session.sending {
                outcome = Err(StartRefusal::AlreadySending);
                return false;
            }
            s.session.sending = true;
            s.run = s.run.wrapping_add(1);
            outcome = Ok(RunTicket(s.run));
            true
        });
        if let Ok(ticket) = outcome {
            info!(run = ticket.0, "sending enabled");
        }
        outcome
    }

    /// `/stop`: clear both flags. Returns `true` if anything was active.
    pub fn stop(&self) -> bool {
        let changed = self.inner.send_if_modified(|s| {
            let was_active = s.session.scanning || s.session.sending;
            s.session = SessionState::default();
            was_active
        });
        if changed {
            info!("scanning and sending disabled");
        }
        changed
    }

    /// Whether the run identified by `ticket` may keep going.
    pub fn is_current(&self, ticket: RunTicket) -> bool {
        self.inner.borrow().owns(ticket)
    }

    /// Mark a run as finished. Only clears `sending` if the ticket still owns it.
    pub fn finish_run(&self, ticket: RunTicket) {
        let cleared = self.inner.send_if_modified(|s| {
            if !s.owns(ticket) {
                return false;
            }
            s.session.sending = false;
            true
        });
        if cleared {
            info!(run = ticket.0, "dispatch run finished, sending disabled");
        }
    }

    /// Resolve once the run identified by `ticket` has been cancelled or superseded.
    pub async fn cancelled(&self, ticket: RunTicket) {
        let mut rx = self.inner.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|s| !s.owns(ticket)).await;
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}
