//! # Shutdown Coordination
//!
//! One [`CancellationToken`] is the lifetime of the whole process. It is
//! created before anything else starts, observed by every long-running wait
//! and cancelled exactly once, by the signal listener or by a startup
//! failure.
//!
//! ## State Machine
//!
//! ```text
//! Running ──signal / startup failure──→ Stopping ──main flow returns──→ Stopped
//! ```
//!
//! Only the first [`ShutdownCoordinator::trigger`] moves `Running` to
//! `Stopping`; later calls change nothing and log nothing.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use thiserror::Error;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const RUNNING: u8 = 0;
const STOPPING: u8 = 1;
const STOPPED: u8 = 2;

/// Failure to install the signal listener.
#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error("install {signal} handler: {source}")]
    Install {
        signal: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Lifecycle of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Stopping,
    Stopped,
}

/// What cancelled the lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Interrupt,
    Terminate,
    StartupFailure,
}

impl ShutdownReason {
    /// Whether the operator asked for the stop.
    pub fn is_signal(&self) -> bool {
        matches!(self, Self::Interrupt | Self::Terminate)
    }
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => f.write_str("SIGINT"),
            Self::Terminate => f.write_str("SIGTERM"),
            Self::StartupFailure => f.write_str("startup failure"),
        }
    }
}

/// Owner of the process lifetime.
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    lifetime: CancellationToken,
    state: Arc<AtomicU8>,
    reason: Arc<OnceLock<ShutdownReason>>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            lifetime: CancellationToken::new(),
            state: Arc::new(AtomicU8::new(RUNNING)),
            reason: Arc::new(OnceLock::new()),
        }
    }

    /// A handle on the lifetime, for waits that must end on shutdown.
    pub fn lifetime(&self) -> CancellationToken {
        self.lifetime.clone()
    }

    pub fn state(&self) -> ShutdownState {
        match self.state.load(Ordering::Acquire) {
            RUNNING => ShutdownState::Running,
            STOPPING => ShutdownState::Stopping,
            _ => ShutdownState::Stopped,
        }
    }

    /// The cause of the shutdown, once one was triggered.
    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.get().copied()
    }

    /// Install the SIGINT and SIGTERM handlers and spawn the listener.
    ///
    /// Handlers are installed before this returns, so a signal delivered
    /// afterwards is never lost. The listener handles one signal, drops both
    /// handlers and triggers shutdown; it also exits quietly if the lifetime
    /// is cancelled some other way.
    pub fn arm(&self) -> Result<JoinHandle<()>, ShutdownError> {
        let mut interrupt = signal(SignalKind::interrupt()).map_err(|source| {
            ShutdownError::Install {
                signal: "SIGINT",
                source,
            }
        })?;
        let mut terminate = signal(SignalKind::terminate()).map_err(|source| {
            ShutdownError::Install {
                signal: "SIGTERM",
                source,
            }
        })?;

        let coordinator = self.clone();
        Ok(tokio::spawn(async move {
            let reason = tokio::select! {
                _ = interrupt.recv() => ShutdownReason::Interrupt,
                _ = terminate.recv() => ShutdownReason::Terminate,
                _ = coordinator.lifetime.cancelled() => return,
            };

            // Disarm before cancelling: a second signal finds no listener.
            drop(interrupt);
            drop(terminate);

            coordinator.trigger(reason);
        }))
    }

    /// Move to `Stopping` and cancel the lifetime.
    ///
    /// Returns `false`, doing nothing, if shutdown was already triggered.
    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        if self
            .state
            .compare_exchange(RUNNING, STOPPING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let _ = self.reason.set(reason);
        if reason.is_signal() {
            info!(signal = %reason, "Received signal - Stopping...");
        } else {
            warn!(%reason, "Stopping...");
        }

        self.lifetime.cancel();
        true
    }

    /// Record that the main flow has returned. Terminal.
    pub fn mark_stopped(&self) {
        self.state.store(STOPPED, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    fn test_starts_running() {
        let shutdown = ShutdownCoordinator::new();
        assert_eq!(shutdown.state(), ShutdownState::Running);
        assert!(!shutdown.lifetime().is_cancelled());
        assert_eq!(shutdown.reason(), None);
    }

    #[test]
    fn test_trigger_cancels_exactly_once() {
        let shutdown = ShutdownCoordinator::new();
        let lifetime = shutdown.lifetime();

        assert!(shutdown.trigger(ShutdownReason::Terminate));
        assert!(lifetime.is_cancelled());
        assert_eq!(shutdown.state(), ShutdownState::Stopping);

        assert!(!shutdown.trigger(ShutdownReason::Interrupt));
        assert!(!shutdown.trigger(ShutdownReason::StartupFailure));
        assert_eq!(shutdown.reason(), Some(ShutdownReason::Terminate));
        assert_eq!(shutdown.state(), ShutdownState::Stopping);
    }

    #[test]
    fn test_clones_share_lifetime() {
        let shutdown = ShutdownCoordinator::new();
        let clone = shutdown.clone();

        assert!(clone.trigger(ShutdownReason::Interrupt));
        assert!(shutdown.lifetime().is_cancelled());
        assert!(!shutdown.trigger(ShutdownReason::Interrupt));
    }

    #[test]
    fn test_mark_stopped_is_terminal() {
        let shutdown = ShutdownCoordinator::new();
        shutdown.trigger(ShutdownReason::StartupFailure);
        shutdown.mark_stopped();

        assert_eq!(shutdown.state(), ShutdownState::Stopped);
        assert!(!shutdown.trigger(ShutdownReason::Terminate));
        assert_eq!(shutdown.state(), ShutdownState::Stopped);
    }

    #[test]
    fn test_signal_reasons() {
        assert!(ShutdownReason::Interrupt.is_signal());
        assert!(ShutdownReason::Terminate.is_signal());
        assert!(!ShutdownReason::StartupFailure.is_signal());
    }

    #[tokio::test]
    async fn test_listener_exits_when_cancelled_elsewhere() {
        let shutdown = ShutdownCoordinator::new();
        let listener = shutdown.arm().unwrap();

        shutdown.trigger(ShutdownReason::StartupFailure);

        timeout(Duration::from_secs(5), listener)
            .await
            .expect("listener should stop with the lifetime")
            .unwrap();
        assert_eq!(shutdown.reason(), Some(ShutdownReason::StartupFailure));
    }

    #[tokio::test]
    async fn test_waiters_wake_on_trigger() {
        let shutdown = ShutdownCoordinator::new();
        let lifetime = shutdown.lifetime();
        let waiter = tokio::spawn(async move { lifetime.cancelled().await });

        shutdown.trigger(ShutdownReason::Interrupt);

        timeout(Duration::from_secs(5), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }
}
