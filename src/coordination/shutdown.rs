//! Graceful Shutdown Handler
//!
//! Turns OS signals into cancellation of the reconciliation subsystem and
//! sequences the drain so the database pool is closed last.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ShutdownConfig;

/// Shutdown signal types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Normal graceful shutdown (SIGTERM, SIGINT)
    Graceful,
    /// Urgent shutdown - reduced drain timeout
    Urgent,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownSignal::Graceful => write!(f, "graceful"),
            ShutdownSignal::Urgent => write!(f, "urgent"),
        }
    }
}

/// Shutdown phase tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    /// Not shutting down
    Running,
    /// Cancelling the poller and worker backoffs
    Cancelling,
    /// Waiting for in-flight worker activity
    DrainingWorkers,
    /// Closing database connections
    ClosingConnections,
    /// Shutdown complete
    Complete,
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownPhase::Running => write!(f, "running"),
            ShutdownPhase::Cancelling => write!(f, "cancelling"),
            ShutdownPhase::DrainingWorkers => write!(f, "draining_workers"),
            ShutdownPhase::ClosingConnections => write!(f, "closing_connections"),
            ShutdownPhase::Complete => write!(f, "complete"),
        }
    }
}

/// Graceful shutdown coordinator
pub struct GracefulShutdown {
    drain_timeout: Duration,
    token: CancellationToken,
    shutdown_requested: AtomicBool,
    signal: watch::Sender<Option<ShutdownSignal>>,
    phase: watch::Sender<ShutdownPhase>,
}

impl GracefulShutdown {
    pub fn new(drain_timeout: Duration) -> Self {
        let (signal, _) = watch::channel(None);
        let (phase, _) = watch::channel(ShutdownPhase::Running);

        Self {
            drain_timeout,
            token: CancellationToken::new(),
            shutdown_requested: AtomicBool::new(false),
            signal,
            phase,
        }
    }

    pub fn from_config(config: &ShutdownConfig) -> Self {
        Self::new(Duration::from_secs(config.timeout_secs))
    }

    /// Token cancelled as soon as shutdown is requested
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    pub fn current_phase(&self) -> ShutdownPhase {
        *self.phase.borrow()
    }

    /// Request shutdown with specified signal type
    pub fn request_shutdown(&self, signal: ShutdownSignal) {
        if self.shutdown_requested.swap(true, Ordering::SeqCst) {
            warn!("Shutdown already requested, ignoring duplicate signal: {}", signal);
            return;
        }

        info!("Shutdown requested: {}", signal);
        self.signal.send_replace(Some(signal));
        self.token.cancel();
    }

    /// Wait until someone requests shutdown
    pub async fn wait_for_request(&self) -> ShutdownSignal {
        let mut rx = self.signal.subscribe();
        loop {
            if let Some(signal) = *rx.borrow_and_update() {
                return signal;
            }
            if rx.changed().await.is_err() {
                return ShutdownSignal::Graceful;
            }
        }
    }

    fn set_phase(&self, phase: ShutdownPhase) {
        self.phase.send_replace(phase);
        info!("Shutdown phase: {}", phase);
    }

    fn effective_timeout(&self) -> Duration {
        match *self.signal.borrow() {
            Some(ShutdownSignal::Urgent) => self.drain_timeout / 4,
            _ => self.drain_timeout,
        }
    }

    /// Execute graceful shutdown sequence
    ///
    /// 1. Cancel the shared token
    /// 2. Wait for `drain` within the drain timeout
    /// 3. Run `close_connections`, even after a drain timeout
    pub async fn execute<D, C>(&self, drain: D, close_connections: C) -> Result<(), ShutdownError>
    where
        D: Future<Output = ()>,
        C: Future<Output = ()>,
    {
        let start = std::time::Instant::now();

        self.set_phase(ShutdownPhase::Cancelling);
        self.shutdown_requested.store(true, Ordering::SeqCst);
        self.token.cancel();

        self.set_phase(ShutdownPhase::DrainingWorkers);
        let timeout = self.effective_timeout();
        let drained = tokio::time::timeout(timeout, drain).await.is_ok();
        if drained {
            debug!("Workers drained");
        } else {
            warn!("Drain timeout after {:?}, closing connections anyway", timeout);
        }

        self.set_phase(ShutdownPhase::ClosingConnections);
        close_connections.await;

        self.set_phase(ShutdownPhase::Complete);
        info!("Graceful shutdown completed in {:?}", start.elapsed());

        if drained {
            Ok(())
        } else {
            Err(ShutdownError::Timeout)
        }
    }
}

/// Shutdown errors
#[derive(Debug, Clone)]
pub enum ShutdownError {
    /// Workers did not finish within the drain timeout
    Timeout,
}

impl std::fmt::Display for ShutdownError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownError::Timeout => write!(f, "shutdown timed out"),
        }
    }
}

impl std::error::Error for ShutdownError {}

/// Helper to install OS signal handlers
pub fn install_signal_handlers(shutdown: Arc<GracefulShutdown>) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigquit = signal(SignalKind::quit())?;

        tokio::spawn(async move {
            let kind = tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM");
                    ShutdownSignal::Graceful
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT");
                    ShutdownSignal::Graceful
                }
                _ = sigquit.recv() => {
                    warn!("Received SIGQUIT - urgent shutdown");
                    ShutdownSignal::Urgent
                }
            };
            shutdown.request_shutdown(kind);
        });
    }

    #[cfg(windows)]
    {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl+C");
                shutdown.request_shutdown(ShutdownSignal::Graceful);
            }
        });
    }

    Ok(())
}
