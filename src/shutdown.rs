//! Process-wide shutdown coordination.
//!
//! # One queue, one winner
//!
//! Every shutdown cause goes through a single queue of capacity 1:
//!
//! - the OS signal forwarder (SIGINT / SIGTERM),
//! - the router, when a handler raised a [`ShutdownError`](crate::ShutdownError),
//! - the accept loop, when the listener dies.
//!
//! Producers use [`ShutdownHandle`], which never blocks. The first cause to
//! land is the one acted upon; anything sent while a shutdown is already in
//! motion is logged and dropped.
//!
//! # States
//!
//! ```text
//!            Signal                      drained / timed out
//! Running ───────────→ Draining ─────────────────────────────→ Stopped
//!    │                                                            ↑
//!    └──────────── ServerError (no drain, listener is dead) ──────┘
//! ```
//!
//! The drain is bounded: once the timeout fires, every remaining connection
//! is force-closed and the run reports [`Error::ForcedClose`] wrapped in
//! [`Error::GracefulStop`].

use std::fmt;
use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::error::Error;

/// Default bound on the graceful drain.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(20);

/// A request to terminate that allows in-flight work to drain.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Signal {
    /// SIGINT / Ctrl-C.
    Interrupt,
    /// SIGTERM.
    Terminate,
    /// Raised from inside the process, e.g. by a handler's `ShutdownError`.
    Requested(String),
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => f.write_str("SIGINT"),
            Self::Terminate => f.write_str("SIGTERM"),
            Self::Requested(reason) => write!(f, "requested: {reason}"),
        }
    }
}

/// One shutdown cause.
#[derive(Debug)]
pub enum ShutdownEvent {
    Signal(Signal),
    /// The listener failed and cannot accept any more connections.
    ServerError(io::Error),
}

impl fmt::Display for ShutdownEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signal(sig) => write!(f, "signal {sig}"),
            Self::ServerError(e) => write!(f, "server error: {e}"),
        }
    }
}

/// Lifecycle of a served process.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    Running,
    Draining,
    Stopped,
}

/// Creates the shutdown queue.
///
/// The handle goes to every producer (the [`App`](crate::App) takes one); the
/// receiving half goes to [`ShutdownCoordinator::new`].
pub fn channel() -> (ShutdownHandle, ShutdownEvents) {
    let (tx, rx) = mpsc::channel(1);
    (ShutdownHandle { tx }, ShutdownEvents { rx })
}

/// Non-blocking producer side of the shutdown queue.
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    tx: mpsc::Sender<ShutdownEvent>,
}

impl ShutdownHandle {
    /// Returns `false` if another cause got there first.
    pub fn signal(&self, signal: Signal) -> bool {
        self.send(ShutdownEvent::Signal(signal))
    }

    pub fn request(&self, reason: impl Into<String>) -> bool {
        self.signal(Signal::Requested(reason.into()))
    }

    pub fn server_error(&self, err: io::Error) -> bool {
        self.send(ShutdownEvent::ServerError(err))
    }

    fn send(&self, event: ShutdownEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(%event, "shutdown already pending, cause dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                debug!(%event, "coordinator gone, cause dropped");
                false
            }
        }
    }
}

/// Receiving side of the shutdown queue.
#[derive(Debug)]
pub struct ShutdownEvents {
    rx: mpsc::Receiver<ShutdownEvent>,
}

impl ShutdownEvents {
    pub async fn recv(&mut self) -> Option<ShutdownEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ShutdownEvent> {
        self.rx.try_recv().ok()
    }
}

// ── Coordinator ───────────────────────────────────────────────────────────────

/// What the coordinator needs from the thing accepting connections.
pub trait Listener: Send {
    /// Stops accepting and resolves once every open connection has finished.
    fn drain(&mut self) -> impl Future<Output = ()> + Send;

    /// Force-closes everything still open. Returns how many connections were cut.
    fn abort(&mut self) -> usize;
}

/// Drives `Running → Draining → Stopped` for one process.
#[derive(Debug)]
pub struct ShutdownCoordinator {
    events: ShutdownEvents,
    phase: watch::Sender<Phase>,
    drain_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(events: ShutdownEvents, drain_timeout: Duration) -> Self {
        let (phase, _) = watch::channel(Phase::Running);
        Self { events, phase, drain_timeout }
    }

    /// Subscribes to phase transitions.
    pub fn phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    pub fn drain_timeout(&self) -> Duration { self.drain_timeout }

    /// Waits for the first shutdown cause, then stops `listener`.
    ///
    /// Returns `Ok(())` after a clean drain, [`Error::Server`] if the listener
    /// died, and [`Error::GracefulStop`] if the drain had to be cut short.
    pub async fn run<L: Listener>(mut self, mut listener: L) -> Result<(), Error> {
        let event = self.events.recv().await;
        self.phase.send_replace(Phase::Draining);

        let result = match event {
            Some(ShutdownEvent::ServerError(err)) => {
                error!(error = %err, "listener failed, skipping drain");
                listener.abort();
                Err(Error::Server(err))
            }
            Some(ShutdownEvent::Signal(signal)) => {
                info!(status = "shutdown started", %signal, "shutdown");
                let result = self.drain(&mut listener).await;
                info!(status = "shutdown complete", %signal, "shutdown");
                result
            }
            None => {
                // Every handle is gone, so nothing can ever ask again.
                info!(status = "shutdown started", "all shutdown handles dropped");
                self.drain(&mut listener).await
            }
        };

        self.phase.send_replace(Phase::Stopped);
        result
    }

    async fn drain<L: Listener>(&mut self, listener: &mut L) -> Result<(), Error> {
        let timeout = self.drain_timeout;
        let drained = {
            let drain = listener.drain();
            tokio::pin!(drain);
            let deadline = tokio::time::sleep(timeout);
            tokio::pin!(deadline);

            loop {
                tokio::select! {
                    biased;

                    () = &mut drain => break true,
                    () = &mut deadline => break false,
                    Some(event) = self.events.recv() => {
                        warn!(%event, "already draining, cause ignored");
                    }
                }
            }
        };

        if drained {
            return Ok(());
        }
        let open = listener.abort();
        warn!(?timeout, open, "drain timed out, connections force-closed");
        Err(Error::GracefulStop(Box::new(Error::ForcedClose { timeout, open })))
    }
}

// ── OS signals ────────────────────────────────────────────────────────────────

/// Forwards the first SIGINT / SIGTERM into the shutdown queue.
///
/// If a handler cannot be installed the failure is reported as a server
/// error: a process that cannot hear SIGTERM should not keep running.
pub async fn forward_os_signals(handle: ShutdownHandle) {
    match wait_for_os_signal().await {
        Ok(signal) => { handle.signal(signal); }
        Err(err) => { handle.server_error(err); }
    }
}

/// Resolves on the first shutdown signal the process receives.
///
/// On Unix this listens for both **SIGTERM** and **SIGINT** (Ctrl-C).
/// On other platforms only Ctrl-C is available.
async fn wait_for_os_signal() -> io::Result<Signal> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.map(|()| Signal::Interrupt),
            _ = sigterm.recv() => Ok(Signal::Terminate),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.map(|()| Signal::Interrupt)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    /// Drains after a fixed delay; records whether it was drained or aborted.
    struct FakeListener {
        drain_for: Duration,
        drained: Arc<AtomicBool>,
        aborted: Arc<AtomicBool>,
    }

    impl FakeListener {
        fn new(drain_for: Duration) -> (Self, Arc<AtomicBool>, Arc<AtomicBool>) {
            let drained = Arc::new(AtomicBool::new(false));
            let aborted = Arc::new(AtomicBool::new(false));
            let listener = Self { drain_for, drained: Arc::clone(&drained), aborted: Arc::clone(&aborted) };
            (listener, drained, aborted)
        }
    }

    impl Listener for FakeListener {
        fn drain(&mut self) -> impl Future<Output = ()> + Send {
            let drain_for = self.drain_for;
            let drained = Arc::clone(&self.drained);
            async move {
                tokio::time::sleep(drain_for).await;
                drained.store(true, Ordering::SeqCst);
            }
        }

        fn abort(&mut self) -> usize {
            self.aborted.store(true, Ordering::SeqCst);
            2
        }
    }

    #[test]
    fn first_cause_wins() {
        let (handle, mut events) = channel();
        assert!(handle.signal(Signal::Terminate));
        assert!(!handle.request("second"));
        assert!(matches!(events.try_recv(), Some(ShutdownEvent::Signal(Signal::Terminate))));
        assert!(events.try_recv().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn signal_drains_then_stops() {
        let (handle, events) = channel();
        let coordinator = ShutdownCoordinator::new(events, Duration::from_secs(20));
        let mut phase = coordinator.phase();
        let (listener, drained, aborted) = FakeListener::new(Duration::from_secs(1));

        let run = tokio::spawn(coordinator.run(listener));
        assert_eq!(*phase.borrow(), Phase::Running);

        handle.signal(Signal::Terminate);
        phase.wait_for(|p| *p == Phase::Draining).await.unwrap();

        run.await.unwrap().unwrap();
        assert_eq!(*phase.borrow(), Phase::Stopped);
        assert!(drained.load(Ordering::SeqCst));
        assert!(!aborted.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_drain_is_force_closed() {
        let (handle, events) = channel();
        let coordinator = ShutdownCoordinator::new(events, Duration::from_secs(20));
        let (listener, drained, aborted) = FakeListener::new(Duration::from_secs(60));

        handle.signal(Signal::Interrupt);
        let err = coordinator.run(listener).await.unwrap_err();

        assert!(matches!(
            err,
            Error::GracefulStop(ref inner) if matches!(**inner, Error::ForcedClose { open: 2, .. })
        ));
        assert!(!drained.load(Ordering::SeqCst));
        assert!(aborted.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn server_error_skips_the_drain() {
        let (handle, events) = channel();
        let coordinator = ShutdownCoordinator::new(events, Duration::from_secs(20));
        let phase = coordinator.phase();
        let (listener, drained, aborted) = FakeListener::new(Duration::from_secs(1));

        handle.server_error(io::Error::new(io::ErrorKind::AddrInUse, "address in use"));
        let err = coordinator.run(listener).await.unwrap_err();

        assert!(matches!(err, Error::Server(ref e) if e.kind() == io::ErrorKind::AddrInUse));
        assert_eq!(*phase.borrow(), Phase::Stopped);
        assert!(!drained.load(Ordering::SeqCst));
        assert!(aborted.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn second_cause_while_draining_is_ignored() {
        let (handle, events) = channel();
        let coordinator = ShutdownCoordinator::new(events, Duration::from_secs(20));
        let mut phase = coordinator.phase();
        let (listener, drained, aborted) = FakeListener::new(Duration::from_secs(5));

        let run = tokio::spawn(coordinator.run(listener));
        handle.signal(Signal::Terminate);
        phase.wait_for(|p| *p == Phase::Draining).await.unwrap();
        handle.server_error(io::Error::other("late"));

        run.await.unwrap().unwrap();
        assert!(drained.load(Ordering::SeqCst));
        assert!(!aborted.load(Ordering::SeqCst));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn os_signals_are_forwarded() {
        use tokio::signal::unix::{SignalKind, signal};

        // Hold listeners of our own so the default action never kills the
        // test binary, even before the forwarder has installed its handlers.
        let _term = signal(SignalKind::terminate()).unwrap();
        let _int = signal(SignalKind::interrupt()).unwrap();

        for (flag, expected) in [("-TERM", Signal::Terminate), ("-INT", Signal::Interrupt)] {
            let (handle, mut events) = channel();
            let forwarder = tokio::spawn(forward_os_signals(handle));

            let mut received = None;
            for _ in 0..50 {
                std::process::Command::new("kill")
                    .args([flag, &std::process::id().to_string()])
                    .status()
                    .unwrap();
                if let Ok(event) = tokio::time::timeout(Duration::from_millis(100), events.recv()).await {
                    received = event;
                    break;
                }
            }

            match received {
                Some(ShutdownEvent::Signal(signal)) => assert_eq!(signal, expected),
                other => panic!("expected {expected}, got {other:?}"),
            }
            forwarder.await.unwrap();
            // Let any extra deliveries settle before the next forwarder listens.
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }
}
