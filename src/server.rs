//! HTTP server and graceful shutdown.
//!
//! # Graceful shutdown and Kubernetes
//!
//! When Kubernetes terminates a pod it sends **SIGTERM** and waits
//! `terminationGracePeriodSeconds` (default 30 s) before sending SIGKILL.
//!
//! The server reacts by:
//! 1. Immediately stopping `listener.accept()`, so no new connections are made.
//! 2. Asking every open connection to finish its in-flight request and close.
//! 3. Waiting for that, up to the drain timeout (20 s by default), then
//!    force-closing whatever is left.
//!
//! Keep the drain timeout below `terminationGracePeriodSeconds`.

use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::classify::ErrorResponse;
use crate::error::Error;
use crate::request::Request;
use crate::response::Response;
use crate::router::App;
use crate::shutdown::{self, DEFAULT_DRAIN_TIMEOUT, Listener, ShutdownCoordinator, ShutdownEvents, ShutdownHandle};

/// The HTTP server.
pub struct Server {
    listener: TcpListener,
    drain_timeout: Duration,
}

impl Server {
    /// Binds to `addr`. Port `0` picks a free port; see [`Server::local_addr`].
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # async fn run() -> Result<(), sluice::Error> {
    /// let server = sluice::Server::bind("0.0.0.0:3000").await?;
    /// # Ok(()) }
    /// ```
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self, Error> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, drain_timeout: DEFAULT_DRAIN_TIMEOUT })
    }

    /// Bound on the graceful drain. Defaults to 20 s.
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves `app` until the first shutdown cause: SIGINT / SIGTERM, a
    /// handler's shutdown request, or a listener failure.
    ///
    /// `events` must be the receiving half of the channel whose handle `app`
    /// was built with.
    pub async fn serve(self, app: App, events: ShutdownEvents) -> Result<(), Error> {
        let coordinator = ShutdownCoordinator::new(events, self.drain_timeout);
        let signals = tokio::spawn(shutdown::forward_os_signals(app.shutdown_handle().clone()));
        let result = self.serve_with(app, coordinator).await;
        signals.abort();
        result
    }

    /// Like [`Server::serve`] without installing OS signal handlers: the
    /// caller owns the coordinator, and with it the phase watch.
    pub async fn serve_with(self, app: App, coordinator: ShutdownCoordinator) -> Result<(), Error> {
        let addr = self.local_addr()?;
        let handle = app.shutdown_handle().clone();
        info!(%addr, drain_timeout = ?coordinator.drain_timeout(), "sluice listening");

        let accept = AcceptLoop::start(self.listener, Arc::new(app), handle);
        let result = coordinator.run(accept).await;

        info!("sluice stopped");
        result
    }
}

// ── Accept loop ───────────────────────────────────────────────────────────────

/// The running listener, as seen by the shutdown coordinator.
struct AcceptLoop {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
    open: Arc<AtomicUsize>,
}

impl AcceptLoop {
    fn start(listener: TcpListener, app: Arc<App>, handle: ShutdownHandle) -> Self {
        let (stop, stop_rx) = watch::channel(false);
        let open = Arc::new(AtomicUsize::new(0));
        let task = tokio::spawn(accept(listener, app, handle, stop_rx, Arc::clone(&open)));
        Self { stop, task, open }
    }
}

impl Listener for AcceptLoop {
    fn drain(&mut self) -> impl Future<Output = ()> + Send {
        self.stop.send_replace(true);
        async move {
            if let Err(e) = (&mut self.task).await {
                error!("accept loop ended abnormally: {e}");
            }
        }
    }

    fn abort(&mut self) -> usize {
        // Dropping the aborted task drops its JoinSet, which aborts every
        // connection task with it.
        self.stop.send_replace(true);
        self.task.abort();
        self.open.load(Ordering::SeqCst)
    }
}

/// Decrements the open-connection count when a connection task ends,
/// including when it is aborted.
struct OpenGuard(Arc<AtomicUsize>);

impl OpenGuard {
    fn new(open: &Arc<AtomicUsize>) -> Self {
        open.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(open))
    }
}

impl Drop for OpenGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn accept(
    listener: TcpListener,
    app: Arc<App>,
    handle: ShutdownHandle,
    mut stop: watch::Receiver<bool>,
    open: Arc<AtomicUsize>,
) {
    // JoinSet tracks every connection task so the drain can wait for them.
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            // Check the stop flag first so a shutdown stops accepting at once,
            // even with connections queued.
            biased;

            () = stopped(&mut stop) => {
                info!(in_flight = tasks.len(), "stopped accepting, draining connections");
                break;
            }

            res = listener.accept() => match res {
                Ok((stream, remote_addr)) => {
                    let guard = OpenGuard::new(&open);
                    let conn = connection(stream, remote_addr, Arc::clone(&app), stop.clone());
                    tasks.spawn(async move {
                        conn.await;
                        drop(guard);
                    });
                }
                Err(e) if is_connection_error(&e) => {
                    debug!("accept error: {e}");
                }
                Err(e) => {
                    error!("listener failed: {e}");
                    handle.server_error(e);
                    break;
                }
            },

            // Reap finished connection tasks so the JoinSet does not grow
            // without bound on long-running servers.
            Some(res) = tasks.join_next(), if !tasks.is_empty() => reaped(res),
        }
    }

    // Close the socket before waiting, so new clients are refused rather
    // than left in the backlog for the whole drain.
    drop(listener);

    while let Some(res) = tasks.join_next().await {
        reaped(res);
    }
}

fn reaped(res: Result<(), JoinError>) {
    if let Err(e) = res {
        error!("connection task failed: {e}");
    }
}

/// Resolves once the stop flag is raised, or once its sender is gone.
async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|&stopped| stopped).await;
}

/// Errors that only concern the one connection being accepted.
fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

async fn connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    app: Arc<App>,
    mut stop: watch::Receiver<bool>,
) {
    // TokioIo adapts tokio's AsyncRead/AsyncWrite to the hyper IO traits.
    let io = TokioIo::new(stream);

    // Called once per request on the connection, not once per connection.
    let svc = service_fn(move |req| {
        let app = Arc::clone(&app);
        async move { serve_request(&app, req, remote_addr).await }
    });

    // `auto::Builder` handles both HTTP/1.1 and HTTP/2, whatever the client
    // negotiates.
    let builder = ConnBuilder::new(TokioExecutor::new());
    let conn = builder.serve_connection(io, svc);
    tokio::pin!(conn);

    let mut draining = false;
    loop {
        tokio::select! {
            res = conn.as_mut() => {
                if let Err(e) = res {
                    warn!(peer = %remote_addr, "connection error: {e}");
                }
                break;
            }
            () = stopped(&mut stop), if !draining => {
                // Finish the in-flight request, then close.
                draining = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    }
}

/// Collects the body and hands the request to the app.
///
/// The error type is [`Infallible`]: every failure becomes a response.
async fn serve_request(
    app: &App,
    req: hyper::Request<Incoming>,
    remote_addr: SocketAddr,
) -> Result<http::Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(peer = %remote_addr, "reading request body: {e}");
            let res = Response::error(StatusCode::BAD_REQUEST, &ErrorResponse::message("unreadable request body"));
            return Ok(res.into_inner());
        }
    };

    let response = app.dispatch(Request::from_parts(parts, body), Some(remote_addr)).await;
    Ok(response.into_inner())
}
