//! End-to-end tests against a real bound server.

use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use http::StatusCode;
use serde_json::{Value, json};
use sluice::middleware::{AccessLog, ErrorTranslation};
use sluice::shutdown::{self, Phase, ShutdownCoordinator, ShutdownHandle};
use sluice::{
    App, BoxError, Context, Error, FieldErrors, Method, Request, RequestError, ResponseWriter, Server,
    ShutdownError,
};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;

async fn get_employee(ctx: Context, w: ResponseWriter, req: Request) -> Result<(), BoxError> {
    let id: u64 = req
        .param("id")
        .and_then(|id| id.parse().ok())
        .ok_or_else(|| RequestError::bad_request("id must be a number"))?;
    if id == 0 {
        return Err(RequestError::not_found("no employee with id 0").into());
    }
    w.respond(StatusCode::OK, &json!({ "id": id, "version": ctx.version() }))?;
    Ok(())
}

async fn create_employee(_ctx: Context, w: ResponseWriter, req: Request) -> Result<(), BoxError> {
    let body: Value = req.json()?;
    let mut errs = FieldErrors::new();
    for field in ["first_name", "last_name"] {
        if body.get(field).and_then(Value::as_str).is_none_or(str::is_empty) {
            errs.push(field, "required");
        }
    }
    if !errs.is_empty() {
        return Err(errs.into());
    }
    w.respond(StatusCode::CREATED, &body)?;
    Ok(())
}

async fn delete_employee(_ctx: Context, w: ResponseWriter, _req: Request) -> Result<(), Error> {
    w.no_content()
}

async fn broken(_ctx: Context, _w: ResponseWriter, _req: Request) -> Result<(), std::io::Error> {
    Err(std::io::Error::other("dial tcp 10.0.0.5:3306: connection refused"))
}

async fn corrupt(_ctx: Context, _w: ResponseWriter, _req: Request) -> Result<(), ShutdownError> {
    Err(ShutdownError::new("integrity check failed"))
}

async fn slow(_ctx: Context, w: ResponseWriter, _req: Request) -> Result<(), Error> {
    tokio::time::sleep(Duration::from_millis(300)).await;
    w.respond(StatusCode::OK, &json!({ "done": true }))
}

async fn lingering(_ctx: Context, w: ResponseWriter, _req: Request) -> Result<(), Error> {
    tokio::time::sleep(Duration::from_millis(1500)).await;
    w.no_content()
}

async fn stuck(_ctx: Context, w: ResponseWriter, _req: Request) -> Result<(), Error> {
    tokio::time::sleep(Duration::from_secs(30)).await;
    w.no_content()
}

struct TestServer {
    addr: SocketAddr,
    base: String,
    handle: ShutdownHandle,
    phase: watch::Receiver<Phase>,
    task: JoinHandle<Result<(), Error>>,
}

impl TestServer {
    async fn start(drain_timeout: Duration) -> Self {
        let (handle, events) = shutdown::channel();
        let app = App::new(handle.clone())
            .layer(AccessLog::new())
            .layer(ErrorTranslation::new())
            .handle(Method::Get, "v1", "/employee/:id", get_employee)
            .handle(Method::Post, "v1", "/employee", create_employee)
            .handle(Method::Delete, "v1", "/employee/:id", delete_employee)
            .handle(Method::Get, "v1", "/broken", broken)
            .handle(Method::Post, "v1", "/corrupt", corrupt)
            .handle(Method::Get, "v1", "/slow", slow)
            .handle(Method::Get, "v1", "/lingering", lingering)
            .handle(Method::Get, "v1", "/stuck", stuck);

        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        let base = format!("http://{addr}");
        let coordinator = ShutdownCoordinator::new(events, drain_timeout);
        let phase = coordinator.phase();
        let task = tokio::spawn(server.serve_with(app, coordinator));

        Self { addr, base, handle, phase, task }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    async fn stop(self) -> Result<(), Error> {
        self.handle.request("test finished");
        self.join().await
    }

    async fn join(self) -> Result<(), Error> {
        tokio::time::timeout(Duration::from_secs(10), self.task)
            .await
            .expect("server did not stop")
            .unwrap()
    }
}

#[tokio::test]
async fn routes_with_params_and_version() {
    let server = TestServer::start(Duration::from_secs(5)).await;
    let client = reqwest::Client::new();

    let res = client.get(server.url("/v1/employee/42")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["content-type"], "application/json");
    assert!(res.headers().contains_key("x-request-id"));
    assert_eq!(res.json::<Value>().await.unwrap(), json!({ "id": 42, "version": "v1" }));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn request_id_is_echoed() {
    let server = TestServer::start(Duration::from_secs(5)).await;
    let res = reqwest::Client::new()
        .get(server.url("/v1/employee/1"))
        .header("x-request-id", "abc-123")
        .send()
        .await
        .unwrap();
    assert_eq!(res.headers()["x-request-id"], "abc-123");

    server.stop().await.unwrap();
}

#[tokio::test]
async fn unmatched_routes_are_404() {
    let server = TestServer::start(Duration::from_secs(5)).await;
    let client = reqwest::Client::new();

    for res in [
        client.get(server.url("/v2/employee/1")).send().await.unwrap(),
        client.get(server.url("/v1/nowhere")).send().await.unwrap(),
        client.put(server.url("/v1/employee/1")).send().await.unwrap(),
    ] {
        assert_eq!(res.status(), 404);
        assert_eq!(res.json::<Value>().await.unwrap(), json!({ "error": "Not Found" }));
    }

    server.stop().await.unwrap();
}

#[tokio::test]
async fn validation_errors_list_each_field() {
    let server = TestServer::start(Duration::from_secs(5)).await;
    let res = reqwest::Client::new()
        .post(server.url("/v1/employee"))
        .json(&json!({ "first_name": "Ada" }))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 400);
    assert_eq!(
        res.json::<Value>().await.unwrap(),
        json!({ "error": "data validation error", "fields": { "last_name": "required" } })
    );

    server.stop().await.unwrap();
}

#[tokio::test]
async fn created_and_no_content() {
    let server = TestServer::start(Duration::from_secs(5)).await;
    let client = reqwest::Client::new();

    let body = json!({ "first_name": "Ada", "last_name": "Lovelace" });
    let res = client.post(server.url("/v1/employee")).json(&body).send().await.unwrap();
    assert_eq!(res.status(), 201);
    assert_eq!(res.json::<Value>().await.unwrap(), body);

    let res = client.delete(server.url("/v1/employee/7")).send().await.unwrap();
    assert_eq!(res.status(), 204);
    assert!(res.bytes().await.unwrap().is_empty());

    server.stop().await.unwrap();
}

#[tokio::test]
async fn request_errors_keep_their_status() {
    let server = TestServer::start(Duration::from_secs(5)).await;
    let client = reqwest::Client::new();

    let res = client.get(server.url("/v1/employee/0")).send().await.unwrap();
    assert_eq!(res.status(), 404);
    assert_eq!(res.json::<Value>().await.unwrap(), json!({ "error": "no employee with id 0" }));

    let res = client.get(server.url("/v1/employee/abc")).send().await.unwrap();
    assert_eq!(res.status(), 400);
    assert_eq!(res.json::<Value>().await.unwrap(), json!({ "error": "id must be a number" }));

    let res = client.post(server.url("/v1/employee")).body("{not json").send().await.unwrap();
    assert_eq!(res.status(), 400);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn internal_errors_do_not_leak() {
    let server = TestServer::start(Duration::from_secs(5)).await;
    let res = reqwest::get(server.url("/v1/broken")).await.unwrap();

    assert_eq!(res.status(), 500);
    let body = res.text().await.unwrap();
    assert_eq!(body, r#"{"error":"Internal Server Error"}"#);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn shutdown_error_stops_the_server() {
    let mut server = TestServer::start(Duration::from_secs(5)).await;
    let res = reqwest::Client::new().post(server.url("/v1/corrupt")).send().await.unwrap();
    assert_eq!(res.status(), 500);

    server.phase.wait_for(|p| *p == Phase::Stopped).await.unwrap();
    server.join().await.unwrap();
}

#[tokio::test]
async fn drain_lets_in_flight_requests_finish() {
    let server = TestServer::start(Duration::from_secs(5)).await;
    let url = server.url("/v1/slow");
    let in_flight = tokio::spawn(async move { reqwest::get(url).await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    let mut phase = server.phase.clone();
    assert!(server.handle.request("rolling restart"));
    phase.wait_for(|p| *p == Phase::Draining).await.unwrap();

    let res = in_flight.await.unwrap().unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.json::<Value>().await.unwrap(), json!({ "done": true }));

    server.join().await.unwrap();
}

#[tokio::test]
async fn drain_timeout_force_closes() {
    let server = TestServer::start(Duration::from_millis(200)).await;
    let url = server.url("/v1/stuck");
    let in_flight = tokio::spawn(async move { reqwest::get(url).await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    server.handle.request("deploy");

    match server.join().await {
        Err(Error::GracefulStop(inner)) => {
            assert!(matches!(*inner, Error::ForcedClose { open: 1, .. }));
        }
        other => panic!("expected a forced close, got {other:?}"),
    }
    assert!(in_flight.await.unwrap().is_err());
}

#[tokio::test]
async fn new_connections_are_refused_after_shutdown() {
    let server = TestServer::start(Duration::from_secs(5)).await;
    let url = server.url("/v1/employee/1");
    server.stop().await.unwrap();

    assert!(reqwest::get(url).await.is_err());
}

#[tokio::test]
async fn listener_is_closed_while_draining() {
    let server = TestServer::start(Duration::from_secs(5)).await;
    let url = server.url("/v1/lingering");
    let in_flight = tokio::spawn(async move { reqwest::get(url).await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    let mut phase = server.phase.clone();
    server.handle.request("rolling restart");
    phase.wait_for(|p| *p == Phase::Draining).await.unwrap();

    // The accept loop closes the socket right after it sees the stop flag.
    let deadline = Instant::now() + Duration::from_millis(500);
    let refused = loop {
        match TcpStream::connect(server.addr).await {
            Err(e) => break e,
            Ok(_) if Instant::now() < deadline => tokio::time::sleep(Duration::from_millis(10)).await,
            Ok(_) => panic!("still accepting connections while draining"),
        }
    };
    assert_eq!(refused.kind(), io::ErrorKind::ConnectionRefused);
    assert_eq!(*phase.borrow(), Phase::Draining);

    let res = in_flight.await.unwrap().unwrap();
    assert_eq!(res.status(), 204);
    server.join().await.unwrap();
}

#[tokio::test]
async fn server_error_aborts_without_draining() {
    let server = TestServer::start(Duration::from_secs(30)).await;
    let url = server.url("/v1/stuck");
    let in_flight = tokio::spawn(async move { reqwest::get(url).await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    let started = Instant::now();
    server.handle.server_error(io::Error::other("listener failed"));

    match server.join().await {
        Err(Error::Server(e)) => assert_eq!(e.to_string(), "listener failed"),
        other => panic!("expected a server error, got {other:?}"),
    }
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(in_flight.await.unwrap().is_err());
}
