//! End-to-end tests over real TCP connections.
//!
//! Each test binds a server on an ephemeral port, talks raw HTTP/1.1 to it
//! and asserts on the wire-level response.

use std::io::Read as _;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use flate2::read::GzDecoder;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use taghttp::http::Method;
use taghttp::layers::{LayerError, Stage, builtin};
use taghttp::routes::{self, FilesRoute};
use taghttp::server::{HttpServer, ServerConfig};

async fn spawn_server<F>(config: ServerConfig, configure: F) -> SocketAddr
where
    F: FnOnce(&mut HttpServer),
{
    let mut server = HttpServer::new(ServerConfig { port: 0, ..config });
    configure(&mut server);
    let bound = server.bind().await.unwrap();
    let addr = bound.local_addr();
    tokio::spawn(bound.run());
    addr
}

/// A server with the standard routes and layers, like the binary registers.
async fn spawn_default_server() -> SocketAddr {
    spawn_server(ServerConfig::default(), register_defaults).await
}

fn register_defaults(server: &mut HttpServer) {
    let router = server.router_mut();
    router.add("/", Method::Get.into(), true, routes::index);
    router.add("/echo", Method::Get.into(), false, routes::echo);
    router.add("/user-agent", Method::Get.into(), false, routes::user_agent);
    router.add("/hello", Method::Get.into(), false, routes::hello);

    let pipeline = server.pipeline_mut();
    pipeline.add(Stage::PostRoute, "content-encoding", true, builtin::content_encoding);
    pipeline.add(Stage::PostRoute, "content-length", true, builtin::content_length);
    pipeline.add(Stage::PostRoute, "connection-close", true, builtin::connection_close);
}

struct WireResponse {
    status: u16,
    head: String,
    body: Vec<u8>,
}

impl WireResponse {
    fn header(&self, name: &str) -> Option<&str> {
        self.head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(": ")?;
            key.eq_ignore_ascii_case(name).then_some(value)
        })
    }

    fn body_str(&self) -> &str {
        std::str::from_utf8(&self.body).unwrap()
    }
}

/// Reads one response: headers, then exactly `Content-Length` body bytes
/// (zero when the header is absent).
async fn read_response(stream: &mut TcpStream) -> WireResponse {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let head_end = buf.windows(4).position(|w| w == b"\r\n\r\n");
        if let Some(pos) = head_end {
            let head = String::from_utf8_lossy(&buf[..pos]).into_owned();
            let content_length: usize = head
                .lines()
                .find_map(|line| {
                    let (key, value) = line.split_once(": ")?;
                    key.eq_ignore_ascii_case("Content-Length").then_some(value)
                })
                .map(|v| v.parse().unwrap())
                .unwrap_or(0);
            let body_start = pos + 4;
            if buf.len() >= body_start + content_length {
                let status = head
                    .split_whitespace()
                    .nth(1)
                    .and_then(|code| code.parse().ok())
                    .unwrap_or(0);
                return WireResponse {
                    status,
                    head,
                    body: buf[body_start..body_start + content_length].to_vec(),
                };
            }
        }
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed before full response");
        buf.extend_from_slice(&chunk[..n]);
    }
}

async fn send(stream: &mut TcpStream, raw: &str) -> WireResponse {
    stream.write_all(raw.as_bytes()).await.unwrap();
    read_response(stream).await
}

async fn request_once(addr: SocketAddr, raw: &str) -> WireResponse {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    send(&mut stream, raw).await
}

#[tokio::test]
async fn echo_returns_target_remainder() {
    let addr = spawn_default_server().await;
    let res = request_once(addr, "GET /echo/hello HTTP/1.1\r\n\r\n").await;
    assert_eq!(res.status, 200);
    assert_eq!(res.body_str(), "hello");
    assert_eq!(res.header("Content-Type"), Some("text/plain"));
}

#[tokio::test]
async fn unknown_route_is_404() {
    let addr = spawn_default_server().await;
    let res = request_once(addr, "GET /nope HTTP/1.1\r\n\r\n").await;
    assert_eq!(res.status, 404);
}

#[tokio::test]
async fn wrong_method_is_404() {
    let addr = spawn_default_server().await;
    let res = request_once(addr, "POST /echo/hi HTTP/1.1\r\n\r\nbody").await;
    assert_eq!(res.status, 404);
}

#[tokio::test]
async fn user_agent_is_echoed() {
    let addr = spawn_default_server().await;
    let res = request_once(
        addr,
        "GET /user-agent HTTP/1.1\r\nUser-Agent: foobar/1.2.3\r\n\r\n",
    )
    .await;
    assert_eq!(res.status, 200);
    assert_eq!(res.body_str(), "foobar/1.2.3");
}

#[tokio::test]
async fn gzip_round_trip() {
    let addr = spawn_default_server().await;
    let res = request_once(
        addr,
        "GET /echo/hi HTTP/1.1\r\nAccept-Encoding: deflate, gzip\r\n\r\n",
    )
    .await;
    assert_eq!(res.status, 200);
    assert_eq!(res.header("Content-Encoding"), Some("gzip"));

    let mut decoder = GzDecoder::new(&res.body[..]);
    let mut decompressed = String::new();
    decoder.read_to_string(&mut decompressed).unwrap();
    assert_eq!(decompressed, "hi");
}

#[tokio::test]
async fn connection_close_closes_the_socket() {
    let addr = spawn_default_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let res = send(&mut stream, "GET /hello HTTP/1.1\r\nConnection: close\r\n\r\n").await;
    assert_eq!(res.status, 200);
    assert_eq!(res.header("Connection"), Some("close"));

    let mut rest = [0u8; 16];
    let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut rest))
        .await
        .expect("socket was not closed")
        .unwrap();
    assert_eq!(n, 0);
}

#[tokio::test]
async fn keep_alive_reuses_the_connection() {
    let addr = spawn_default_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let first = send(&mut stream, "GET /echo/one HTTP/1.1\r\n\r\n").await;
    assert_eq!(first.body_str(), "one");

    let second = send(&mut stream, "GET /echo/two HTTP/1.1\r\n\r\n").await;
    assert_eq!(second.body_str(), "two");
}

#[tokio::test]
async fn keep_alive_cycles_have_constant_arena_footprint() {
    let sizes: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
    let probe_sizes = Arc::clone(&sizes);

    let addr = spawn_server(ServerConfig::default(), move |server| {
        register_defaults(server);
        server.pipeline_mut().add(
            Stage::Init,
            "footprint-probe",
            true,
            move |request: &taghttp::Request,
                  _response: &mut taghttp::Response,
                  arena: &mut taghttp::Arena|
                  -> Result<(), LayerError> {
                probe_sizes.lock().unwrap().push(arena.tag_bytes(request.tag()));
                Ok(())
            },
        );
    })
    .await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    send(&mut stream, "GET /echo/first HTTP/1.1\r\n\r\n").await;
    send(&mut stream, "GET /echo/second HTTP/1.1\r\n\r\n").await;
    drop(stream);

    let recorded = sizes.lock().unwrap();
    assert_eq!(recorded.len(), 2);
    // Nothing from the first cycle survives into the second.
    assert_eq!(recorded[0], recorded[1]);
}

#[tokio::test]
async fn files_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let directory = dir.path().to_path_buf();

    let addr = spawn_server(ServerConfig::default(), move |server| {
        register_defaults(server);
        server.router_mut().add(
            "/files",
            Method::Get | Method::Post,
            false,
            FilesRoute::new(directory),
        );
    })
    .await;

    let created = request_once(
        addr,
        "POST /files/data.txt HTTP/1.1\r\n\r\nstored payload",
    )
    .await;
    assert_eq!(created.status, 201);
    assert_eq!(
        std::fs::read_to_string(dir.path().join("data.txt")).unwrap(),
        "stored payload"
    );

    let fetched = request_once(addr, "GET /files/data.txt HTTP/1.1\r\n\r\n").await;
    assert_eq!(fetched.status, 200);
    assert_eq!(fetched.body_str(), "stored payload");
    assert_eq!(
        fetched.header("Content-Type"),
        Some("application/octet-stream")
    );

    let missing = request_once(addr, "GET /files/absent.txt HTTP/1.1\r\n\r\n").await;
    assert_eq!(missing.status, 404);
}

#[tokio::test]
async fn fatal_layer_failure_halts_the_whole_cycle() {
    let post_route_ran = Arc::new(AtomicBool::new(false));
    let recorder_flag = Arc::clone(&post_route_ran);

    let addr = spawn_server(ServerConfig::default(), move |server| {
        register_defaults(server);
        let pipeline = server.pipeline_mut();
        pipeline.add(
            Stage::PreRoute,
            "faulty",
            false,
            |_request: &taghttp::Request,
             _response: &mut taghttp::Response,
             _arena: &mut taghttp::Arena|
             -> Result<(), LayerError> {
                Err(LayerError::Other("induced failure".to_owned()))
            },
        );
        pipeline.add(
            Stage::PostRoute,
            "recorder",
            true,
            move |_request: &taghttp::Request,
                  _response: &mut taghttp::Response,
                  _arena: &mut taghttp::Arena|
                  -> Result<(), LayerError> {
                recorder_flag.store(true, Ordering::SeqCst);
                Ok(())
            },
        );
    })
    .await;

    let res = request_once(addr, "GET /hello HTTP/1.1\r\n\r\n").await;
    assert_eq!(res.status, 500);
    assert!(!post_route_ran.load(Ordering::SeqCst));
}

#[tokio::test]
async fn excess_connections_get_503() {
    let config = ServerConfig {
        max_connections: 1,
        ..ServerConfig::default()
    };
    let addr = spawn_server(config, register_defaults).await;

    // Holds the only permit for the duration of the test.
    let mut held = TcpStream::connect(addr).await.unwrap();
    let first = send(&mut held, "GET /hello HTTP/1.1\r\n\r\n").await;
    assert_eq!(first.status, 200);

    let mut rejected = TcpStream::connect(addr).await.unwrap();
    let res = read_response(&mut rejected).await;
    assert_eq!(res.status, 503);
    assert_eq!(res.header("Connection"), Some("close"));
}
