//! Transport round trips against a fully assembled gateway.
//!
//! Every test stands up its own gateway on ephemeral ports with a private
//! plugin directory, drives it through real sockets, and shuts it down.

use std::net::SocketAddr;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;

use gateway_core::config::{
    DispatcherConfig, GatewayConfig, HttpConfig, ListenerConfig, MultiplexerConfig, PluginsConfig,
};
use gateway_core::server::GatewayServer;

const IO_DEADLINE: Duration = Duration::from_secs(5);

struct RunningGateway {
    server: GatewayServer,
    tcp: SocketAddr,
    udp: SocketAddr,
    http: SocketAddr,
    _plugin_dir: TempDir,
}

async fn start_gateway() -> RunningGateway {
    let plugin_dir = tempfile::tempdir().unwrap();
    let config = GatewayConfig {
        multiplexer: MultiplexerConfig {
            tcp_listeners: vec![ListenerConfig::new("127.0.0.1", 0)],
            udp_listeners: vec![ListenerConfig::new("127.0.0.1", 0)],
            buffer_size: 8192,
        },
        http: HttpConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        dispatcher: DispatcherConfig {
            worker_count: 2,
            queue_capacity: 32,
        },
        plugins: PluginsConfig {
            directory: plugin_dir.path().to_path_buf(),
            poll_interval_ms: 50,
        },
    };

    let server = GatewayServer::new(config);
    server.start().await.unwrap();

    let tcp = server.multiplexer().tcp_addresses().await[0];
    let udp = server.multiplexer().udp_addresses().await[0];
    let http = server
        .multiplexer()
        .http_front_door()
        .bound_address()
        .await
        .unwrap();

    RunningGateway {
        server,
        tcp,
        udp,
        http,
        _plugin_dir: plugin_dir,
    }
}

async fn send_on(stream: &mut TcpStream, envelope: &Value) -> Value {
    stream
        .write_all(&serde_json::to_vec(envelope).unwrap())
        .await
        .unwrap();

    let mut buffer = vec![0u8; 8192];
    let read = timeout(IO_DEADLINE, stream.read(&mut buffer))
        .await
        .expect("timed out waiting for a tcp response")
        .unwrap();
    assert!(read > 0, "connection closed without a response");
    serde_json::from_slice(&buffer[..read]).unwrap()
}

async fn http_request(address: SocketAddr, method: &str, path: &str, body: Option<&str>) -> (u16, Vec<u8>) {
    let mut stream = TcpStream::connect(address).await.unwrap();
    let body = body.unwrap_or_default();
    let request = format!(
        "{method} {path} HTTP/1.1\r\nHost: {address}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    timeout(IO_DEADLINE, stream.read_to_end(&mut response))
        .await
        .expect("timed out waiting for an http response")
        .unwrap();

    let text = String::from_utf8_lossy(&response);
    let status: u16 = text
        .split_whitespace()
        .nth(1)
        .expect("malformed status line")
        .parse()
        .unwrap();
    let body_start = text.find("\r\n\r\n").map(|i| i + 4).unwrap_or(response.len());
    (status, response[body_start..].to_vec())
}

#[tokio::test]
async fn tcp_round_trip_reuses_the_connection() {
    let gateway = start_gateway().await;
    let mut stream = TcpStream::connect(gateway.tcp).await.unwrap();

    let first = send_on(
        &mut stream,
        &json!({"Key": "registerCompany", "Data": {"Name": "Acme"}}),
    )
    .await;
    assert_eq!(first["Status"], 200);
    assert_eq!(first["Info"], "Registered company: Acme");

    // the connection stays open across requests
    let second = send_on(
        &mut stream,
        &json!({"Key": "registerCompany", "Data": {"Name": "Globex"}}),
    )
    .await;
    assert_eq!(second["Info"], "Registered company: Globex");

    gateway.server.stop().await.unwrap();
}

#[tokio::test]
async fn unknown_keys_fail_structurally_and_service_continues() {
    let gateway = start_gateway().await;
    let mut stream = TcpStream::connect(gateway.tcp).await.unwrap();

    let failure = send_on(&mut stream, &json!({"Key": "noSuchCommand", "Data": {}})).await;
    assert_eq!(failure["Status"], 404);
    assert!(failure["Info"]
        .as_str()
        .unwrap()
        .contains("noSuchCommand"));

    let recovery = send_on(
        &mut stream,
        &json!({"Key": "registerCompany", "Data": {"Name": "Still here"}}),
    )
    .await;
    assert_eq!(recovery["Status"], 200);

    gateway.server.stop().await.unwrap();
}

#[tokio::test]
async fn malformed_bytes_get_a_structured_400() {
    let gateway = start_gateway().await;
    let mut stream = TcpStream::connect(gateway.tcp).await.unwrap();

    stream.write_all(b"this is not an envelope").await.unwrap();
    let mut buffer = vec![0u8; 8192];
    let read = timeout(IO_DEADLINE, stream.read(&mut buffer))
        .await
        .unwrap()
        .unwrap();
    let response: Value = serde_json::from_slice(&buffer[..read]).unwrap();
    assert_eq!(response["Status"], 400);

    gateway.server.stop().await.unwrap();
}

#[tokio::test]
async fn product_registration_faults_reach_the_boundary() {
    let gateway = start_gateway().await;
    let mut stream = TcpStream::connect(gateway.tcp).await.unwrap();

    let ok = send_on(
        &mut stream,
        &json!({"Key": "registerProduct", "Data": {"Name": "Widget"}}),
    )
    .await;
    assert_eq!(ok["Status"], 200);
    assert_eq!(ok["Info"], "Registered product: Widget");

    // registerProduct does not catch its own faults, so the boundary answers
    let broken = send_on(&mut stream, &json!({"Key": "registerProduct", "Data": {}})).await;
    assert_eq!(broken["Status"], 500);
    assert!(broken["Info"]
        .as_str()
        .unwrap()
        .contains("command execution failed"));

    gateway.server.stop().await.unwrap();
}

#[tokio::test]
async fn udp_round_trip_answers_the_sender() {
    let gateway = start_gateway().await;
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let envelope = json!({"Key": "registerCompany", "Data": {"Name": "Datagram Inc"}});
    socket
        .send_to(&serde_json::to_vec(&envelope).unwrap(), gateway.udp)
        .await
        .unwrap();

    let mut buffer = vec![0u8; 8192];
    let (read, from) = timeout(IO_DEADLINE, socket.recv_from(&mut buffer))
        .await
        .expect("timed out waiting for a udp response")
        .unwrap();
    assert_eq!(from, gateway.udp);
    let response: Value = serde_json::from_slice(&buffer[..read]).unwrap();
    assert_eq!(response["Status"], 200);
    assert_eq!(response["Info"], "Registered company: Datagram Inc");

    gateway.server.stop().await.unwrap();
}

#[tokio::test]
async fn concurrent_requests_each_get_their_own_answer() {
    let gateway = start_gateway().await;

    let mut tasks = Vec::new();
    for index in 0..8 {
        let address = gateway.tcp;
        tasks.push(tokio::spawn(async move {
            let mut stream = TcpStream::connect(address).await.unwrap();
            let name = format!("Company-{index}");
            let response = send_on(
                &mut stream,
                &json!({"Key": "registerCompany", "Data": {"Name": name}}),
            )
            .await;
            (index, response)
        }));
    }

    for task in tasks {
        let (index, response) = task.await.unwrap();
        assert_eq!(response["Status"], 200);
        assert_eq!(
            response["Info"],
            format!("Registered company: Company-{index}")
        );
    }

    gateway.server.stop().await.unwrap();
}

#[tokio::test]
async fn http_routes_behave_like_the_matcher_chain_says() {
    let gateway = start_gateway().await;

    let (status, body) = http_request(gateway.http, "GET", "/", None).await;
    assert_eq!(status, 404);
    assert!(body.is_empty());

    let (status, body) = http_request(
        gateway.http,
        "POST",
        "/company",
        Some(r#"{"Name":"Acme"}"#),
    )
    .await;
    assert_eq!(status, 200);
    let document: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(document["Info"], "Registered company: Acme");

    // a trailing slash reaches the same command
    let (status, body) = http_request(
        gateway.http,
        "POST",
        "/company/",
        Some(r#"{"Name":"Acme Trailing"}"#),
    )
    .await;
    assert_eq!(status, 200);
    let document: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(document["Info"], "Registered company: Acme Trailing");

    // recognized stub, not a 404
    let (status, _) = http_request(gateway.http, "GET", "/company/7", None).await;
    assert_eq!(status, 501);

    let (status, _) = http_request(gateway.http, "GET", "/company/abc", None).await;
    assert_eq!(status, 404);

    let (status, _) = http_request(
        gateway.http,
        "POST",
        "/company/7/product/3/extra",
        Some("{}"),
    )
    .await;
    assert_eq!(status, 501);

    let (status, _) = http_request(gateway.http, "GET", "/companies", None).await;
    assert_eq!(status, 501);

    gateway.server.stop().await.unwrap();
}

#[tokio::test]
async fn http_rejects_unusable_bodies_with_a_structured_400() {
    let gateway = start_gateway().await;

    let (status, body) = http_request(gateway.http, "POST", "/company", Some("[not, an, object")).await;
    assert_eq!(status, 400);
    let document: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(document["Status"], 400);

    gateway.server.stop().await.unwrap();
}

#[tokio::test]
async fn shutdown_closes_every_channel_and_is_not_repeatable() {
    let gateway = start_gateway().await;

    let mut stream = TcpStream::connect(gateway.tcp).await.unwrap();
    let response = send_on(
        &mut stream,
        &json!({"Key": "registerCompany", "Data": {"Name": "Last"}}),
    )
    .await;
    assert_eq!(response["Status"], 200);

    gateway.server.stop().await.unwrap();
    assert!(!gateway.server.multiplexer().is_running().await);

    // the listener is gone
    assert!(TcpStream::connect(gateway.tcp).await.is_err());

    // stopping twice is a lifecycle error, and a stopped gateway stays down
    assert!(gateway.server.stop().await.is_err());
    assert!(gateway.server.start().await.is_err());
}

#[tokio::test]
async fn stats_reflect_traffic() {
    let gateway = start_gateway().await;
    let mut stream = TcpStream::connect(gateway.tcp).await.unwrap();

    for name in ["A", "B"] {
        let response = send_on(
            &mut stream,
            &json!({"Key": "registerCompany", "Data": {"Name": name}}),
        )
        .await;
        assert_eq!(response["Status"], 200);
    }

    let mux_stats = gateway.server.multiplexer().stats().await;
    assert!(mux_stats.running);
    assert_eq!(mux_stats.accepted_connections, 1);
    assert_eq!(mux_stats.requests_forwarded, 2);

    let dispatcher_stats = gateway.server.dispatcher().stats().await;
    assert_eq!(dispatcher_stats.dispatched_requests, 2);
    assert_eq!(dispatcher_stats.failed_requests, 0);

    gateway.server.stop().await.unwrap();
}
