// Integration tests for the HTTP transport against a local stub server

#[path = "../src/capture/mod.rs"]
mod capture;
#[path = "../src/chain/mod.rs"]
mod chain;
#[path = "../src/comm/mod.rs"]
mod comm;
#[path = "../src/dispatch/mod.rs"]
mod dispatch;
#[path = "../src/provider/mod.rs"]
mod provider;

use chain::{
    ChainExecutor, HttpTransport, ProviderDescriptor, Transport, TransportError, VersionStrategy,
};
use dispatch::{ExecutionStatus, LanguageId};
use provider::PistonAdapter;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_test::{assert_err, assert_ok};

fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    });
}

/// Read one HTTP request and return its path
async fn read_request(stream: &mut TcpStream) -> Option<String> {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];

    let header_end = loop {
        let n = stream.read(&mut buf).await.ok()?;
        if n == 0 {
            return None;
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&data[..header_end]).to_string();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);

    while data.len() < header_end + content_length {
        let n = stream.read(&mut buf).await.ok()?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
    }

    head.split_whitespace().nth(1).map(str::to_string)
}

/// Serve canned responses by path; unknown paths get 404. `None` means never answer.
async fn spawn_stub(routes: HashMap<&'static str, Option<(u16, &'static str)>>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let routes = Arc::new(routes);

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let routes = routes.clone();
            tokio::spawn(async move {
                let Some(path) = read_request(&mut stream).await else {
                    return;
                };
                let reply = routes.get(path.as_str()).cloned().unwrap_or(Some((404, "")));
                let Some((status, body)) = reply else {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    return;
                };
                let response = format!(
                    "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    addr
}

#[tokio::test]
async fn test_any_status_is_a_response() {
    init_tracing();

    let addr = spawn_stub(HashMap::from([
        ("/ok", Some((200, r#"{"run":{"stdout":"hi"}}"#))),
        ("/busy", Some((503, "Service Unavailable"))),
    ]))
    .await;
    let transport = assert_ok!(HttpTransport::new(Duration::from_secs(5)));

    let response = assert_ok!(
        transport
            .post_json(
                &format!("http://{}/ok", addr),
                &serde_json::json!({ "language": "c" }),
                Duration::from_secs(2),
            )
            .await
    );
    assert_eq!(response.status, 200);
    assert!(response.body.contains("stdout"));

    let response = assert_ok!(
        transport
            .get(&format!("http://{}/busy", addr), Duration::from_secs(2))
            .await
    );
    assert_eq!(response.status, 503);
    assert!(!response.is_success());
}

#[tokio::test]
async fn test_silent_server_times_out() {
    init_tracing();

    let addr = spawn_stub(HashMap::from([("/hang", None)])).await;
    let transport = assert_ok!(HttpTransport::new(Duration::from_secs(5)));

    let started = Instant::now();
    let result = transport
        .post_json(
            &format!("http://{}/hang", addr),
            &serde_json::json!({}),
            Duration::from_millis(200),
        )
        .await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(matches!(assert_err!(result), TransportError::Timeout));
}

#[tokio::test]
async fn test_refused_connection_is_network_error() {
    init_tracing();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let transport = assert_ok!(HttpTransport::new(Duration::from_secs(5)));
    let result = transport
        .get(&format!("http://{}/runtimes", addr), Duration::from_secs(1))
        .await;

    assert!(matches!(assert_err!(result), TransportError::Network(_)));
}

#[tokio::test]
async fn test_chain_over_http_falls_back_after_hang() {
    init_tracing();

    let slow = spawn_stub(HashMap::from([("/api/v2/execute", None)])).await;
    let healthy = spawn_stub(HashMap::from([
        (
            "/api/v2/runtimes",
            Some((200, r#"[{"language":"gcc","version":"10.2.0","aliases":["c","cpp","g++"]}]"#)),
        ),
        (
            "/api/v2/execute",
            Some((
                200,
                r#"{"language":"c","version":"10.2.0","compile":{"stdout":"","stderr":"","output":"","code":0},"run":{"stdout":"42\n","stderr":"","output":"42\n","code":0,"signal":null}}"#,
            )),
        ),
    ]))
    .await;

    // Two Piston deployments; the adapter is shared, the descriptor carries the endpoint
    let transport = Arc::new(assert_ok!(HttpTransport::new(Duration::from_secs(5))));
    let chain = ChainExecutor::new(transport, Duration::from_secs(1))
        .with_adapter(Arc::new(PistonAdapter::new()));
    let providers = vec![
        ProviderDescriptor::remote(
            "piston",
            format!("http://{}/api/v2", slow),
            300,
            VersionStrategy::Fixed("10.2.0".to_string()),
        ),
        ProviderDescriptor::remote(
            "piston",
            format!("http://{}/api/v2", healthy),
            2000,
            VersionStrategy::QueryLatest,
        ),
    ];

    let started = Instant::now();
    let report = chain
        .run_remote(
            LanguageId::C,
            "int main(){printf(\"42\\n\");}",
            &providers,
            Instant::now() + Duration::from_secs(10),
        )
        .await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(report.outcome.status(), ExecutionStatus::Success);
    assert_eq!(report.outcome.output(), "Output:\n42");
    assert_eq!(report.attempted, vec!["piston", "piston"]);
    assert_eq!(chain.versions().get("piston", LanguageId::C).as_deref(), Some("10.2.0"));
}
