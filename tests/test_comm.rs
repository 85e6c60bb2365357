// Integration tests for Comm module
// This file should be run with cargo test --test test_comm

#[path = "../src/comm/mod.rs"]
mod comm;

fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    });
}

// Message types (must match protocol)
#[derive(Debug, Clone, Copy)]
#[repr(u8)]
enum MsgType {
    Request = 0x01,
    RequestAck = 0x02,
    Response = 0x03,
}

// Test helper: encode a request packet the way an external client would
fn encode_request(seq: u32, language: &str, source: &str) -> Vec<u8> {
    use rmp_serde::encode::Serializer;
    use serde::Serialize;

    #[derive(Serialize)]
    struct RequestPayload<'a> {
        language: &'a str,
        source: &'a str,
    }

    let payload = RequestPayload { language, source };
    let mut payload_bytes = Vec::new();
    let mut ser = Serializer::new(&mut payload_bytes).with_struct_map();
    payload.serialize(&mut ser).unwrap();

    let mut packet = vec![MsgType::Request as u8];
    packet.extend_from_slice(&seq.to_be_bytes());
    packet.extend_from_slice(&payload_bytes);
    packet
}

// Test helper: decode response packet
fn decode_response(data: &[u8]) -> (u32, comm::ResponsePayload) {
    let seq = u32::from_be_bytes([data[1], data[2], data[3], data[4]]);
    let payload: comm::ResponsePayload = rmp_serde::from_slice(&data[5..]).unwrap();
    (seq, payload)
}

fn test_config() -> comm::CommConfig {
    comm::CommConfig {
        listen_addr: "127.0.0.1".to_string(),
        listen_port: 0,
        max_payload_bytes: 65536,
        dedup_capacity: 256,
        dedup_ttl_secs: 300,
        response_timeout_secs: 5,
    }
}

fn success(output: &str) -> comm::UserResponse {
    comm::UserResponse {
        status: "success".to_string(),
        output: output.to_string(),
        diagnostic: String::new(),
        exit_code: 0,
        meta: comm::ResponseMeta {
            attempted_providers: vec!["piston".to_string()],
            provider_used: Some("piston".to_string()),
            elapsed_ms: 12,
        },
    }
}

use std::time::Duration;
use tokio::net::UdpSocket;

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[tokio::test]
    async fn test_normal_request_response() {
        init_tracing();

        let (comm, mut loop_rx) = comm::Comm::new(test_config()).await.unwrap();
        let comm_addr = comm.local_addr().unwrap();

        tokio::spawn(async move {
            let _ = comm.run().await;
        });

        // Mock main loop echoes what it was asked to run
        let mock_handle = tokio::spawn(async move {
            if let Some(req) = loop_rx.recv().await {
                assert_eq!(req.language, "python");
                req.reply
                    .send(success(&format!("ran {}", req.source)))
                    .ok();
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.connect(comm_addr).await.unwrap();

        let packet = encode_request(1, "python", "print(1)");
        client.send(&packet).await.unwrap();

        let mut buf = [0u8; 4096];
        let (_, _) = tokio::time::timeout(Duration::from_secs(1), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(buf[0], MsgType::RequestAck as u8);

        let _ = tokio::time::timeout(Duration::from_secs(1), mock_handle).await;

        let (len, _) = tokio::time::timeout(Duration::from_secs(1), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(buf[0], MsgType::Response as u8);
        let (seq, payload) = decode_response(&buf[..len]);
        assert_eq!(seq, 1);
        assert_eq!(payload.status, "success");
        assert_eq!(payload.output, "ran print(1)");
        assert_eq!(payload.exit_code, 0);
        assert_eq!(payload.meta.provider_used.as_deref(), Some("piston"));
    }

    // A repeated seq replays the cached response and never re-executes
    #[tokio::test]
    async fn test_duplicate_request_dedup() {
        init_tracing();

        let (comm, mut loop_rx) = comm::Comm::new(test_config()).await.unwrap();
        let comm_addr = comm.local_addr().unwrap();

        tokio::spawn(async move {
            let _ = comm.run().await;
        });

        let (req_tx, mut req_rx) = tokio::sync::mpsc::channel::<String>(10);

        tokio::spawn(async move {
            while let Some(req) = loop_rx.recv().await {
                let _ = req_tx.send(req.source.clone()).await;
                let _ = req.reply.send(success("ok"));
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.connect(comm_addr).await.unwrap();

        let packet = encode_request(1, "c", "int main(){}");
        client.send(&packet).await.unwrap();

        let mut buf = [0u8; 4096];
        let (_, _) = tokio::time::timeout(Duration::from_secs(1), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(buf[0], MsgType::RequestAck as u8);

        let (len, _) = tokio::time::timeout(Duration::from_secs(1), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(buf[0], MsgType::Response as u8);
        let (_, first) = decode_response(&buf[..len]);

        tokio::time::sleep(Duration::from_millis(50)).await;
        client.send(&packet).await.unwrap();

        let (len, _) = tokio::time::timeout(Duration::from_secs(1), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        // Cached Response, not a fresh RequestAck
        assert_eq!(buf[0], MsgType::Response as u8);
        let (seq, replayed) = decode_response(&buf[..len]);
        assert_eq!(seq, 1);
        assert_eq!(replayed, first);

        let mut received = Vec::new();
        while let Ok(Some(source)) =
            tokio::time::timeout(Duration::from_millis(100), req_rx.recv()).await
        {
            received.push(source);
        }
        assert_eq!(received.len(), 1, "Expected 1 request, got {:?}", received);
    }

    #[tokio::test]
    async fn test_handler_dropping_reply_yields_error_response() {
        init_tracing();

        let (comm, mut loop_rx) = comm::Comm::new(test_config()).await.unwrap();
        let comm_addr = comm.local_addr().unwrap();

        tokio::spawn(async move {
            let _ = comm.run().await;
        });
        tokio::spawn(async move {
            while let Some(req) = loop_rx.recv().await {
                drop(req.reply);
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.connect(comm_addr).await.unwrap();
        client.send(&encode_request(9, "java", "class A {}")).await.unwrap();

        let mut buf = [0u8; 4096];
        let (_, _) = tokio::time::timeout(Duration::from_secs(1), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(buf[0], MsgType::RequestAck as u8);

        let (len, _) = tokio::time::timeout(Duration::from_secs(1), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let (seq, payload) = decode_response(&buf[..len]);
        assert_eq!(seq, 9);
        assert_eq!(payload.status, "service_unavailable");
        assert_eq!(payload.exit_code, -1);
        assert!(!payload.diagnostic.is_empty());
    }

    // A retry after the handler dropped its reply replays the error response
    #[tokio::test]
    async fn test_retry_after_dropped_reply_replays_error_response() {
        init_tracing();

        let (comm, mut loop_rx) = comm::Comm::new(test_config()).await.unwrap();
        let comm_addr = comm.local_addr().unwrap();

        tokio::spawn(async move {
            let _ = comm.run().await;
        });
        let (seen_tx, mut seen_rx) = tokio::sync::mpsc::channel::<String>(10);
        tokio::spawn(async move {
            while let Some(req) = loop_rx.recv().await {
                let _ = seen_tx.send(req.source.clone()).await;
                drop(req.reply);
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.connect(comm_addr).await.unwrap();
        let packet = encode_request(11, "java", "class A {}");
        client.send(&packet).await.unwrap();

        let mut buf = [0u8; 4096];
        let (_, _) = tokio::time::timeout(Duration::from_secs(1), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(buf[0], MsgType::RequestAck as u8);
        let (len, _) = tokio::time::timeout(Duration::from_secs(1), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let (_, first) = decode_response(&buf[..len]);
        assert_eq!(first.status, "service_unavailable");

        tokio::time::sleep(Duration::from_millis(50)).await;
        client.send(&packet).await.unwrap();

        let (len, _) = tokio::time::timeout(Duration::from_secs(1), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(buf[0], MsgType::Response as u8);
        let (seq, replayed) = decode_response(&buf[..len]);
        assert_eq!(seq, 11);
        assert_eq!(replayed, first);

        let mut received = Vec::new();
        while let Ok(Some(source)) =
            tokio::time::timeout(Duration::from_millis(100), seen_rx.recv()).await
        {
            received.push(source);
        }
        assert_eq!(received.len(), 1);
    }

    // A retry while the first attempt is still running gets an ACK, then
    // a single RESPONSE once the handler replies
    #[tokio::test]
    async fn test_retry_while_in_flight_gets_ack() {
        init_tracing();

        let (comm, mut loop_rx) = comm::Comm::new(test_config()).await.unwrap();
        let comm_addr = comm.local_addr().unwrap();

        tokio::spawn(async move {
            let _ = comm.run().await;
        });
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            if let Some(req) = loop_rx.recv().await {
                let _ = release_rx.await;
                let _ = req.reply.send(success("slow"));
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.connect(comm_addr).await.unwrap();
        let packet = encode_request(12, "c", "int main(){}");
        client.send(&packet).await.unwrap();

        let mut buf = [0u8; 4096];
        let (_, _) = tokio::time::timeout(Duration::from_secs(1), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(buf[0], MsgType::RequestAck as u8);

        client.send(&packet).await.unwrap();
        let (_, _) = tokio::time::timeout(Duration::from_secs(1), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(buf[0], MsgType::RequestAck as u8);

        release_tx.send(()).unwrap();
        let (len, _) = tokio::time::timeout(Duration::from_secs(1), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(buf[0], MsgType::Response as u8);
        let (seq, payload) = decode_response(&buf[..len]);
        assert_eq!(seq, 12);
        assert_eq!(payload.output, "slow");
    }

    // Empty packet - should be rejected without stopping the server
    #[tokio::test]
    async fn test_empty_packet() {
        init_tracing();

        let (comm, _rx) = comm::Comm::new(test_config()).await.unwrap();
        let comm_addr = comm.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let _ = comm.run().await;
        });

        tokio::time::sleep(Duration::from_millis(50)).await;

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let _ = client.send_to(&[], comm_addr).await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!handle.is_finished());
    }

    // REQUEST_ACK from a client is ignored
    #[tokio::test]
    async fn test_invalid_request_ack_from_client() {
        init_tracing();

        let (comm, _rx) = comm::Comm::new(test_config()).await.unwrap();
        let comm_addr = comm.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let _ = comm.run().await;
        });

        tokio::time::sleep(Duration::from_millis(50)).await;

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut packet = vec![MsgType::RequestAck as u8];
        packet.extend_from_slice(&1u32.to_be_bytes());
        let _ = client.send_to(&packet, comm_addr).await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!handle.is_finished());
    }

    // Undecodable payload is dropped without an ACK
    #[tokio::test]
    async fn test_garbage_payload_gets_no_ack() {
        init_tracing();

        let (comm, _rx) = comm::Comm::new(test_config()).await.unwrap();
        let comm_addr = comm.local_addr().unwrap();

        tokio::spawn(async move {
            let _ = comm.run().await;
        });

        tokio::time::sleep(Duration::from_millis(50)).await;

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.connect(comm_addr).await.unwrap();
        let mut packet = vec![MsgType::Request as u8];
        packet.extend_from_slice(&3u32.to_be_bytes());
        packet.extend_from_slice(&[0xc1, 0xc1, 0xc1]);
        client.send(&packet).await.unwrap();

        let mut buf = [0u8; 1024];
        let result =
            tokio::time::timeout(Duration::from_millis(200), client.recv_from(&mut buf)).await;
        assert!(result.is_err());
    }

    // Daemon not running - client should timeout
    #[tokio::test]
    async fn test_client_timeout_no_daemon() {
        init_tracing();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.connect("127.0.0.1:19999").await.unwrap();

        let packet = encode_request(1, "python", "print(1)");
        let _ = client.send(&packet).await;

        let mut buf = [0u8; 1024];
        let result =
            tokio::time::timeout(Duration::from_millis(100), client.recv_from(&mut buf)).await;
        // Either nothing arrives or the kernel reports the port unreachable
        assert!(!matches!(result, Ok(Ok(_))));
    }
}
