//! Control server integration tests
//!
//! Drives the fleet through the JSON-line protocol the CLI speaks.

mod common;

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use common::*;
use mci_core::api::{ApiRequest, ApiResponse};
use mci_core::model::{DeleteOption, MciView, VmFilter};
use mci_core::{MciStatus, VmAction};
use mci_orchestrator::ipc::IpcServer;

/// Base port for test servers - each test gets a unique offset
static PORT_COUNTER: AtomicU16 = AtomicU16::new(0);

fn get_test_port() -> u16 {
    let offset = PORT_COUNTER.fetch_add(1, Ordering::SeqCst);
    39400 + offset
}

/// Control protocol test client
struct TestClient {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: BufWriter<tokio::net::tcp::OwnedWriteHalf>,
}

impl TestClient {
    async fn connect(address: &str) -> Self {
        // Retry connection a few times in case server isn't ready
        let mut last_err = None;
        for _ in 0..10 {
            match TcpStream::connect(address).await {
                Ok(stream) => {
                    let (reader, writer) = stream.into_split();
                    return Self {
                        reader: BufReader::new(reader),
                        writer: BufWriter::new(writer),
                    };
                }
                Err(e) => {
                    last_err = Some(e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
        panic!(
            "Failed to connect to control server at {}: {:?}",
            address, last_err
        );
    }

    async fn send_raw(&mut self, line: &str) -> ApiResponse {
        self.writer
            .write_all(format!("{}\n", line).as_bytes())
            .await
            .expect("Failed to write request");
        self.writer.flush().await.expect("Failed to flush");

        let mut response_line = String::new();
        timeout(Duration::from_secs(10), self.reader.read_line(&mut response_line))
            .await
            .expect("Timed out waiting for response")
            .expect("Failed to read response");

        if response_line.is_empty() {
            panic!("Server sent empty response (connection closed?)");
        }
        serde_json::from_str(&response_line).expect("Failed to parse response")
    }

    async fn send_request(&mut self, request: ApiRequest) -> ApiResponse {
        let json = serde_json::to_string(&request).expect("Failed to serialize request");
        self.send_raw(&json).await
    }
}

struct TestServer {
    address: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    harness: Harness,
}

async fn start_server() -> TestServer {
    let address = format!("127.0.0.1:{}", get_test_port());
    let harness = harness().await;
    let cancel = CancellationToken::new();

    let server = Arc::new(
        IpcServer::new(address.clone(), harness.fleet.clone()).with_shutdown_token(cancel.clone()),
    );
    let handle = tokio::spawn(async move {
        let _ = server.run().await;
    });

    // Wait for server to start
    tokio::time::sleep(Duration::from_millis(50)).await;

    TestServer {
        address,
        cancel,
        handle,
        harness,
    }
}

#[tokio::test]
async fn test_ping_pong() {
    let server = start_server().await;
    let mut client = TestClient::connect(&server.address).await;

    for _ in 0..3 {
        let response = client.send_request(ApiRequest::Ping).await;
        assert!(matches!(response, ApiResponse::Pong));
    }

    server.handle.abort();
}

#[tokio::test]
async fn test_get_status() {
    let server = start_server().await;
    let mut client = TestClient::connect(&server.address).await;

    match client.send_request(ApiRequest::GetStatus).await {
        ApiResponse::Status(status) => {
            assert!(status.running);
            assert_eq!(status.namespace_count, 1);
            assert_eq!(status.connection_count, 1);
            assert_eq!(status.providers, vec!["sim".to_string()]);
        }
        other => panic!("Expected Status response, got {:?}", other),
    }

    server.handle.abort();
}

#[tokio::test]
async fn test_invalid_request_keeps_connection() {
    let server = start_server().await;
    let mut client = TestClient::connect(&server.address).await;

    match client.send_raw(r#"{"type":"no_such_request"}"#).await {
        ApiResponse::Error { kind, .. } => assert_eq!(kind, "invalid_request"),
        other => panic!("Expected Error response, got {:?}", other),
    }
    let response = client.send_request(ApiRequest::Ping).await;
    assert!(matches!(response, ApiResponse::Pong));

    server.handle.abort();
}

#[tokio::test]
async fn test_namespace_round_trip() {
    let server = start_server().await;
    let mut client = TestClient::connect(&server.address).await;

    let response = client
        .send_request(ApiRequest::CreateNamespace {
            ns: "Team-A".to_string(),
            description: "team a".to_string(),
        })
        .await;
    match response {
        ApiResponse::Namespace(ns) => assert_eq!(ns.id.as_str(), "team-a"),
        other => panic!("Expected Namespace response, got {:?}", other),
    }

    let response = client
        .send_request(ApiRequest::CreateNamespace {
            ns: "team-a".to_string(),
            description: String::new(),
        })
        .await;
    match response {
        ApiResponse::Error { kind, message } => {
            assert_eq!(kind, "validation");
            assert!(message.contains("already exists"));
        }
        other => panic!("Expected Error response, got {:?}", other),
    }

    match client.send_request(ApiRequest::ListNamespaces).await {
        ApiResponse::Namespaces { namespaces } => assert_eq!(namespaces.len(), 2),
        other => panic!("Expected Namespaces response, got {:?}", other),
    }

    server.handle.abort();
}

#[tokio::test]
async fn test_mci_views_over_protocol() {
    let server = start_server().await;
    let mut client = TestClient::connect(&server.address).await;

    let response = client
        .send_request(ApiRequest::CreateMci {
            ns: NS.to_string(),
            request: mci_request("mci01", vec![template("g1", 2)]),
        })
        .await;
    match response {
        ApiResponse::Mci(info) => {
            assert_eq!(info.status, MciStatus::Running);
            assert_eq!(info.vms.len(), 2);
        }
        other => panic!("Expected Mci response, got {:?}", other),
    }

    let response = client
        .send_request(ApiRequest::ListMci {
            ns: NS.to_string(),
            view: MciView::Id,
            filter: None,
        })
        .await;
    match response {
        ApiResponse::Ids { ids } => assert_eq!(ids, vec!["mci01".to_string()]),
        other => panic!("Expected Ids response, got {:?}", other),
    }

    let response = client
        .send_request(ApiRequest::GetMci {
            ns: NS.to_string(),
            mci: "mci01".to_string(),
            view: MciView::Status,
            filter: None,
        })
        .await;
    match response {
        ApiResponse::MciStatus(status) => {
            assert_eq!(status.status_count.running, 2);
        }
        other => panic!("Expected MciStatus response, got {:?}", other),
    }

    let response = client
        .send_request(ApiRequest::GetMci {
            ns: NS.to_string(),
            mci: "mci01".to_string(),
            view: MciView::Id,
            filter: Some(VmFilter::new("id", "g1-2")),
        })
        .await;
    match response {
        ApiResponse::Ids { ids } => assert_eq!(ids, vec!["g1-2".to_string()]),
        other => panic!("Expected Ids response, got {:?}", other),
    }

    let response = client
        .send_request(ApiRequest::ControlMci {
            ns: NS.to_string(),
            mci: "mci01".to_string(),
            action: VmAction::Suspend,
        })
        .await;
    assert!(matches!(response, ApiResponse::ActionReport(_)));

    let response = client
        .send_request(ApiRequest::DeleteMci {
            ns: NS.to_string(),
            mci: "mci01".to_string(),
            option: DeleteOption::default(),
        })
        .await;
    match response {
        ApiResponse::DeleteReport(report) => assert!(report.mci_removed),
        other => panic!("Expected DeleteReport response, got {:?}", other),
    }
    assert_eq!(server.harness.driver.delete_calls(), 2);

    server.handle.abort();
}

#[tokio::test]
async fn test_filtered_id_list_over_protocol() {
    let server = start_server().await;
    let mut client = TestClient::connect(&server.address).await;

    for (name, size) in [("mci01", 2), ("mci02", 1)] {
        let response = client
            .send_request(ApiRequest::CreateMci {
                ns: NS.to_string(),
                request: mci_request(name, vec![template("g1", size)]),
            })
            .await;
        assert!(matches!(response, ApiResponse::Mci(_)));
    }

    let response = client
        .send_request(ApiRequest::ListMci {
            ns: NS.to_string(),
            view: MciView::Id,
            filter: Some(VmFilter::new("id", "g1-2")),
        })
        .await;
    match response {
        ApiResponse::Ids { ids } => assert_eq!(ids, vec!["mci01".to_string()]),
        other => panic!("Expected Ids response, got {:?}", other),
    }

    let response = client
        .send_request(ApiRequest::ListMci {
            ns: NS.to_string(),
            view: MciView::Id,
            filter: Some(VmFilter::new("connectionName", "nowhere")),
        })
        .await;
    match response {
        ApiResponse::Ids { ids } => assert!(ids.is_empty()),
        other => panic!("Expected Ids response, got {:?}", other),
    }

    server.handle.abort();
}

#[tokio::test]
async fn test_missing_mci_is_an_error() {
    let server = start_server().await;
    let mut client = TestClient::connect(&server.address).await;

    let response = client
        .send_request(ApiRequest::GetMci {
            ns: NS.to_string(),
            mci: "ghost".to_string(),
            view: MciView::Default,
            filter: None,
        })
        .await;
    match response {
        ApiResponse::Error { kind, message } => {
            assert_eq!(kind, "validation");
            assert!(message.contains("MCI not found"));
        }
        other => panic!("Expected Error response, got {:?}", other),
    }

    server.handle.abort();
}

#[tokio::test]
async fn test_shutdown() {
    let server = start_server().await;
    let mut client = TestClient::connect(&server.address).await;

    let response = client.send_request(ApiRequest::Shutdown).await;
    assert!(matches!(response, ApiResponse::Ok));
    assert!(server.cancel.is_cancelled());

    // The accept loop exits once the token is cancelled
    timeout(Duration::from_secs(5), server.handle)
        .await
        .expect("server did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_concurrent_clients() {
    let server = start_server().await;

    let mut handles = vec![];
    for _ in 0..5 {
        let addr = server.address.clone();
        handles.push(tokio::spawn(async move {
            let mut client = TestClient::connect(&addr).await;
            for _ in 0..3 {
                let response = client.send_request(ApiRequest::Ping).await;
                assert!(matches!(response, ApiResponse::Pong));
            }
        }));
    }
    for handle in handles {
        handle.await.expect("Client task panicked");
    }

    server.handle.abort();
}
