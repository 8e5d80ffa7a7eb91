//! REST driver against an in-process stub driver service

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;

use mci_core::error::DriverError;
use mci_core::model::ConnectionConfig;
use mci_core::traits::{CloudDriver, InstanceAction, InstanceInfo, InstanceRequest, InstanceState};
use mci_orchestrator::driver::HttpDriver;

type Instances = Arc<Mutex<HashMap<String, InstanceState>>>;

#[derive(serde::Deserialize)]
struct CreateBody {
    #[serde(rename = "connectionName")]
    connection_name: String,
    #[serde(rename = "reqInfo")]
    req_info: InstanceRequest,
}

async fn create(
    State(instances): State<Instances>,
    Json(body): Json<CreateBody>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if body.req_info.name.contains("quota") {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    let id = format!("{}-{}", body.connection_name, body.req_info.name);
    instances
        .lock()
        .unwrap()
        .insert(id.clone(), InstanceState::Running);
    Ok(Json(serde_json::json!({ "cspId": id })))
}

async fn describe(
    State(instances): State<Instances>,
    Path(id): Path<String>,
) -> Result<Json<InstanceInfo>, StatusCode> {
    let state = *instances
        .lock()
        .unwrap()
        .get(&id)
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(InstanceInfo {
        csp_id: id,
        state,
        public_ip: Some("203.0.113.10".to_string()),
        private_ip: Some("10.1.0.10".to_string()),
        ssh_port: Some(22),
    }))
}

async fn delete(State(instances): State<Instances>, Path(id): Path<String>) -> StatusCode {
    match instances.lock().unwrap().remove(&id) {
        Some(_) => StatusCode::OK,
        None => StatusCode::NOT_FOUND,
    }
}

async fn control(
    State(instances): State<Instances>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let mut instances = instances.lock().unwrap();
    let state = instances.get_mut(&id).ok_or(StatusCode::NOT_FOUND)?;
    *state = match params.get("action").map(String::as_str) {
        Some("suspend") => InstanceState::Suspended,
        Some("resume") | Some("reboot") => InstanceState::Running,
        _ => return Err(StatusCode::BAD_REQUEST),
    };
    Ok(Json(serde_json::json!({ "status": *state })))
}

async fn spawn_stub() -> String {
    let instances: Instances = Arc::default();
    let app = Router::new()
        .route("/vm", post(create))
        .route("/vm/:id", get(describe).delete(delete))
        .route("/controlvm/:id", get(control))
        .with_state(instances);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/", addr)
}

fn conn() -> ConnectionConfig {
    ConnectionConfig {
        name: "aws-seoul".to_string(),
        provider: "aws".to_string(),
        region: "ap-northeast-2".to_string(),
        zone: None,
        credential: "cred".to_string(),
    }
}

fn request(name: &str) -> InstanceRequest {
    InstanceRequest {
        name: name.to_string(),
        image_id: "ubuntu22".to_string(),
        spec_id: "t3.small".to_string(),
        vnet_id: "vnet01".to_string(),
        subnet_id: "subnet01".to_string(),
        security_group_ids: vec!["sg01".to_string()],
        ssh_key_id: "key01".to_string(),
        vm_user_name: "cb-user".to_string(),
        root_disk_size: None,
        tags: Default::default(),
    }
}

#[tokio::test]
async fn test_instance_lifecycle_over_http() {
    let endpoint = spawn_stub().await;
    let driver = HttpDriver::new("aws", endpoint, Duration::from_secs(5)).unwrap();
    assert_eq!(driver.provider(), "aws");

    let id = driver
        .create_instance(&conn(), &request("mci01-g1-1"))
        .await
        .unwrap();
    assert_eq!(id, "aws-seoul-mci01-g1-1");

    let info = driver.get_instance(&conn(), &id).await.unwrap();
    assert!(info.is_ready());
    assert_eq!(info.public_ip.as_deref(), Some("203.0.113.10"));

    let state = driver
        .control_instance(&conn(), &id, InstanceAction::Suspend)
        .await
        .unwrap();
    assert_eq!(state, InstanceState::Suspended);

    driver.delete_instance(&conn(), &id).await.unwrap();
    assert!(matches!(
        driver.delete_instance(&conn(), &id).await,
        Err(DriverError::NotFound(_))
    ));
    assert!(matches!(
        driver.get_instance(&conn(), &id).await,
        Err(DriverError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_provider_errors_are_reported() {
    let endpoint = spawn_stub().await;
    let driver = HttpDriver::new("aws", endpoint, Duration::from_secs(5)).unwrap();

    let err = driver
        .create_instance(&conn(), &request("mci01-quota-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, DriverError::Provider(ref msg) if msg.contains("500")));
}

#[tokio::test]
async fn test_unreachable_service() {
    // Nothing listens on this port
    let driver = HttpDriver::new("aws", "http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
    let err = driver.get_instance(&conn(), "i-1").await.unwrap_err();
    assert!(matches!(
        err,
        DriverError::Transport(_) | DriverError::Timeout(_)
    ));
}
