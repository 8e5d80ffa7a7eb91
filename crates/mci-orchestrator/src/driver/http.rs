//! Cloud driver speaking a REST driver service
//!
//! ```text
//! POST   {endpoint}/vm                                   create
//! GET    {endpoint}/vm/{id}?connectionName=..            describe
//! DELETE {endpoint}/vm/{id}?connectionName=..            delete
//! GET    {endpoint}/controlvm/{id}?connectionName=..&action=suspend|resume|reboot
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};

use mci_core::error::DriverError;
use mci_core::model::ConnectionConfig;
use mci_core::traits::{CloudDriver, InstanceAction, InstanceInfo, InstanceRequest, InstanceState};

/// Body of a create call
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVmBody {
    pub connection_name: String,
    pub region: String,
    #[serde(default)]
    pub zone: Option<String>,
    pub credential: String,
    pub req_info: InstanceRequest,
}

/// Response of a create call
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedVm {
    pub csp_id: String,
}

/// Response of a control call
#[derive(Debug, Serialize, Deserialize)]
pub struct ControlResult {
    pub status: InstanceState,
}

/// REST-backed cloud driver for one provider
pub struct HttpDriver {
    provider: String,
    endpoint: String,
    timeout: Duration,
    client: Client,
}

impl HttpDriver {
    pub fn new(
        provider: impl Into<String>,
        endpoint: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, DriverError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DriverError::Transport(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            provider: provider.into(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            timeout,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, path)
    }

    fn send_error(&self, e: reqwest::Error) -> DriverError {
        if e.is_timeout() {
            DriverError::Timeout(self.timeout)
        } else {
            DriverError::Transport(e.to_string())
        }
    }

    async fn check(resp: Response, csp_id: &str) -> Result<Response, DriverError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(DriverError::NotFound(csp_id.to_string()));
        }
        let body = resp.text().await.unwrap_or_default();
        Err(DriverError::Provider(format!("{}: {}", status, body.trim())))
    }
}

#[async_trait]
impl CloudDriver for HttpDriver {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn create_instance(
        &self,
        conn: &ConnectionConfig,
        req: &InstanceRequest,
    ) -> Result<String, DriverError> {
        let body = CreateVmBody {
            connection_name: conn.name.clone(),
            region: conn.region.clone(),
            zone: conn.zone.clone(),
            credential: conn.credential.clone(),
            req_info: req.clone(),
        };
        let resp = self
            .client
            .post(self.url("vm"))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.send_error(e))?;
        let created: CreatedVm = Self::check(resp, &req.name)
            .await?
            .json()
            .await
            .map_err(|e| DriverError::Provider(format!("invalid create response: {}", e)))?;
        Ok(created.csp_id)
    }

    async fn get_instance(
        &self,
        conn: &ConnectionConfig,
        csp_id: &str,
    ) -> Result<InstanceInfo, DriverError> {
        let resp = self
            .client
            .get(self.url(&format!("vm/{}", csp_id)))
            .query(&[("connectionName", conn.name.as_str())])
            .send()
            .await
            .map_err(|e| self.send_error(e))?;
        Self::check(resp, csp_id)
            .await?
            .json()
            .await
            .map_err(|e| DriverError::Provider(format!("invalid describe response: {}", e)))
    }

    async fn delete_instance(&self, conn: &ConnectionConfig, csp_id: &str) -> Result<(), DriverError> {
        let resp = self
            .client
            .delete(self.url(&format!("vm/{}", csp_id)))
            .query(&[("connectionName", conn.name.as_str())])
            .send()
            .await
            .map_err(|e| self.send_error(e))?;
        Self::check(resp, csp_id).await?;
        Ok(())
    }

    async fn control_instance(
        &self,
        conn: &ConnectionConfig,
        csp_id: &str,
        action: InstanceAction,
    ) -> Result<InstanceState, DriverError> {
        let resp = self
            .client
            .get(self.url(&format!("controlvm/{}", csp_id)))
            .query(&[("connectionName", conn.name.as_str()), ("action", action.as_str())])
            .send()
            .await
            .map_err(|e| self.send_error(e))?;
        let result: ControlResult = Self::check(resp, csp_id)
            .await?
            .json()
            .await
            .map_err(|e| DriverError::Provider(format!("invalid control response: {}", e)))?;
        Ok(result.status)
    }
}
