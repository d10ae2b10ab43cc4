//! Registration backend
//!
//! [`RegistrationBackend`] is the seam between the registrar's retry logic and
//! the transport. [`HttpRegistrationBackend`] is the production implementation:
//! one JSON `POST` per attempt, any 2xx counts as success.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

use super::{DeviceMetadata, UserIdentity};
use crate::config::RegistrationConfig;
use crate::error::{VoipError, VoipResult};

/// Body of a token registration
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    pub user_id: String,
    pub voip_token: String,
    pub platform: String,
    pub bundle_id: String,
    pub environment: String,
    pub device_model: String,
    pub system_version: String,
    /// Sent as a bearer header, never in the body
    #[serde(skip)]
    pub auth_token: Option<String>,
}

impl RegistrationRequest {
    pub fn new(token: impl Into<String>, identity: &UserIdentity, device: &DeviceMetadata) -> Self {
        Self {
            user_id: identity.user_id.clone(),
            voip_token: token.into(),
            platform: device.platform.clone(),
            bundle_id: device.bundle_id.clone(),
            environment: device.environment.clone(),
            device_model: device.device_model.clone(),
            system_version: device.system_version.clone(),
            auth_token: identity.auth_token.clone(),
        }
    }
}

impl fmt::Debug for RegistrationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationRequest")
            .field("user_id", &self.user_id)
            .field("voip_token", &self.voip_token)
            .field("platform", &self.platform)
            .field("bundle_id", &self.bundle_id)
            .field("environment", &self.environment)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

/// Delivers a device token to the backend
///
/// An `Ok` means the backend confirmed the token. Every error is retried by
/// the registrar after its fixed delay.
#[async_trait]
pub trait RegistrationBackend: Send + Sync {
    async fn register(&self, request: &RegistrationRequest) -> VoipResult<()>;
}

/// HTTP implementation of [`RegistrationBackend`]
#[derive(Debug, Clone)]
pub struct HttpRegistrationBackend {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRegistrationBackend {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> VoipResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VoipError::internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn from_config(config: &RegistrationConfig) -> VoipResult<Self> {
        Self::new(config.endpoint.clone(), config.request_timeout())
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RegistrationBackend for HttpRegistrationBackend {
    async fn register(&self, request: &RegistrationRequest) -> VoipResult<()> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(auth_token) = &request.auth_token {
            builder = builder.bearer_auth(auth_token);
        }

        let response = builder.send().await?;
        let status = response.status();
        tracing::debug!(status = %status, endpoint = %self.endpoint, "Registration response received");

        if status.is_success() {
            Ok(())
        } else {
            Err(VoipError::RegistrationRejected {
                status: status.as_u16(),
            })
        }
    }
}
