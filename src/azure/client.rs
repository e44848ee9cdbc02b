//! HTTP client for the `Microsoft.EventGrid/systemTopics` ARM API.
//!
//! [`SystemTopicsApi`] is the seam the resource code is written against;
//! [`ArmClient`] is the real implementation and
//! [`crate::testing::InMemorySystemTopics`] the in-memory one used by tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, ACCEPT, LOCATION, RETRY_AFTER};
use reqwest::{Method, StatusCode, Url};
use tracing::{debug, instrument};

use super::credentials::Credential;
use super::error::ArmError;
use super::models::{OperationStatus, SystemTopic};
use super::poller::{classify_status, parse_retry_after, CompletedOperation, Operation, PollState};
use super::resource_id::{EVENTGRID_NAMESPACE, SYSTEM_TOPICS_KEY};

/// API version sent with every system topic request.
pub const API_VERSION: &str = "2020-10-15-preview";

const AZURE_ASYNC_OPERATION: &str = "azure-asyncoperation";

/// Remote operations on Event Grid system topics.
///
/// A missing topic is reported as an [`ArmError`] whose
/// [`is_not_found`](ArmError::is_not_found) is true, from `get`, from the
/// initial `delete` call, or from polling the returned [`Operation`].
#[async_trait]
pub trait SystemTopicsApi: Send + Sync {
    /// Fetch a topic.
    async fn get(&self, resource_group: &str, name: &str) -> Result<SystemTopic, ArmError>;

    /// Submit a create-or-update and return a handle to wait on.
    async fn create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        topic: &SystemTopic,
    ) -> Result<Box<dyn Operation>, ArmError>;

    /// Submit a delete and return a handle to wait on.
    async fn delete(&self, resource_group: &str, name: &str)
        -> Result<Box<dyn Operation>, ArmError>;
}

struct ArmConnection {
    http: reqwest::Client,
    endpoint: Url,
    subscription_id: String,
    credential: Credential,
}

impl ArmConnection {
    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<&SystemTopic>,
    ) -> Result<reqwest::Response, ArmError> {
        let token = self.credential.token(&self.http).await?;
        let mut request = self
            .http
            .request(method, url)
            .bearer_auth(token)
            .header(ACCEPT, "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }
}

/// Azure Resource Manager client scoped to one subscription.
#[derive(Clone)]
pub struct ArmClient {
    conn: Arc<ArmConnection>,
}

impl ArmClient {
    /// Create a client for `subscription_id` against `endpoint`.
    pub fn new(
        endpoint: &str,
        subscription_id: impl Into<String>,
        credential: Credential,
    ) -> Result<Self, ArmError> {
        Self::with_http_client(reqwest::Client::new(), endpoint, subscription_id, credential)
    }

    /// Create a client that reuses an existing `reqwest` client.
    pub fn with_http_client(
        http: reqwest::Client,
        endpoint: &str,
        subscription_id: impl Into<String>,
        credential: Credential,
    ) -> Result<Self, ArmError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| ArmError::Url(format!("{:?}: {}", endpoint, e)))?;
        if endpoint.cannot_be_a_base() {
            return Err(ArmError::Url(format!("{:?} cannot be a base URL", endpoint.as_str())));
        }
        Ok(Self {
            conn: Arc::new(ArmConnection {
                http,
                endpoint,
                subscription_id: subscription_id.into(),
                credential,
            }),
        })
    }

    /// The subscription this client targets.
    pub fn subscription_id(&self) -> &str {
        &self.conn.subscription_id
    }

    fn topic_url(&self, resource_group: &str, name: &str) -> Result<Url, ArmError> {
        let mut url = self.conn.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| ArmError::Url(self.conn.endpoint.to_string()))?
            .pop_if_empty()
            .extend([
                "subscriptions",
                self.conn.subscription_id.as_str(),
                "resourceGroups",
                resource_group,
                "providers",
                EVENTGRID_NAMESPACE,
                SYSTEM_TOPICS_KEY,
                name,
            ]);
        url.query_pairs_mut().append_pair("api-version", API_VERSION);
        Ok(url)
    }

    fn operation(&self, strategy: PollStrategy) -> Box<dyn Operation> {
        match strategy {
            PollStrategy::Done => Box::new(CompletedOperation),
            strategy => Box::new(ArmOperation {
                conn: Arc::clone(&self.conn),
                strategy,
            }),
        }
    }
}

#[async_trait]
impl SystemTopicsApi for ArmClient {
    #[instrument(skip(self), name = "arm.get")]
    async fn get(&self, resource_group: &str, name: &str) -> Result<SystemTopic, ArmError> {
        let url = self.topic_url(resource_group, name)?;
        let response = self.conn.send(Method::GET, url, None).await?;
        let status = response.status();
        let body = response.bytes().await?;
        if status != StatusCode::OK {
            return Err(ArmError::from_body(status.as_u16(), &body));
        }
        Ok(serde_json::from_slice(&body)?)
    }

    #[instrument(skip(self, topic), name = "arm.create_or_update")]
    async fn create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        topic: &SystemTopic,
    ) -> Result<Box<dyn Operation>, ArmError> {
        let url = self.topic_url(resource_group, name)?;
        let response = self.conn.send(Method::PUT, url.clone(), Some(topic)).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        if !matches!(
            status,
            StatusCode::OK | StatusCode::CREATED | StatusCode::ACCEPTED
        ) {
            return Err(ArmError::from_body(status.as_u16(), &body));
        }

        let strategy = PollStrategy::for_put(&headers, url);
        debug!(status = status.as_u16(), strategy = strategy.name(), "Create or update accepted");
        Ok(self.operation(strategy))
    }

    #[instrument(skip(self), name = "arm.delete")]
    async fn delete(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<Box<dyn Operation>, ArmError> {
        let url = self.topic_url(resource_group, name)?;
        let response = self.conn.send(Method::DELETE, url, None).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        let strategy = match status {
            StatusCode::OK | StatusCode::NO_CONTENT => PollStrategy::Done,
            StatusCode::ACCEPTED => PollStrategy::for_accepted(&headers),
            _ => return Err(ArmError::from_body(status.as_u16(), &body)),
        };
        debug!(status = status.as_u16(), strategy = strategy.name(), "Delete accepted");
        Ok(self.operation(strategy))
    }
}

/// How to find out whether a submitted operation has finished.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PollStrategy {
    /// Poll a status document at the `Azure-AsyncOperation` URL.
    AsyncOperation(Url),
    /// Poll the `Location` URL until it stops answering 202.
    Location(Url),
    /// Poll the resource itself until its provisioning state is terminal.
    ProvisioningState(Url),
    /// Nothing left to wait for.
    Done,
}

impl PollStrategy {
    fn for_put(headers: &HeaderMap, resource_url: Url) -> Self {
        match header_url(headers, AZURE_ASYNC_OPERATION) {
            Some(url) => Self::AsyncOperation(url),
            None => Self::ProvisioningState(resource_url),
        }
    }

    fn for_accepted(headers: &HeaderMap) -> Self {
        if let Some(url) = header_url(headers, AZURE_ASYNC_OPERATION) {
            Self::AsyncOperation(url)
        } else if let Some(url) = header_url(headers, LOCATION.as_str()) {
            Self::Location(url)
        } else {
            Self::Done
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::AsyncOperation(_) => "azure-async-operation",
            Self::Location(_) => "location",
            Self::ProvisioningState(_) => "provisioning-state",
            Self::Done => "done",
        }
    }
}

fn header_url(headers: &HeaderMap, name: &str) -> Option<Url> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Url::parse(v).ok())
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after)
}

struct ArmOperation {
    conn: Arc<ArmConnection>,
    strategy: PollStrategy,
}

#[async_trait]
impl Operation for ArmOperation {
    async fn poll(&mut self) -> Result<PollState, ArmError> {
        let url = match &self.strategy {
            PollStrategy::Done => return Ok(PollState::Done),
            PollStrategy::AsyncOperation(url)
            | PollStrategy::Location(url)
            | PollStrategy::ProvisioningState(url) => url.clone(),
        };

        let response = self.conn.send(Method::GET, url, None).await?;
        let status = response.status();
        let wait = retry_after(response.headers());
        let body = response.bytes().await?;

        let state = match &self.strategy {
            PollStrategy::Location(_) => match status {
                StatusCode::ACCEPTED => PollState::Running { retry_after: wait },
                StatusCode::OK | StatusCode::CREATED | StatusCode::NO_CONTENT => PollState::Done,
                _ => return Err(ArmError::from_body(status.as_u16(), &body)),
            },
            PollStrategy::AsyncOperation(_) => {
                if !status.is_success() {
                    return Err(ArmError::from_body(status.as_u16(), &body));
                }
                let document: OperationStatus = serde_json::from_slice(&body)?;
                let error = document.error.unwrap_or_default();
                classify_status(&document.status, wait, error.code, error.message)?
            },
            PollStrategy::ProvisioningState(_) => {
                if status != StatusCode::OK {
                    return Err(ArmError::from_body(status.as_u16(), &body));
                }
                let topic: SystemTopic = serde_json::from_slice(&body)?;
                match topic.provisioning_state() {
                    Some(state) => classify_status(state, wait, None, None)?,
                    None => PollState::Done,
                }
            },
            PollStrategy::Done => PollState::Done,
        };

        if state == PollState::Done {
            self.strategy = PollStrategy::Done;
        }
        Ok(state)
    }
}
