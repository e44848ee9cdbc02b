//! Error types for the Event Grid provider.
//!
//! [`ProviderError`] is what every provider operation returns. Remote failures
//! start life as [`crate::azure::ArmError`] and are converted here once the
//! resource adapter has decided whether a "not found" is benign.

use thiserror::Error;

use crate::schema::Diagnostic;

/// Errors that can occur while serving provider operations.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The requested resource was not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Input was rejected before any remote call was made.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A resource identifier could not be parsed.
    #[error("Invalid resource ID: {0}")]
    InvalidResourceId(String),

    /// The resource already exists and must be imported instead of created.
    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    /// The remote management API returned an error.
    #[error("API error: {message}")]
    Api {
        /// HTTP status of the failing response, if there was one.
        status: Option<u16>,
        /// Full message including the resource name and resource group.
        message: String,
    },

    /// A deadline was exceeded while waiting on the remote API.
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// The remote API reported success but returned unusable data.
    #[error("Inconsistent remote state: {0}")]
    InconsistentState(String),

    /// The provider is not configured, or its configuration is invalid.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The requested resource type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// The requested data source type is unknown.
    #[error("Unknown data source type: {0}")]
    UnknownDataSource(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A gRPC transport error occurred.
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// The request is not valid for this provider.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ProviderError {
    /// Build a [`ProviderError::Api`] without an HTTP status.
    pub fn api(message: impl Into<String>) -> Self {
        Self::Api {
            status: None,
            message: message.into(),
        }
    }

    /// Whether this error means the remote object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Api { status: Some(404), .. })
    }

    /// Render this error as a single error diagnostic.
    pub fn to_diagnostic(&self) -> Diagnostic {
        let diagnostic = Diagnostic::error(self.to_string());
        match self {
            Self::Api {
                status: Some(status),
                ..
            } => diagnostic.with_detail(format!("HTTP status {}", status)),
            _ => diagnostic,
        }
    }
}

impl From<ProviderError> for tonic::Status {
    fn from(err: ProviderError) -> Self {
        let message = err.to_string();
        match err {
            ProviderError::NotFound(_)
            | ProviderError::UnknownResource(_)
            | ProviderError::UnknownDataSource(_) => tonic::Status::not_found(message),
            ProviderError::Validation(_)
            | ProviderError::InvalidResourceId(_)
            | ProviderError::Serialization(_)
            | ProviderError::InvalidRequest(_) => tonic::Status::invalid_argument(message),
            ProviderError::AlreadyExists(_) => tonic::Status::already_exists(message),
            ProviderError::Api { status, .. } => match status {
                Some(401) | Some(403) => tonic::Status::permission_denied(message),
                Some(404) => tonic::Status::not_found(message),
                Some(409) => tonic::Status::aborted(message),
                Some(429) => tonic::Status::resource_exhausted(message),
                Some(s) if s >= 500 => tonic::Status::unavailable(message),
                _ => tonic::Status::unknown(message),
            },
            ProviderError::DeadlineExceeded(_) => tonic::Status::deadline_exceeded(message),
            ProviderError::InconsistentState(_) => tonic::Status::internal(message),
            ProviderError::Configuration(_) => tonic::Status::failed_precondition(message),
            ProviderError::Transport(_) => tonic::Status::unavailable(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProviderError::AlreadyExists(
            "Event Grid System Topic \"topic1\" (Resource Group \"rg1\")".to_string(),
        );
        assert_eq!(
            err.to_string(),
            "Resource already exists: Event Grid System Topic \"topic1\" (Resource Group \"rg1\")"
        );

        let err = ProviderError::InvalidResourceId("missing subscriptions segment".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid resource ID: missing subscriptions segment"
        );

        let err = ProviderError::api("boom");
        assert_eq!(err.to_string(), "API error: boom");

        let err = ProviderError::UnknownResource("azurerm_eventgrid_topic".to_string());
        assert_eq!(err.to_string(), "Unknown resource type: azurerm_eventgrid_topic");

        let err = ProviderError::UnknownDataSource("azurerm_eventgrid_topic".to_string());
        assert_eq!(err.to_string(), "Unknown data source type: azurerm_eventgrid_topic");
    }

    #[test]
    fn test_is_not_found() {
        assert!(ProviderError::NotFound("x".into()).is_not_found());
        assert!(ProviderError::Api {
            status: Some(404),
            message: "gone".into()
        }
        .is_not_found());
        assert!(!ProviderError::Api {
            status: Some(500),
            message: "down".into()
        }
        .is_not_found());
        assert!(!ProviderError::Validation("bad".into()).is_not_found());
    }

    #[test]
    fn test_error_to_status() {
        let status: tonic::Status = ProviderError::Validation("test".into()).into();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let status: tonic::Status = ProviderError::InvalidResourceId("test".into()).into();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let status: tonic::Status = ProviderError::AlreadyExists("test".into()).into();
        assert_eq!(status.code(), tonic::Code::AlreadyExists);

        let status: tonic::Status = ProviderError::DeadlineExceeded("test".into()).into();
        assert_eq!(status.code(), tonic::Code::DeadlineExceeded);

        let status: tonic::Status = ProviderError::InconsistentState("test".into()).into();
        assert_eq!(status.code(), tonic::Code::Internal);

        let status: tonic::Status = ProviderError::Configuration("test".into()).into();
        assert_eq!(status.code(), tonic::Code::FailedPrecondition);
    }

    #[test]
    fn test_api_error_status_mapping() {
        let cases = [
            (Some(403), tonic::Code::PermissionDenied),
            (Some(404), tonic::Code::NotFound),
            (Some(409), tonic::Code::Aborted),
            (Some(429), tonic::Code::ResourceExhausted),
            (Some(503), tonic::Code::Unavailable),
            (Some(400), tonic::Code::Unknown),
            (None, tonic::Code::Unknown),
        ];
        for (http, code) in cases {
            let status: tonic::Status = ProviderError::Api {
                status: http,
                message: "x".into(),
            }
            .into();
            assert_eq!(status.code(), code, "http status {:?}", http);
        }
    }

    #[test]
    fn test_to_diagnostic() {
        let diag = ProviderError::Api {
            status: Some(400),
            message: "bad request".into(),
        }
        .to_diagnostic();
        assert_eq!(diag.summary, "API error: bad request");
        assert_eq!(diag.detail, Some("HTTP status 400".to_string()));

        let diag = ProviderError::Validation("nope".into()).to_diagnostic();
        assert!(diag.detail.is_none());
    }
}
