//! Errors returned by the Azure Resource Manager client.

use serde::Deserialize;
use thiserror::Error;

/// A failed call against Azure Resource Manager.
///
/// "Not found" has no variant of its own: it is an ordinary
/// [`ArmError::Status`] with status 404 and callers decide what it means via
/// [`ArmError::is_not_found`].
#[derive(Debug, Error)]
pub enum ArmError {
    /// ARM answered with an unexpected HTTP status.
    #[error("unexpected status {status} ({code}): {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// ARM error code, e.g. `ResourceNotFound`.
        code: String,
        /// ARM error message.
        message: String,
    },

    /// A long-running operation reached a failed or canceled terminal state.
    #[error("long-running operation finished with status {status} ({code}): {message}")]
    OperationFailed {
        /// Terminal status reported by the operation (`Failed`, `Canceled`).
        status: String,
        /// ARM error code, if one was reported.
        code: String,
        /// ARM error message, if one was reported.
        message: String,
    },

    /// The HTTP request itself failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// A response body could not be decoded.
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    /// An access token could not be obtained.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A request URL could not be built.
    #[error("invalid request URL: {0}")]
    Url(String),
}

impl ArmError {
    /// Shorthand for a 404 [`ArmError::Status`].
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::Status {
            status: 404,
            code: "ResourceNotFound".to_string(),
            message: message.into(),
        }
    }

    /// Whether the remote object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }

    /// The HTTP status behind this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Http(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Build an error from a non-success response body.
    ///
    /// ARM wraps errors as `{"error": {"code": ..., "message": ...}}`; anything
    /// else is reported verbatim.
    pub fn from_body(status: u16, body: &[u8]) -> Self {
        match serde_json::from_slice::<ErrorEnvelope>(body) {
            Ok(envelope) => Self::Status {
                status,
                code: envelope.error.code.unwrap_or_default(),
                message: envelope.error.message.unwrap_or_default(),
            },
            Err(_) => Self::Status {
                status,
                code: String::new(),
                message: String::from_utf8_lossy(body).trim().to_string(),
            },
        }
    }
}

/// The `{"error": {...}}` wrapper used by ARM error responses.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorEnvelope {
    pub(crate) error: ErrorDetail,
}

/// Code and message of an ARM error.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ErrorDetail {
    #[serde(default)]
    pub(crate) code: Option<String>,
    #[serde(default)]
    pub(crate) message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_body_decodes_arm_envelope() {
        let body = br#"{"error":{"code":"ResourceGroupNotFound","message":"Resource group 'rg1' could not be found."}}"#;
        let err = ArmError::from_body(404, body);
        assert!(err.is_not_found());
        match err {
            ArmError::Status { code, message, .. } => {
                assert_eq!(code, "ResourceGroupNotFound");
                assert_eq!(message, "Resource group 'rg1' could not be found.");
            },
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_from_body_keeps_unstructured_text() {
        let err = ArmError::from_body(502, b"  Bad Gateway\n");
        assert_eq!(err.status(), Some(502));
        assert_eq!(err.to_string(), "unexpected status 502 (): Bad Gateway");
    }

    #[test]
    fn test_not_found_helper() {
        let err = ArmError::not_found("gone");
        assert!(err.is_not_found());
        assert_eq!(err.status(), Some(404));
        assert!(!ArmError::Auth("nope".into()).is_not_found());
    }
}
