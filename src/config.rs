//! Provider configuration.
//!
//! The host sends the provider block as JSON through `Configure`. Settings the
//! block leaves unset are taken from the usual `ARM_*` environment variables.

use std::fmt;
use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;

use crate::azure::{ArmClient, ClientSecretCredential, Credential};
use crate::error::ProviderError;
use crate::schema::{Attribute, Diagnostic, Schema};

/// Default Azure Resource Manager endpoint.
pub const DEFAULT_RESOURCE_MANAGER_ENDPOINT: &str = "https://management.azure.com";

/// Default Microsoft identity platform host.
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// Default delay between long-running operation polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

const ENV_SUBSCRIPTION_ID: &str = "ARM_SUBSCRIPTION_ID";
const ENV_TENANT_ID: &str = "ARM_TENANT_ID";
const ENV_CLIENT_ID: &str = "ARM_CLIENT_ID";
const ENV_CLIENT_SECRET: &str = "ARM_CLIENT_SECRET";
const ENV_ACCESS_TOKEN: &str = "ARM_ACCESS_TOKEN";

/// The provider configuration block.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Subscription all resources are managed in.
    #[serde(default)]
    pub subscription_id: Option<String>,
    /// Azure AD tenant of the service principal.
    #[serde(default)]
    pub tenant_id: Option<String>,
    /// Application (client) ID of the service principal.
    #[serde(default)]
    pub client_id: Option<String>,
    /// Client secret of the service principal.
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Pre-issued bearer token; takes precedence over the client secret.
    #[serde(default)]
    pub access_token: Option<String>,
    /// ARM endpoint, for sovereign clouds.
    #[serde(default)]
    pub resource_manager_endpoint: Option<String>,
    /// Identity platform host, for sovereign clouds.
    #[serde(default)]
    pub authority_host: Option<String>,
    /// Seconds between polls when ARM does not send `Retry-After`.
    #[serde(default)]
    pub poll_interval_seconds: Option<u64>,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("subscription_id", &self.subscription_id)
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("resource_manager_endpoint", &self.resource_manager_endpoint)
            .field("authority_host", &self.authority_host)
            .field("poll_interval_seconds", &self.poll_interval_seconds)
            .finish()
    }
}

impl ProviderConfig {
    /// Decode the configuration block. A null block is an empty configuration.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ProviderError> {
        if value.is_null() {
            return Ok(Self::default());
        }
        let config: Self = serde_json::from_value(value)?;
        Ok(config.without_blanks())
    }

    /// Fill unset values using `lookup` for environment variables.
    pub fn with_env_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        for (slot, key) in [
            (&mut self.subscription_id, ENV_SUBSCRIPTION_ID),
            (&mut self.tenant_id, ENV_TENANT_ID),
            (&mut self.client_id, ENV_CLIENT_ID),
            (&mut self.client_secret, ENV_CLIENT_SECRET),
            (&mut self.access_token, ENV_ACCESS_TOKEN),
        ] {
            if slot.is_none() {
                *slot = lookup(key);
            }
        }
        self
    }

    fn without_blanks(mut self) -> Self {
        for slot in [
            &mut self.subscription_id,
            &mut self.tenant_id,
            &mut self.client_id,
            &mut self.client_secret,
            &mut self.access_token,
            &mut self.resource_manager_endpoint,
            &mut self.authority_host,
        ] {
            if slot.as_deref().is_some_and(|v| v.trim().is_empty()) {
                *slot = None;
            }
        }
        self
    }

    /// The ARM endpoint to use.
    pub fn endpoint(&self) -> &str {
        self.resource_manager_endpoint
            .as_deref()
            .unwrap_or(DEFAULT_RESOURCE_MANAGER_ENDPOINT)
    }

    /// The identity platform host to use.
    pub fn authority(&self) -> &str {
        self.authority_host.as_deref().unwrap_or(DEFAULT_AUTHORITY_HOST)
    }

    /// Delay between polls of a long-running operation.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval_seconds
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_POLL_INTERVAL)
    }

    /// Check the configuration, returning one diagnostic per problem.
    pub fn validate(&self) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        if self.subscription_id.is_none() {
            diagnostics.push(
                Diagnostic::error("subscription_id is required")
                    .with_detail(format!("Set it in the provider block or via {}", ENV_SUBSCRIPTION_ID))
                    .with_attribute("subscription_id"),
            );
        }

        if self.access_token.is_none() {
            let missing: Vec<&str> = [
                ("tenant_id", &self.tenant_id),
                ("client_id", &self.client_id),
                ("client_secret", &self.client_secret),
            ]
            .into_iter()
            .filter(|(_, value)| value.is_none())
            .map(|(name, _)| name)
            .collect();
            if !missing.is_empty() {
                diagnostics.push(
                    Diagnostic::error("No credentials configured").with_detail(format!(
                        "Set access_token, or all of tenant_id, client_id and client_secret (missing: {})",
                        missing.join(", ")
                    )),
                );
            }
        }

        for (name, value) in [
            ("resource_manager_endpoint", self.endpoint()),
            ("authority_host", self.authority()),
        ] {
            if let Err(e) = Url::parse(value) {
                diagnostics.push(
                    Diagnostic::error(format!("{} is not a valid URL", name))
                        .with_detail(format!("{:?}: {}", value, e))
                        .with_attribute(name),
                );
            }
        }

        if self.poll_interval_seconds == Some(0) {
            diagnostics.push(
                Diagnostic::error("poll_interval_seconds must be greater than zero")
                    .with_attribute("poll_interval_seconds"),
            );
        }

        diagnostics
    }

    /// Build the credential described by this configuration.
    pub fn credential(&self) -> Result<Credential, ProviderError> {
        if let Some(token) = &self.access_token {
            return Ok(Credential::AccessToken(token.clone()));
        }
        match (&self.tenant_id, &self.client_id, &self.client_secret) {
            (Some(tenant), Some(client), Some(secret)) => {
                Ok(Credential::ClientSecret(ClientSecretCredential::new(
                    tenant.clone(),
                    client.clone(),
                    secret.clone(),
                    self.authority(),
                    self.endpoint(),
                )))
            },
            _ => Err(ProviderError::Configuration(
                "no credentials configured".to_string(),
            )),
        }
    }

    /// Build an ARM client from this configuration.
    pub fn build_client(&self) -> Result<ArmClient, ProviderError> {
        let subscription_id = self
            .subscription_id
            .clone()
            .ok_or_else(|| ProviderError::Configuration("subscription_id is required".to_string()))?;
        ArmClient::new(self.endpoint(), subscription_id, self.credential()?)
            .map_err(|e| ProviderError::Configuration(e.to_string()))
    }
}

/// Schema of the provider configuration block.
pub fn provider_config_schema() -> Schema {
    Schema::v0()
        .with_description("Azure Resource Manager connection settings")
        .with_attribute(
            "subscription_id",
            Attribute::optional_string()
                .with_description("Subscription ID. Falls back to ARM_SUBSCRIPTION_ID."),
        )
        .with_attribute(
            "tenant_id",
            Attribute::optional_string().with_description("Tenant ID. Falls back to ARM_TENANT_ID."),
        )
        .with_attribute(
            "client_id",
            Attribute::optional_string().with_description("Client ID. Falls back to ARM_CLIENT_ID."),
        )
        .with_attribute(
            "client_secret",
            Attribute::optional_string()
                .sensitive()
                .with_description("Client secret. Falls back to ARM_CLIENT_SECRET."),
        )
        .with_attribute(
            "access_token",
            Attribute::optional_string()
                .sensitive()
                .with_description("Bearer token used instead of a client secret. Falls back to ARM_ACCESS_TOKEN."),
        )
        .with_attribute(
            "resource_manager_endpoint",
            Attribute::optional_string()
                .with_default(serde_json::json!(DEFAULT_RESOURCE_MANAGER_ENDPOINT)),
        )
        .with_attribute(
            "authority_host",
            Attribute::optional_string().with_default(serde_json::json!(DEFAULT_AUTHORITY_HOST)),
        )
        .with_attribute(
            "poll_interval_seconds",
            Attribute::optional_int64()
                .with_default(serde_json::json!(DEFAULT_POLL_INTERVAL.as_secs())),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_from_value_null_is_empty() {
        let config = ProviderConfig::from_value(serde_json::Value::Null).unwrap();
        assert_eq!(config, ProviderConfig::default());
        assert_eq!(config.endpoint(), DEFAULT_RESOURCE_MANAGER_ENDPOINT);
        assert_eq!(config.poll_interval(), DEFAULT_POLL_INTERVAL);
    }

    #[test]
    fn test_from_value_rejects_unknown_fields() {
        let err = ProviderConfig::from_value(json!({"subscription": "x"})).unwrap_err();
        assert!(matches!(err, ProviderError::Serialization(_)));
    }

    #[test]
    fn test_env_fallbacks() {
        let config = ProviderConfig::from_value(json!({"subscription_id": "from-block", "tenant_id": ""}))
            .unwrap()
            .with_env_lookup(env(&[
                ("ARM_SUBSCRIPTION_ID", "from-env"),
                ("ARM_TENANT_ID", "tenant"),
                ("ARM_CLIENT_ID", "client"),
                ("ARM_CLIENT_SECRET", "secret"),
                ("ARM_ACCESS_TOKEN", "  "),
            ]));

        assert_eq!(config.subscription_id.as_deref(), Some("from-block"));
        assert_eq!(config.tenant_id.as_deref(), Some("tenant"));
        assert_eq!(config.client_secret.as_deref(), Some("secret"));
        assert!(config.access_token.is_none());
        assert!(config.validate().is_empty());
        assert!(matches!(config.credential().unwrap(), Credential::ClientSecret(_)));
    }

    #[test]
    fn test_validate_missing_settings() {
        let config = ProviderConfig::default();
        let diagnostics = config.validate();
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("subscription_id"));
        assert!(diagnostics[1]
            .detail
            .as_deref()
            .unwrap()
            .contains("tenant_id, client_id, client_secret"));
        assert!(config.build_client().is_err());
    }

    #[test]
    fn test_validate_bad_values() {
        let config = ProviderConfig::from_value(json!({
            "subscription_id": "sub",
            "access_token": "token",
            "resource_manager_endpoint": "not a url",
            "poll_interval_seconds": 0
        }))
        .unwrap();
        let attributes: Vec<_> = config
            .validate()
            .into_iter()
            .filter_map(|d| d.attribute)
            .collect();
        assert_eq!(attributes, vec!["resource_manager_endpoint", "poll_interval_seconds"]);
    }

    #[test]
    fn test_access_token_wins() {
        let config = ProviderConfig::from_value(json!({
            "subscription_id": "sub",
            "access_token": "token",
            "client_id": "client"
        }))
        .unwrap();
        assert!(matches!(config.credential().unwrap(), Credential::AccessToken(t) if t == "token"));
        let client = config.build_client().unwrap();
        assert_eq!(client.subscription_id(), "sub");
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = ProviderConfig {
            client_secret: Some("hunter2".into()),
            access_token: Some("bearer".into()),
            ..Default::default()
        };
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("bearer"));
    }

    #[test]
    fn test_schema_marks_secrets_sensitive() {
        let schema = provider_config_schema();
        assert!(schema.block.attributes["client_secret"].flags.sensitive);
        assert!(schema.block.attributes["access_token"].flags.sensitive);
        assert!(!schema.block.attributes["subscription_id"].flags.sensitive);
    }
}
