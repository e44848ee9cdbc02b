//! The `azurerm_eventgrid_system_topic` data source.

use serde::Deserialize;
use tracing::debug;

use super::{data_source_schema, describe, resource::flatten};
use crate::azure::{SystemTopicId, SystemTopicsApi};
use crate::error::ProviderError;
use crate::timeouts::{with_deadline, DEFAULT_READ};
use crate::validation::validate;

#[derive(Debug, Deserialize)]
struct Lookup {
    name: String,
    resource_group_name: String,
}

/// Look up an existing topic by name and resource group.
///
/// Unlike a resource read, a missing topic is an error here.
pub async fn read_data_source(
    api: &dyn SystemTopicsApi,
    subscription_id: &str,
    config: serde_json::Value,
) -> Result<serde_json::Value, ProviderError> {
    if let Some(diagnostic) = validate(&data_source_schema(), &config).into_iter().next() {
        return Err(ProviderError::Validation(format!(
            "{}: {}",
            diagnostic.attribute.unwrap_or_default(),
            diagnostic.detail.unwrap_or(diagnostic.summary)
        )));
    }
    let lookup: Lookup = serde_json::from_value(config)?;
    let description = describe(&lookup.name, &lookup.resource_group_name);
    debug!(name = %lookup.name, resource_group = %lookup.resource_group_name, "Reading system topic data source");

    let what = format!("reading {}", description);
    with_deadline(DEFAULT_READ, &what, async {
        let topic = match api.get(&lookup.resource_group_name, &lookup.name).await {
            Ok(topic) => topic,
            Err(e) if e.is_not_found() => {
                return Err(ProviderError::NotFound(format!("{} was not found", description)))
            },
            Err(e) => {
                return Err(ProviderError::Api {
                    status: e.status(),
                    message: format!("retrieving {}: {}", description, e),
                })
            },
        };

        let id = SystemTopicId::new(subscription_id, &lookup.resource_group_name, &lookup.name);
        let state_id = topic.id.clone().unwrap_or_else(|| id.to_string());
        let mut value = flatten(&id, state_id, &topic, None).to_value()?;
        if let Some(obj) = value.as_object_mut() {
            obj.remove("timeouts");
        }
        Ok(value)
    })
    .await
}
