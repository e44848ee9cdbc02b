//! Azure Resource Manager plumbing for Event Grid system topics.

pub mod client;
pub mod credentials;
pub mod error;
pub mod location;
pub mod models;
pub mod poller;
pub mod resource_id;
pub mod tags;

pub use client::{ArmClient, SystemTopicsApi, API_VERSION};
pub use credentials::{ClientSecretCredential, Credential};
pub use error::ArmError;
pub use models::{IdentityInfo, ManagedIdentityType, SystemTopic, SystemTopicProperties};
pub use poller::{wait_for_completion, CompletedOperation, Operation, PollState};
pub use resource_id::{ResourceId, SystemTopicId};
