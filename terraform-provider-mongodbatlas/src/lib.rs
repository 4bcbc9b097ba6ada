//! Terraform Provider for MongoDB Atlas
//!
//! Manages the lifecycle of MongoDB Atlas clusters: translating Terraform
//! attributes into Atlas API payloads, waiting for asynchronous provisioning
//! to settle, and mapping the result back into Terraform state.

pub mod client;
pub mod cluster;
pub mod config;
pub mod error;
pub mod logging;
pub mod poller;
pub mod provider;
pub mod resources;
pub mod schema;
pub mod state_id;
pub mod translate;

#[cfg(test)]
mod testing;

pub use client::{AtlasClient, ClusterApi};
pub use error::{ProviderError, Result};
pub use provider::MongoDbAtlasProvider;
pub use resources::{ClusterResource, Resource, ResourceState};
