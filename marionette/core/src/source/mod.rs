//! Animation Service Ports
//!
//! Where sequence descriptors and clip assets come from. The engine only sees
//! the [`SequenceSource`] trait and [`crate::clip::AssetLoader`]; concrete
//! implementations talk HTTP to the animation service ([`http`]) or read a
//! local directory ([`local`]).
//!
//! # Service Endpoints
//!
//! - `GET /sequence/{name}` returns one [`SequenceDescriptor`]
//! - `GET /sequences` returns `{ "sequences": [{sequence, description}], "count": n }`
//! - `GET /health` returns 200 while the service is up

pub mod http;
pub mod local;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::clip::SequenceDescriptor;
use crate::error::EngineError;

pub use http::{HttpAssetLoader, HttpSequenceSource};
pub use local::{DirAssetLoader, StaticSequenceSource};

/// One entry of the service's sequence listing
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceSummary {
    /// Sequence name
    pub sequence: String,
    /// Free-text description
    #[serde(default)]
    pub description: Option<String>,
}

/// Body of `GET /sequences`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceListing {
    /// Available sequences
    #[serde(default)]
    pub sequences: Vec<SequenceSummary>,
    /// Number of sequences the service knows
    #[serde(default)]
    pub count: usize,
}

/// Supplies sequence descriptors by name
#[async_trait]
pub trait SequenceSource: Send + Sync {
    /// Human-readable source name for logs
    fn name(&self) -> &'static str;

    /// Fetch the descriptor filed under `name`
    ///
    /// # Errors
    ///
    /// Returns `EngineError::AssetLoad` when the name is unknown or the
    /// service cannot be reached.
    async fn fetch_descriptor(&self, name: &str) -> Result<SequenceDescriptor, EngineError>;

    /// List every sequence the source knows
    ///
    /// # Errors
    ///
    /// Returns `EngineError::AssetLoad` when the listing cannot be fetched.
    async fn list_sequences(&self) -> Result<Vec<SequenceSummary>, EngineError>;

    /// Whether the source is reachable
    async fn health_check(&self) -> bool;
}
