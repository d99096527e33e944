//! Provenance: where a published value came from.

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Origin of a published value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Published by code running in this process.
    #[default]
    Local,
    /// Injected by the mesh bridge after arriving from a peer.
    Network,
}

/// A value delivered to subscribers, paired with its [`Origin`].
///
/// The origin is metadata alongside the value; the value itself is never
/// wrapped, so equality and typed access behave the same for both origins.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub value: Value,
    pub origin: Origin,
}

impl Sample {
    pub fn new(value: impl Into<Value>, origin: Origin) -> Self {
        Self {
            value: value.into(),
            origin,
        }
    }

    /// A sample published by this process.
    pub fn local(value: impl Into<Value>) -> Self {
        Self::new(value, Origin::Local)
    }

    /// A sample received from the mesh.
    pub fn network(value: impl Into<Value>) -> Self {
        Self::new(value, Origin::Network)
    }

    pub fn is_from_network(&self) -> bool {
        self.origin == Origin::Network
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }
}
