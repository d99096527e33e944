//! Bridge protocol envelopes.
//!
//! On the wire an envelope is a JSON array whose first element is the
//! numeric [`MessageKind`] code:
//!
//! - GRAPH `[0, graph]`
//! - NODE `[1, node_info]`
//! - JSON `[2, topic, value]`
//! - BUFFER / NEWPUB / NEWSUB `[3..=5, ...]` carry no defined payload.

use std::fmt;

use mesh_core::Value;
use serde::de::{Deserializer, Error as _};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};

use crate::graph::{Graph, NodeInfo};

/// The kind of message carried in an [`Envelope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Full topology snapshot, hub → leaf.
    Graph,
    /// A node's own topic report, leaf → hub.
    Node,
    /// A published value relayed between nodes.
    Json,
    /// Reserved.
    Buffer,
    /// Reserved.
    NewPub,
    /// Reserved.
    NewSub,
}

impl MessageKind {
    pub fn code(self) -> u8 {
        match self {
            Self::Graph => 0,
            Self::Node => 1,
            Self::Json => 2,
            Self::Buffer => 3,
            Self::NewPub => 4,
            Self::NewSub => 5,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        Some(match code {
            0 => Self::Graph,
            1 => Self::Node,
            2 => Self::Json,
            3 => Self::Buffer,
            4 => Self::NewPub,
            5 => Self::NewSub,
            _ => return None,
        })
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Graph => "GRAPH",
            Self::Node => "NODE",
            Self::Json => "JSON",
            Self::Buffer => "BUFFER",
            Self::NewPub => "NEWPUB",
            Self::NewSub => "NEWSUB",
        };
        f.write_str(name)
    }
}

/// One protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Graph(Graph),
    Node(NodeInfo),
    Json { topic: String, value: Value },
    /// BUFFER, NEWPUB or NEWSUB with whatever fields the sender attached.
    Reserved {
        kind: MessageKind,
        fields: Vec<Value>,
    },
}

impl Envelope {
    pub fn json(topic: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Json {
            topic: topic.into(),
            value: value.into(),
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Graph(_) => MessageKind::Graph,
            Self::Node(_) => MessageKind::Node,
            Self::Json { .. } => MessageKind::Json,
            Self::Reserved { kind, .. } => *kind,
        }
    }

    /// Serialize the envelope to its JSON text form.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize an envelope from its JSON text form.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Graph(graph) => {
                let mut seq = s.serialize_seq(Some(2))?;
                seq.serialize_element(&MessageKind::Graph.code())?;
                seq.serialize_element(graph)?;
                seq.end()
            }
            Self::Node(info) => {
                let mut seq = s.serialize_seq(Some(2))?;
                seq.serialize_element(&MessageKind::Node.code())?;
                seq.serialize_element(info)?;
                seq.end()
            }
            Self::Json { topic, value } => {
                let mut seq = s.serialize_seq(Some(3))?;
                seq.serialize_element(&MessageKind::Json.code())?;
                seq.serialize_element(topic)?;
                seq.serialize_element(value)?;
                seq.end()
            }
            Self::Reserved { kind, fields } => {
                let mut seq = s.serialize_seq(Some(fields.len() + 1))?;
                seq.serialize_element(&kind.code())?;
                for field in fields {
                    seq.serialize_element(field)?;
                }
                seq.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let mut items = Vec::<serde_json::Value>::deserialize(d)?.into_iter();

        let code = items
            .next()
            .and_then(|v| v.as_u64())
            .ok_or_else(|| D::Error::custom("envelope must start with a numeric kind"))?;
        let kind = MessageKind::from_code(code)
            .ok_or_else(|| D::Error::custom(format!("unknown message kind {code}")))?;

        let mut field = |name: &str| -> Result<serde_json::Value, D::Error> {
            items
                .next()
                .ok_or_else(|| D::Error::custom(format!("{kind} envelope missing {name}")))
        };

        let envelope = match kind {
            MessageKind::Graph => {
                let graph = serde_json::from_value(field("graph")?).map_err(D::Error::custom)?;
                Self::Graph(graph)
            }
            MessageKind::Node => {
                let info = serde_json::from_value(field("node info")?).map_err(D::Error::custom)?;
                Self::Node(info)
            }
            MessageKind::Json => {
                let topic = match field("topic")? {
                    serde_json::Value::String(topic) => topic,
                    _ => return Err(D::Error::custom("JSON envelope topic must be a string")),
                };
                let value = serde_json::from_value(field("value")?).map_err(D::Error::custom)?;
                Self::Json { topic, value }
            }
            MessageKind::Buffer | MessageKind::NewPub | MessageKind::NewSub => {
                let fields = items
                    .map(serde_json::from_value::<Value>)
                    .collect::<Result<Vec<Value>, _>>()
                    .map_err(D::Error::custom)?;
                Self::Reserved { kind, fields }
            }
        };
        Ok(envelope)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
