//! Agent messaging domain model.
//!
//! Envelopes are typed and addressed; `to = "*"` means broadcast. The gossip
//! state rides along with the envelope so each hop can extend it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Type of a message envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Command,
    Query,
    Response,
    Broadcast,
    Heartbeat,
    Consensus,
    Task,
    Result,
    Error,
    Sync,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Query => "query",
            Self::Response => "response",
            Self::Broadcast => "broadcast",
            Self::Heartbeat => "heartbeat",
            Self::Consensus => "consensus",
            Self::Task => "task",
            Self::Result => "result",
            Self::Error => "error",
            Self::Sync => "sync",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "command" => Some(Self::Command),
            "query" => Some(Self::Query),
            "response" => Some(Self::Response),
            "broadcast" => Some(Self::Broadcast),
            "heartbeat" => Some(Self::Heartbeat),
            "consensus" => Some(Self::Consensus),
            "task" => Some(Self::Task),
            "result" => Some(Self::Result),
            "error" => Some(Self::Error),
            "sync" => Some(Self::Sync),
            _ => None,
        }
    }

    /// Whether payloads of this type are encrypted when the bus has
    /// encryption enabled.
    pub fn encrypted(&self) -> bool {
        matches!(self, Self::Task | Self::Result | Self::Consensus)
    }

    /// Whether delivery requires an ack on the direct protocol.
    pub fn requires_ack(&self) -> bool {
        matches!(self, Self::Command | Self::Query | Self::Task | Self::Consensus)
    }
}

/// Delivery protocol for an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Direct,
    Broadcast,
    Multicast,
    Gossip,
    Consensus,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Broadcast => "broadcast",
            Self::Multicast => "multicast",
            Self::Gossip => "gossip",
            Self::Consensus => "consensus",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "direct" => Some(Self::Direct),
            "broadcast" => Some(Self::Broadcast),
            "multicast" => Some(Self::Multicast),
            "gossip" => Some(Self::Gossip),
            "consensus" => Some(Self::Consensus),
            _ => None,
        }
    }
}

/// Per-envelope gossip propagation state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GossipState {
    /// Id of the originating envelope
    pub original_id: Uuid,
    /// Hops taken so far
    pub hops: u32,
    /// Agents that have already seen the envelope
    pub seen: HashSet<String>,
}

impl GossipState {
    pub fn new(original_id: Uuid) -> Self {
        Self {
            original_id,
            hops: 0,
            seen: HashSet::new(),
        }
    }
}

/// Recipient address of the broadcast wildcard.
pub const BROADCAST_ADDR: &str = "*";

/// A typed, addressed message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Unique identifier
    pub id: Uuid,
    /// Sender agent id
    pub from: String,
    /// Recipient agent id, or `*` for broadcast
    pub to: String,
    /// Message type
    pub message_type: MessageType,
    /// Delivery protocol
    pub protocol: Protocol,
    /// When enqueued
    pub timestamp: DateTime<Utc>,
    /// Payload; base64 ciphertext when `encrypted`
    pub payload: serde_json::Value,
    /// Whether the payload is encrypted
    pub encrypted: bool,
    /// Multicast group, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    /// Gossip propagation state, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gossip: Option<GossipState>,
}

impl MessageEnvelope {
    /// Create a direct envelope.
    pub fn direct(
        from: impl Into<String>,
        to: impl Into<String>,
        message_type: MessageType,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            from: from.into(),
            to: to.into(),
            message_type,
            protocol: Protocol::Direct,
            timestamp: Utc::now(),
            payload,
            encrypted: false,
            group_id: None,
            gossip: None,
        }
    }

    /// Create a broadcast envelope addressed to every known agent.
    pub fn broadcast(
        from: impl Into<String>,
        message_type: MessageType,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            from: from.into(),
            to: BROADCAST_ADDR.to_string(),
            message_type,
            protocol: Protocol::Broadcast,
            timestamp: Utc::now(),
            payload,
            encrypted: false,
            group_id: None,
            gossip: None,
        }
    }

    /// Create a gossip envelope seeded with its own id.
    pub fn gossip(
        from: impl Into<String>,
        message_type: MessageType,
        payload: serde_json::Value,
    ) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            from: from.into(),
            to: BROADCAST_ADDR.to_string(),
            message_type,
            protocol: Protocol::Gossip,
            timestamp: Utc::now(),
            payload,
            encrypted: false,
            group_id: None,
            gossip: Some(GossipState::new(id)),
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.to == BROADCAST_ADDR
    }
}
