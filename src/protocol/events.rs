use serde::{Deserialize, Serialize};

use crate::common::types::{AnyResult, CommunityId};

/// Lifecycle events produced by a playback node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NodeEvent {
    #[serde(rename = "TrackStartEvent")]
    Start {
        #[serde(default)]
        track: Option<TrackRef>,
    },

    #[serde(rename = "TrackEndEvent")]
    End {
        #[serde(default)]
        track: Option<TrackRef>,
        reason: TrackEndReason,
    },

    #[serde(rename = "TrackExceptionEvent")]
    Exception {
        #[serde(default)]
        track: Option<TrackRef>,
        exception: NodeException,
    },

    #[serde(rename = "TrackStuckEvent")]
    Stuck {
        #[serde(default)]
        track: Option<TrackRef>,
        #[serde(rename = "thresholdMs", default)]
        threshold_ms: u64,
    },

    #[serde(rename = "WebSocketClosedEvent")]
    Closed {
        code: u16,
        reason: String,
        #[serde(rename = "byRemote")]
        by_remote: bool,
    },
}

impl NodeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::End { .. } => "end",
            Self::Exception { .. } => "exception",
            Self::Stuck { .. } => "stuck",
            Self::Closed { .. } => "closed",
        }
    }

    pub fn end(reason: TrackEndReason, encoded: Option<&str>) -> Self {
        Self::End {
            track: encoded.map(TrackRef::from),
            reason,
        }
    }

    pub fn exception(message: impl Into<String>, encoded: Option<&str>) -> Self {
        let message = message.into();
        Self::Exception {
            track: encoded.map(TrackRef::from),
            exception: NodeException {
                message: Some(message.clone()),
                cause: message,
            },
        }
    }
}

/// The part of a node's track object the orchestrator cares about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRef {
    pub encoded: String,
}

impl From<&str> for TrackRef {
    fn from(encoded: &str) -> Self {
        Self {
            encoded: encoded.to_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackEndReason {
    /// The natural end of a track.
    Finished,
    LoadFailed,
    Stopped,
    Replaced,
    Cleanup,
}

impl TrackEndReason {
    /// `stopped` and `replaced` are issued by the orchestrator itself, which
    /// has already performed the transition.
    pub fn is_self_inflicted(self) -> bool {
        matches!(self, Self::Stopped | Self::Replaced)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeException {
    pub message: Option<String>,
    #[serde(default)]
    pub cause: String,
}

impl NodeException {
    pub fn describe(&self) -> &str {
        self.message.as_deref().unwrap_or(&self.cause)
    }
}

/// Parses a raw `{"op":"event","guildId":...}` frame from the node.
pub fn parse_node_message(raw: &str) -> AnyResult<(CommunityId, NodeEvent)> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    let community = value
        .get("guildId")
        .and_then(|v| v.as_str())
        .ok_or("event frame is missing guildId")?;
    let event = serde_json::from_value(value.clone())?;
    Ok((CommunityId::from(community), event))
}
