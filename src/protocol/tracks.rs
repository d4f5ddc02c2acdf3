use serde::{Deserialize, Serialize};

use crate::common::types::UserId;

/// A queued, playable item.
///
/// `encoded` is handed to the playback node unexamined; `info` and
/// `requester` only feed the rendering side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub encoded: String,
    pub info: TrackInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester: Option<UserId>,
    #[serde(default = "default_json_object")]
    pub user_data: serde_json::Value,
}

fn default_json_object() -> serde_json::Value {
    serde_json::json!({})
}

impl Track {
    pub fn new(encoded: impl Into<String>, info: TrackInfo) -> Self {
        Self {
            encoded: encoded.into(),
            info,
            requester: None,
            user_data: default_json_object(),
        }
    }

    pub fn requested_by(mut self, user: UserId) -> Self {
        self.requester = Some(user);
        self
    }

    /// A track without a payload can never be sent to the node.
    pub fn is_playable(&self) -> bool {
        !self.encoded.trim().is_empty()
    }

    pub fn is_seekable(&self) -> bool {
        self.info.is_seekable && !self.info.is_stream
    }
}

/// Display metadata of a track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub identifier: String,
    pub is_seekable: bool,
    pub author: String,
    /// Duration in milliseconds. 0 for live streams.
    pub length: u64,
    pub is_stream: bool,
    pub title: String,
    pub uri: Option<String>,
    pub artwork_url: Option<String>,
    pub source_name: String,
}

/// Result of a search against the external search capability.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "loadType", content = "data", rename_all = "camelCase")]
pub enum LoadResult {
    Track(Track),
    Playlist(PlaylistData),
    Search(Vec<Track>),
    Empty {},
    Error(LoadError),
}

impl LoadResult {
    /// Flattens any successful load into its candidate tracks.
    pub fn into_tracks(self) -> Vec<Track> {
        match self {
            Self::Track(track) => vec![track],
            Self::Playlist(playlist) => playlist.tracks,
            Self::Search(tracks) => tracks,
            Self::Empty {} | Self::Error(_) => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistData {
    pub name: String,
    pub tracks: Vec<Track>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadError {
    pub message: Option<String>,
    pub cause: String,
}
