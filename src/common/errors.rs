use thiserror::Error;

use crate::common::types::CommunityId;

/// Errors surfaced by the session orchestrator.
#[derive(Debug, Error)]
pub enum PlaybackError {
    /// No playback node is bound to the community.
    #[error("no player bound to community {0}")]
    NoPlayer(CommunityId),

    /// Track carries no encoded payload; it is dropped, the session survives.
    #[error("track has no playable payload: {0}")]
    InvalidTrack(String),

    /// Enqueue rejected; the session is left untouched.
    #[error("queue is full ({max} tracks)")]
    QueueFull { max: usize },

    /// The community lock could not be acquired in time. The next
    /// triggering event recovers.
    #[error("timed out waiting for the session lock of {0}")]
    LockTimeout(CommunityId),

    /// Auto-continue found nothing.
    #[error("auto-continue search exhausted")]
    SearchExhausted,

    #[error("no session for community {0}")]
    NoSession(CommunityId),

    /// Another transition already owns the session.
    #[error("a transition is already in flight for {0}")]
    TransitionInFlight(CommunityId),

    #[error("nothing is playing")]
    NothingPlaying,

    #[error("a vote is already in progress")]
    VoteInProgress,

    #[error("no active vote")]
    NoActiveVote,

    #[error("index {index} out of range (queue has {len} tracks)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("current track is not seekable")]
    NotSeekable,

    /// Playback node command failed or timed out.
    #[error("playback node error: {0}")]
    Node(String),
}

pub type PlaybackResult<T> = std::result::Result<T, PlaybackError>;
