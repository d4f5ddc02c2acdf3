pub mod history;
pub mod state;
pub mod store;
pub mod timer;

pub use history::RecentTitles;
pub use state::{InactivityCause, Session, SessionDefaults};
pub use store::{SessionHandle, SessionStore, TransitionGuard};
pub use timer::Timer;

/// Why a session was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownReason {
    /// Explicit stop by a user.
    Stopped,
    Inactivity,
    EmptyChannel,
    /// The playback node closed its connection.
    NodeClosed,
}

impl std::fmt::Display for TeardownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Inactivity => "inactivity",
            Self::EmptyChannel => "empty channel",
            Self::NodeClosed => "node closed",
        };
        f.write_str(s)
    }
}
