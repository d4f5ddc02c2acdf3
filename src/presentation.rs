use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{
    common::types::{AnyResult, CommunityId, LoopMode},
    configs::PresentationConfig,
    protocol::tracks::Track,
    session::TeardownReason,
    vote::VoteKind,
};

/// One-way sink for status panels and interactive controls.
#[async_trait]
pub trait Presenter: Send + Sync {
    async fn refresh(&self, update: &PresentationUpdate) -> AnyResult<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct PresentationUpdate {
    pub community: CommunityId,
    pub change: PresentationChange,
}

impl PresentationUpdate {
    pub fn new(community: &CommunityId, change: PresentationChange) -> Self {
        Self {
            community: community.clone(),
            change,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PresentationChange {
    /// `looped` tells the renderer to edit the existing panel in place
    /// instead of posting a new one.
    TrackStarted {
        track: Track,
        looped: bool,
        auto_continued: bool,
    },
    Idle,
    QueueUpdated { length: usize },
    Paused(bool),
    VolumeChanged(u16),
    LoopModeChanged(LoopMode),
    ShuffleChanged(bool),
    AutoContinueChanged(bool),
    VoteUpdated {
        kind: VoteKind,
        votes: usize,
        required: usize,
    },
    VotePassed { kind: VoteKind },
    VoteExpired { kind: VoteKind },
    SessionDestroyed { reason: TeardownReason },
}

/// Forwards updates to the [`Presenter`], retrying a bounded number of times.
/// Failures end here; they never reach the playback state machine.
pub struct PresenterRelay {
    presenter: Arc<dyn Presenter>,
    config: PresentationConfig,
}

impl PresenterRelay {
    pub fn new(presenter: Arc<dyn Presenter>, config: PresentationConfig) -> Self {
        Self { presenter, config }
    }

    /// Returns whether the update was eventually delivered.
    pub async fn deliver(&self, update: &PresentationUpdate) -> bool {
        let attempts = self.config.max_attempts.max(1);
        for attempt in 1..=attempts {
            match self.presenter.refresh(update).await {
                Ok(()) => return true,
                Err(e) => {
                    warn!(
                        "[{}] presentation refresh failed (attempt {}/{}): {}",
                        update.community, attempt, attempts, e
                    );
                    if attempt < attempts {
                        tokio::time::sleep(Duration::from_millis(
                            self.config.retry_delay_ms * attempt as u64,
                        ))
                        .await;
                    }
                }
            }
        }
        debug!("[{}] dropping presentation update {:?}", update.community, update.change);
        false
    }
}
