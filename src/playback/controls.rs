use tracing::info;

use super::Orchestrator;
use crate::{
    common::{
        errors::{PlaybackError, PlaybackResult},
        types::{CommunityId, LoopMode},
    },
    presentation::PresentationChange,
};

impl Orchestrator {
    pub async fn set_paused(&self, community: &CommunityId, paused: bool) -> PlaybackResult<()> {
        let handle = self.handle(community)?;
        {
            let mut state = handle.lock(self.config.playback.lock_timeout()).await?;
            let node = Self::node_of(&state, community)?;
            if state.current.is_none() {
                return Err(PlaybackError::NothingPlaying);
            }
            node.pause(paused).await?;
            state.paused = paused;
        }
        self.publish(community, vec![PresentationChange::Paused(paused)])
            .await;
        Ok(())
    }

    /// Clamps to `0..=max_volume` and returns the applied value.
    pub async fn set_volume(&self, community: &CommunityId, volume: i32) -> PlaybackResult<u16> {
        let handle = self.handle(community)?;
        let applied = {
            let mut state = handle.lock(self.config.playback.lock_timeout()).await?;
            let node = Self::node_of(&state, community)?;
            let previous = state.volume;
            let applied = state.set_volume(volume);
            if let Err(e) = node.volume(applied).await {
                state.volume = previous;
                return Err(e);
            }
            applied
        };
        self.publish(community, vec![PresentationChange::VolumeChanged(applied)])
            .await;
        Ok(applied)
    }

    /// Seeks within the current track, clamped to its length. Returns the
    /// position sent to the node.
    pub async fn seek(&self, community: &CommunityId, position_ms: u64) -> PlaybackResult<u64> {
        let handle = self.handle(community)?;
        let state = handle.lock(self.config.playback.lock_timeout()).await?;
        let node = Self::node_of(&state, community)?;
        let current = state.current.as_ref().ok_or(PlaybackError::NothingPlaying)?;
        if !current.is_seekable() {
            return Err(PlaybackError::NotSeekable);
        }
        let target = position_ms.min(current.info.length);
        node.seek(target).await?;
        Ok(target)
    }

    pub async fn set_loop_mode(&self, community: &CommunityId, mode: LoopMode) -> PlaybackResult<LoopMode> {
        let handle = self.handle(community)?;
        {
            let mut state = handle.lock(self.config.playback.lock_timeout()).await?;
            state.loop_mode = mode;
        }
        info!("[{}] loop mode set to {}", community, mode);
        self.publish(community, vec![PresentationChange::LoopModeChanged(mode)])
            .await;
        Ok(mode)
    }

    /// off -> track -> queue -> off
    pub async fn cycle_loop_mode(&self, community: &CommunityId) -> PlaybackResult<LoopMode> {
        let handle = self.handle(community)?;
        let mode = {
            let mut state = handle.lock(self.config.playback.lock_timeout()).await?;
            state.loop_mode = state.loop_mode.next();
            state.loop_mode
        };
        self.publish(community, vec![PresentationChange::LoopModeChanged(mode)])
            .await;
        Ok(mode)
    }

    /// Shuffling snapshots the queue order; turning it off restores that
    /// order.
    pub async fn set_shuffle(&self, community: &CommunityId, enabled: bool) -> PlaybackResult<bool> {
        let handle = self.handle(community)?;
        let length = {
            let mut state = handle.lock(self.config.playback.lock_timeout()).await?;
            if enabled {
                state.shuffle(&mut rand::thread_rng());
            } else {
                state.unshuffle();
            }
            state.tracks.len()
        };
        self.publish(
            community,
            vec![
                PresentationChange::ShuffleChanged(enabled),
                PresentationChange::QueueUpdated { length },
            ],
        )
        .await;
        Ok(enabled)
    }

    pub async fn set_auto_continue(&self, community: &CommunityId, enabled: bool) -> PlaybackResult<bool> {
        let handle = self.handle(community)?;
        {
            let mut state = handle.lock(self.config.playback.lock_timeout()).await?;
            state.auto_continue = enabled;
        }
        self.publish(community, vec![PresentationChange::AutoContinueChanged(enabled)])
            .await;
        Ok(enabled)
    }
}
