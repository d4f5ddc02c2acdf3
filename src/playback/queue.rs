use tracing::{debug, warn};

use super::{NextResult, Orchestrator, transition::Finish};
use crate::{
    common::{
        errors::{PlaybackError, PlaybackResult},
        types::{CommunityId, LoopMode},
    },
    presentation::PresentationChange,
    protocol::tracks::Track,
    session::{InactivityCause, Session},
    vote::VoteKind,
};

#[derive(Debug, Clone, PartialEq)]
pub struct PlayOutcome {
    /// Queue position of the first added track.
    pub position: usize,
    /// Set when the session was idle and playback started.
    pub started: Option<NextResult>,
}

/// Read-only view of a session, for status displays.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub current: Option<Track>,
    pub finishing: Option<Track>,
    pub tracks: Vec<Track>,
    pub loop_mode: LoopMode,
    pub paused: bool,
    pub shuffled: bool,
    pub auto_continue: bool,
    pub volume: u16,
    /// Open vote as (kind, votes, required).
    pub vote: Option<(VoteKind, usize, usize)>,
    pub inactivity: Option<InactivityCause>,
}

impl Orchestrator {
    /// Appends tracks without touching playback. Tracks without a payload
    /// are dropped; the call fails if none remain.
    pub async fn enqueue(&self, community: &CommunityId, tracks: Vec<Track>) -> PlaybackResult<usize> {
        let handle = self.handle(community)?;
        let (position, length) = {
            let mut state = handle.lock(self.config.playback.lock_timeout()).await?;
            let position = Self::enqueue_locked(community, &mut state, tracks)?;
            (position, state.tracks.len())
        };
        self.publish(community, vec![PresentationChange::QueueUpdated { length }])
            .await;
        Ok(position)
    }

    /// Enqueues and, when nothing is playing, starts playback.
    pub async fn play(&self, community: &CommunityId, tracks: Vec<Track>) -> PlaybackResult<PlayOutcome> {
        let handle = self.handle(community)?;
        let mut state = handle.lock(self.config.playback.lock_timeout()).await?;
        Self::node_of(&state, community)?;
        let position = Self::enqueue_locked(community, &mut state, tracks)?;
        let mut changes = vec![PresentationChange::QueueUpdated {
            length: state.tracks.len(),
        }];

        let mut started = Ok(None);
        if !state.has_active_track() {
            match handle.try_begin_transition() {
                Some(transition) => {
                    started = self
                        .advance_locked(&handle, &mut state, Finish::Natural, &mut changes)
                        .await;
                    drop(transition);
                }
                None => {
                    debug!("[{}] transition pending, start deferred", community);
                    self.resume_when_free(&handle);
                }
            }
        }
        drop(state);

        self.publish(community, changes).await;
        Ok(PlayOutcome {
            position,
            started: started?,
        })
    }

    fn enqueue_locked(community: &CommunityId, state: &mut Session, tracks: Vec<Track>) -> PlaybackResult<usize> {
        let offered = tracks.len();
        let playable: Vec<Track> = tracks.into_iter().filter(Track::is_playable).collect();
        if playable.is_empty() {
            return Err(PlaybackError::InvalidTrack(format!(
                "none of the {} offered track(s) has a payload",
                offered
            )));
        }
        if playable.len() < offered {
            warn!(
                "[{}] dropped {} track(s) without payload",
                community,
                offered - playable.len()
            );
        }
        let added = playable.len();
        let position = state.enqueue(playable)?;
        debug!("[{}] queued {} track(s) at {}", community, added, position);
        Ok(position)
    }

    pub async fn remove(&self, community: &CommunityId, index: usize) -> PlaybackResult<Track> {
        let handle = self.handle(community)?;
        let (removed, length) = {
            let mut state = handle.lock(self.config.playback.lock_timeout()).await?;
            let removed = state.remove(index)?;
            (removed, state.tracks.len())
        };
        self.publish(community, vec![PresentationChange::QueueUpdated { length }])
            .await;
        Ok(removed)
    }

    pub async fn move_track(&self, community: &CommunityId, from: usize, to: usize) -> PlaybackResult<()> {
        let handle = self.handle(community)?;
        let length = {
            let mut state = handle.lock(self.config.playback.lock_timeout()).await?;
            state.move_track(from, to)?;
            state.tracks.len()
        };
        self.publish(community, vec![PresentationChange::QueueUpdated { length }])
            .await;
        Ok(())
    }

    /// Empties the queue; the current track keeps playing.
    pub async fn clear_queue(&self, community: &CommunityId) -> PlaybackResult<usize> {
        let handle = self.handle(community)?;
        let cleared = {
            let mut state = handle.lock(self.config.playback.lock_timeout()).await?;
            state.clear_queue()
        };
        self.publish(community, vec![PresentationChange::QueueUpdated { length: 0 }])
            .await;
        Ok(cleared)
    }

    pub async fn snapshot(&self, community: &CommunityId) -> PlaybackResult<SessionSnapshot> {
        let handle = self.handle(community)?;
        let state = handle.lock(self.config.playback.lock_timeout()).await?;
        Ok(SessionSnapshot {
            current: state.current.clone(),
            finishing: state.finishing.clone(),
            tracks: state.tracks.iter().cloned().collect(),
            loop_mode: state.loop_mode,
            paused: state.paused,
            shuffled: state.shuffled,
            auto_continue: state.auto_continue,
            volume: state.volume,
            vote: state
                .vote
                .as_ref()
                .map(|v| (v.kind, v.votes(), v.required)),
            inactivity: state.inactivity_cause,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        configs::{Config, SessionsConfig},
        testing::{Harness, track},
    };

    fn titles(snapshot: &SessionSnapshot) -> Vec<String> {
        snapshot.tracks.iter().map(|t| t.info.title.clone()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn play_starts_when_idle_and_only_queues_otherwise() {
        let h = Harness::new().await;
        let first = h
            .orchestrator
            .play(&h.community, vec![track("T1")])
            .await
            .unwrap();
        assert_eq!(first.started.unwrap().track.info.title, "T1");

        let second = h
            .orchestrator
            .play(&h.community, vec![track("T2"), track("T3")])
            .await
            .unwrap();
        assert_eq!(second.position, 0);
        assert!(second.started.is_none());
        assert_eq!(titles(&h.snapshot().await), vec!["T2", "T3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_rejects_the_whole_batch() {
        let config = Config {
            sessions: SessionsConfig {
                max_queue_length: 2,
                ..SessionsConfig::default()
            },
            ..Config::default()
        };
        let h = Harness::with_config(config).await;
        h.enqueue(&["A"]).await;

        let err = h
            .orchestrator
            .enqueue(&h.community, vec![track("B"), track("C")])
            .await
            .unwrap_err();
        assert!(matches!(err, PlaybackError::QueueFull { max: 2 }));
        assert_eq!(titles(&h.snapshot().await), vec!["A"]);
    }

    #[tokio::test(start_paused = true)]
    async fn tracks_without_payload_are_filtered_on_enqueue() {
        let h = Harness::new().await;
        let mut broken = track("Broken");
        broken.encoded = " ".to_string();

        let position = h
            .orchestrator
            .enqueue(&h.community, vec![broken.clone(), track("Good")])
            .await
            .unwrap();
        assert_eq!(position, 0);
        assert_eq!(titles(&h.snapshot().await), vec!["Good"]);

        assert!(matches!(
            h.orchestrator.enqueue(&h.community, vec![broken]).await,
            Err(PlaybackError::InvalidTrack(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn remove_move_and_clear() {
        let h = Harness::new().await;
        h.enqueue(&["A", "B", "C"]).await;

        h.orchestrator.move_track(&h.community, 0, 2).await.unwrap();
        assert_eq!(titles(&h.snapshot().await), vec!["B", "C", "A"]);

        let removed = h.orchestrator.remove(&h.community, 1).await.unwrap();
        assert_eq!(removed.info.title, "C");
        assert!(matches!(
            h.orchestrator.remove(&h.community, 9).await,
            Err(PlaybackError::IndexOutOfRange { index: 9, len: 2 })
        ));

        assert_eq!(h.orchestrator.clear_queue(&h.community).await.unwrap(), 2);
        assert!(h.snapshot().await.tracks.is_empty());
        assert!(h.presented().contains(&PresentationChange::QueueUpdated { length: 0 }));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_community_has_no_session() {
        let h = Harness::new().await;
        assert!(matches!(
            h.orchestrator
                .enqueue(&CommunityId::from("nowhere"), vec![track("A")])
                .await,
            Err(PlaybackError::NoSession(_))
        ));
    }
}
