use tracing::{debug, info};

use super::{Orchestrator, SkipResult};
use crate::{
    common::{
        errors::{PlaybackError, PlaybackResult},
        types::{CommunityId, UserId},
    },
    presentation::PresentationChange,
    protocol::tracks::Track,
    vote::{VoteCoordinator, VoteKind, VoteResult, VoteTally},
};

#[derive(Debug, Clone, PartialEq)]
pub enum VoteOutcome {
    /// The vote is open and short of its threshold.
    Pending(VoteTally),
    /// A skip vote passed and the skip ran.
    Skipped(SkipResult),
    /// A priority vote passed; `track` now heads the queue.
    Prioritized { track: Track },
}

impl Orchestrator {
    pub async fn vote_skip(&self, community: &CommunityId, user: UserId) -> PlaybackResult<VoteOutcome> {
        self.vote(community, user, VoteKind::Skip).await
    }

    /// Votes to move the queued track at `index` to the head of the queue.
    pub async fn vote_priority(
        &self,
        community: &CommunityId,
        user: UserId,
        index: usize,
    ) -> PlaybackResult<VoteOutcome> {
        self.vote(community, user, VoteKind::Priority { index }).await
    }

    /// Starts a vote of `kind` or joins the open one, and carries out the
    /// decision once it passes.
    async fn vote(&self, community: &CommunityId, user: UserId, kind: VoteKind) -> PlaybackResult<VoteOutcome> {
        let listeners = self.membership.listener_count(community).await;
        let handle = self.handle(community)?;
        let mut state = handle.lock(self.config.playback.lock_timeout()).await?;

        match kind {
            VoteKind::Skip if !state.has_active_track() => return Err(PlaybackError::NothingPlaying),
            VoteKind::Priority { index } if index >= state.tracks.len() => {
                return Err(PlaybackError::IndexOutOfRange {
                    index,
                    len: state.tracks.len(),
                });
            }
            _ => {}
        }

        let tally = match state.vote.as_ref().map(|v| v.kind) {
            None => match self
                .votes
                .start_locked(&handle, &mut state, kind, user, listeners)?
            {
                VoteResult::AutoPassed => None,
                VoteResult::Started { votes, required } => Some(VoteTally {
                    added: true,
                    votes,
                    required,
                }),
            },
            Some(open) if open == kind => Some(VoteCoordinator::add_vote_locked(&mut state, user)?),
            Some(_) => return Err(PlaybackError::VoteInProgress),
        };

        let mut changes = Vec::new();
        if let Some(tally) = tally.filter(|t| !t.passed()) {
            drop(state);
            if tally.added {
                changes.push(PresentationChange::VoteUpdated {
                    kind,
                    votes: tally.votes,
                    required: tally.required,
                });
            }
            self.publish(community, changes).await;
            return Ok(VoteOutcome::Pending(tally));
        }

        // a passed skip waits for the slot; until then the vote stays open
        let transition = match kind {
            VoteKind::Skip => Some(handle.try_begin_transition().ok_or_else(|| {
                debug!("[{}] skip vote passed while a transition is pending", community);
                PlaybackError::TransitionInFlight(community.clone())
            })?),
            VoteKind::Priority { .. } => None,
        };

        VoteCoordinator::end_locked(&mut state);
        info!("[{}] {:?} vote passed", community, kind);
        changes.push(PresentationChange::VotePassed { kind });

        let outcome = match kind {
            VoteKind::Skip => self
                .skip_locked(&handle, &mut state, 1, &mut changes)
                .await
                .map(VoteOutcome::Skipped),
            VoteKind::Priority { index } => state.move_track(index, 0).and_then(|()| {
                let track = state
                    .tracks
                    .front()
                    .cloned()
                    .ok_or(PlaybackError::IndexOutOfRange { index, len: 0 })?;
                changes.push(PresentationChange::QueueUpdated {
                    length: state.tracks.len(),
                });
                Ok(VoteOutcome::Prioritized { track })
            }),
        };
        drop(transition);
        drop(state);

        self.publish(community, changes).await;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;

    #[tokio::test(start_paused = true)]
    async fn skip_vote_passes_on_the_required_count() {
        let h = Harness::new().await;
        h.membership.set(6);
        h.enqueue(&["T1", "T2"]).await;
        h.orchestrator.play_next(&h.community).await.unwrap();

        let first = h.orchestrator.vote_skip(&h.community, UserId(1)).await.unwrap();
        assert_eq!(
            first,
            VoteOutcome::Pending(VoteTally { added: true, votes: 1, required: 3 })
        );
        h.orchestrator.vote_skip(&h.community, UserId(2)).await.unwrap();
        let repeat = h.orchestrator.vote_skip(&h.community, UserId(2)).await.unwrap();
        assert_eq!(
            repeat,
            VoteOutcome::Pending(VoteTally { added: false, votes: 2, required: 3 })
        );

        match h.orchestrator.vote_skip(&h.community, UserId(3)).await.unwrap() {
            VoteOutcome::Skipped(result) => {
                assert_eq!(result.skipped.info.title, "T1");
                assert_eq!(result.next.unwrap().track.info.title, "T2");
            }
            other => panic!("expected a skip, got {:?}", other),
        }
        assert!(h.snapshot().await.vote.is_none());
        assert!(h
            .presented()
            .contains(&PresentationChange::VotePassed { kind: VoteKind::Skip }));
    }

    #[tokio::test(start_paused = true)]
    async fn lone_listener_skips_without_a_vote() {
        let h = Harness::new().await;
        h.membership.set(1);
        h.enqueue(&["T1", "T2"]).await;
        h.orchestrator.play_next(&h.community).await.unwrap();

        let outcome = h.orchestrator.vote_skip(&h.community, UserId(1)).await.unwrap();
        assert!(matches!(outcome, VoteOutcome::Skipped(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn passed_skip_vote_stays_open_while_a_transition_is_pending() {
        let h = Harness::new().await;
        h.membership.set(6);
        h.enqueue(&["T1", "T2"]).await;
        h.orchestrator.play_next(&h.community).await.unwrap();
        h.orchestrator.vote_skip(&h.community, UserId(1)).await.unwrap();
        h.orchestrator.vote_skip(&h.community, UserId(2)).await.unwrap();

        let handle = h.orchestrator.store().get(&h.community).unwrap();
        let slot = handle.try_begin_transition().unwrap();
        assert!(matches!(
            h.orchestrator.vote_skip(&h.community, UserId(3)).await,
            Err(PlaybackError::TransitionInFlight(_))
        ));
        let snapshot = h.snapshot().await;
        assert_eq!(snapshot.vote, Some((VoteKind::Skip, 3, 3)));
        assert_eq!(snapshot.current.unwrap().info.title, "T1");

        drop(slot);
        let outcome = h.orchestrator.vote_skip(&h.community, UserId(3)).await.unwrap();
        match outcome {
            VoteOutcome::Skipped(result) => assert_eq!(result.next.unwrap().track.info.title, "T2"),
            other => panic!("expected a skip, got {:?}", other),
        }
        assert!(h.snapshot().await.vote.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn priority_vote_moves_the_track_to_the_head() {
        let h = Harness::new().await;
        h.membership.set(2);
        h.enqueue(&["Now", "A", "B", "C"]).await;
        h.orchestrator.play_next(&h.community).await.unwrap();

        let pending = h
            .orchestrator
            .vote_priority(&h.community, UserId(1), 2)
            .await
            .unwrap();
        assert!(matches!(pending, VoteOutcome::Pending(_)));

        let passed = h
            .orchestrator
            .vote_priority(&h.community, UserId(2), 2)
            .await
            .unwrap();
        match passed {
            VoteOutcome::Prioritized { track } => assert_eq!(track.info.title, "C"),
            other => panic!("expected a priority move, got {:?}", other),
        }
        let order: Vec<String> = h
            .snapshot()
            .await
            .tracks
            .iter()
            .map(|t| t.info.title.clone())
            .collect();
        assert_eq!(order, vec!["C", "A", "B"]);
    }

    #[tokio::test(start_paused = true)]
    async fn a_different_vote_cannot_start_while_one_is_open() {
        let h = Harness::new().await;
        h.membership.set(6);
        h.enqueue(&["Now", "A"]).await;
        h.orchestrator.play_next(&h.community).await.unwrap();
        h.orchestrator.vote_skip(&h.community, UserId(1)).await.unwrap();

        assert!(matches!(
            h.orchestrator.vote_priority(&h.community, UserId(2), 0).await,
            Err(PlaybackError::VoteInProgress)
        ));
        assert!(matches!(
            h.orchestrator.vote_priority(&h.community, UserId(2), 7).await,
            Err(PlaybackError::IndexOutOfRange { index: 7, len: 1 })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn skip_vote_needs_something_playing() {
        let h = Harness::new().await;
        assert!(matches!(
            h.orchestrator.vote_skip(&h.community, UserId(1)).await,
            Err(PlaybackError::NothingPlaying)
        ));
    }
}
