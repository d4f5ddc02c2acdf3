pub mod state;

pub use state::{VoteKind, VoteSession, required_votes};

use std::{sync::Arc, time::Duration};

use tracing::{debug, info};

use crate::{
    common::{
        errors::{PlaybackError, PlaybackResult},
        types::{CommunityId, UserId},
    },
    configs::VotesConfig,
    events::{BusEvent, EventBus},
    presentation::{PresentationChange, PresentationUpdate},
    session::{Session, SessionHandle, SessionStore},
};

/// Outcome of starting a vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteResult {
    /// Voting is open; `votes` already includes the initiator.
    Started { votes: usize, required: usize },
    /// At most one listener: passes without voting.
    AutoPassed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteTally {
    pub added: bool,
    pub votes: usize,
    pub required: usize,
}

impl VoteTally {
    pub fn passed(&self) -> bool {
        self.votes >= self.required
    }
}

/// Skip and priority votes, one per community: idle -> voting -> passed |
/// expired. The vote itself lives on the [`Session`]; the `*_locked` variants
/// are for callers already holding the community lock.
pub struct VoteCoordinator {
    store: Arc<SessionStore>,
    bus: EventBus,
    config: VotesConfig,
    lock_timeout: Duration,
}

impl VoteCoordinator {
    pub fn new(
        store: Arc<SessionStore>,
        bus: EventBus,
        config: VotesConfig,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            store,
            bus,
            config,
            lock_timeout,
        }
    }

    pub async fn start(
        &self,
        community: &CommunityId,
        kind: VoteKind,
        initiator: UserId,
        listener_count: usize,
    ) -> PlaybackResult<VoteResult> {
        let handle = self.handle(community)?;
        let result = {
            let mut state = handle.lock(self.lock_timeout).await?;
            self.start_locked(&handle, &mut state, kind, initiator, listener_count)?
        };
        if let VoteResult::Started { votes, required } = result {
            self.publish(community, PresentationChange::VoteUpdated { kind, votes, required })
                .await;
        }
        Ok(result)
    }

    pub async fn add_vote(&self, community: &CommunityId, user: UserId) -> PlaybackResult<VoteTally> {
        let handle = self.handle(community)?;
        let (kind, tally) = {
            let mut state = handle.lock(self.lock_timeout).await?;
            let tally = Self::add_vote_locked(&mut state, user)?;
            (state.vote.as_ref().map(|v| v.kind), tally)
        };
        if let (Some(kind), true) = (kind, tally.added) {
            self.publish(
                community,
                PresentationChange::VoteUpdated {
                    kind,
                    votes: tally.votes,
                    required: tally.required,
                },
            )
            .await;
        }
        Ok(tally)
    }

    pub async fn has_passed(&self, community: &CommunityId) -> PlaybackResult<bool> {
        let handle = self.handle(community)?;
        let state = handle.lock(self.lock_timeout).await?;
        Ok(state.vote.as_ref().is_some_and(VoteSession::has_passed))
    }

    /// Returns the session to idle. Idempotent; true if a vote was open.
    pub async fn end(&self, community: &CommunityId) -> PlaybackResult<bool> {
        let handle = self.handle(community)?;
        let mut state = handle.lock(self.lock_timeout).await?;
        Ok(Self::end_locked(&mut state).is_some())
    }

    pub fn start_locked(
        &self,
        handle: &Arc<SessionHandle>,
        state: &mut Session,
        kind: VoteKind,
        initiator: UserId,
        listener_count: usize,
    ) -> PlaybackResult<VoteResult> {
        if state.vote.is_some() {
            return Err(PlaybackError::VoteInProgress);
        }

        let Some(required) =
            required_votes(listener_count, self.config.threshold, self.config.min_votes)
        else {
            debug!("[{}] {:?} vote auto-passed ({} listener(s))", handle.community, kind, listener_count);
            return Ok(VoteResult::AutoPassed);
        };

        let mut vote = VoteSession::new(kind, initiator, required);
        let votes = vote.votes();
        self.arm_expiry(handle, &mut vote);
        state.vote = Some(vote);
        info!(
            "[{}] {:?} vote started by {} ({}/{})",
            handle.community, kind, initiator, votes, required
        );
        Ok(VoteResult::Started { votes, required })
    }

    pub fn add_vote_locked(state: &mut Session, user: UserId) -> PlaybackResult<VoteTally> {
        let vote = state.vote.as_mut().ok_or(PlaybackError::NoActiveVote)?;
        let added = vote.add(user);
        Ok(VoteTally {
            added,
            votes: vote.votes(),
            required: vote.required,
        })
    }

    /// Clears the vote, cancelling its expiry timer.
    pub fn end_locked(state: &mut Session) -> Option<VoteKind> {
        let mut vote = state.vote.take()?;
        vote.cancel();
        Some(vote.kind)
    }

    fn arm_expiry(&self, handle: &Arc<SessionHandle>, vote: &mut VoteSession) {
        let weak = Arc::downgrade(handle);
        let bus = self.bus.clone();
        let lock_timeout = self.lock_timeout;
        vote.expiry.arm(self.config.timeout(), move |token| async move {
            let Some(handle) = weak.upgrade() else {
                return;
            };
            let expired = {
                let Ok(mut state) = handle.lock(lock_timeout).await else {
                    return;
                };
                if token.is_cancelled() {
                    return;
                }
                match state.vote.as_ref() {
                    Some(vote) if !vote.has_passed() => Self::end_locked(&mut state),
                    _ => None,
                }
            };
            if let Some(kind) = expired {
                info!("[{}] {:?} vote expired", handle.community, kind);
                bus.publish(BusEvent::Presentation(PresentationUpdate::new(
                    &handle.community,
                    PresentationChange::VoteExpired { kind },
                )))
                .await;
            }
        });
    }

    fn handle(&self, community: &CommunityId) -> PlaybackResult<Arc<SessionHandle>> {
        self.store
            .get(community)
            .ok_or_else(|| PlaybackError::NoSession(community.clone()))
    }

    async fn publish(&self, community: &CommunityId, change: PresentationChange) {
        self.bus
            .publish(BusEvent::Presentation(PresentationUpdate::new(community, change)))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        configs::SessionsConfig,
        events::EventKind,
        session::SessionDefaults,
    };
    use parking_lot::Mutex;

    struct Fixture {
        votes: VoteCoordinator,
        store: Arc<SessionStore>,
        seen: Arc<Mutex<Vec<PresentationChange>>>,
        community: CommunityId,
    }

    fn fixture() -> Fixture {
        let bus = EventBus::new();
        let store = Arc::new(SessionStore::new(
            SessionsConfig::default(),
            SessionDefaults::default(),
            bus.clone(),
        ));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe(EventKind::Presentation, move |event| {
            let sink = sink.clone();
            async move {
                if let BusEvent::Presentation(update) = event {
                    sink.lock().push(update.change);
                }
            }
        });
        let community = CommunityId::from("g");
        store.get_or_create(&community);
        Fixture {
            votes: VoteCoordinator::new(
                store.clone(),
                bus,
                VotesConfig::default(),
                Duration::from_secs(3),
            ),
            store,
            seen,
            community,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ten_listeners_need_five_votes() {
        let f = fixture();
        let result = f
            .votes
            .start(&f.community, VoteKind::Skip, UserId(1), 10)
            .await
            .unwrap();
        assert_eq!(result, VoteResult::Started { votes: 1, required: 5 });
    }

    #[tokio::test(start_paused = true)]
    async fn single_listener_auto_passes_without_opening_a_vote() {
        let f = fixture();
        let result = f
            .votes
            .start(&f.community, VoteKind::Skip, UserId(1), 1)
            .await
            .unwrap();
        assert_eq!(result, VoteResult::AutoPassed);
        assert!(matches!(
            f.votes.add_vote(&f.community, UserId(2)).await,
            Err(PlaybackError::NoActiveVote)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn second_vote_is_rejected_while_one_is_open() {
        let f = fixture();
        f.votes.start(&f.community, VoteKind::Skip, UserId(1), 4).await.unwrap();
        let err = f
            .votes
            .start(&f.community, VoteKind::Priority { index: 0 }, UserId(2), 4)
            .await
            .unwrap_err();
        assert!(matches!(err, PlaybackError::VoteInProgress));
    }

    #[tokio::test(start_paused = true)]
    async fn passes_on_third_vote_and_end_is_idempotent() {
        let f = fixture();
        // 6 listeners at 0.5 -> 3 required
        f.votes.start(&f.community, VoteKind::Skip, UserId(1), 6).await.unwrap();
        let tally = f.votes.add_vote(&f.community, UserId(2)).await.unwrap();
        assert_eq!(tally, VoteTally { added: true, votes: 2, required: 3 });
        assert!(!f.votes.has_passed(&f.community).await.unwrap());

        let dup = f.votes.add_vote(&f.community, UserId(2)).await.unwrap();
        assert!(!dup.added);
        assert_eq!(dup.votes, 2);

        let tally = f.votes.add_vote(&f.community, UserId(3)).await.unwrap();
        assert!(tally.passed());
        assert!(f.votes.has_passed(&f.community).await.unwrap());

        assert!(f.votes.end(&f.community).await.unwrap());
        assert!(!f.votes.end(&f.community).await.unwrap());
        assert!(!f.votes.has_passed(&f.community).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_returns_to_idle_and_signals() {
        let f = fixture();
        f.votes.start(&f.community, VoteKind::Skip, UserId(1), 6).await.unwrap();
        tokio::time::sleep(VotesConfig::default().timeout() + Duration::from_secs(1)).await;

        let handle = f.store.get(&f.community).unwrap();
        assert!(handle.state.lock().await.vote.is_none());
        assert!(
            f.seen
                .lock()
                .contains(&PresentationChange::VoteExpired { kind: VoteKind::Skip })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn ended_vote_never_expires() {
        let f = fixture();
        f.votes.start(&f.community, VoteKind::Skip, UserId(1), 6).await.unwrap();
        f.votes.end(&f.community).await.unwrap();
        tokio::time::sleep(VotesConfig::default().timeout() * 2).await;
        assert!(
            !f.seen
                .lock()
                .iter()
                .any(|c| matches!(c, PresentationChange::VoteExpired { .. }))
        );
    }
}
