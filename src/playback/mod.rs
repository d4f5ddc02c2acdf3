//! The transition coordinator: the only writer of a session's current track
//! and queue.

mod controls;
mod lifecycle;
mod queue;
mod transition;
mod voting;

pub use queue::{PlayOutcome, SessionSnapshot};
pub use transition::{NextKind, NextResult, SkipResult};
pub use voting::VoteOutcome;

use std::sync::{Arc, Weak};

use tracing::debug;

use crate::{
    autoplay::AutoContinueEngine,
    common::{
        errors::{PlaybackError, PlaybackResult},
        types::CommunityId,
    },
    configs::Config,
    events::{BusEvent, EventBus, EventKind},
    node::{MembershipQuery, NodeLink},
    presentation::{PresentationChange, PresentationUpdate, Presenter, PresenterRelay},
    session::{Session, SessionDefaults, SessionHandle, SessionStore},
    sources::TrackSearch,
    vote::VoteCoordinator,
};

/// External services the orchestrator talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub search: Arc<dyn TrackSearch>,
    pub membership: Arc<dyn MembershipQuery>,
    pub presenter: Arc<dyn Presenter>,
}

pub struct Orchestrator {
    me: Weak<Self>,
    store: Arc<SessionStore>,
    bus: EventBus,
    votes: VoteCoordinator,
    autoplay: Arc<AutoContinueEngine>,
    membership: Arc<dyn MembershipQuery>,
    config: Config,
}

impl Orchestrator {
    pub fn new(config: Config, collaborators: Collaborators) -> Arc<Self> {
        let autoplay = AutoContinueEngine::new(collaborators.search.clone(), config.autoplay.clone());
        Self::build(config, collaborators, autoplay)
    }

    /// Same as [`Orchestrator::new`] with a seeded auto-continue engine.
    pub fn with_seed(config: Config, collaborators: Collaborators, seed: u64) -> Arc<Self> {
        let autoplay = AutoContinueEngine::with_seed(
            collaborators.search.clone(),
            config.autoplay.clone(),
            seed,
        );
        Self::build(config, collaborators, autoplay)
    }

    fn build(
        config: Config,
        collaborators: Collaborators,
        autoplay: AutoContinueEngine,
    ) -> Arc<Self> {
        let bus = EventBus::new();
        let autoplay = Arc::new(autoplay);
        let cooldowns = autoplay.clone();
        let store = Arc::new(
            SessionStore::new(
                config.sessions.clone(),
                SessionDefaults::from_config(&config),
                bus.clone(),
            )
            .with_release_hook(move |community| cooldowns.forget(community)),
        );
        let votes = VoteCoordinator::new(
            store.clone(),
            bus.clone(),
            config.votes.clone(),
            config.playback.lock_timeout(),
        );

        let relay = Arc::new(PresenterRelay::new(
            collaborators.presenter,
            config.presentation.clone(),
        ));
        bus.subscribe(EventKind::Presentation, move |event| {
            let relay = relay.clone();
            async move {
                if let BusEvent::Presentation(update) = event {
                    relay.deliver(&update).await;
                }
            }
        });

        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            store,
            bus,
            votes,
            autoplay,
            membership: collaborators.membership,
            config,
        })
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn votes(&self) -> &VoteCoordinator {
        &self.votes
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn handle(&self, community: &CommunityId) -> PlaybackResult<Arc<SessionHandle>> {
        self.store
            .get(community)
            .ok_or_else(|| PlaybackError::NoSession(community.clone()))
    }

    fn node_of(state: &Session, community: &CommunityId) -> PlaybackResult<NodeLink> {
        state
            .node
            .clone()
            .ok_or_else(|| PlaybackError::NoPlayer(community.clone()))
    }

    /// Publishes presentation changes. Call only after the community lock is
    /// released: presenters may be slow and never get to hold up playback.
    async fn publish(&self, community: &CommunityId, changes: Vec<PresentationChange>) {
        if changes.is_empty() {
            return;
        }
        debug!("[{}] publishing {} presentation change(s)", community, changes.len());
        for change in changes {
            self.bus
                .publish(BusEvent::Presentation(PresentationUpdate::new(community, change)))
                .await;
        }
    }
}
