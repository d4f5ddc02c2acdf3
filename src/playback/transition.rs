use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Orchestrator;
use crate::{
    common::{
        errors::{PlaybackError, PlaybackResult},
        types::{AnyResult, CommunityId, LoopMode},
    },
    events::BusEvent,
    node::NodeLink,
    presentation::PresentationChange,
    protocol::{
        events::{NodeEvent, TrackEndReason, TrackRef, parse_node_message},
        tracks::Track,
    },
    session::{InactivityCause, Session, SessionHandle, TeardownReason},
    vote::VoteCoordinator,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextKind {
    /// The finished track was replayed (loop mode `track`).
    Looped,
    Advanced,
    AutoContinued,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NextResult {
    pub kind: NextKind,
    pub track: Track,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkipResult {
    pub skipped: Track,
    /// Queued tracks dropped on the way.
    pub discarded: usize,
    pub next: Option<NextResult>,
}

/// How the outgoing track left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Finish {
    Natural,
    Skipped,
    Failed,
}

const RESUME_ATTEMPTS: usize = 20;
const RESUME_MIN_DELAY: Duration = Duration::from_millis(50);

/// Whether a node event about `reported` concerns `active`. Events that do
/// not name a track are taken to concern whatever is active.
fn refers_to(active: Option<&Track>, reported: Option<&TrackRef>) -> bool {
    match (active, reported) {
        (Some(active), Some(reported)) => active.encoded == reported.encoded,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

impl Orchestrator {
    /// Advances the queue as if the current track had ended naturally.
    pub async fn play_next(&self, community: &CommunityId) -> PlaybackResult<Option<NextResult>> {
        let handle = self.handle(community)?;
        let transition = handle
            .try_begin_transition()
            .ok_or_else(|| PlaybackError::TransitionInFlight(community.clone()))?;
        let mut state = handle.lock(self.config.playback.lock_timeout()).await?;

        let mut changes = Vec::new();
        let result = self
            .advance_locked(&handle, &mut state, Finish::Natural, &mut changes)
            .await;
        // release the slot before the lock so nobody holding the lock sees a
        // finished transition as in flight
        drop(transition);
        drop(state);

        self.publish(community, changes).await;
        result
    }

    /// Ends the current track and advances, discarding `count - 1` queued
    /// tracks first. Clears any open vote.
    pub async fn skip(&self, community: &CommunityId, count: usize) -> PlaybackResult<SkipResult> {
        let handle = self.handle(community)?;
        let transition = handle
            .try_begin_transition()
            .ok_or_else(|| PlaybackError::TransitionInFlight(community.clone()))?;
        let mut state = handle.lock(self.config.playback.lock_timeout()).await?;

        let mut changes = Vec::new();
        let result = self.skip_locked(&handle, &mut state, count, &mut changes).await;
        drop(transition);
        drop(state);

        self.publish(community, changes).await;
        result
    }

    pub(super) async fn skip_locked(
        &self,
        handle: &Arc<SessionHandle>,
        state: &mut Session,
        count: usize,
        changes: &mut Vec<PresentationChange>,
    ) -> PlaybackResult<SkipResult> {
        let community = &handle.community;
        Self::node_of(state, community)?;
        let skipped = state
            .current
            .clone()
            .or_else(|| state.finishing.clone())
            .ok_or(PlaybackError::NothingPlaying)?;

        let discarded = count.saturating_sub(1).min(state.tracks.len());
        state.tracks.drain(..discarded);
        if let Some(kind) = VoteCoordinator::end_locked(state) {
            debug!("[{}] {:?} vote cleared by skip", community, kind);
        }

        info!(
            "[{}] skipping '{}' ({} queued track(s) discarded)",
            community, skipped.info.title, discarded
        );
        let next = self
            .advance_locked(handle, state, Finish::Skipped, changes)
            .await?;
        Ok(SkipResult {
            skipped,
            discarded,
            next,
        })
    }

    /// The one place a session moves from one track to the next. Caller
    /// holds the community lock and the transition slot.
    pub(super) async fn advance_locked(
        &self,
        handle: &Arc<SessionHandle>,
        state: &mut Session,
        finish: Finish,
        changes: &mut Vec<PresentationChange>,
    ) -> PlaybackResult<Option<NextResult>> {
        let community = &handle.community;
        let node = Self::node_of(state, community)?;

        state.timers.advance.cancel();
        let finished = state.current.take().or_else(|| state.finishing.take());
        if let Some(track) = finished {
            state.last_played = Some(track.clone());
            match (finish, state.loop_mode) {
                (Finish::Natural, LoopMode::Track) => {
                    return self
                        .start_locked(handle, state, &node, track, NextKind::Looped, changes)
                        .await
                        .map(Some);
                }
                (Finish::Natural | Finish::Skipped, LoopMode::Queue) => state.requeue(track),
                _ => {}
            }
        }

        while let Some(next) = state.pop_next() {
            if !next.is_playable() {
                warn!(
                    "[{}] {}, dropping it",
                    community,
                    PlaybackError::InvalidTrack(next.info.title.clone())
                );
                continue;
            }
            return self
                .start_locked(handle, state, &node, next, NextKind::Advanced, changes)
                .await
                .map(Some);
        }

        if state.auto_continue {
            if let Some(seed) = state.last_played.clone() {
                match self
                    .autoplay
                    .find_continuation(community, &seed, &state.recent)
                    .await
                {
                    Ok(track) => {
                        return self
                            .start_locked(handle, state, &node, track, NextKind::AutoContinued, changes)
                            .await
                            .map(Some);
                    }
                    Err(e) => debug!("[{}] auto-continue gave nothing: {}", community, e),
                }
            }
        }

        if finish != Finish::Natural {
            // the outgoing track may still be rendering
            if let Err(e) = node.stop().await {
                warn!("[{}] could not stop the node: {}", community, e);
            }
        }
        info!("[{}] queue finished, going idle", community);
        self.enter_idle(handle, state, changes);
        Ok(None)
    }

    async fn start_locked(
        &self,
        handle: &Arc<SessionHandle>,
        state: &mut Session,
        node: &NodeLink,
        track: Track,
        kind: NextKind,
        changes: &mut Vec<PresentationChange>,
    ) -> PlaybackResult<NextResult> {
        let community = &handle.community;
        if let Err(e) = node.play(&track.encoded).await {
            warn!("[{}] could not start '{}': {}", community, track.info.title, e);
            if kind != NextKind::AutoContinued {
                state.tracks.push_front(track);
            }
            self.enter_idle(handle, state, changes);
            return Err(e);
        }

        state.current = Some(track.clone());
        state.paused = false;
        if kind != NextKind::Looped {
            state.recent.push(&track.info.title);
        }
        Self::clear_inactivity(state, InactivityCause::Idle);

        info!("[{}] now playing '{}' ({:?})", community, track.info.title, kind);
        changes.push(PresentationChange::TrackStarted {
            track: track.clone(),
            looped: kind == NextKind::Looped,
            auto_continued: kind == NextKind::AutoContinued,
        });
        Ok(NextResult { kind, track })
    }

    fn enter_idle(
        &self,
        handle: &Arc<SessionHandle>,
        state: &mut Session,
        changes: &mut Vec<PresentationChange>,
    ) {
        state.current = None;
        state.finishing = None;
        self.arm_inactivity(handle, state, InactivityCause::Idle);
        changes.push(PresentationChange::Idle);
    }

    /// Hands a node event to the bus, where the community's scoped handler
    /// picks it up.
    pub async fn dispatch_node_event(&self, community: &CommunityId, event: NodeEvent) {
        self.bus
            .publish(BusEvent::Node {
                community: community.clone(),
                event,
            })
            .await;
    }

    /// Parses a raw node event frame and dispatches it.
    pub async fn dispatch_raw(&self, raw: &str) -> AnyResult<()> {
        let (community, event) = parse_node_message(raw)?;
        self.dispatch_node_event(&community, event).await;
        Ok(())
    }

    pub async fn handle_node_event(&self, community: &CommunityId, event: NodeEvent) {
        let Some(handle) = self.store.get(community) else {
            debug!("[{}] {} event for unknown session", community, event.name());
            return;
        };

        match event {
            NodeEvent::Start { track } => self.on_track_start(&handle, track).await,
            NodeEvent::End { reason, .. } if reason.is_self_inflicted() => {
                debug!("[{}] ignoring end ({:?}), already handled", community, reason);
            }
            NodeEvent::End { track, reason } => self.on_track_end(&handle, track, reason).await,
            NodeEvent::Exception { track, exception } => {
                warn!("[{}] track exception: {}", community, exception.describe());
                self.on_track_failure(&handle, track).await;
            }
            NodeEvent::Stuck {
                track,
                threshold_ms,
            } => {
                warn!("[{}] track stuck for {}ms", community, threshold_ms);
                self.on_track_failure(&handle, track).await;
            }
            NodeEvent::Closed {
                code,
                reason,
                by_remote,
            } => {
                warn!(
                    "[{}] node connection closed: {} {} (by remote: {})",
                    community, code, reason, by_remote
                );
                if let Err(e) = self.destroy(community, TeardownReason::NodeClosed).await {
                    debug!("[{}] teardown after close: {}", community, e);
                }
            }
        }
    }

    async fn on_track_start(&self, handle: &Arc<SessionHandle>, track: Option<TrackRef>) {
        let Ok(mut state) = handle.lock(self.config.playback.lock_timeout()).await else {
            return;
        };
        if !refers_to(state.current.as_ref(), track.as_ref()) {
            debug!("[{}] stale start event ignored", handle.community);
            return;
        }
        Self::clear_inactivity(&mut state, InactivityCause::Idle);
    }

    /// A natural end parks the track in `finishing` and advances after the
    /// settle delay.
    async fn on_track_end(
        &self,
        handle: &Arc<SessionHandle>,
        track: Option<TrackRef>,
        reason: TrackEndReason,
    ) {
        let community = &handle.community;
        let Ok(mut state) = handle.lock(self.config.playback.lock_timeout()).await else {
            return;
        };
        if !refers_to(state.current.as_ref(), track.as_ref()) {
            debug!("[{}] stale end ({:?}) ignored", community, reason);
            return;
        }
        // held under the lock only by a caller queued behind us, which moves on itself
        let Some(transition) = handle.try_begin_transition() else {
            debug!("[{}] end dropped, a transition is pending", community);
            return;
        };

        state.finishing = state.current.take();
        let expected = state.finishing.as_ref().map(|t| t.encoded.clone());
        let delay = self.config.playback.settle_delay();
        debug!("[{}] track ended ({:?}), advancing in {:?}", community, reason, delay);

        let me = self.me.clone();
        let weak = Arc::downgrade(handle);
        state.timers.advance.arm(delay, move |token| async move {
            if let (Some(this), Some(handle)) = (me.upgrade(), weak.upgrade()) {
                this.advance_after_end(&handle, expected, token).await;
            }
        });
        drop(transition);
    }

    async fn advance_after_end(
        &self,
        handle: &Arc<SessionHandle>,
        expected: Option<String>,
        token: CancellationToken,
    ) {
        let community = &handle.community;
        let Ok(mut state) = handle.lock(self.config.playback.lock_timeout()).await else {
            return;
        };
        let finishing = state.finishing.as_ref().map(|t| t.encoded.as_str());
        if token.is_cancelled() || finishing.is_none() || finishing != expected.as_deref() {
            debug!("[{}] delayed advance is stale", community);
            return;
        }
        let Some(transition) = handle.try_begin_transition() else {
            debug!("[{}] delayed advance deferred, a transition is pending", community);
            drop(state);
            self.resume_when_free(handle);
            return;
        };

        let mut changes = Vec::new();
        if let Err(e) = self
            .advance_locked(handle, &mut state, Finish::Natural, &mut changes)
            .await
        {
            warn!("[{}] advance after track end failed: {}", community, e);
        }
        drop(transition);
        drop(state);
        self.publish(community, changes).await;
    }

    /// Exceptions and stuck tracks abandon the track at once; it is never
    /// retried, whatever the loop mode.
    async fn on_track_failure(&self, handle: &Arc<SessionHandle>, track: Option<TrackRef>) {
        let community = &handle.community;
        let Ok(mut state) = handle.lock(self.config.playback.lock_timeout()).await else {
            return;
        };
        let active = state.current.as_ref().or(state.finishing.as_ref());
        if !refers_to(active, track.as_ref()) {
            debug!("[{}] stale failure ignored", community);
            return;
        }
        let Some(transition) = handle.try_begin_transition() else {
            debug!("[{}] failure dropped, a transition is pending", community);
            return;
        };

        let mut changes = Vec::new();
        if let Err(e) = self
            .advance_locked(handle, &mut state, Finish::Failed, &mut changes)
            .await
        {
            warn!("[{}] advance after failure failed: {}", community, e);
        }
        drop(transition);
        drop(state);
        self.publish(community, changes).await;
    }

    /// Runs the advance a caller had to leave behind because the slot was
    /// taken, once the slot is free. Gives up as soon as some other
    /// transition has moved the session on, or after a bounded number of
    /// attempts.
    pub(super) fn resume_when_free(&self, handle: &Arc<SessionHandle>) {
        let me = self.me.clone();
        let weak = Arc::downgrade(handle);
        let retry = self.config.playback.settle_delay().max(RESUME_MIN_DELAY);
        let lock_timeout = self.config.playback.lock_timeout();
        let community = handle.community.clone();

        tokio::spawn(async move {
            for _ in 0..RESUME_ATTEMPTS {
                tokio::time::sleep(retry).await;
                let (Some(this), Some(handle)) = (me.upgrade(), weak.upgrade()) else {
                    return;
                };
                let mut state = match handle.lock(lock_timeout).await {
                    Ok(state) => state,
                    Err(PlaybackError::NoSession(_)) => return,
                    Err(_) => continue,
                };
                let pending = state.current.is_none()
                    && (state.finishing.is_some() || !state.tracks.is_empty());
                if !pending || state.node.is_none() {
                    return;
                }
                let Some(transition) = handle.try_begin_transition() else {
                    continue;
                };

                debug!("[{}] resuming a deferred advance", community);
                let mut changes = Vec::new();
                if let Err(e) = this
                    .advance_locked(&handle, &mut state, Finish::Natural, &mut changes)
                    .await
                {
                    warn!("[{}] deferred advance failed: {}", community, e);
                }
                drop(transition);
                drop(state);
                this.publish(&community, changes).await;
                return;
            }
            debug!("[{}] deferred advance gave up waiting for the transition slot", community);
        });
    }
}
