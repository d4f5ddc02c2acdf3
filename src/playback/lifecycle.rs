use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Orchestrator;
use crate::{
    common::{errors::PlaybackResult, types::CommunityId},
    events::{BusEvent, EventKind},
    node::{NodeLink, PlaybackNode},
    presentation::PresentationChange,
    session::{InactivityCause, Session, SessionHandle, TeardownReason},
};

impl Orchestrator {
    /// Binds `node` to the community, creating its session on first
    /// connect. Returns whether the session was created.
    pub async fn connect(
        &self,
        community: &CommunityId,
        node: Arc<dyn PlaybackNode>,
    ) -> PlaybackResult<bool> {
        let (handle, created) = self.store.get_or_create(community);
        let mut state = handle.lock(self.config.playback.lock_timeout()).await?;
        state.node = Some(NodeLink::new(
            node,
            self.config.playback.node_command_timeout(),
        ));

        if self.bus.scoped_count(community) == 0 {
            let me = self.me.clone();
            self.bus
                .subscribe_scoped(community, EventKind::Node, move |event| {
                    let me = me.clone();
                    async move {
                        if let (Some(this), BusEvent::Node { community, event }) = (me.upgrade(), event)
                        {
                            this.handle_node_event(&community, event).await;
                        }
                    }
                });
        }
        if !state.timers.listener_monitor.is_armed() {
            self.arm_listener_monitor(&handle, &mut state);
        }
        if !state.has_active_track() {
            self.arm_inactivity(&handle, &mut state, InactivityCause::Idle);
        }

        info!("[{}] node connected (new session: {})", community, created);
        Ok(created)
    }

    /// Explicit stop: halts the node and tears the session down.
    pub async fn stop(&self, community: &CommunityId) -> PlaybackResult<()> {
        self.destroy(community, TeardownReason::Stopped).await.map(|_| ())
    }

    pub async fn destroy(
        &self,
        community: &CommunityId,
        reason: TeardownReason,
    ) -> PlaybackResult<bool> {
        let handle = self.handle(community)?;
        let removed = {
            let mut state = handle.lock(self.config.playback.lock_timeout()).await?;
            self.teardown_locked(&handle, &mut state, reason).await
        };
        self.publish(community, vec![PresentationChange::SessionDestroyed { reason }])
            .await;
        Ok(removed)
    }

    async fn teardown_locked(
        &self,
        handle: &Arc<SessionHandle>,
        state: &mut Session,
        reason: TeardownReason,
    ) -> bool {
        let community = &handle.community;
        if reason != TeardownReason::NodeClosed && state.has_active_track() {
            if let Some(node) = state.node.clone() {
                if let Err(e) = node.stop().await {
                    warn!("[{}] could not stop the node during teardown: {}", community, e);
                }
            }
        }
        let removed = self.store.remove_locked(handle, state);
        info!("[{}] session destroyed ({})", community, reason);
        removed
    }

    /// Arms the inactivity countdown unless one is already running.
    pub(super) fn arm_inactivity(
        &self,
        handle: &Arc<SessionHandle>,
        state: &mut Session,
        cause: InactivityCause,
    ) {
        if state.inactivity_cause.is_some() && state.timers.inactivity.is_armed() {
            return;
        }
        let timeout = self.config.playback.inactivity_timeout();
        debug!("[{}] inactivity timer armed ({:?}, {:?})", handle.community, cause, timeout);
        state.inactivity_cause = Some(cause);

        let me = self.me.clone();
        let weak = Arc::downgrade(handle);
        state.timers.inactivity.arm(timeout, move |token| async move {
            if let (Some(this), Some(handle)) = (me.upgrade(), weak.upgrade()) {
                this.on_inactivity(&handle, token).await;
            }
        });
    }

    /// Cancels the inactivity countdown if it runs for `cause`.
    pub(super) fn clear_inactivity(state: &mut Session, cause: InactivityCause) {
        if state.inactivity_cause == Some(cause) {
            state.timers.inactivity.cancel();
            state.inactivity_cause = None;
        }
    }

    async fn on_inactivity(&self, handle: &Arc<SessionHandle>, token: CancellationToken) {
        let removed = {
            let Ok(mut state) = handle.lock(self.config.playback.lock_timeout()).await else {
                return;
            };
            if token.is_cancelled() {
                return;
            }
            let Some(cause) = state.inactivity_cause else {
                return;
            };
            if cause == InactivityCause::Idle && state.has_active_track() {
                Self::clear_inactivity(&mut state, cause);
                return;
            }

            let reason = match cause {
                InactivityCause::Idle => TeardownReason::Inactivity,
                InactivityCause::EmptyChannel => TeardownReason::EmptyChannel,
            };
            info!("[{}] inactive ({:?}), tearing down", handle.community, cause);
            self.teardown_locked(handle, &mut state, reason)
                .await
                .then_some(reason)
        };

        if let Some(reason) = removed {
            self.publish(
                &handle.community,
                vec![PresentationChange::SessionDestroyed { reason }],
            )
            .await;
        }
    }

    fn arm_listener_monitor(&self, handle: &Arc<SessionHandle>, state: &mut Session) {
        let me = self.me.clone();
        let weak = Arc::downgrade(handle);
        state
            .timers
            .listener_monitor
            .arm_interval(self.config.playback.listener_poll(), move |token| {
                let me = me.clone();
                let weak = weak.clone();
                async move {
                    if let (Some(this), Some(handle)) = (me.upgrade(), weak.upgrade()) {
                        this.check_listeners(&handle, token).await;
                    }
                }
            });
    }

    /// An empty channel starts the inactivity countdown; listeners coming
    /// back cancel it.
    async fn check_listeners(&self, handle: &Arc<SessionHandle>, token: CancellationToken) {
        let listeners = self.membership.listener_count(&handle.community).await;
        let Ok(mut state) = handle.lock(self.config.playback.lock_timeout()).await else {
            return;
        };
        if token.is_cancelled() {
            return;
        }

        if listeners == 0 {
            if state.inactivity_cause.is_none() {
                debug!("[{}] nobody is listening", handle.community);
                self.arm_inactivity(handle, &mut state, InactivityCause::EmptyChannel);
            }
        } else if state.inactivity_cause == Some(InactivityCause::EmptyChannel) {
            debug!("[{}] {} listener(s) back", handle.community, listeners);
            Self::clear_inactivity(&mut state, InactivityCause::EmptyChannel);
            if !state.has_active_track() {
                self.arm_inactivity(handle, &mut state, InactivityCause::Idle);
            }
        }
    }

    /// Periodically drops stale idle sessions.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let me = Arc::downgrade(self);
        let period = self.config.sessions.sweep_interval();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                interval.tick().await;
                let Some(this) = me.upgrade() else {
                    break;
                };
                this.store.sweep();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        configs::{Config, SessionsConfig},
        testing::{Command, Harness, RecordingNode},
    };
    use std::time::Duration;

    fn inactivity(h: &Harness) -> Duration {
        h.orchestrator.config().playback.inactivity_timeout()
    }

    fn poll(h: &Harness) -> Duration {
        h.orchestrator.config().playback.listener_poll()
    }

    #[tokio::test(start_paused = true)]
    async fn idle_session_is_torn_down_after_the_inactivity_timeout() {
        let h = Harness::new().await;
        tokio::time::sleep(inactivity(&h) + Duration::from_secs(1)).await;

        assert!(!h.orchestrator.store().contains(&h.community));
        assert!(h.presented().contains(&PresentationChange::SessionDestroyed {
            reason: TeardownReason::Inactivity
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn playback_cancels_the_idle_countdown() {
        let h = Harness::new().await;
        h.enqueue(&["T1"]).await;
        h.orchestrator.play_next(&h.community).await.unwrap();
        assert_eq!(h.snapshot().await.inactivity, None);

        tokio::time::sleep(inactivity(&h) * 2).await;
        assert!(h.orchestrator.store().contains(&h.community));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_channel_tears_down_a_playing_session() {
        let h = Harness::new().await;
        h.enqueue(&["T1"]).await;
        h.orchestrator.play_next(&h.community).await.unwrap();
        h.membership.set(0);

        tokio::time::sleep(poll(&h) + Duration::from_secs(1)).await;
        assert_eq!(
            h.snapshot().await.inactivity,
            Some(InactivityCause::EmptyChannel)
        );

        tokio::time::sleep(inactivity(&h)).await;
        assert!(!h.orchestrator.store().contains(&h.community));
        assert_eq!(h.node.commands().last(), Some(&Command::Stop));
        assert!(h.presented().contains(&PresentationChange::SessionDestroyed {
            reason: TeardownReason::EmptyChannel
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn returning_listeners_cancel_the_countdown() {
        let h = Harness::new().await;
        h.enqueue(&["T1"]).await;
        h.orchestrator.play_next(&h.community).await.unwrap();
        h.membership.set(0);
        tokio::time::sleep(poll(&h) + Duration::from_secs(1)).await;

        h.membership.set(2);
        tokio::time::sleep(poll(&h)).await;
        assert_eq!(h.snapshot().await.inactivity, None);

        tokio::time::sleep(inactivity(&h) * 2).await;
        assert!(h.orchestrator.store().contains(&h.community));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_halts_the_node_and_removes_the_session() {
        let h = Harness::new().await;
        h.enqueue(&["T1"]).await;
        h.orchestrator.play_next(&h.community).await.unwrap();

        h.orchestrator.stop(&h.community).await.unwrap();
        assert_eq!(h.node.commands().last(), Some(&Command::Stop));
        assert!(!h.orchestrator.store().contains(&h.community));
        assert_eq!(h.orchestrator.bus().scoped_count(&h.community), 0);
        assert!(h.orchestrator.stop(&h.community).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_keeps_the_session_and_a_single_handler() {
        let h = Harness::new().await;
        h.enqueue(&["T1"]).await;
        let replacement = Arc::new(RecordingNode::default());

        let created = h
            .orchestrator
            .connect(&h.community, replacement.clone())
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(h.orchestrator.bus().scoped_count(&h.community), 1);

        h.orchestrator.play_next(&h.community).await.unwrap();
        assert_eq!(replacement.played(), vec!["enc:T1".to_string()]);
        assert!(h.node.played().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn eviction_clears_the_auto_continue_cooldown() {
        let config = Config {
            sessions: SessionsConfig {
                max_sessions: 1,
                ..SessionsConfig::default()
            },
            ..Config::default()
        };
        let h = Harness::with_config(config).await;
        h.orchestrator
            .set_auto_continue(&h.community, true)
            .await
            .unwrap();
        h.enqueue(&["Seed"]).await;
        h.orchestrator.play_next(&h.community).await.unwrap();
        h.orchestrator.play_next(&h.community).await.unwrap();
        assert!(h.orchestrator.autoplay.remembers(&h.community));

        h.orchestrator
            .store()
            .get_or_create(&CommunityId::from("newcomer"));
        assert!(!h.orchestrator.store().contains(&h.community));
        assert!(!h.orchestrator.autoplay.remembers(&h.community));
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_drops_stale_sessions() {
        let config = Config {
            sessions: SessionsConfig {
                stale_after_secs: 60,
                sweep_interval_secs: 30,
                ..SessionsConfig::default()
            },
            ..Config::default()
        };
        let h = Harness::with_config(config).await;
        let stale = CommunityId::from("stale");
        h.orchestrator.store().get_or_create(&stale);
        let sweeper = h.orchestrator.spawn_sweeper();

        tokio::time::sleep(Duration::from_secs(100)).await;
        assert!(!h.orchestrator.store().contains(&stale));
        sweeper.abort();
    }
}
