use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::MutexGuard;
use tracing::{debug, info, warn};

use crate::{
    common::{
        errors::{PlaybackError, PlaybackResult},
        types::CommunityId,
    },
    configs::SessionsConfig,
    events::EventBus,
    session::state::{Session, SessionDefaults},
};

/// A store entry: the community lock around its [`Session`], plus the state
/// that must be readable without taking that lock.
pub struct SessionHandle {
    pub community: CommunityId,
    pub(crate) state: tokio::sync::Mutex<Session>,
    /// Milliseconds since the owning store's epoch.
    last_accessed: AtomicU64,
    transitioning: AtomicBool,
}

impl SessionHandle {
    fn new(community: CommunityId, session: Session, now_ms: u64) -> Self {
        Self {
            community,
            state: tokio::sync::Mutex::new(session),
            last_accessed: AtomicU64::new(now_ms),
            transitioning: AtomicBool::new(false),
        }
    }

    /// Takes the community lock, giving up after `timeout`.
    pub async fn lock(&self, timeout: Duration) -> PlaybackResult<MutexGuard<'_, Session>> {
        let guard = match tokio::time::timeout(timeout, self.state.lock()).await {
            Ok(guard) => guard,
            Err(_) => {
                warn!(
                    "[{}] could not acquire session lock within {:?}, dropping operation",
                    self.community, timeout
                );
                return Err(PlaybackError::LockTimeout(self.community.clone()));
            }
        };
        if guard.destroyed {
            return Err(PlaybackError::NoSession(self.community.clone()));
        }
        Ok(guard)
    }

    /// Claims the single transition slot of this session. `None` means
    /// another transition is in flight and the caller must drop its trigger.
    pub fn try_begin_transition(&self) -> Option<TransitionGuard<'_>> {
        self.transitioning
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| TransitionGuard {
                flag: &self.transitioning,
            })
    }

    pub fn is_transitioning(&self) -> bool {
        self.transitioning.load(Ordering::Acquire)
    }

    pub fn last_accessed_ms(&self) -> u64 {
        self.last_accessed.load(Ordering::Relaxed)
    }

    fn touch(&self, now_ms: u64) {
        self.last_accessed.fetch_max(now_ms, Ordering::Relaxed);
    }

    /// True when the session can be dropped without interrupting anything:
    /// nobody holds its lock, no transition runs and no track is active.
    fn is_reclaimable(&self) -> bool {
        if self.is_transitioning() {
            return false;
        }
        match self.state.try_lock() {
            Ok(state) => !state.has_active_track(),
            Err(_) => false,
        }
    }
}

/// Releases the transition slot when dropped, including on early return or
/// when a node command fails.
pub struct TransitionGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for TransitionGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Called with the community of every session the store releases, whether
/// deleted, evicted or swept.
pub type ReleaseHook = Box<dyn Fn(&CommunityId) + Send + Sync>;

/// Bounded map from community to session.
pub struct SessionStore {
    sessions: DashMap<CommunityId, Arc<SessionHandle>>,
    /// Serializes create, evict, sweep and removal of map entries. Never held
    /// across an await.
    membership: Mutex<()>,
    epoch: tokio::time::Instant,
    config: SessionsConfig,
    defaults: SessionDefaults,
    bus: EventBus,
    on_release: Option<ReleaseHook>,
}

impl SessionStore {
    pub fn new(config: SessionsConfig, defaults: SessionDefaults, bus: EventBus) -> Self {
        Self {
            sessions: DashMap::new(),
            membership: Mutex::new(()),
            epoch: tokio::time::Instant::now(),
            config,
            defaults,
            bus,
            on_release: None,
        }
    }

    pub fn with_release_hook(mut self, hook: impl Fn(&CommunityId) + Send + Sync + 'static) -> Self {
        self.on_release = Some(Box::new(hook));
        self
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    pub fn get(&self, community: &CommunityId) -> Option<Arc<SessionHandle>> {
        let handle = self.sessions.get(community)?.clone();
        handle.touch(self.now_ms());
        Some(handle)
    }

    /// Returns the session of `community`, creating it when missing. The
    /// flag is true when this call created it.
    pub fn get_or_create(&self, community: &CommunityId) -> (Arc<SessionHandle>, bool) {
        let _membership = self.membership.lock();
        if let Some(handle) = self.get(community) {
            return (handle, false);
        }

        if self.sessions.len() >= self.config.max_sessions {
            match self.evict_one() {
                Some(evicted) => debug!("[{}] evicted to make room for {}", evicted, community),
                None => warn!(
                    "Session limit {} reached and every session is active; admitting {} over the limit",
                    self.config.max_sessions, community
                ),
            }
        }

        let handle = Arc::new(SessionHandle::new(
            community.clone(),
            Session::new(&self.defaults),
            self.now_ms(),
        ));
        self.sessions.insert(community.clone(), handle.clone());
        info!("[{}] session created ({} active)", community, self.sessions.len());
        (handle, true)
    }

    /// Tears down and removes the session of `community`. False when there
    /// was nothing to remove.
    pub async fn delete(&self, community: &CommunityId, timeout: Duration) -> PlaybackResult<bool> {
        let Some(handle) = self.sessions.get(community).map(|h| h.clone()) else {
            return Ok(false);
        };
        let mut state = match handle.lock(timeout).await {
            Ok(state) => state,
            Err(PlaybackError::NoSession(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        Ok(self.remove_locked(&handle, &mut state))
    }

    /// Removal for callers already holding the community lock.
    pub fn remove_locked(&self, handle: &Arc<SessionHandle>, state: &mut Session) -> bool {
        if state.destroyed {
            return false;
        }
        self.release(&handle.community, state);
        let _membership = self.membership.lock();
        self.sessions
            .remove_if(&handle.community, |_, current| Arc::ptr_eq(current, handle))
            .is_some()
    }

    /// Removes sessions untouched for longer than the staleness window,
    /// skipping any with an active track.
    pub fn sweep(&self) -> Vec<CommunityId> {
        let _membership = self.membership.lock();
        let now = self.now_ms();
        let stale_ms = self.config.stale_after().as_millis() as u64;

        let stale: Vec<Arc<SessionHandle>> = self
            .sessions
            .iter()
            .filter(|e| now.saturating_sub(e.value().last_accessed_ms()) > stale_ms)
            .map(|e| e.value().clone())
            .collect();

        let mut removed = Vec::new();
        for handle in stale {
            if self.reclaim(&handle) {
                removed.push(handle.community.clone());
            }
        }
        if !removed.is_empty() {
            info!("Swept {} stale session(s)", removed.len());
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, community: &CommunityId) -> bool {
        self.sessions.contains_key(community)
    }

    /// Snapshot of all handles, for stats and sweeps.
    pub fn handles(&self) -> Vec<Arc<SessionHandle>> {
        self.sessions.iter().map(|e| e.value().clone()).collect()
    }

    /// Evicts the least recently accessed reclaimable session. Caller holds
    /// the membership lock.
    fn evict_one(&self) -> Option<CommunityId> {
        let mut candidates: Vec<Arc<SessionHandle>> = self
            .sessions
            .iter()
            .filter(|e| e.value().is_reclaimable())
            .map(|e| e.value().clone())
            .collect();
        candidates.sort_by_key(|h| h.last_accessed_ms());

        // state may change between the scan and the reclaim; take the next
        // oldest if it does
        candidates
            .into_iter()
            .find(|handle| self.reclaim(handle))
            .map(|handle| handle.community.clone())
    }

    /// Tears down `handle` if it is still reclaimable. Caller holds the
    /// membership lock.
    fn reclaim(&self, handle: &Arc<SessionHandle>) -> bool {
        if handle.is_transitioning() {
            return false;
        }
        let Ok(mut state) = handle.state.try_lock() else {
            return false;
        };
        if state.has_active_track() || state.destroyed {
            return false;
        }
        self.release(&handle.community, &mut state);
        self.sessions
            .remove_if(&handle.community, |_, current| Arc::ptr_eq(current, handle))
            .is_some()
    }

    fn release(&self, community: &CommunityId, state: &mut Session) {
        state.teardown();
        let listeners = self.bus.remove_scoped(community);
        if let Some(hook) = &self.on_release {
            hook(community);
        }
        debug!(
            "[{}] session released ({} scoped listener(s) removed)",
            community, listeners
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{events::EventKind, testing::track};

    fn store(max_sessions: usize) -> SessionStore {
        SessionStore::new(
            SessionsConfig {
                max_sessions,
                stale_after_secs: 60,
                ..SessionsConfig::default()
            },
            SessionDefaults::default(),
            EventBus::new(),
        )
    }

    async fn set_playing(handle: &SessionHandle) {
        handle.state.lock().await.current = Some(track("playing"));
    }

    #[tokio::test(start_paused = true)]
    async fn get_or_create_reuses_existing_session() {
        let store = store(10);
        let g = CommunityId::from("g");
        let (a, created_a) = store.get_or_create(&g);
        let (b, created_b) = store.get_or_create(&g);
        assert!(created_a);
        assert!(!created_b);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn eviction_takes_oldest_idle_session_and_spares_active_ones() {
        let store = store(3);
        let ids: Vec<CommunityId> = ["a", "b", "c"].into_iter().map(CommunityId::from).collect();
        for id in &ids {
            store.get_or_create(id);
            tokio::time::advance(Duration::from_secs(1)).await;
        }
        // "a" is the oldest but playing; "b" is the oldest idle one
        set_playing(&store.get(&ids[0]).unwrap()).await;
        tokio::time::advance(Duration::from_secs(1)).await;
        store.get(&ids[2]);

        let (_, created) = store.get_or_create(&CommunityId::from("d"));
        assert!(created);
        assert_eq!(store.len(), 3);
        assert!(store.contains(&ids[0]));
        assert!(!store.contains(&ids[1]));
        assert!(store.contains(&ids[2]));
    }

    #[tokio::test(start_paused = true)]
    async fn full_store_of_active_sessions_admits_over_limit() {
        let store = store(1);
        let (a, _) = store.get_or_create(&CommunityId::from("a"));
        set_playing(&a).await;
        store.get_or_create(&CommunityId::from("b"));
        assert_eq!(store.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn sessions_mid_transition_are_not_evicted() {
        let store = store(1);
        let (a, _) = store.get_or_create(&CommunityId::from("a"));
        let _transition = a.try_begin_transition().unwrap();
        store.get_or_create(&CommunityId::from("b"));
        assert!(store.contains(&CommunityId::from("a")));
    }

    #[tokio::test(start_paused = true)]
    async fn delete_tears_down_and_removes_listeners() {
        let bus = EventBus::new();
        let store = SessionStore::new(SessionsConfig::default(), SessionDefaults::default(), bus.clone());
        let g = CommunityId::from("g");
        let (handle, _) = store.get_or_create(&g);
        bus.subscribe_scoped(&g, EventKind::Node, |_| async {});
        handle
            .state
            .lock()
            .await
            .timers
            .inactivity
            .arm(Duration::from_secs(5), |_| async {});

        assert!(store.delete(&g, Duration::from_secs(1)).await.unwrap());
        assert!(!store.delete(&g, Duration::from_secs(1)).await.unwrap());
        assert!(!store.contains(&g));
        assert_eq!(bus.scoped_count(&g), 0);

        let state = handle.state.lock().await;
        assert!(state.destroyed);
        assert!(!state.timers.inactivity.is_armed());
        drop(state);
        assert!(matches!(
            handle.lock(Duration::from_secs(1)).await,
            Err(PlaybackError::NoSession(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_removes_only_stale_idle_sessions() {
        let store = store(10);
        let (old_idle, _) = store.get_or_create(&CommunityId::from("old-idle"));
        let (old_playing, _) = store.get_or_create(&CommunityId::from("old-playing"));
        set_playing(&old_playing).await;
        tokio::time::advance(Duration::from_secs(120)).await;
        store.get_or_create(&CommunityId::from("fresh"));

        let removed = store.sweep();
        assert_eq!(removed, vec![old_idle.community.clone()]);
        assert!(store.contains(&CommunityId::from("old-playing")));
        assert!(store.contains(&CommunityId::from("fresh")));
    }

    #[tokio::test]
    async fn transition_slot_is_exclusive_and_released_on_drop() {
        let store = store(1);
        let (handle, _) = store.get_or_create(&CommunityId::from("g"));
        let first = handle.try_begin_transition();
        assert!(first.is_some());
        assert!(handle.try_begin_transition().is_none());
        drop(first);
        assert!(!handle.is_transitioning());
        assert!(handle.try_begin_transition().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn lock_times_out_when_held() {
        let store = store(1);
        let (handle, _) = store.get_or_create(&CommunityId::from("g"));
        let _held = handle.lock(Duration::from_secs(1)).await.unwrap();
        assert!(matches!(
            handle.lock(Duration::from_secs(3)).await,
            Err(PlaybackError::LockTimeout(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn delete_gives_up_when_the_lock_is_held() {
        let store = store(1);
        let g = CommunityId::from("g");
        let (handle, _) = store.get_or_create(&g);
        let held = handle.lock(Duration::from_secs(1)).await.unwrap();

        assert!(matches!(
            store.delete(&g, Duration::from_secs(3)).await,
            Err(PlaybackError::LockTimeout(_))
        ));
        assert!(store.contains(&g));
        drop(held);
        assert!(store.delete(&g, Duration::from_secs(3)).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn release_hook_sees_every_way_out() {
        let released = Arc::new(Mutex::new(Vec::new()));
        let seen = released.clone();
        let store = SessionStore::new(
            SessionsConfig {
                max_sessions: 1,
                stale_after_secs: 60,
                ..SessionsConfig::default()
            },
            SessionDefaults::default(),
            EventBus::new(),
        )
        .with_release_hook(move |community| seen.lock().push(community.to_string()));

        store.get_or_create(&CommunityId::from("evicted"));
        tokio::time::advance(Duration::from_secs(1)).await;
        store.get_or_create(&CommunityId::from("swept"));
        tokio::time::advance(Duration::from_secs(120)).await;
        store.sweep();
        store.get_or_create(&CommunityId::from("deleted"));
        store
            .delete(&CommunityId::from("deleted"), Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(*released.lock(), vec!["evicted", "swept", "deleted"]);
    }
}
