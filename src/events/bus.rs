use std::{
    collections::HashMap,
    future::Future,
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use futures::future::BoxFuture;
use parking_lot::RwLock;
use tracing::trace;

use crate::{
    common::types::CommunityId, presentation::PresentationUpdate, protocol::events::NodeEvent,
};

/// Topics a handler can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Lifecycle events reported by a playback node.
    Node,
    /// State changes destined for the rendering side.
    Presentation,
}

#[derive(Debug, Clone)]
pub enum BusEvent {
    Node {
        community: CommunityId,
        event: NodeEvent,
    },
    Presentation(PresentationUpdate),
}

impl BusEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Node { .. } => EventKind::Node,
            Self::Presentation(_) => EventKind::Presentation,
        }
    }

    pub fn community(&self) -> &CommunityId {
        match self {
            Self::Node { community, .. } => community,
            Self::Presentation(update) => &update.community,
        }
    }
}

type Handler = Arc<dyn Fn(BusEvent) -> BoxFuture<'static, ()> + Send + Sync>;

struct Entry {
    id: u64,
    kind: EventKind,
    handler: Handler,
}

#[derive(Default)]
struct Registry {
    global: Vec<Entry>,
    scoped: HashMap<CommunityId, Vec<Entry>>,
}

struct BusInner {
    next_id: AtomicU64,
    registry: RwLock<Registry>,
}

/// In-process publish/subscribe hub.
///
/// Handlers for an event run one after another, in subscription order, inside
/// the `publish` call. Nothing is fanned out onto other tasks, so a handler
/// observes every side effect of the handlers subscribed before it.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                next_id: AtomicU64::new(1),
                registry: RwLock::new(Registry::default()),
            }),
        }
    }

    pub async fn publish(&self, event: BusEvent) {
        let handlers = self.matching(&event);
        trace!(
            "[{}] publishing {:?} to {} handler(s)",
            event.community(),
            event.kind(),
            handlers.len()
        );
        for handler in handlers {
            handler(event.clone()).await;
        }
    }

    /// Receives every event of `kind`, whatever its community.
    pub fn subscribe<F, Fut>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(BusEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let entry = self.entry(kind, handler);
        let id = entry.id;
        self.inner.registry.write().global.push(entry);
        Subscription {
            id,
            scope: None,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Receives events of `kind` for `community` only. Dropped wholesale by
    /// [`EventBus::remove_scoped`] when the community's session is torn down.
    pub fn subscribe_scoped<F, Fut>(
        &self,
        community: &CommunityId,
        kind: EventKind,
        handler: F,
    ) -> Subscription
    where
        F: Fn(BusEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let entry = self.entry(kind, handler);
        let id = entry.id;
        self.inner
            .registry
            .write()
            .scoped
            .entry(community.clone())
            .or_default()
            .push(entry);
        Subscription {
            id,
            scope: Some(community.clone()),
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Removes every scoped handler of `community`. Safe to call repeatedly.
    pub fn remove_scoped(&self, community: &CommunityId) -> usize {
        self.inner
            .registry
            .write()
            .scoped
            .remove(community)
            .map(|entries| entries.len())
            .unwrap_or(0)
    }

    pub fn scoped_count(&self, community: &CommunityId) -> usize {
        self.inner
            .registry
            .read()
            .scoped
            .get(community)
            .map(Vec::len)
            .unwrap_or(0)
    }

    fn entry<F, Fut>(&self, kind: EventKind, handler: F) -> Entry
    where
        F: Fn(BusEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |event| Box::pin(handler(event)));
        Entry {
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
            kind,
            handler,
        }
    }

    /// Snapshot of the handlers for `event`, ordered by subscription. The
    /// registry lock is released before any handler runs.
    fn matching(&self, event: &BusEvent) -> Vec<Handler> {
        let kind = event.kind();
        let registry = self.inner.registry.read();
        let scoped = registry
            .scoped
            .get(event.community())
            .into_iter()
            .flatten();
        let mut matched: Vec<(u64, Handler)> = registry
            .global
            .iter()
            .chain(scoped)
            .filter(|e| e.kind == kind)
            .map(|e| (e.id, e.handler.clone()))
            .collect();
        matched.sort_by_key(|(id, _)| *id);
        matched.into_iter().map(|(_, h)| h).collect()
    }
}

/// Handle returned by the subscribe calls.
pub struct Subscription {
    id: u64,
    scope: Option<CommunityId>,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        let Some(inner) = self.bus.upgrade() else {
            return;
        };
        let mut registry = inner.registry.write();
        match &self.scope {
            None => registry.global.retain(|e| e.id != self.id),
            Some(community) => {
                if let Some(entries) = registry.scoped.get_mut(community) {
                    entries.retain(|e| e.id != self.id);
                    if entries.is_empty() {
                        registry.scoped.remove(community);
                    }
                }
            }
        }
    }
}
