//! Recording doubles for the external collaborators.

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{
    common::types::{AnyResult, CommunityId},
    configs::Config,
    node::{MembershipQuery, PlaybackNode},
    playback::{Collaborators, Orchestrator, SessionSnapshot},
    presentation::{PresentationChange, PresentationUpdate, Presenter},
    protocol::tracks::{LoadResult, Track, TrackInfo},
    session::Session,
    sources::TrackSearch,
};

pub fn track(title: &str) -> Track {
    track_by(title, "Unknown Artist")
}

pub fn track_by(title: &str, author: &str) -> Track {
    Track::new(
        format!("enc:{}", title),
        TrackInfo {
            identifier: title.to_lowercase().replace(' ', "-"),
            is_seekable: true,
            author: author.to_string(),
            length: 180_000,
            is_stream: false,
            title: title.to_string(),
            uri: None,
            artwork_url: None,
            source_name: "test".to_string(),
        },
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Play(String),
    Stop,
    Pause(bool),
    Volume(u16),
    Seek(u64),
}

/// Records every command it receives. Commands can be slowed down or made to
/// fail once.
#[derive(Default)]
pub struct RecordingNode {
    commands: Mutex<Vec<Command>>,
    delay: Mutex<Option<Duration>>,
    failures: Mutex<VecDeque<String>>,
}

impl RecordingNode {
    pub fn set_command_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn fail_next(&self, message: &str) {
        self.failures.lock().push_back(message.to_string());
    }

    pub fn commands(&self) -> Vec<Command> {
        self.commands.lock().clone()
    }

    /// Payloads of every `playTrack`, in order.
    pub fn played(&self) -> Vec<String> {
        self.commands
            .lock()
            .iter()
            .filter_map(|c| match c {
                Command::Play(encoded) => Some(encoded.clone()),
                _ => None,
            })
            .collect()
    }

    async fn record(&self, command: Command) -> AnyResult<()> {
        self.commands.lock().push(command);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failure = self.failures.lock().pop_front();
        match failure {
            Some(message) => Err(message.into()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PlaybackNode for RecordingNode {
    async fn play_track(&self, encoded: &str) -> AnyResult<()> {
        self.record(Command::Play(encoded.to_string())).await
    }

    async fn stop_track(&self) -> AnyResult<()> {
        self.record(Command::Stop).await
    }

    async fn set_paused(&self, paused: bool) -> AnyResult<()> {
        self.record(Command::Pause(paused)).await
    }

    async fn set_global_volume(&self, volume: u16) -> AnyResult<()> {
        self.record(Command::Volume(volume)).await
    }

    async fn seek_to(&self, position_ms: u64) -> AnyResult<()> {
        self.record(Command::Seek(position_ms)).await
    }
}

#[derive(Default)]
pub struct RecordingPresenter {
    updates: Mutex<Vec<PresentationUpdate>>,
    attempts: AtomicUsize,
    failures_left: AtomicUsize,
}

impl RecordingPresenter {
    pub fn fail_times(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Successfully delivered updates.
    pub fn updates(&self) -> Vec<PresentationUpdate> {
        self.updates.lock().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Presenter for RecordingPresenter {
    async fn refresh(&self, update: &PresentationUpdate) -> AnyResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err("presenter unavailable".into());
        }
        self.updates.lock().push(update.clone());
        Ok(())
    }
}

/// Answers searches from a queue of canned responses; an empty queue answers
/// with no results.
#[derive(Default)]
pub struct ScriptedSearch {
    responses: Mutex<VecDeque<Vec<Track>>>,
    queries: Mutex<Vec<String>>,
    delay: Mutex<Option<Duration>>,
}

impl ScriptedSearch {
    pub fn respond(&self, tracks: Vec<Track>) {
        self.responses.lock().push_back(tracks);
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }
}

#[async_trait]
impl TrackSearch for ScriptedSearch {
    async fn search(&self, identifier: &str) -> AnyResult<LoadResult> {
        self.queries.lock().push(identifier.to_string());
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let response = self.responses.lock().pop_front();
        Ok(match response {
            Some(tracks) => LoadResult::Search(tracks),
            None => LoadResult::Empty {},
        })
    }
}

pub struct FixedMembership {
    listeners: AtomicUsize,
}

impl FixedMembership {
    pub fn new(listeners: usize) -> Self {
        Self {
            listeners: AtomicUsize::new(listeners),
        }
    }

    pub fn set(&self, listeners: usize) {
        self.listeners.store(listeners, Ordering::SeqCst);
    }
}

#[async_trait]
impl MembershipQuery for FixedMembership {
    async fn listener_count(&self, _community: &CommunityId) -> usize {
        self.listeners.load(Ordering::SeqCst)
    }
}

/// An orchestrator wired to recording doubles, with community `guild`
/// connected to a [`RecordingNode`] and three listeners.
pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub node: Arc<RecordingNode>,
    pub search: Arc<ScriptedSearch>,
    pub presenter: Arc<RecordingPresenter>,
    pub membership: Arc<FixedMembership>,
    pub community: CommunityId,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(Config::default()).await
    }

    pub async fn with_config(config: Config) -> Self {
        let node = Arc::new(RecordingNode::default());
        let search = Arc::new(ScriptedSearch::default());
        let presenter = Arc::new(RecordingPresenter::default());
        let membership = Arc::new(FixedMembership::new(3));
        let orchestrator = Orchestrator::with_seed(
            config,
            Collaborators {
                search: search.clone(),
                membership: membership.clone(),
                presenter: presenter.clone(),
            },
            7,
        );
        let community = CommunityId::from("guild");
        orchestrator
            .connect(&community, node.clone())
            .await
            .expect("connect");
        Self {
            orchestrator,
            node,
            search,
            presenter,
            membership,
            community,
        }
    }

    pub async fn enqueue(&self, titles: &[&str]) {
        self.orchestrator
            .enqueue(&self.community, titles.iter().map(|t| track(t)).collect())
            .await
            .expect("enqueue");
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.orchestrator
            .snapshot(&self.community)
            .await
            .expect("snapshot")
    }

    pub async fn recent(&self) -> Vec<String> {
        let handle = self.orchestrator.store().get(&self.community).expect("session");
        let state = handle.state.lock().await;
        state.recent.iter().map(str::to_string).collect()
    }

    pub async fn with_state<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        let handle = self.orchestrator.store().get(&self.community).expect("session");
        let mut state = handle.state.lock().await;
        f(&mut state)
    }

    /// Changes the presenter received, in order.
    pub fn presented(&self) -> Vec<PresentationChange> {
        self.presenter
            .updates()
            .into_iter()
            .map(|update| update.change)
            .collect()
    }
}
