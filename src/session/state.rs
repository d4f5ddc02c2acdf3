use std::collections::VecDeque;

use rand::{Rng, seq::SliceRandom};

use crate::{
    common::{
        errors::{PlaybackError, PlaybackResult},
        types::LoopMode,
    },
    configs::Config,
    node::NodeLink,
    protocol::tracks::Track,
    session::{history::RecentTitles, timer::Timer},
    vote::VoteSession,
};

/// Per-session settings taken from the config at creation time.
#[derive(Debug, Clone)]
pub struct SessionDefaults {
    pub volume: u16,
    pub max_volume: u16,
    pub auto_continue: bool,
    pub max_queue_length: usize,
    pub recent_history: usize,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            volume: 100,
            max_volume: 200,
            auto_continue: false,
            max_queue_length: 1000,
            recent_history: 20,
        }
    }
}

impl SessionDefaults {
    pub fn from_config(config: &Config) -> Self {
        Self {
            volume: config.playback.default_volume,
            max_volume: config.playback.max_volume,
            auto_continue: config.autoplay.enabled_by_default,
            max_queue_length: config.sessions.max_queue_length,
            recent_history: config.sessions.recent_history,
        }
    }
}

/// Why the inactivity timer is armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InactivityCause {
    /// Nothing playing and nothing queued.
    Idle,
    /// Nobody left in the audio channel.
    EmptyChannel,
}

#[derive(Default)]
pub struct SessionTimers {
    pub inactivity: Timer,
    pub listener_monitor: Timer,
    /// Settle delay between a natural end and the advance it triggers.
    pub advance: Timer,
}

impl SessionTimers {
    pub fn cancel_all(&mut self) {
        self.inactivity.cancel();
        self.listener_monitor.cancel();
        self.advance.cancel();
    }
}

/// Mutable playback state of one community. Only reachable through the
/// community lock held by its [`super::SessionHandle`].
pub struct Session {
    pub tracks: VecDeque<Track>,
    /// Queue order before shuffling; restored when shuffle is turned off.
    pub original_order: Vec<Track>,
    pub current: Option<Track>,
    /// The track that ended naturally and is waiting for its advance.
    pub finishing: Option<Track>,
    /// Seed for auto-continue once the queue runs dry.
    pub last_played: Option<Track>,
    pub loop_mode: LoopMode,
    pub paused: bool,
    pub shuffled: bool,
    pub auto_continue: bool,
    pub volume: u16,
    pub vote: Option<VoteSession>,
    pub recent: RecentTitles,
    pub node: Option<NodeLink>,
    pub timers: SessionTimers,
    pub inactivity_cause: Option<InactivityCause>,
    pub destroyed: bool,
    max_queue_length: usize,
    max_volume: u16,
}

impl Session {
    pub fn new(defaults: &SessionDefaults) -> Self {
        Self {
            tracks: VecDeque::new(),
            original_order: Vec::new(),
            current: None,
            finishing: None,
            last_played: None,
            loop_mode: LoopMode::Off,
            paused: false,
            shuffled: false,
            auto_continue: defaults.auto_continue,
            volume: defaults.volume.min(defaults.max_volume),
            vote: None,
            recent: RecentTitles::new(defaults.recent_history),
            node: None,
            timers: SessionTimers::default(),
            inactivity_cause: None,
            destroyed: false,
            max_queue_length: defaults.max_queue_length,
            max_volume: defaults.max_volume,
        }
    }

    /// Whether the node is rendering (or about to advance from) a track.
    pub fn has_active_track(&self) -> bool {
        self.current.is_some() || self.finishing.is_some()
    }

    pub fn max_queue_length(&self) -> usize {
        self.max_queue_length
    }

    /// Appends all of `tracks` or none of them. Returns the queue position
    /// of the first appended track.
    pub fn enqueue(&mut self, tracks: Vec<Track>) -> PlaybackResult<usize> {
        if self.tracks.len() + tracks.len() > self.max_queue_length {
            return Err(PlaybackError::QueueFull {
                max: self.max_queue_length,
            });
        }
        let position = self.tracks.len();
        if self.shuffled {
            self.original_order.extend(tracks.iter().cloned());
        }
        self.tracks.extend(tracks);
        Ok(position)
    }

    pub fn pop_next(&mut self) -> Option<Track> {
        self.tracks.pop_front()
    }

    /// Re-queues a finished track for loop-queue mode.
    pub fn requeue(&mut self, track: Track) {
        if self.shuffled {
            self.original_order.push(track.clone());
        }
        self.tracks.push_back(track);
    }

    pub fn remove(&mut self, index: usize) -> PlaybackResult<Track> {
        let len = self.tracks.len();
        self.tracks
            .remove(index)
            .ok_or(PlaybackError::IndexOutOfRange { index, len })
    }

    pub fn move_track(&mut self, from: usize, to: usize) -> PlaybackResult<()> {
        let len = self.tracks.len();
        if from >= len || to >= len {
            return Err(PlaybackError::IndexOutOfRange {
                index: from.max(to),
                len,
            });
        }
        if let Some(track) = self.tracks.remove(from) {
            self.tracks.insert(to, track);
        }
        Ok(())
    }

    pub fn clear_queue(&mut self) -> usize {
        let n = self.tracks.len();
        self.tracks.clear();
        self.original_order.clear();
        n
    }

    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        if !self.shuffled {
            self.original_order = self.tracks.iter().cloned().collect();
            self.shuffled = true;
        }
        self.tracks.make_contiguous().shuffle(rng);
    }

    /// Restores the pre-shuffle order. Tracks played while shuffled are gone
    /// from the queue and stay gone; tracks enqueued meanwhile keep their
    /// place in `original_order`.
    pub fn unshuffle(&mut self) {
        if !self.shuffled {
            return;
        }
        let mut remaining: Vec<Option<Track>> = self.tracks.drain(..).map(Some).collect();
        let mut restored = VecDeque::with_capacity(remaining.len());
        for track in std::mem::take(&mut self.original_order) {
            if let Some(slot) = remaining
                .iter_mut()
                .find(|slot| slot.as_ref().is_some_and(|t| *t == track))
            {
                restored.extend(slot.take());
            }
        }
        // anything the snapshot never saw goes to the tail
        restored.extend(remaining.into_iter().flatten());
        self.tracks = restored;
        self.shuffled = false;
    }

    /// Clamps to the configured range and returns the stored value.
    pub fn set_volume(&mut self, volume: i32) -> u16 {
        self.volume = volume.clamp(0, self.max_volume as i32) as u16;
        self.volume
    }

    /// Cancels everything the session owns. Timers and vote state go first
    /// so no callback can observe a half-freed session.
    pub fn teardown(&mut self) {
        self.timers.cancel_all();
        if let Some(mut vote) = self.vote.take() {
            vote.cancel();
        }
        self.inactivity_cause = None;
        self.tracks.clear();
        self.original_order.clear();
        self.current = None;
        self.finishing = None;
        self.node = None;
        self.destroyed = true;
    }
}
