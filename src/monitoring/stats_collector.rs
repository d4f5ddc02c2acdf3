use parking_lot::Mutex;
use sysinfo::System;

use crate::session::SessionStore;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Memory {
    pub used: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stats {
    pub sessions: usize,
    pub playing: usize,
    pub paused: usize,
    pub idle: usize,
    /// Sessions whose lock was busy while counting.
    pub busy: usize,
    pub queued_tracks: usize,
    pub open_votes: usize,
    pub uptime_ms: u64,
    pub memory: Memory,
    pub load_one: f64,
}

/// Gathers session counts from `store` and host memory figures.
///
/// Sessions are inspected with `try_lock`; a session held by an operation
/// is counted as busy instead of waited for.
pub fn collect_stats(store: &SessionStore, uptime_ms: u64, system: &Mutex<System>) -> Stats {
    let mut stats = Stats {
        uptime_ms,
        ..Stats::default()
    };

    for handle in store.handles() {
        stats.sessions += 1;
        let Ok(state) = handle.state.try_lock() else {
            stats.busy += 1;
            continue;
        };
        stats.queued_tracks += state.tracks.len();
        if state.vote.is_some() {
            stats.open_votes += 1;
        }
        match (&state.current, state.paused) {
            (Some(_), false) => stats.playing += 1,
            (Some(_), true) => stats.paused += 1,
            (None, _) => stats.idle += 1,
        }
    }

    let mut sys = system.lock();
    sys.refresh_memory();
    stats.memory = Memory {
        used: sys.used_memory(),
        total: sys.total_memory(),
    };
    stats.load_one = System::load_average().one;

    stats
}
