use std::collections::HashSet;

use crate::{common::types::UserId, session::timer::Timer};

/// What a vote decides once it passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteKind {
    Skip,
    /// Move the queued track at `index` to the head of the queue.
    Priority { index: usize },
}

/// An in-progress vote. At most one lives on a session at a time.
pub struct VoteSession {
    pub kind: VoteKind,
    pub initiator: UserId,
    pub required: usize,
    pub created_at: tokio::time::Instant,
    voters: HashSet<UserId>,
    pub(crate) expiry: Timer,
}

impl VoteSession {
    /// The initiator's own vote is counted.
    pub fn new(kind: VoteKind, initiator: UserId, required: usize) -> Self {
        let mut voters = HashSet::new();
        voters.insert(initiator);
        Self {
            kind,
            initiator,
            required,
            created_at: tokio::time::Instant::now(),
            voters,
            expiry: Timer::default(),
        }
    }

    /// Returns false for a repeat vote.
    pub fn add(&mut self, user: UserId) -> bool {
        self.voters.insert(user)
    }

    pub fn votes(&self) -> usize {
        self.voters.len()
    }

    pub fn has_passed(&self) -> bool {
        self.voters.len() >= self.required
    }

    pub fn cancel(&mut self) {
        self.expiry.cancel();
        self.voters.clear();
    }
}

/// Votes needed for `listeners` people, or `None` when the vote passes
/// outright because at most one person is listening.
pub fn required_votes(listeners: usize, threshold: f64, min_votes: usize) -> Option<usize> {
    if listeners <= 1 {
        return None;
    }
    // tolerate float noise such as 10 * 0.6 = 6.000000000000001
    let raw = (listeners as f64 * threshold - 1e-9).ceil().max(0.0) as usize;
    Some(raw.max(min_votes))
}
