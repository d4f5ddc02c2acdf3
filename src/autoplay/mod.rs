pub mod query;
pub mod similarity;

pub use query::{Strategy, clean_author, clean_title, infer_genres, strategies_for};
pub use similarity::{is_similar, normalize};

use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng, rngs::StdRng, seq::SliceRandom};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    common::{
        errors::{PlaybackError, PlaybackResult},
        types::CommunityId,
    },
    configs::AutoplayConfig,
    protocol::tracks::Track,
    session::RecentTitles,
    sources::TrackSearch,
};

/// Finds a track to play once a queue runs dry.
pub struct AutoContinueEngine {
    search: Arc<dyn TrackSearch>,
    config: AutoplayConfig,
    last_run: DashMap<CommunityId, Instant>,
    rng: Mutex<StdRng>,
}

impl AutoContinueEngine {
    pub fn new(search: Arc<dyn TrackSearch>, config: AutoplayConfig) -> Self {
        Self::with_rng(search, config, StdRng::from_entropy())
    }

    /// Deterministic strategy order and picks, for tests.
    pub fn with_seed(search: Arc<dyn TrackSearch>, config: AutoplayConfig, seed: u64) -> Self {
        Self::with_rng(search, config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(search: Arc<dyn TrackSearch>, config: AutoplayConfig, rng: StdRng) -> Self {
        Self {
            search,
            config,
            last_run: DashMap::new(),
            rng: Mutex::new(rng),
        }
    }

    /// Searches for a continuation of `last`, skipping anything resembling a
    /// title in `recent`. Fails with [`PlaybackError::SearchExhausted`] when
    /// nothing usable turns up or the community is still cooling down.
    pub async fn find_continuation(
        &self,
        community: &CommunityId,
        last: &Track,
        recent: &RecentTitles,
    ) -> PlaybackResult<Track> {
        if !self.begin_run(community) {
            debug!("[{}] auto-continue cooling down, skipping search", community);
            return Err(PlaybackError::SearchExhausted);
        }

        let avoid: Vec<String> = std::iter::once(last.info.title.as_str())
            .chain(recent.iter())
            .map(normalize)
            .collect();
        let mut strategies = strategies_for(last);
        strategies.shuffle(&mut *self.rng.lock());
        strategies.truncate(self.config.max_strategies);

        for strategy in &strategies {
            let query = strategy.query();
            if let Some(track) = self.try_query(community, &query, last, &avoid).await {
                info!(
                    "[{}] auto-continue picked '{}' via {:?}",
                    community, track.info.title, strategy
                );
                return Ok(track);
            }
        }

        for query in &self.config.fallback_queries {
            if let Some(track) = self.try_query(community, query, last, &avoid).await {
                info!(
                    "[{}] auto-continue picked '{}' from fallback '{}'",
                    community, track.info.title, query
                );
                return Ok(track);
            }
        }

        warn!(
            "[{}] auto-continue found nothing after {} strategies and {} fallbacks",
            community,
            strategies.len(),
            self.config.fallback_queries.len()
        );
        Err(PlaybackError::SearchExhausted)
    }

    /// Drops the cooldown entry of a torn-down community.
    pub fn forget(&self, community: &CommunityId) {
        self.last_run.remove(community);
    }

    #[cfg(test)]
    pub(crate) fn remembers(&self, community: &CommunityId) -> bool {
        self.last_run.contains_key(community)
    }

    /// Records a run unless the previous one is within the cooldown.
    fn begin_run(&self, community: &CommunityId) -> bool {
        let now = Instant::now();
        match self.last_run.entry(community.clone()) {
            Entry::Occupied(mut previous) => {
                if now.duration_since(*previous.get()) < self.config.cooldown() {
                    return false;
                }
                previous.insert(now);
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
            }
        }
        true
    }

    async fn try_query(
        &self,
        community: &CommunityId,
        query: &str,
        last: &Track,
        avoid: &[String],
    ) -> Option<Track> {
        let identifier = format!("{}:{}", self.config.search_prefix, query);
        let result =
            match tokio::time::timeout(self.config.search_timeout(), self.search.search(&identifier))
                .await
            {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => {
                    warn!("[{}] search '{}' failed: {}", community, identifier, e);
                    return None;
                }
                Err(_) => {
                    warn!(
                        "[{}] search '{}' timed out after {:?}",
                        community,
                        identifier,
                        self.config.search_timeout()
                    );
                    return None;
                }
            };

        let mut survivors: Vec<Track> = result
            .into_tracks()
            .into_iter()
            .filter(|candidate| Self::is_usable(candidate, last, avoid))
            .collect();
        debug!(
            "[{}] search '{}' left {} usable candidate(s)",
            community,
            identifier,
            survivors.len()
        );
        if survivors.is_empty() {
            return None;
        }

        let top = survivors.len().min(self.config.pick_from_top.max(1));
        let index = self.rng.lock().gen_range(0..top);
        Some(survivors.swap_remove(index))
    }

    /// `avoid` holds the normalized last title followed by the recent ones.
    fn is_usable(candidate: &Track, last: &Track, avoid: &[String]) -> bool {
        if !candidate.is_playable() || candidate.encoded == last.encoded {
            return false;
        }
        if candidate.info.title.eq_ignore_ascii_case(&last.info.title) {
            return false;
        }
        let title = normalize(&candidate.info.title);
        !avoid.iter().any(|seen| is_similar(&title, seen))
    }
}
