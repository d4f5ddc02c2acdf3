use async_trait::async_trait;

use crate::{common::types::AnyResult, protocol::tracks::LoadResult};

/// The external search capability used for auto-continue.
///
/// `identifier` is a source-prefixed query such as `ytsearch:lofi beats`,
/// the same identifiers a Lavalink node's `/loadtracks` understands.
#[async_trait]
pub trait TrackSearch: Send + Sync {
    async fn search(&self, identifier: &str) -> AnyResult<LoadResult>;
}
