use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::common::{
    errors::{PlaybackError, PlaybackResult},
    types::{AnyResult, CommunityId},
};

/// Commands accepted by the external playback node bound to a community.
///
/// Implementations forward these to whatever actually decodes and streams
/// audio. Lifecycle events travel the other way, through
/// [`crate::playback::Orchestrator::dispatch_node_event`].
#[async_trait]
pub trait PlaybackNode: Send + Sync {
    /// Start rendering the given payload, replacing whatever plays now.
    async fn play_track(&self, encoded: &str) -> AnyResult<()>;

    async fn stop_track(&self) -> AnyResult<()>;

    async fn set_paused(&self, paused: bool) -> AnyResult<()>;

    /// Volume in the node's 0-200 range.
    async fn set_global_volume(&self, volume: u16) -> AnyResult<()>;

    async fn seek_to(&self, position_ms: u64) -> AnyResult<()>;
}

/// Who is listening in a community's audio channel.
#[async_trait]
pub trait MembershipQuery: Send + Sync {
    async fn listener_count(&self, community: &CommunityId) -> usize;
}

/// Node handle plus the deadline applied to every command sent through it.
#[derive(Clone)]
pub struct NodeLink {
    node: Arc<dyn PlaybackNode>,
    timeout: Duration,
}

impl NodeLink {
    pub fn new(node: Arc<dyn PlaybackNode>, timeout: Duration) -> Self {
        Self { node, timeout }
    }

    pub async fn play(&self, encoded: &str) -> PlaybackResult<()> {
        self.run("playTrack", self.node.play_track(encoded)).await
    }

    pub async fn stop(&self) -> PlaybackResult<()> {
        self.run("stopTrack", self.node.stop_track()).await
    }

    pub async fn pause(&self, paused: bool) -> PlaybackResult<()> {
        self.run("setPaused", self.node.set_paused(paused)).await
    }

    pub async fn volume(&self, volume: u16) -> PlaybackResult<()> {
        self.run("setGlobalVolume", self.node.set_global_volume(volume))
            .await
    }

    pub async fn seek(&self, position_ms: u64) -> PlaybackResult<()> {
        self.run("seekTo", self.node.seek_to(position_ms)).await
    }

    async fn run(
        &self,
        command: &str,
        fut: impl Future<Output = AnyResult<()>>,
    ) -> PlaybackResult<()> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(PlaybackError::Node(format!("{} failed: {}", command, e))),
            Err(_) => Err(PlaybackError::Node(format!(
                "{} timed out after {:?}",
                command, self.timeout
            ))),
        }
    }
}
