use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use rustaplay::{
    common::{
        banner::{BannerInfo, print_banner},
        logger,
        types::{AnyResult, CommunityId, LoopMode, UserId},
    },
    configs::Config,
    monitoring::collect_stats,
    node::{MembershipQuery, PlaybackNode},
    playback::{Collaborators, Orchestrator},
    presentation::{PresentationUpdate, Presenter},
    protocol::{
        events::{NodeEvent, TrackEndReason},
        tracks::{LoadResult, Track, TrackInfo},
    },
    sources::TrackSearch,
};
use sysinfo::System;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

/// Node that only logs the commands it receives.
struct ConsoleNode {
    community: CommunityId,
}

#[async_trait]
impl PlaybackNode for ConsoleNode {
    async fn play_track(&self, encoded: &str) -> AnyResult<()> {
        info!("[{}] node <- play {}", self.community, encoded);
        Ok(())
    }

    async fn stop_track(&self) -> AnyResult<()> {
        info!("[{}] node <- stop", self.community);
        Ok(())
    }

    async fn set_paused(&self, paused: bool) -> AnyResult<()> {
        info!("[{}] node <- paused={}", self.community, paused);
        Ok(())
    }

    async fn set_global_volume(&self, volume: u16) -> AnyResult<()> {
        info!("[{}] node <- volume={}", self.community, volume);
        Ok(())
    }

    async fn seek_to(&self, position_ms: u64) -> AnyResult<()> {
        info!("[{}] node <- seek {}ms", self.community, position_ms);
        Ok(())
    }
}

/// Answers every query with a few made-up tracks.
struct DemoSearch;

#[async_trait]
impl TrackSearch for DemoSearch {
    async fn search(&self, identifier: &str) -> AnyResult<LoadResult> {
        let query = identifier.split_once(':').map_or(identifier, |(_, q)| q);
        let tracks = (1..=3)
            .map(|n| demo_track(&format!("{} #{}", query, n), "Demo Artist"))
            .collect();
        Ok(LoadResult::Search(tracks))
    }
}

struct ConsoleMembership(AtomicUsize);

#[async_trait]
impl MembershipQuery for ConsoleMembership {
    async fn listener_count(&self, _community: &CommunityId) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

struct LogPresenter;

#[async_trait]
impl Presenter for LogPresenter {
    async fn refresh(&self, update: &PresentationUpdate) -> AnyResult<()> {
        info!("[{}] panel: {:?}", update.community, update.change);
        Ok(())
    }
}

fn demo_track(title: &str, author: &str) -> Track {
    Track::new(
        format!("demo:{}", title),
        TrackInfo {
            identifier: title.to_lowercase().replace(' ', "-"),
            is_seekable: true,
            author: author.to_string(),
            length: 200_000,
            is_stream: false,
            title: title.to_string(),
            uri: None,
            artwork_url: None,
            source_name: "demo".to_string(),
        },
    )
}

const HELP: &str = "commands: connect <c> | play <c> <title> | next <c> | skip <c> [n] | vote <c> <user> \
| pause <c> | resume <c> | volume <c> <n> | seek <c> <ms> | loop <c> [off|track|queue] | shuffle <c> <on|off> \
| auto <c> <on|off> | end <c> | listeners <n> | status <c> | stop <c> | raw <json> | quit";

#[tokio::main]
async fn main() -> AnyResult<()> {
    let config = Config::load()?;
    logger::init(&config);
    print_banner(&BannerInfo::default());

    let membership = Arc::new(ConsoleMembership(AtomicUsize::new(2)));
    let orchestrator = Orchestrator::new(
        config,
        Collaborators {
            search: Arc::new(DemoSearch),
            membership: membership.clone(),
            presenter: Arc::new(LogPresenter),
        },
    );
    let sweeper = orchestrator.spawn_sweeper();

    let started = tokio::time::Instant::now();
    let stats_orchestrator = orchestrator.clone();
    let stats_task = tokio::spawn(async move {
        let system = Mutex::new(System::new());
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            let stats = collect_stats(
                stats_orchestrator.store(),
                started.elapsed().as_millis() as u64,
                &system,
            );
            info!(
                "sessions={} playing={} paused={} idle={} queued={} votes={} mem={}/{}MB",
                stats.sessions,
                stats.playing,
                stats.paused,
                stats.idle,
                stats.queued_tracks,
                stats.open_votes,
                stats.memory.used / 1024 / 1024,
                stats.memory.total / 1024 / 1024
            );
        }
    });

    info!("{}", HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if line.trim() == "quit" {
                            break;
                        }
                        if let Err(e) = run_command(&orchestrator, &membership, line.trim()).await {
                            warn!("{}", e);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!("stdin closed: {}", e);
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    sweeper.abort();
    stats_task.abort();
    Ok(())
}

async fn run_command(
    orchestrator: &Arc<Orchestrator>,
    membership: &ConsoleMembership,
    line: &str,
) -> AnyResult<()> {
    let mut parts = line.splitn(3, ' ');
    let command = parts.next().unwrap_or_default();
    let community = CommunityId::from(parts.next().unwrap_or("console"));
    let rest = parts.next().unwrap_or_default().trim();
    let on = |s: &str| matches!(s, "on" | "true" | "1");

    match command {
        "" => {}
        "connect" => {
            let node = Arc::new(ConsoleNode {
                community: community.clone(),
            });
            orchestrator.connect(&community, node).await?;
        }
        "play" => {
            let outcome = orchestrator
                .play(&community, vec![demo_track(rest, "Console").requested_by(UserId(0))])
                .await?;
            info!("[{}] queued at {} (started: {:?})", community, outcome.position, outcome.started.map(|n| n.kind));
        }
        "next" => {
            let next = orchestrator.play_next(&community).await?;
            info!("[{}] next: {:?}", community, next.map(|n| n.track.info.title));
        }
        "skip" => {
            let count = rest.parse().unwrap_or(1);
            let result = orchestrator.skip(&community, count).await?;
            info!("[{}] skipped {}", community, result.skipped.info.title);
        }
        "vote" => {
            let user = UserId(rest.parse()?);
            let outcome = orchestrator.vote_skip(&community, user).await?;
            info!("[{}] vote: {:?}", community, outcome);
        }
        "pause" => orchestrator.set_paused(&community, true).await?,
        "resume" => orchestrator.set_paused(&community, false).await?,
        "volume" => {
            orchestrator.set_volume(&community, rest.parse()?).await?;
        }
        "seek" => {
            orchestrator.seek(&community, rest.parse()?).await?;
        }
        "loop" => {
            let mode = match LoopMode::parse(rest) {
                Some(mode) => orchestrator.set_loop_mode(&community, mode).await?,
                None => orchestrator.cycle_loop_mode(&community).await?,
            };
            info!("[{}] loop mode {}", community, mode);
        }
        "shuffle" => {
            orchestrator.set_shuffle(&community, on(rest)).await?;
        }
        "auto" => {
            orchestrator.set_auto_continue(&community, on(rest)).await?;
        }
        "end" => {
            let snapshot = orchestrator.snapshot(&community).await?;
            let encoded = snapshot.current.map(|t| t.encoded);
            orchestrator
                .dispatch_node_event(&community, NodeEvent::end(TrackEndReason::Finished, encoded.as_deref()))
                .await;
        }
        "listeners" => {
            let n = community.parse()?;
            membership.0.store(n, Ordering::Relaxed);
        }
        "status" => {
            let snapshot = orchestrator.snapshot(&community).await?;
            info!("[{}] {:#?}", community, snapshot);
        }
        "stop" => orchestrator.stop(&community).await?,
        "raw" => {
            let raw = line.trim_start_matches("raw").trim();
            orchestrator.dispatch_raw(raw).await?;
        }
        "help" => info!("{}", HELP),
        other => return Err(format!("unknown command `{}`", other).into()),
    }
    Ok(())
}
