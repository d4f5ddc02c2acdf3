pub mod autoplay;
pub mod common;
pub mod configs;
pub mod events;
pub mod monitoring;
pub mod node;
pub mod playback;
pub mod presentation;
pub mod protocol;
pub mod session;
pub mod sources;
pub mod vote;

#[cfg(test)]
mod testing;
