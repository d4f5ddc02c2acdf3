pub mod autoplay;
pub mod base;
pub mod logging;
pub mod playback;
pub mod sessions;
pub mod votes;

pub use autoplay::*;
pub use base::*;
pub use logging::*;
pub use playback::*;
pub use sessions::*;
pub use votes::*;
