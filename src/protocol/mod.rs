pub mod events;
pub mod tracks;

pub use events::*;
pub use tracks::*;
