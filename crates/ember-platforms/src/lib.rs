pub mod adapter;
pub mod error;
pub mod irc;
pub mod kick;
pub mod spotify;
pub mod twitch;
pub mod types;
pub mod youtube;

pub use adapter::{PlatformAdapter, PlatformSession};
pub use error::AdapterError;
pub use kick::KickAdapter;
pub use spotify::SpotifyAdapter;
pub use twitch::TwitchAdapter;
pub use types::{NowPlaying, SendOutcome, SessionCredentials, SessionEvent, StreamInfo};
pub use youtube::YoutubeAdapter;
