/*!
Proxy between a Telegram Mini App and the SoundCloud api: oauth code
exchange keyed by telegram id, per-user token storage, listing
endpoints and an audio stream relay.
*/
pub mod config;
pub mod crypto;
pub mod error;
pub mod logging;
pub mod models;
pub mod relay;
pub mod service;
pub mod simplify;
pub mod soundcloud;
pub mod store;
pub mod telegram;

pub use config::{BotConfig, Config};
pub use error::{Error, Result};
