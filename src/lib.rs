//! # shardgate
//!
//! A sharded client for stateful WebSocket push gateways.
//!
//! ## Features
//!
//! - **Sharded connections** with server-recommended or explicit shard counts
//! - **Staggered bring-up** that respects the identify rate-limit window
//! - **Session resume** after dropped connections, with sequence tracking
//! - **Auto-reconnection** on a fixed interval, stopping on fatal close codes
//! - **Transport stream compression** (continuous zlib stream)
//! - **Merged event stream** covering dispatches and shard lifecycle
//!
//! ## Example
//!
//! ```ignore
//! use shardgate::{Gateway, GatewayConfig, GatewayEvent, Intents};
//!
//! let config = GatewayConfig::builder(token)
//!     .intents(Intents::GUILDS | Intents::GUILD_MESSAGES)
//!     .compress(true)
//!     .build()?;
//!
//! let gateway = Gateway::new(config);
//! gateway.connect().await?;
//!
//! while let Some(event) = gateway.next_event().await {
//!     match event {
//!         GatewayEvent::Ready => println!("all shards ready"),
//!         GatewayEvent::Dispatch { name, payload, .. } => { /* ... */ }
//!         _ => {}
//!     }
//! }
//! ```

mod cache;
mod compression;
mod config;
mod error;
mod events;
mod gateway;
mod intents;
mod manager;
mod models;
mod protocol;
mod rest;
mod shard;
mod snowflake;

pub use cache::{Cache, MemoryCache};
pub use compression::ZlibStreamDecoder;
pub use config::{
    ConfigError, GatewayConfig, GatewayConfigBuilder, ShardCount, LARGE_THRESHOLD_MAX,
    LARGE_THRESHOLD_MIN,
};
pub use error::{Error, ErrorKind};
pub use events::GatewayEvent;
pub use gateway::Gateway;
pub use intents::Intents;
pub use manager::ShardingManager;
pub use models::{Guild, UnavailableGuild, User};
pub use protocol::{close_code, is_fatal_close, Envelope, Opcode, GATEWAY_VERSION};
pub use rest::{GatewayMetadata, HttpMetadataProvider, MetadataProvider, SessionStartLimit};
pub use shard::{ShardHandle, ShardSession, ShardState};
pub use snowflake::{Snowflake, EPOCH_MS};

/// Result type for shardgate operations
pub type Result<T> = std::result::Result<T, Error>;
