use serde::{Deserialize, Serialize};

use crate::snowflake::Snowflake;

/// Base URL for user and guild image assets.
const CDN_BASE: &str = "https://cdn.discordapp.com";

/// A user as delivered in dispatch payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Snowflake,
    pub username: String,
    /// Legacy discriminator; `"0"` for accounts migrated to unique usernames.
    #[serde(default)]
    pub discriminator: Option<String>,
    /// Display name, when set.
    #[serde(default)]
    pub global_name: Option<String>,
    /// Avatar image hash.
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub bot: bool,
    #[serde(default)]
    pub system: bool,
    #[serde(default)]
    pub mfa_enabled: Option<bool>,
    /// Banner image hash.
    #[serde(default)]
    pub banner: Option<String>,
    /// Banner color as an integer RGB value.
    #[serde(default)]
    pub accent_color: Option<u32>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub verified: Option<bool>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub flags: Option<u64>,
    #[serde(default)]
    pub premium_type: Option<u8>,
    #[serde(default)]
    pub public_flags: Option<u64>,
    #[serde(default)]
    pub avatar_decoration: Option<String>,
}

impl User {
    /// Display name, falling back to the username.
    pub fn display_name(&self) -> &str {
        self.global_name.as_deref().unwrap_or(&self.username)
    }

    /// `name#1234` for legacy accounts, the bare username otherwise.
    pub fn tag(&self) -> String {
        match self.discriminator.as_deref() {
            Some(d) if d != "0" => format!("{}#{d}", self.username),
            _ => self.username.clone(),
        }
    }

    /// URL of the custom avatar, if one is set. Animated avatars (hash
    /// prefixed with `a_`) resolve to a GIF.
    pub fn avatar_url(&self) -> Option<String> {
        self.avatar.as_deref().map(|hash| {
            let ext = if hash.starts_with("a_") { "gif" } else { "png" };
            format!("{CDN_BASE}/avatars/{}/{hash}.{ext}", self.id)
        })
    }

    /// Creation time as milliseconds since the Unix epoch.
    pub fn created_at_ms(&self) -> u64 {
        self.id.timestamp_ms()
    }
}

/// A guild as delivered in `GUILD_CREATE` payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Guild {
    pub id: Snowflake,
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub owner_id: Option<Snowflake>,
    /// Whether the member count crossed the configured large threshold.
    #[serde(default)]
    pub large: bool,
    #[serde(default)]
    pub member_count: Option<u32>,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub unavailable: bool,
}

impl Guild {
    /// URL of the guild icon, if one is set.
    pub fn icon_url(&self) -> Option<String> {
        self.icon.as_deref().map(|hash| {
            let ext = if hash.starts_with("a_") { "gif" } else { "png" };
            format!("{CDN_BASE}/icons/{}/{hash}.{ext}", self.id)
        })
    }

    pub fn created_at_ms(&self) -> u64 {
        self.id.timestamp_ms()
    }
}

/// Stub guild entry carried in the `READY` payload before the full
/// `GUILD_CREATE` arrives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnavailableGuild {
    pub id: Snowflake,
    #[serde(default)]
    pub unavailable: bool,
}
