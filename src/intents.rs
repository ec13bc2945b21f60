use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

/// A bit-set describing which event categories the connection subscribes to.
///
/// Supplied once at gateway construction and immutable thereafter. The set of
/// named flags mirrors the gateway wire values; combining flags collapses them
/// into a single 32-bit value sent in the identify payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Intents(u32);

impl Intents {
    pub const GUILDS: Intents = Intents(1 << 0);
    pub const GUILD_MEMBERS: Intents = Intents(1 << 1);
    pub const GUILD_MODERATION: Intents = Intents(1 << 2);
    pub const GUILD_EMOJIS_AND_STICKERS: Intents = Intents(1 << 3);
    pub const GUILD_INTEGRATIONS: Intents = Intents(1 << 4);
    pub const GUILD_WEBHOOKS: Intents = Intents(1 << 5);
    pub const GUILD_INVITES: Intents = Intents(1 << 6);
    pub const GUILD_VOICE_STATES: Intents = Intents(1 << 7);
    pub const GUILD_PRESENCES: Intents = Intents(1 << 8);
    pub const GUILD_MESSAGES: Intents = Intents(1 << 9);
    pub const GUILD_MESSAGE_REACTIONS: Intents = Intents(1 << 10);
    pub const GUILD_MESSAGE_TYPING: Intents = Intents(1 << 11);
    pub const DIRECT_MESSAGES: Intents = Intents(1 << 12);
    pub const DIRECT_MESSAGE_REACTIONS: Intents = Intents(1 << 13);
    pub const DIRECT_MESSAGE_TYPING: Intents = Intents(1 << 14);
    pub const MESSAGE_CONTENT: Intents = Intents(1 << 15);
    pub const GUILD_SCHEDULED_EVENTS: Intents = Intents(1 << 16);
    pub const AUTO_MODERATION_CONFIGURATION: Intents = Intents(1 << 20);
    pub const AUTO_MODERATION_EXECUTION: Intents = Intents(1 << 21);

    /// Every defined flag. Bits outside this mask are not valid intents.
    pub const ALL: Intents = Intents(((1 << 17) - 1) | (1 << 20) | (1 << 21));

    /// The empty set.
    pub const fn empty() -> Intents {
        Intents(0)
    }

    /// The raw 32-bit value sent over the wire.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Build from a raw value, rejecting unknown bits.
    pub const fn from_bits(bits: u32) -> Option<Intents> {
        if bits & !Self::ALL.0 == 0 {
            Some(Intents(bits))
        } else {
            None
        }
    }

    /// Collapse a list of flags into a single bitfield.
    pub fn from_flags(flags: &[Intents]) -> Intents {
        flags.iter().fold(Intents::empty(), |acc, f| acc | *f)
    }

    /// Check whether every bit of `other` is set in `self`.
    pub const fn contains(self, other: Intents) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Intents {
    type Output = Intents;

    fn bitor(self, rhs: Intents) -> Intents {
        Intents(self.0 | rhs.0)
    }
}

impl BitOrAssign for Intents {
    fn bitor_assign(&mut self, rhs: Intents) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for Intents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_flags() {
        let intents = Intents::GUILDS | Intents::GUILD_MESSAGES | Intents::MESSAGE_CONTENT;
        assert_eq!(intents.bits(), 1 | (1 << 9) | (1 << 15));
        assert!(intents.contains(Intents::GUILD_MESSAGES));
        assert!(!intents.contains(Intents::GUILD_MEMBERS));
    }

    #[test]
    fn test_from_flags_matches_bitor() {
        let combined = Intents::from_flags(&[Intents::GUILDS, Intents::GUILD_PRESENCES]);
        assert_eq!(combined, Intents::GUILDS | Intents::GUILD_PRESENCES);
    }

    #[test]
    fn test_from_bits_rejects_unknown() {
        assert!(Intents::from_bits(Intents::ALL.bits()).is_some());
        // bits 17..20 are not defined
        assert!(Intents::from_bits(1 << 18).is_none());
        assert!(Intents::from_bits(1 << 31).is_none());
    }

    #[test]
    fn test_all_contains_every_flag() {
        for flag in [
            Intents::GUILDS,
            Intents::MESSAGE_CONTENT,
            Intents::GUILD_SCHEDULED_EVENTS,
            Intents::AUTO_MODERATION_CONFIGURATION,
            Intents::AUTO_MODERATION_EXECUTION,
        ] {
            assert!(Intents::ALL.contains(flag));
        }
    }
}
