use serde_json::Value;

/// The closed set of notifications delivered to the consumer.
///
/// Every state transition that matters is surfaced as a variant here; the
/// consumer is never left to infer shard health by polling. Events flow from
/// each shard through the sharding manager's aggregation channel and out of
/// the gateway facade as a single merged stream.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// A shard completed its handshake (fresh identify or resume).
    ShardReady { shard_id: u16 },
    /// A shard was explicitly disconnected and will not reconnect.
    ShardDisconnect { shard_id: u16 },
    /// A shard's socket closed; `code` decides whether a reconnect follows.
    ShardClose {
        shard_id: u16,
        code: u16,
        reason: String,
    },
    /// A shard hit a recoverable error (transport, protocol, compression).
    ShardError { shard_id: u16, message: String },
    /// Advisory condition, e.g. resuming without a known resume URL.
    ShardWarn { shard_id: u16, message: String },
    /// A raw dispatch forwarded without interpretation.
    Dispatch {
        shard_id: u16,
        name: String,
        payload: Value,
    },
    /// Every registered shard reached the ready state. Emitted exactly once
    /// per bring-up, strictly after the last individual `ShardReady`.
    Ready,
}

impl GatewayEvent {
    /// The shard an event originated from, if any.
    pub fn shard_id(&self) -> Option<u16> {
        match self {
            GatewayEvent::ShardReady { shard_id }
            | GatewayEvent::ShardDisconnect { shard_id }
            | GatewayEvent::ShardClose { shard_id, .. }
            | GatewayEvent::ShardError { shard_id, .. }
            | GatewayEvent::ShardWarn { shard_id, .. }
            | GatewayEvent::Dispatch { shard_id, .. } => Some(*shard_id),
            GatewayEvent::Ready => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_id_accessor() {
        let ev = GatewayEvent::ShardClose {
            shard_id: 3,
            code: 4008,
            reason: "rate limited".into(),
        };
        assert_eq!(ev.shard_id(), Some(3));
        assert_eq!(GatewayEvent::Ready.shard_id(), None);
    }
}
