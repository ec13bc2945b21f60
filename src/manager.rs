use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, info};

use crate::config::GatewayConfig;
use crate::events::GatewayEvent;
use crate::rest::GatewayMetadata;
use crate::shard::{self, ShardHandle};

/// Rolling window the identify budget applies to.
const IDENTIFY_WINDOW: Duration = Duration::from_millis(5000);

/// Delay between consecutive identify attempts for the given concurrency
/// allowance.
pub(crate) fn identify_spacing(max_concurrency: u32) -> Duration {
    IDENTIFY_WINDOW / max_concurrency.max(1)
}

/// Tracks which shards have reached ready, and whether the one-shot all-ready
/// notification has fired for the current bring-up.
#[derive(Debug, Default)]
struct ReadyTracker {
    expected: usize,
    ready: HashSet<u16>,
    fired: bool,
}

impl ReadyTracker {
    /// Record one shard event. Returns true when this event completes the set
    /// and the all-ready notification must follow it.
    fn observe(&mut self, event: &GatewayEvent) -> bool {
        match event {
            GatewayEvent::ShardReady { shard_id } => {
                self.ready.insert(*shard_id);
                if !self.fired && self.expected > 0 && self.ready.len() >= self.expected {
                    self.fired = true;
                    return true;
                }
            }
            GatewayEvent::ShardDisconnect { shard_id }
            | GatewayEvent::ShardClose { shard_id, .. } => {
                self.ready.remove(shard_id);
            }
            _ => {}
        }
        false
    }
}

/// Owns the shard registry and brings shards up within the identify budget.
///
/// Shards report into a private channel; an aggregation task forwards every
/// event to the consumer stream and appends the one-shot all-ready
/// notification immediately after the last individual ready.
pub struct ShardingManager {
    config: Arc<GatewayConfig>,
    shards: Arc<RwLock<BTreeMap<u16, ShardHandle>>>,
    ready: Arc<RwLock<ReadyTracker>>,
    shard_events: mpsc::UnboundedSender<GatewayEvent>,
}

impl ShardingManager {
    /// Create a manager and the consumer end of its merged event stream.
    pub fn new(
        config: Arc<GatewayConfig>,
    ) -> (ShardingManager, mpsc::UnboundedReceiver<GatewayEvent>) {
        let (shard_tx, shard_rx) = mpsc::unbounded_channel();
        let (consumer_tx, consumer_rx) = mpsc::unbounded_channel();
        let ready = Arc::new(RwLock::new(ReadyTracker::default()));

        tokio::spawn(aggregate(shard_rx, consumer_tx, ready.clone()));

        let manager = ShardingManager {
            config,
            shards: Arc::new(RwLock::new(BTreeMap::new())),
            ready,
            shard_events: shard_tx,
        };
        (manager, consumer_rx)
    }

    /// Bring up every configured shard, in increasing shard ID order, spaced
    /// by the identify allowance from the metadata.
    ///
    /// Already-registered shard IDs are skipped, so repeated calls are
    /// idempotent and never produce duplicate connections. Returns the IDs
    /// spawned by this pass.
    pub async fn spawn_shards(&self, metadata: &GatewayMetadata) -> Vec<u16> {
        let (total, ids) = self.config.shard_ids(metadata.shards);
        let spacing = identify_spacing(metadata.session_start_limit.max_concurrency);

        let pending: Vec<u16> = {
            let shards = self.shards.read();
            ids.filter(|id| !shards.contains_key(id)).collect()
        };
        if pending.is_empty() {
            debug!("all configured shards already registered");
            return pending;
        }
        debug!(
            "bringing up {} shards with {spacing:?} identify spacing \
             ({} identifies remaining in window)",
            pending.len(),
            metadata.session_start_limit.remaining
        );

        // Arm the all-ready tracker before the stagger starts, so shards that
        // become ready while later ones are still queued complete the set
        // the moment the last ready lands. A new pass re-arms the one-shot
        // notification.
        {
            let expected = self.shards.read().len() + pending.len();
            let mut tracker = self.ready.write();
            tracker.expected = expected;
            if tracker.ready.len() < expected {
                tracker.fired = false;
            }
        }

        for (i, id) in pending.iter().copied().enumerate() {
            if i > 0 {
                time::sleep(spacing).await;
            }
            let handle = shard::spawn(
                id,
                total,
                self.config.clone(),
                metadata.url.clone(),
                self.shard_events.clone(),
            );
            self.shards.write().insert(id, handle);
            info!("[SHARD-{id}] registered");
        }
        pending
    }

    pub fn shard(&self, id: u16) -> Option<ShardHandle> {
        self.shards.read().get(&id).cloned()
    }

    pub fn shards(&self) -> Vec<ShardHandle> {
        self.shards.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.shards.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.read().is_empty()
    }

    /// Mean heartbeat latency across shards that have measured one.
    pub fn average_latency(&self) -> Option<Duration> {
        let latencies: Vec<Duration> = self
            .shards
            .read()
            .values()
            .filter_map(ShardHandle::latency)
            .collect();
        if latencies.is_empty() {
            return None;
        }
        Some(latencies.iter().sum::<Duration>() / latencies.len() as u32)
    }

    /// Disconnect every shard. None of them will reconnect.
    pub async fn disconnect_all(&self) -> crate::Result<()> {
        for handle in self.shards() {
            handle.disconnect().await?;
        }
        Ok(())
    }

    /// Drop every shard's socket and re-run their connect procedures.
    pub async fn reconnect_all(&self) -> crate::Result<()> {
        for handle in self.shards() {
            handle.reconnect().await?;
        }
        Ok(())
    }
}

/// Forward shard events to the consumer, appending the one-shot all-ready
/// notification right after the ready that completes the set.
async fn aggregate(
    mut shard_rx: mpsc::UnboundedReceiver<GatewayEvent>,
    consumer_tx: mpsc::UnboundedSender<GatewayEvent>,
    ready: Arc<RwLock<ReadyTracker>>,
) {
    while let Some(event) = shard_rx.recv().await {
        let all_ready = ready.write().observe(&event);
        if consumer_tx.send(event).is_err() {
            return;
        }
        if all_ready {
            info!("all shards ready");
            let _ = consumer_tx.send(GatewayEvent::Ready);
        }
    }
}
