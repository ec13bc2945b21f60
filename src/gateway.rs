use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{Duration, Instant};
use tracing::debug;

use crate::config::GatewayConfig;
use crate::events::GatewayEvent;
use crate::manager::ShardingManager;
use crate::rest::{GatewayMetadata, HttpMetadataProvider, MetadataProvider};
use crate::shard::ShardHandle;

/// Cache TTL applied when the metadata carries no usable reset window.
const FALLBACK_METADATA_TTL: Duration = Duration::from_secs(10);

struct CachedMetadata {
    metadata: GatewayMetadata,
    expires_at: Instant,
}

impl CachedMetadata {
    fn fresh(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Entry point tying metadata fetching, shard bring-up, and the merged event
/// stream together.
///
/// Connection metadata is fetched lazily and cached until the identify budget
/// window resets, so repeated connects and metadata queries inside one window
/// cost a single HTTP round trip.
pub struct Gateway<P: MetadataProvider = HttpMetadataProvider> {
    provider: P,
    manager: ShardingManager,
    events: Mutex<mpsc::UnboundedReceiver<GatewayEvent>>,
    metadata: RwLock<Option<CachedMetadata>>,
    /// Serializes cache misses so concurrent callers share one fetch.
    fetch_lock: Mutex<()>,
}

impl Gateway<HttpMetadataProvider> {
    /// Build a gateway backed by the HTTP metadata endpoint, authenticated
    /// with the configured token.
    pub fn new(config: GatewayConfig) -> Gateway<HttpMetadataProvider> {
        let provider = HttpMetadataProvider::new(config.token.clone());
        Gateway::with_provider(config, provider)
    }
}

impl<P: MetadataProvider> Gateway<P> {
    /// Build a gateway with a custom metadata provider.
    pub fn with_provider(config: GatewayConfig, provider: P) -> Gateway<P> {
        let (manager, events) = ShardingManager::new(Arc::new(config));
        Gateway {
            provider,
            manager,
            events: Mutex::new(events),
            metadata: RwLock::new(None),
            fetch_lock: Mutex::new(()),
        }
    }

    /// Connection metadata, from cache while it is fresh.
    ///
    /// A fetch failure leaves any previously cached (but expired) value
    /// untouched and surfaces the error; nothing downstream runs on partial
    /// data.
    pub async fn metadata(&self) -> crate::Result<GatewayMetadata> {
        if let Some(metadata) = self.cached() {
            return Ok(metadata);
        }

        // Single flight: callers that raced on a stale cache queue here and
        // pick up the winner's result instead of fetching again.
        let _flight = self.fetch_lock.lock().await;
        if let Some(metadata) = self.cached() {
            return Ok(metadata);
        }

        let metadata = self.provider.fetch_gateway_metadata().await?;
        let ttl = match metadata.session_start_limit.reset_after {
            0 => FALLBACK_METADATA_TTL,
            ms => Duration::from_millis(ms),
        };
        debug!("caching gateway metadata for {ttl:?}");
        *self.metadata.write() = Some(CachedMetadata {
            metadata: metadata.clone(),
            expires_at: Instant::now() + ttl,
        });
        Ok(metadata)
    }

    fn cached(&self) -> Option<GatewayMetadata> {
        self.metadata
            .read()
            .as_ref()
            .filter(|cached| cached.fresh())
            .map(|cached| cached.metadata.clone())
    }

    /// Server-recommended shard count from the current metadata.
    pub async fn recommended_shards(&self) -> crate::Result<u16> {
        Ok(self.metadata().await?.shards)
    }

    /// Fetch metadata and bring up every configured shard.
    ///
    /// Safe to call again after adding shard capacity; already-running shards
    /// are left alone. Returns the shard IDs spawned by this call.
    pub async fn connect(&self) -> crate::Result<Vec<u16>> {
        let metadata = self.metadata().await?;
        Ok(self.manager.spawn_shards(&metadata).await)
    }

    /// Next event from the merged stream. `None` once every shard has stopped
    /// and the stream has drained.
    pub async fn next_event(&self) -> Option<GatewayEvent> {
        self.events.lock().await.recv().await
    }

    pub fn shard(&self, id: u16) -> Option<ShardHandle> {
        self.manager.shard(id)
    }

    pub fn shards(&self) -> Vec<ShardHandle> {
        self.manager.shards()
    }

    pub fn shard_count(&self) -> usize {
        self.manager.len()
    }

    /// Mean heartbeat latency across shards that have measured one.
    pub fn average_latency(&self) -> Option<std::time::Duration> {
        self.manager.average_latency()
    }

    /// Disconnect every shard; none will reconnect.
    pub async fn disconnect(&self) -> crate::Result<()> {
        self.manager.disconnect_all().await
    }

    /// Drop every shard's socket and re-run their connect procedures.
    pub async fn reconnect_all(&self) -> crate::Result<()> {
        self.manager.reconnect_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShardCount;
    use crate::error::{Error, ErrorKind};
    use crate::rest::SessionStartLimit;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone)]
    struct StubProvider {
        calls: Arc<AtomicUsize>,
        reset_after: u64,
        fail: bool,
    }

    impl StubProvider {
        fn new(reset_after: u64) -> StubProvider {
            StubProvider {
                calls: Arc::new(AtomicUsize::new(0)),
                reset_after,
                fail: false,
            }
        }

        fn failing() -> StubProvider {
            StubProvider {
                calls: Arc::new(AtomicUsize::new(0)),
                reset_after: 0,
                fail: true,
            }
        }
    }

    fn sample_metadata(reset_after: u64) -> GatewayMetadata {
        GatewayMetadata {
            url: "ws://127.0.0.1:1".to_string(),
            shards: 1,
            session_start_limit: SessionStartLimit {
                total: 1000,
                remaining: 999,
                reset_after,
                max_concurrency: 16,
            },
        }
    }

    impl MetadataProvider for StubProvider {
        async fn fetch_gateway_metadata(&self) -> crate::Result<GatewayMetadata> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::MetadataFetch("boom".to_string()));
            }
            Ok(sample_metadata(self.reset_after))
        }
    }

    struct SlowProvider {
        calls: Arc<AtomicUsize>,
    }

    impl MetadataProvider for SlowProvider {
        async fn fetch_gateway_metadata(&self) -> crate::Result<GatewayMetadata> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(sample_metadata(60_000))
        }
    }

    fn config() -> GatewayConfig {
        GatewayConfig::builder("t")
            .shard_count(ShardCount::Exact(1))
            .reconnect_attempts(Some(0))
            .build()
            .expect("valid config")
    }

    #[tokio::test(start_paused = true)]
    async fn test_metadata_cached_until_reset_window() {
        let provider = StubProvider::new(60_000);
        let calls = provider.calls.clone();
        let gateway = Gateway::with_provider(config(), provider);

        gateway.metadata().await.expect("first fetch");
        gateway.metadata().await.expect("cache hit");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_millis(60_001)).await;
        gateway.metadata().await.expect("refetch");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_metadata_fallback_ttl_without_reset_window() {
        let provider = StubProvider::new(0);
        let calls = provider.calls.clone();
        let gateway = Gateway::with_provider(config(), provider);

        gateway.metadata().await.expect("first fetch");
        tokio::time::advance(Duration::from_secs(5)).await;
        gateway.metadata().await.expect("still cached");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(6)).await;
        gateway.metadata().await.expect("refetch");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_fetch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let gateway = Gateway::with_provider(
            config(),
            SlowProvider {
                calls: calls.clone(),
            },
        );

        // Both callers race on a cold cache; the loser waits for the winner's
        // fetch instead of issuing its own.
        let (a, b) = tokio::join!(gateway.metadata(), gateway.metadata());
        assert_eq!(a.expect("first caller").url, "ws://127.0.0.1:1");
        assert_eq!(b.expect("second caller").url, "ws://127.0.0.1:1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_blocks_bring_up() {
        let gateway = Gateway::with_provider(config(), StubProvider::failing());
        let err = gateway.connect().await.expect_err("fetch fails");
        assert_eq!(err.kind(), ErrorKind::MetadataFetch);
        assert_eq!(gateway.shard_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_registers_shards_once() {
        let gateway = Gateway::with_provider(config(), StubProvider::new(60_000));

        let spawned = gateway.connect().await.expect("connect");
        assert_eq!(spawned, vec![0]);
        assert_eq!(gateway.shard_count(), 1);
        assert!(gateway.shard(0).is_some());
        assert!(gateway.shard(1).is_none());

        let spawned = gateway.connect().await.expect("reconnect call");
        assert!(spawned.is_empty());
        assert_eq!(gateway.shard_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_flow_through_facade() {
        let gateway = Gateway::with_provider(config(), StubProvider::new(60_000));
        gateway.connect().await.expect("connect");

        // The stub URL is unreachable, so the shard surfaces an error event.
        match gateway.next_event().await {
            Some(GatewayEvent::ShardError { shard_id, .. }) => assert_eq!(shard_id, 0),
            other => panic!("expected shard error event, got {other:?}"),
        }
    }
}
