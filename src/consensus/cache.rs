//! Bounded TTL cache for consensus signals
//!
//! Evaluations are expensive (one LLM/API round-trip per source), so
//! callers polling faster than the signal horizon reuse the last fused
//! result until it ages out.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::consensus::aggregator::ConsensusSignal;
use crate::domain::Timeframe;

#[derive(Debug, Clone)]
struct CachedSignal {
    signal: ConsensusSignal,
    cached_at: DateTime<Utc>,
}

/// TTL-bounded `(pair, timeframe) -> ConsensusSignal` cache
pub struct SignalCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CachedSignal>>,
}

impl SignalCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            ttl: Duration::seconds(ttl_secs as i64),
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn cache_key(pair: &str, timeframe: &Timeframe) -> String {
        format!("{}:{}", pair, timeframe)
    }

    /// Return a clone of the cached signal while it is still fresh
    pub async fn get(&self, pair: &str, timeframe: &Timeframe) -> Option<ConsensusSignal> {
        let key = Self::cache_key(pair, timeframe);
        let entries = self.entries.read().await;
        let cached = entries.get(&key)?;
        let age = Utc::now() - cached.cached_at;
        if age < self.ttl {
            debug!(
                pair = %pair,
                timeframe = %timeframe,
                age_secs = age.num_seconds(),
                "reusing cached consensus signal"
            );
            Some(cached.signal.clone())
        } else {
            None
        }
    }

    pub async fn insert(&self, signal: ConsensusSignal) {
        let key = Self::cache_key(&signal.pair, &signal.timeframe);
        let mut entries = self.entries.write().await;
        entries.insert(
            key,
            CachedSignal {
                signal,
                cached_at: Utc::now(),
            },
        );
    }

    /// Drop every entry past its TTL
    pub async fn purge_expired(&self) {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, cached| now - cached.cached_at < self.ttl);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Direction;
    use chrono::Utc;
    use std::collections::HashMap as StdHashMap;

    fn make_signal(pair: &str) -> ConsensusSignal {
        ConsensusSignal {
            pair: pair.to_string(),
            timeframe: Timeframe::M15,
            direction: Direction::Long,
            confidence: 0.72,
            consensus_score: 0.75,
            active_sources: vec!["alpha".to_string()],
            failed_sources: vec![],
            source_models: StdHashMap::new(),
            rationale: "alpha: trend continuation".to_string(),
            generated_at: Utc::now(),
        }
    }

    #[test]
    fn test_fresh_signal_is_returned() {
        tokio_test::block_on(async {
            let cache = SignalCache::new(60);
            cache.insert(make_signal("BTC/USDT")).await;

            let hit = cache.get("BTC/USDT", &Timeframe::M15).await;
            assert!(hit.is_some());
            assert_eq!(hit.unwrap().direction, Direction::Long);

            assert!(cache.get("ETH/USDT", &Timeframe::M15).await.is_none());
            assert!(cache.get("BTC/USDT", &Timeframe::H1).await.is_none());
        });
    }

    #[test]
    fn test_zero_ttl_never_serves() {
        tokio_test::block_on(async {
            let cache = SignalCache::new(0);
            cache.insert(make_signal("BTC/USDT")).await;
            assert!(cache.get("BTC/USDT", &Timeframe::M15).await.is_none());
        });
    }

    #[test]
    fn test_purge_drops_stale_entries() {
        tokio_test::block_on(async {
            let cache = SignalCache::new(0);
            cache.insert(make_signal("BTC/USDT")).await;
            cache.insert(make_signal("ETH/USDT")).await;
            assert_eq!(cache.len().await, 2);

            cache.purge_expired().await;
            assert_eq!(cache.len().await, 0);
        });
    }
}
