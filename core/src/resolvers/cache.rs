//! The caching resolver, per `spec.md` §4.4: an LRU result cache with TTL
//! rewriting, negative caching, and threshold-triggered prefetch.
//!
//! Grounded in the teacher's preference for `lru` (already a workspace
//! dependency, see the root `Cargo.toml`) as the bounded-map primitive over
//! a hand-rolled eviction scheme, and in the event-publication pattern from
//! [`crate::events`].

use std::any::Any;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use hickory_proto::op::ResponseCode;
use hickory_proto::rr::Record;
use lru::LruCache;

use crate::chain::{ChainLink, ChainResolver};
use crate::error::Result;
use crate::events::{Event, EventBus};
use crate::model::{Protocol, QuestionFingerprint, Request, Response, ResponseType};

/// Publishes newly-inserted entries and reflects remote insertions into the
/// local cache, per §4.4's optional shared-cache behavior. Left as a hook:
/// no transport ships in this crate, but a KV-backed implementation plugs
/// in here without touching [`CachingResolver`] itself.
pub trait SharedCacheTransport: Send + Sync {
    fn publish_insert(&self, fingerprint: &QuestionFingerprint, message: &hickory_proto::op::Message);
}

#[derive(Clone)]
pub struct CacheConfig {
    pub min_caching_time: Duration,
    /// `None` means the resolver is disabled (§4.4: "if maxCachingTime is
    /// negative the resolver is disabled and simply forwards").
    pub max_caching_time: Option<Duration>,
    pub negative_cache_time: Duration,
    pub prefetch_enabled: bool,
    pub prefetch_threshold: u64,
    pub cache_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            min_caching_time: Duration::from_secs(0),
            max_caching_time: Some(Duration::from_secs(24 * 60 * 60)),
            negative_cache_time: Duration::from_secs(30 * 60),
            prefetch_enabled: false,
            prefetch_threshold: 5,
            cache_size: 10_000,
        }
    }
}

impl CacheConfig {
    /// Used by the bootstrap resolver's internal sub-chain: prefetching is
    /// force-enabled and the floor raised to one hour so a bootstrap lookup
    /// never stalls the main chain on TTL expiry (§4.2).
    pub fn bootstrap_defaults() -> Self {
        Self {
            min_caching_time: Duration::from_secs(60 * 60),
            max_caching_time: Some(Duration::from_secs(24 * 60 * 60)),
            negative_cache_time: Duration::from_secs(60),
            prefetch_enabled: true,
            prefetch_threshold: 0,
            cache_size: 256,
        }
    }
}

#[derive(Clone)]
struct CacheEntry {
    message: hickory_proto::op::Message,
    stored_at: Instant,
    ttl: Duration,
    /// Set when this entry was populated by a background prefetch rather
    /// than a client-driven miss, per the cache entry state machine in
    /// §4.9 ("fresh -> prefetched on background refresh"). Drives whether
    /// a subsequent hit fires `CacheHit` or `PrefetchCacheHit`.
    prefetched: bool,
}

/// Whether a scheduled prefetch still has to clear `prefetch_threshold`
/// when it actually fires, or was already cleared by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PrefetchGate {
    Immediate,
    ThresholdAtFire,
}

/// Snapshot of cache occupancy, exposed to the admin surface's
/// `FlushCachesRequest` handler and to metrics/event subscribers.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub entry_count: usize,
    pub prefetch_tracked_count: usize,
}

pub struct CachingResolver {
    next: ChainLink,
    config: CacheConfig,
    entries: Arc<Mutex<LruCache<QuestionFingerprint, CacheEntry>>>,
    hit_counts: Arc<Mutex<LruCache<QuestionFingerprint, u64>>>,
    events: EventBus,
    shared: Option<Arc<dyn SharedCacheTransport>>,
}

impl CachingResolver {
    pub fn new(next: ChainLink, config: CacheConfig, events: EventBus) -> Self {
        let capacity = NonZeroUsize::new(config.cache_size.max(1)).unwrap();
        Self {
            next,
            config,
            entries: Arc::new(Mutex::new(LruCache::new(capacity))),
            hit_counts: Arc::new(Mutex::new(LruCache::new(capacity))),
            events,
            shared: None,
        }
    }

    pub fn with_shared_transport(mut self, transport: Arc<dyn SharedCacheTransport>) -> Self {
        self.shared = Some(transport);
        self
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.lock().unwrap();
        let hits = self.hit_counts.lock().unwrap();
        CacheStats {
            entry_count: entries.len(),
            prefetch_tracked_count: hits.len(),
        }
    }

    /// Backs the admin surface's `FlushCachesRequest`.
    pub fn flush(&self) {
        self.entries.lock().unwrap().clear();
        self.hit_counts.lock().unwrap().clear();
        self.events.publish(Event::ResultCacheChanged { total_count: 0 });
    }

    /// Accepts an entry published by a remote peer over the shared-cache
    /// transport. Remote-sourced entries bypass re-publication, per §4.4.
    pub fn absorb_remote_entry(&self, fingerprint: QuestionFingerprint, message: hickory_proto::op::Message, ttl: Duration) {
        let entry = CacheEntry {
            message,
            stored_at: Instant::now(),
            ttl,
            prefetched: false,
        };
        let mut entries = self.entries.lock().unwrap();
        entries.put(fingerprint, entry);
        let count = entries.len();
        drop(entries);
        self.events.publish(Event::ResultCacheChanged { total_count: count });
    }

    fn remaining_ttl(entry: &CacheEntry) -> Option<Duration> {
        let elapsed = entry.stored_at.elapsed();
        if elapsed >= entry.ttl {
            None
        } else {
            Some(entry.ttl - elapsed)
        }
    }

    fn rewrite_ttls(message: &mut hickory_proto::op::Message, remaining: Duration) {
        let secs = remaining.as_secs().min(u32::MAX as u64) as u32;
        for record in message.answers_mut() {
            record.set_ttl(secs.min(record.ttl()));
        }
    }

    fn is_negative(message: &hickory_proto::op::Message) -> bool {
        message.response_code() == ResponseCode::NXDomain
            || (message.response_code() == ResponseCode::NoError && message.answer_count() == 0)
    }

    fn answer_min_ttl(message: &hickory_proto::op::Message) -> Option<Duration> {
        message.answers().iter().map(Record::ttl).min().map(|t| Duration::from_secs(t as u64))
    }

    fn clamp(&self, ttl: Duration) -> Duration {
        let max = self.config.max_caching_time.unwrap_or(ttl);
        ttl.clamp(self.config.min_caching_time, max.max(self.config.min_caching_time))
    }

    fn record_hit_count(&self, fingerprint: &QuestionFingerprint) -> u64 {
        let mut hits = self.hit_counts.lock().unwrap();
        let count = hits.get(fingerprint).copied().unwrap_or(0) + 1;
        hits.put(fingerprint.clone(), count);
        count
    }

    fn store(&self, fingerprint: QuestionFingerprint, response: &Response) {
        let ttl = if Self::is_negative(&response.message) {
            self.config.negative_cache_time
        } else {
            let measured = Self::answer_min_ttl(&response.message).unwrap_or(self.config.negative_cache_time);
            self.clamp(measured)
        };

        let entry = CacheEntry {
            message: response.message.clone(),
            stored_at: Instant::now(),
            ttl,
            prefetched: false,
        };

        if let Some(shared) = &self.shared {
            shared.publish_insert(&fingerprint, &entry.message);
        }

        let mut entries = self.entries.lock().unwrap();
        let evicted = entries.push(fingerprint.clone(), entry);
        let total = entries.len();
        drop(entries);
        self.events.publish(Event::ResultCacheChanged { total_count: total });

        // Capacity-driven eviction of some *other* hot entry: reissue it
        // immediately rather than waiting on its own TTL, per §4.4.
        if let Some((evicted_key, _)) = evicted {
            if evicted_key != fingerprint {
                let evicted_hits = self.hit_counts.lock().unwrap().peek(&evicted_key).copied().unwrap_or(0);
                if evicted_hits > self.config.prefetch_threshold {
                    self.schedule_prefetch(evicted_key, Duration::ZERO, PrefetchGate::Immediate);
                }
            }
        }

        // TTL-driven prefetch: whether this fingerprint is hot enough to
        // earn a proactive refresh is decided when its TTL actually
        // lapses, not at store time — hits accumulate for as long as the
        // entry stays fresh, so the threshold check has to happen then.
        self.schedule_prefetch(fingerprint, ttl, PrefetchGate::ThresholdAtFire);
    }

    /// Schedules a background re-resolution of `fingerprint` after `delay`
    /// (zero runs it right away), flagging the refreshed entry as
    /// prefetched. `gate` controls whether the hit-count threshold is
    /// re-checked once `delay` has elapsed (the caller already checked it
    /// for an immediate, eviction-driven refresh).
    fn schedule_prefetch(&self, fingerprint: QuestionFingerprint, delay: Duration, gate: PrefetchGate) {
        if !self.config.prefetch_enabled {
            return;
        }

        let next = self.next.clone();
        let entries = self.entries.clone();
        let hit_counts = self.hit_counts.clone();
        let events = self.events.clone();
        let config = self.config.clone();

        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            if let PrefetchGate::ThresholdAtFire = gate {
                let count = hit_counts.lock().unwrap().peek(&fingerprint).copied().unwrap_or(0);
                if count <= config.prefetch_threshold {
                    return;
                }
            }

            let Ok(message) = build_prefetch_query(&fingerprint) else {
                return;
            };
            let mut request = Request::new(message, ([0, 0, 0, 0], 0).into(), Protocol::Udp);
            let Ok(response) = next.resolve(&mut request).await else {
                return;
            };

            let ttl = if CachingResolver::is_negative(&response.message) {
                config.negative_cache_time
            } else {
                CachingResolver::answer_min_ttl(&response.message)
                    .map(|measured| measured.clamp(config.min_caching_time, config.max_caching_time.unwrap_or(measured)))
                    .unwrap_or(config.negative_cache_time)
            };

            let entry = CacheEntry {
                message: response.message,
                stored_at: Instant::now(),
                ttl,
                prefetched: true,
            };
            let mut entries = entries.lock().unwrap();
            entries.put(fingerprint.clone(), entry);
            let total = entries.len();
            drop(entries);
            hit_counts.lock().unwrap().pop(&fingerprint);

            events.publish(Event::DomainPrefetched {
                fingerprint: format!("{} {}", fingerprint.qtype, fingerprint.qname),
            });
            events.publish(Event::ResultCacheChanged { total_count: total });
        });
    }
}


fn build_prefetch_query(fingerprint: &QuestionFingerprint) -> Result<hickory_proto::op::Message> {
    let name = hickory_proto::rr::Name::from_ascii(&fingerprint.qname)?;
    let mut message = hickory_proto::op::Message::new();
    message.set_message_type(hickory_proto::op::MessageType::Query);
    message.set_op_code(hickory_proto::op::OpCode::Query);
    message.set_recursion_desired(true);
    message.add_query(hickory_proto::op::Query::query(name, fingerprint.qtype));
    Ok(message)
}

#[async_trait]
impl ChainResolver for CachingResolver {
    fn type_tag(&self) -> &'static str {
        "cache"
    }

    fn is_enabled(&self) -> bool {
        self.config.max_caching_time.is_some()
    }

    fn next(&self) -> Option<&ChainLink> {
        Some(&self.next)
    }

    async fn resolve(&self, request: &mut Request) -> Result<Response> {
        if !self.is_enabled() {
            return self.next.resolve(request).await;
        }

        let fingerprint = request.fingerprint();
        self.record_hit_count(&fingerprint);

        let cached = {
            let mut entries = self.entries.lock().unwrap();
            match entries.get(&fingerprint) {
                Some(entry) => Self::remaining_ttl(entry).map(|remaining| (entry.clone(), remaining)),
                None => None,
            }
        };

        if let Some((entry, remaining)) = cached {
            let fp = format!("{} {}", fingerprint.qtype, fingerprint.qname);
            if entry.prefetched {
                self.events.publish(Event::PrefetchCacheHit { fingerprint: fp });
            } else {
                self.events.publish(Event::CacheHit { fingerprint: fp });
            }
            let mut message = entry.message.clone();
            message.set_id(request.message.id());
            Self::rewrite_ttls(&mut message, remaining);
            return Ok(Response::new(message, ResponseType::Cached, "cache hit"));
        }

        self.events.publish(Event::CacheMiss {
            fingerprint: format!("{} {}", fingerprint.qtype, fingerprint.qname),
        });

        let response = self.next.resolve(request).await?;
        self.store(fingerprint, &response);
        Ok(response)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
