use crate::backend::{Backend, Decision, RateLimitResult};
use crate::policy::RateLimitPolicy;
use actix_web::rt::task::JoinHandle;
use actix_web::rt::time::Instant;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_GC_INTERVAL_SECONDS: u64 = 60 * 10;

/// A fixed window rate limiter [Backend] that uses [Dashmap](dashmap::DashMap) to store keys
/// in memory.
///
/// Counters are local to the process; several instances behind a load balancer each enforce
/// their own quota.
#[derive(Clone)]
pub struct InMemoryBackend {
    map: Arc<DashMap<String, Value>>,
    gc_handle: Option<Arc<GcHandle>>,
}

struct Value {
    reset: Instant,
    count: u64,
}

// Aborts the collector once the last clone of the backend goes away.
struct GcHandle(JoinHandle<()>);

impl Drop for GcHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl InMemoryBackend {
    pub fn builder() -> InMemoryBackendBuilder {
        InMemoryBackendBuilder {
            gc_interval: Some(Duration::from_secs(DEFAULT_GC_INTERVAL_SECONDS)),
        }
    }

    /// Removes every expired window, returning how many were removed.
    ///
    /// An expired window behaves exactly like a missing one, so this only reclaims memory.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.map.retain(|_k, v| {
            let live = v.reset > now;
            if !live {
                removed += 1;
            }
            live
        });
        removed
    }

    /// Number of keys currently held, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn garbage_collector(backend: InMemoryBackend, interval: Duration) -> JoinHandle<()> {
        assert!(
            interval.as_secs_f64() > 0f64,
            "GC interval must be non-zero"
        );
        actix_web::rt::spawn(async move {
            loop {
                let now = Instant::now();
                let removed = backend.sweep();
                if removed > 0 {
                    log::trace!("Rate limit sweep removed {removed} expired keys");
                }
                actix_web::rt::time::sleep_until(now + interval).await;
            }
        })
    }
}

impl Backend for InMemoryBackend {
    fn check(&self, key: &str, policy: &RateLimitPolicy) -> RateLimitResult {
        debug_assert!(!key.is_empty(), "Rate limit key must not be empty");
        debug_assert!(policy.max_requests() > 0, "Rate limit policy must admit requests");
        let max_requests = policy.max_requests();
        let now = Instant::now();
        // The entry guard holds the shard lock, so the read-modify-write below is atomic per key.
        let mut entry = self.map.entry(key.to_owned()).or_insert_with(|| Value {
            // A new key starts out expired and is opened below.
            reset: now,
            count: 0,
        });
        let value = entry.value_mut();
        let allowed = if now >= value.reset {
            value.count = 1;
            value.reset = now
                .checked_add(policy.window())
                .expect("Window unexpectedly large");
            true
        } else if value.count < max_requests {
            value.count += 1;
            true
        } else {
            false
        };
        let remaining = if allowed {
            max_requests.saturating_sub(value.count)
        } else {
            0
        };
        RateLimitResult {
            decision: Decision::from_allowed(allowed),
            limit: max_requests,
            remaining,
            reset: value.reset,
        }
    }
}

pub struct InMemoryBackendBuilder {
    gc_interval: Option<Duration>,
}

impl InMemoryBackendBuilder {
    /// Override the default garbage collector interval.
    ///
    /// Set to None to disable garbage collection.
    ///
    /// The garbage collector periodically scans the internal map, removing expired windows.
    /// It is spawned onto the current actix runtime, so with it enabled [build](Self::build)
    /// must be called from within one.
    pub fn with_gc_interval(mut self, interval: Option<Duration>) -> Self {
        self.gc_interval = interval;
        self
    }

    pub fn build(self) -> InMemoryBackend {
        let mut backend = InMemoryBackend {
            map: Arc::new(DashMap::<String, Value>::new()),
            gc_handle: None,
        };
        if let Some(gc_interval) = self.gc_interval {
            // The collector holds a clone without a handle, so it never keeps itself alive.
            let handle = InMemoryBackend::garbage_collector(backend.clone(), gc_interval);
            backend.gc_handle = Some(Arc::new(GcHandle(handle)));
        }
        backend
    }
}
