//! Package metadata cache.
//!
//! Two tiers:
//!
//! - **resolved**: keyed by `name@version` for a concrete version. A published
//!   version's metadata never changes, so these entries live for the whole
//!   process.
//! - **unresolved**: keyed by `name@spec` for ranges and dist-tags. `latest`
//!   moves, so these entries expire after the configured TTL. An
//!   insertion-ordered index lets the sweeper evict in O(expired) instead of
//!   scanning the map.

use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use unpkg_schema::ResolvedPackage;

fn cache_key(name: &str, spec: &str) -> String {
    format!("{name}@{spec}")
}

#[derive(Default)]
struct Unresolved {
    entries: HashMap<String, (Instant, ResolvedPackage)>,
    by_age: VecDeque<(Instant, String)>,
}

struct Inner {
    ttl: Duration,
    resolved: RwLock<HashMap<String, ResolvedPackage>>,
    unresolved: RwLock<Unresolved>,
}

impl Inner {
    fn sweep(&self) -> usize {
        let Some(cutoff) = Instant::now().checked_sub(self.ttl) else {
            return 0;
        };

        let mut guard = self.unresolved.write();
        let Unresolved { entries, by_age } = &mut *guard;

        let mut evicted = 0;
        while by_age.front().is_some_and(|(stamp, _)| *stamp < cutoff) {
            let Some((stamp, key)) = by_age.pop_front() else {
                break;
            };
            // A re-stored key has a newer stamp in the map; only its latest
            // index entry may evict it.
            if entries
                .get(&key)
                .is_some_and(|(stored, _)| *stored <= stamp)
            {
                entries.remove(&key);
                evicted += 1;
            }
        }
        evicted
    }
}

/// Memoizes registry lookups. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MetadataCache {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for MetadataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataCache")
            .field("ttl", &self.inner.ttl)
            .field("resolved", &self.inner.resolved.read().len())
            .field("unresolved", &self.inner.unresolved.read().entries.len())
            .finish()
    }
}

impl MetadataCache {
    /// Create an empty cache whose unresolved entries expire after `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                ttl,
                resolved: RwLock::new(HashMap::new()),
                unresolved: RwLock::new(Unresolved::default()),
            }),
        }
    }

    /// Find metadata for `name` at `spec`.
    ///
    /// The resolved tier is tried first, treating `spec` as if it were a
    /// concrete version, then the unresolved tier.
    pub fn lookup(&self, name: &str, spec: &str) -> Option<ResolvedPackage> {
        let key = cache_key(name, spec);

        if let Some(pkg) = self.inner.resolved.read().get(&key) {
            return Some(pkg.clone());
        }

        self.inner
            .unresolved
            .read()
            .entries
            .get(&key)
            .map(|(_, pkg)| pkg.clone())
    }

    /// Record a registry result under its concrete version and under every
    /// original spec that differs from it.
    pub fn store(&self, pkg: &ResolvedPackage, original_specs: &[&str]) {
        self.inner
            .resolved
            .write()
            .insert(cache_key(&pkg.name, &pkg.version), pkg.clone());

        let specs: Vec<&str> = original_specs
            .iter()
            .copied()
            .filter(|spec| pkg.version != *spec)
            .collect();
        if specs.is_empty() {
            return;
        }

        let now = Instant::now();
        let mut unresolved = self.inner.unresolved.write();
        for spec in specs {
            let key = cache_key(&pkg.name, spec);
            unresolved.entries.insert(key.clone(), (now, pkg.clone()));
            unresolved.by_age.push_back((now, key));
        }
    }

    /// Evict unresolved entries older than the TTL. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.inner.sweep()
    }

    /// Number of entries in the (resolved, unresolved) tiers.
    pub fn len(&self) -> (usize, usize) {
        (
            self.inner.resolved.read().len(),
            self.inner.unresolved.read().entries.len(),
        )
    }

    /// Whether both tiers are empty.
    pub fn is_empty(&self) -> bool {
        self.len() == (0, 0)
    }

    /// Run [`Self::sweep`] every `interval` on the current tokio runtime.
    ///
    /// Returns `None` when `interval` is zero (eviction disabled). The task
    /// holds only a weak reference, so it also ends once every clone of the
    /// cache is dropped.
    pub fn spawn_sweeper(&self, interval: Duration) -> Option<Sweeper> {
        if interval.is_zero() {
            return None;
        }

        let cache: Weak<Inner> = Arc::downgrade(&self.inner);
        let token = CancellationToken::new();
        let cancelled = token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(inner) = cache.upgrade() else { break };
                        let evicted = inner.sweep();
                        if evicted > 0 {
                            debug!(evicted, "Evicted expired metadata");
                        }
                    }
                }
            }
        });

        Some(Sweeper {
            token,
            handle: Some(handle),
        })
    }
}

/// Handle to the background eviction task. Dropping it stops the task.
#[derive(Debug)]
pub struct Sweeper {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Stop the task and wait for it to finish.
    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
