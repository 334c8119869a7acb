//! Component M — Server Pool.
//!
//! Multiplexes a small number of live [`LmcppServer`] processes behind a
//! single handle, keyed by a fingerprint of the *model-identifying* subset of
//! the [`ServerArgs`] that would otherwise produce identical servers:
//! `(model source, backend, context size, mode, pooling)`. Every other field
//! (parallelism, flash-attn, cache-type, …) is honored only the first time a
//! fingerprint is started — later callers requesting the same fingerprint
//! with different knobs still get the server that's already running, the
//! same "fingerprint owns the process" rule `server::toolchain::recipe` uses
//! for `fingerprint_matches`.
//!
//! Built directly on top of [`LmcppServerLauncher`] — the pool doesn't know
//! how to spawn a server any more than `LmcppServerLauncher` knows how to
//! pool one.

use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use serde::Serialize;

use crate::{
    LmcppServer,
    error::{LmcppError, LmcppResult},
    server::{builder::LmcppServerLauncher, types::start_args::ServerArgs},
};

pub type Fingerprint = u64;

/// The narrow slice of [`ServerArgs`] that the pool's identity is derived
/// from. Anything not named here doesn't participate — two requests
/// differing only in, say, `flash_attn` fingerprint identically and share one
/// process.
#[derive(Serialize)]
struct FingerprintKey {
    model: String,
    backend: Option<String>,
    ctx_size: Option<u64>,
    mode: crate::server::types::start_args::ServerMode,
    pooling: Option<String>,
}

struct PoolSlot {
    fingerprint: Fingerprint,
    server: Arc<LmcppServer>,
    model_desc: String,
    start_time: Instant,
    last_used: Mutex<Instant>,
    lease_count: AtomicUsize,
}

/// Borrowed handle to a pooled server. Exactly-once release on `Drop`:
/// decrements the slot's lease count and stamps `last_used` so the cleanup
/// pass can find genuinely idle slots.
pub struct Lease {
    server: Arc<LmcppServer>,
    slot: Arc<PoolSlot>,
}

impl Lease {
    pub fn server(&self) -> &LmcppServer {
        &self.server
    }
}

impl std::ops::Deref for Lease {
    type Target = LmcppServer;
    fn deref(&self) -> &Self::Target {
        &self.server
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.slot.lease_count.fetch_sub(1, Ordering::AcqRel);
        *self.slot.last_used.lock().unwrap() = Instant::now();
    }
}

/// Snapshot entry for [`ServerPool::status`].
#[derive(Debug, Clone)]
pub struct PoolEntry {
    pub fingerprint: Fingerprint,
    pub model: String,
    pub in_use: bool,
    pub last_used: Instant,
    pub pid: u32,
}

/// Snapshot returned by [`ServerPool::status`]. Not kept live — a new call
/// re-derives it from the current slot table.
#[derive(Debug, Clone)]
pub struct PoolStatus {
    pub total: usize,
    pub active: usize,
    pub idle: usize,
    pub entries: Vec<PoolEntry>,
}

/// Bounded set of servers sharing one [`LmcppServerLauncher`] template
/// (toolchain, budgets). Each distinct fingerprint gets its own process, up
/// to `max_servers`; beyond that, the least-recently-used idle server is
/// stopped to make room.
pub struct ServerPool {
    max_servers: usize,
    idle_timeout: Duration,
    launcher: LmcppServerLauncher,
    slots: Mutex<Vec<Arc<PoolSlot>>>,
    create_lock: Mutex<()>,
}

impl ServerPool {
    pub const DEFAULT_MAX_SERVERS: usize = 3;
    pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(600);

    pub fn new(max_servers: usize, launcher: LmcppServerLauncher) -> Self {
        Self::with_idle_timeout(max_servers, Self::DEFAULT_IDLE_TIMEOUT, launcher)
    }

    pub fn with_idle_timeout(max_servers: usize, idle_timeout: Duration, launcher: LmcppServerLauncher) -> Self {
        assert!(max_servers > 0, "a server pool must allow at least one server");
        Self {
            max_servers,
            idle_timeout,
            launcher,
            slots: Mutex::new(Vec::new()),
            create_lock: Mutex::new(()),
        }
    }

    /// Hashes the model-identity fields of `server_args`; everything else
    /// (parallelism, flash-attn, cache-type, …) is excluded by construction.
    pub fn fingerprint(server_args: &ServerArgs) -> LmcppResult<Fingerprint> {
        let key = FingerprintKey {
            model: server_args.model_identity(),
            backend: server_args.backend.as_ref().map(|b| b.to_string()),
            ctx_size: server_args.ctx_size,
            mode: server_args.mode(),
            pooling: server_args.pooling.as_ref().map(|p| p.to_string()),
        };

        let json = serde_json::to_vec(&key).map_err(|e| LmcppError::InvalidConfig {
            field: "server_args",
            reason: e.to_string(),
        })?;

        let mut hasher = DefaultHasher::new();
        json.hash(&mut hasher);
        Ok(hasher.finish())
    }

    /// Returns a [`Lease`] on the server matching `server_args`'s
    /// fingerprint, spawning one if none is cached and evicting the oldest
    /// idle slot first if the pool is already at `max_servers`.
    pub fn acquire(&self, server_args: ServerArgs) -> LmcppResult<Lease> {
        let fingerprint = Self::fingerprint(&server_args)?;

        if let Some(lease) = self.try_lease_existing(fingerprint) {
            return Ok(lease);
        }

        // Slow path: nothing cached (or it vanished under us). Serialize
        // creation so two racing callers for the same fingerprint don't
        // start two servers.
        let _guard = self.create_lock.lock().unwrap();
        if let Some(lease) = self.try_lease_existing(fingerprint) {
            return Ok(lease);
        }

        self.make_room_for_one()?;

        let mut launcher = self.launcher.clone();
        launcher.server_args = server_args.clone();
        let server = Arc::new(launcher.load()?);
        let slot = Arc::new(PoolSlot {
            fingerprint,
            server: server.clone(),
            model_desc: server_args.model_identity(),
            start_time: Instant::now(),
            last_used: Mutex::new(Instant::now()),
            lease_count: AtomicUsize::new(1),
        });

        self.slots.lock().unwrap().push(slot.clone());
        Ok(Lease { server, slot })
    }

    fn try_lease_existing(&self, fingerprint: Fingerprint) -> Option<Lease> {
        let slots = self.slots.lock().unwrap();
        let slot = slots.iter().find(|s| s.fingerprint == fingerprint)?;
        slot.lease_count.fetch_add(1, Ordering::AcqRel);
        *slot.last_used.lock().unwrap() = Instant::now();
        Some(Lease {
            server: slot.server.clone(),
            slot: slot.clone(),
        })
    }

    /// Evicts the oldest idle slot if the pool is at capacity. Must be
    /// called with intent to insert immediately after — it only makes room,
    /// it doesn't reserve a spot.
    fn make_room_for_one(&self) -> LmcppResult<()> {
        let mut slots = self.slots.lock().unwrap();
        if slots.len() < self.max_servers {
            return Ok(());
        }

        let evict_at = slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.lease_count.load(Ordering::Acquire) == 0)
            .min_by_key(|(_, slot)| *slot.last_used.lock().unwrap())
            .map(|(i, _)| i)
            .ok_or(LmcppError::PoolExhausted {
                max_servers: self.max_servers,
            })?;

        let evicted = slots.remove(evict_at);
        crate::trace!(
            "server pool: evicting server for fingerprint {:016x} to make room",
            evicted.fingerprint
        );
        drop(slots);
        drop(evicted); // last Arc; LmcppServer::drop stops the process
        Ok(())
    }

    /// Periodic maintenance: evicts every slot that is both unleased and has
    /// been idle longer than `idle_timeout`, and any slot whose process has
    /// already exited. Intended to be called from a timer (see
    /// [`Self::spawn_cleanup_timer`]) but safe to call directly from tests.
    pub fn cleanup_idle(&self) {
        let mut slots = self.slots.lock().unwrap();
        slots.retain(|slot| {
            let leased = slot.lease_count.load(Ordering::Acquire) > 0;
            let dead = !slot.server.is_alive();
            let idle_for = slot.last_used.lock().unwrap().elapsed();
            let stale = !leased && idle_for > self.idle_timeout;
            let keep = leased || (!dead && !stale);
            if !keep {
                crate::trace!(
                    "server pool: cleanup evicting fingerprint {:016x} (dead={}, idle_for={:?})",
                    slot.fingerprint,
                    dead,
                    idle_for
                );
            }
            keep
        });
    }

    /// Spawns a detached thread that calls [`Self::cleanup_idle`] on
    /// `interval` until every other reference to the pool is dropped.
    pub fn spawn_cleanup_timer(self: &Arc<Self>, interval: Duration) {
        let weak = Arc::downgrade(self);
        std::thread::spawn(move || {
            loop {
                std::thread::sleep(interval);
                match weak.upgrade() {
                    Some(pool) => pool.cleanup_idle(),
                    None => break,
                }
            }
        });
    }

    /// Stops every pooled server with no outstanding lease, regardless of
    /// idle time — used for process-exit/`Ctrl-C` flushes. Best-effort
    /// synchronous: a caller still holding a [`Lease`] keeps its server.
    pub fn shutdown_idle(&self) {
        let mut slots = self.slots.lock().unwrap();
        slots.retain(|slot| slot.lease_count.load(Ordering::Acquire) > 0);
    }

    /// Snapshot of pool occupancy for diagnostics/status CLI output.
    pub fn status(&self) -> PoolStatus {
        let slots = self.slots.lock().unwrap();
        let entries: Vec<PoolEntry> = slots
            .iter()
            .map(|slot| PoolEntry {
                fingerprint: slot.fingerprint,
                model: slot.model_desc.clone(),
                in_use: slot.lease_count.load(Ordering::Acquire) > 0,
                last_used: *slot.last_used.lock().unwrap(),
                pid: slot.server.pid(),
            })
            .collect();
        let active = entries.iter().filter(|e| e.in_use).count();
        PoolStatus {
            total: entries.len(),
            active,
            idle: entries.len() - active,
            entries,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start time of the slot for `fingerprint`, for tests that need to
    /// assert the *same* process survived an acquire/release/acquire cycle.
    #[cfg(test)]
    fn start_time_of(&self, fingerprint: Fingerprint) -> Option<Instant> {
        self.slots
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.fingerprint == fingerprint)
            .map(|s| s.start_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_ignores_host_and_port() {
        let a = ServerArgs::builder().hf_repo("bartowski/gemma-GGUF").unwrap().build();
        let mut b = a.clone();
        b.host = Some("127.0.0.1".to_string());
        b.port = Some(8089);

        assert_eq!(
            ServerPool::fingerprint(&a).unwrap(),
            ServerPool::fingerprint(&b).unwrap()
        );
    }

    #[test]
    fn fingerprint_ignores_non_identity_fields() {
        let a = ServerArgs::builder().hf_repo("bartowski/gemma-GGUF").unwrap().build();
        let mut b = a.clone();
        b.flash_attn = true;

        assert_eq!(
            ServerPool::fingerprint(&a).unwrap(),
            ServerPool::fingerprint(&b).unwrap(),
            "non-identity fields must not affect the fingerprint"
        );
    }

    #[test]
    fn fingerprint_differs_on_model_source() {
        let a = ServerArgs::builder().hf_repo("bartowski/gemma-GGUF").unwrap().build();
        let b = ServerArgs::builder().hf_repo("bartowski/mixtral-GGUF").unwrap().build();

        assert_ne!(
            ServerPool::fingerprint(&a).unwrap(),
            ServerPool::fingerprint(&b).unwrap()
        );
    }

    #[test]
    fn fingerprint_differs_on_ctx_size_and_mode() {
        let base = ServerArgs::builder().hf_repo("bartowski/gemma-GGUF").unwrap().build();
        let mut ctx = base.clone();
        ctx.ctx_size = Some(4096);
        let mut emb = base.clone();
        emb.embeddings_only = true;

        assert_ne!(ServerPool::fingerprint(&base).unwrap(), ServerPool::fingerprint(&ctx).unwrap());
        assert_ne!(ServerPool::fingerprint(&base).unwrap(), ServerPool::fingerprint(&emb).unwrap());
    }

    /// Property 6: two requests for the same model/ctx/mode/pooling but
    /// different backends must never collide onto the same fingerprint — a
    /// `cuda12` server and a `cpu` server are not interchangeable even if
    /// every other field matches.
    #[test]
    fn fingerprint_differs_on_backend() {
        use runtime_devices::devices::backend::BackendTag;

        let base = ServerArgs::builder().hf_repo("bartowski/gemma-GGUF").unwrap().build();
        let mut cuda = base.clone();
        cuda.backend = Some(BackendTag::Cuda12);
        let mut cpu = base.clone();
        cpu.backend = Some(BackendTag::Cpu);

        assert_ne!(ServerPool::fingerprint(&base).unwrap(), ServerPool::fingerprint(&cuda).unwrap());
        assert_ne!(ServerPool::fingerprint(&cuda).unwrap(), ServerPool::fingerprint(&cpu).unwrap());
    }

    #[test]
    fn new_pool_starts_empty() {
        let pool = ServerPool::new(4, LmcppServerLauncher::default());
        assert!(pool.is_empty());
        assert_eq!(pool.status().total, 0);
    }

    /// E4-style scenario: leasing the same fingerprint twice reuses the same
    /// underlying process, and releasing one lease doesn't tear it down while
    /// the other is still held.
    #[test]
    fn leasing_same_fingerprint_twice_reuses_process() {
        let pool = ServerPool::new(4, LmcppServerLauncher::default());
        let fingerprint = 42;
        let slot = Arc::new(PoolSlot {
            fingerprint,
            server: Arc::new(LmcppServer::dummy()),
            model_desc: "dummy".into(),
            start_time: Instant::now(),
            last_used: Mutex::new(Instant::now()),
            lease_count: AtomicUsize::new(0),
        });
        pool.slots.lock().unwrap().push(slot);

        let first = pool.start_time_of(fingerprint).unwrap();
        let lease_a = pool.try_lease_existing(fingerprint).unwrap();
        let lease_b = pool.try_lease_existing(fingerprint).unwrap();
        assert_eq!(pool.start_time_of(fingerprint).unwrap(), first);

        drop(lease_a);
        // still leased by lease_b, so the slot must survive a cleanup pass.
        pool.cleanup_idle();
        assert_eq!(pool.len(), 1);

        drop(lease_b);
        assert_eq!(pool.start_time_of(fingerprint).unwrap(), first);
    }
}
