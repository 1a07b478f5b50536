//! Background expiry sweep.
//!
//! Sessions expire and lockouts clear lazily on the read path; the sweep is
//! the safety net for entities nobody reads. Each pass scans current
//! versions, writes the overdue ones forward, and shrugs off CAS losses (a
//! racing reader doing the same work is fine).

use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use serde_json::{Value as JsonValue, json};
use tracing::{debug, info, warn};

use idvault_audit::{Actor, Severity};
use idvault_core::{Clock, CoreError, CoreResult};
use idvault_policy::PolicyEngine;
use idvault_ratelimit::RateLimiter;
use idvault_store::{AuditSpec, EntityKind, EntityStore, VersionStore};

use crate::credential::attr as credential_attr;
use crate::session::{SessionRecord, SessionStatus, session_key};

/// Actor name stamped on sweep-written versions.
const SWEEP_ACTOR: &str = "sweeper";

/// Sweep loop configuration.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// How often to run a pass.
    pub poll_interval: StdDuration,
    /// Thread name for logging.
    pub name: String,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            poll_interval: StdDuration::from_secs(60),
            name: "idvault-sweep".to_string(),
        }
    }
}

impl SweepConfig {
    pub fn with_poll_interval(mut self, poll_interval: StdDuration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Counters accumulated across passes.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SweepStats {
    pub passes: u64,
    pub sessions_expired: u64,
    pub lockouts_cleared: u64,
    pub rate_buckets_pruned: u64,
    /// CAS losses to concurrent writers; the work was done by someone else.
    pub skipped_conflicts: u64,
    pub errors: u64,
}

/// Handle to control a running sweep thread.
#[derive(Debug)]
pub struct SweepHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<SweepStats>>,
}

impl SweepHandle {
    /// Request graceful shutdown and wait for the thread.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }

    pub fn stats(&self) -> SweepStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

/// Scans for overdue sessions and elapsed lockouts.
pub struct Sweeper<S> {
    store: Arc<EntityStore<S>>,
    policy: Arc<PolicyEngine<S>>,
    clock: Arc<dyn Clock>,
    limiter: Option<(Arc<RateLimiter>, chrono::Duration)>,
}

impl<S: VersionStore + 'static> Sweeper<S> {
    pub fn new(
        store: Arc<EntityStore<S>>,
        policy: Arc<PolicyEngine<S>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            policy,
            clock,
            limiter: None,
        }
    }

    /// Also drop finished rate-limit buckets each pass. `retention` must be
    /// at least the largest rate window in use or live buckets get dropped.
    pub fn with_rate_limiter(
        mut self,
        limiter: Arc<RateLimiter>,
        retention: chrono::Duration,
    ) -> Self {
        self.limiter = Some((limiter, retention));
        self
    }

    /// One full pass at `now`. Returns what this pass changed.
    pub fn run_once(&self, now: DateTime<Utc>) -> CoreResult<SweepStats> {
        let mut stats = SweepStats {
            passes: 1,
            ..SweepStats::default()
        };
        self.sweep_sessions(now, &mut stats)?;
        self.sweep_lockouts(now, &mut stats)?;
        if let Some((limiter, retention)) = &self.limiter {
            stats.rate_buckets_pruned += limiter.prune(now, *retention)? as u64;
        }
        debug!(
            sessions_expired = stats.sessions_expired,
            lockouts_cleared = stats.lockouts_cleared,
            rate_buckets_pruned = stats.rate_buckets_pruned,
            skipped = stats.skipped_conflicts,
            "sweep pass finished"
        );
        Ok(stats)
    }

    fn sweep_sessions(&self, now: DateTime<Utc>, stats: &mut SweepStats) -> CoreResult<()> {
        for (header, version) in self.store.scan_current(&EntityKind::Session)? {
            let record = SessionRecord::from_version(header.tenant_id, &version)?;
            if record.status != SessionStatus::Active {
                continue;
            }
            let policy = self.policy.get_policy(header.tenant_id)?;
            let Some(reason) = record.expiry_reason(&policy, now) else {
                continue;
            };

            let mut expired = record.clone();
            expired.status = SessionStatus::Expired;
            let outcome = self.store.put_with_event(
                header.tenant_id,
                EntityKind::Session,
                &session_key(record.session_id),
                expired.to_attributes()?,
                Actor::system(SWEEP_ACTOR),
                now,
                Some(
                    AuditSpec::new("auth.session.expired")
                        .with_payload(json!({ "session_id": record.session_id, "reason": reason })),
                ),
            );
            match outcome {
                Ok(_) => stats.sessions_expired += 1,
                Err(CoreError::Conflict(_)) => stats.skipped_conflicts += 1,
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn sweep_lockouts(&self, now: DateTime<Utc>, stats: &mut SweepStats) -> CoreResult<()> {
        for (header, version) in self.store.scan_current(&EntityKind::Credential)? {
            let Some(until) = version.attributes.get_time(credential_attr::LOCKED_UNTIL)? else {
                continue;
            };
            if until > now {
                continue;
            }

            let mut attrs = version.attributes.clone();
            attrs.set(credential_attr::LOCKED_UNTIL, JsonValue::Null)?;
            attrs.set(credential_attr::FAILED_ATTEMPTS, 0)?;
            let outcome = self.store.put_with_event(
                header.tenant_id,
                EntityKind::Credential,
                &header.business_key,
                attrs,
                Actor::system(SWEEP_ACTOR),
                now,
                Some(
                    AuditSpec::new("auth.lockout.cleared")
                        .with_severity(Severity::Warning)
                        .with_payload(json!({ "locked_until": until.to_rfc3339() })),
                ),
            );
            match outcome {
                Ok(_) => stats.lockouts_cleared += 1,
                Err(CoreError::Conflict(_)) => stats.skipped_conflicts += 1,
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Run passes on `poll_interval` in a background thread.
    pub fn spawn(self, config: SweepConfig) -> std::io::Result<SweepHandle> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = Arc::new(Mutex::new(SweepStats::default()));
        let stats_clone = stats.clone();

        let name = config.name.clone();
        let join = thread::Builder::new()
            .name(name)
            .spawn(move || sweep_loop(self, config, shutdown_rx, stats_clone))?;

        Ok(SweepHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        })
    }
}

fn sweep_loop<S: VersionStore + 'static>(
    sweeper: Sweeper<S>,
    config: SweepConfig,
    shutdown_rx: mpsc::Receiver<()>,
    stats: Arc<Mutex<SweepStats>>,
) {
    info!(sweep = %config.name, "sweep started");
    loop {
        let now = sweeper.clock.now();
        match sweeper.run_once(now) {
            Ok(pass) => {
                if let Ok(mut s) = stats.lock() {
                    s.passes += pass.passes;
                    s.sessions_expired += pass.sessions_expired;
                    s.lockouts_cleared += pass.lockouts_cleared;
                    s.rate_buckets_pruned += pass.rate_buckets_pruned;
                    s.skipped_conflicts += pass.skipped_conflicts;
                }
            }
            Err(err) => {
                warn!(error = %err, "sweep pass failed");
                if let Ok(mut s) = stats.lock() {
                    s.passes += 1;
                    s.errors += 1;
                }
            }
        }

        // Sleep doubles as the shutdown wait.
        match shutdown_rx.recv_timeout(config.poll_interval) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }
    }
    info!(sweep = %config.name, "sweep stopped");
}
