//! Account purge maintenance.
//!
//! [`PurgeJob`] deletes expired users, then any session idle for at least
//! the configured timeout. It runs once on demand or recurs on a
//! [`QueueHandle`]. Storage sits behind [`AccountStore`];
//! [`MemoryAccountStore`] is the in-process implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use rc_core::config::MaintenanceConfig;
use rc_core::{Error, OperationId, Result, SessionId, UserId};
use rc_sched::QueueHandle;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: UserId,
    pub name: String,
    /// Accounts without an expiry never expire.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub user_id: UserId,
    /// Last time the session was used.
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// AccountStore
// ---------------------------------------------------------------------------

/// Storage for users and sessions, as seen by the purge job.
pub trait AccountStore: Send + Sync {
    /// Users whose expiry is at or before `now`.
    fn expired_users(&self, now: DateTime<Utc>) -> Result<Vec<UserAccount>>;

    fn delete_user(&self, id: UserId) -> Result<()>;

    fn sessions(&self) -> Result<Vec<SessionRecord>>;

    fn delete_session(&self, id: SessionId) -> Result<()>;
}

/// Serializable contents of a [`MemoryAccountStore`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountSnapshot {
    pub users: Vec<UserAccount>,
    pub sessions: Vec<SessionRecord>,
}

/// In-memory [`AccountStore`].
#[derive(Debug, Default)]
pub struct MemoryAccountStore {
    users: RwLock<HashMap<UserId, UserAccount>>,
    sessions: RwLock<HashMap<SessionId, SessionRecord>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: AccountSnapshot) -> Self {
        let store = Self::new();
        for user in snapshot.users {
            store.add_user(user);
        }
        for session in snapshot.sessions {
            store.add_session(session);
        }
        store
    }

    /// Current contents, users and sessions each sorted by id.
    pub fn snapshot(&self) -> AccountSnapshot {
        let mut users: Vec<_> = self.users.read().values().cloned().collect();
        users.sort_by_key(|u| *u.id.as_uuid());
        let mut sessions: Vec<_> = self.sessions.read().values().cloned().collect();
        sessions.sort_by_key(|s| *s.id.as_uuid());
        AccountSnapshot { users, sessions }
    }

    pub fn add_user(&self, user: UserAccount) {
        self.users.write().insert(user.id, user);
    }

    pub fn add_session(&self, session: SessionRecord) {
        self.sessions.write().insert(session.id, session);
    }

    pub fn has_user(&self, id: UserId) -> bool {
        self.users.read().contains_key(&id)
    }

    pub fn has_session(&self, id: SessionId) -> bool {
        self.sessions.read().contains_key(&id)
    }

    pub fn user_count(&self) -> usize {
        self.users.read().len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }
}

impl AccountStore for MemoryAccountStore {
    fn expired_users(&self, now: DateTime<Utc>) -> Result<Vec<UserAccount>> {
        Ok(self
            .users
            .read()
            .values()
            .filter(|u| u.expires_at.is_some_and(|at| at <= now))
            .cloned()
            .collect())
    }

    fn delete_user(&self, id: UserId) -> Result<()> {
        self.users
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found("user", id))
    }

    fn sessions(&self) -> Result<Vec<SessionRecord>> {
        Ok(self.sessions.read().values().cloned().collect())
    }

    fn delete_session(&self, id: SessionId) -> Result<()> {
        self.sessions
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found("session", id))
    }
}

// ---------------------------------------------------------------------------
// PurgeJob
// ---------------------------------------------------------------------------

/// Outcome of one purge pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub users_purged: usize,
    pub sessions_purged: usize,
    /// Deletes that failed; the pass carries on past them.
    pub failures: usize,
}

pub struct PurgeJob {
    store: Arc<dyn AccountStore>,
    session_timeout: TimeDelta,
}

impl PurgeJob {
    pub fn new(store: Arc<dyn AccountStore>, session_timeout: Duration) -> Self {
        Self {
            store,
            session_timeout: TimeDelta::from_std(session_timeout).unwrap_or(TimeDelta::MAX),
        }
    }

    pub fn from_config(store: Arc<dyn AccountStore>, config: &MaintenanceConfig) -> Self {
        Self::new(
            store,
            Duration::from_secs(config.session_timeout_minutes.saturating_mul(60)),
        )
    }

    /// Run one pass at `now`.
    ///
    /// Fails only if the store cannot list users or sessions; individual
    /// delete failures are logged and counted.
    pub fn run_once(&self, now: DateTime<Utc>) -> Result<PurgeReport> {
        let mut report = PurgeReport::default();

        for user in self.store.expired_users(now)? {
            match self.store.delete_user(user.id) {
                Ok(()) => {
                    info!(user_id = %user.id, name = %user.name, "Purged expired user");
                    report.users_purged += 1;
                }
                Err(e) => {
                    warn!(user_id = %user.id, name = %user.name, "Failed to purge expired user: {e}");
                    report.failures += 1;
                }
            }
        }

        for session in self.store.sessions()? {
            if now - session.updated_at < self.session_timeout {
                continue;
            }
            match self.store.delete_session(session.id) {
                Ok(()) => {
                    info!(session_id = %session.id, user_id = %session.user_id, "Purged session");
                    report.sessions_purged += 1;
                }
                Err(e) => {
                    warn!(session_id = %session.id, user_id = %session.user_id, "Failed to purge session: {e}");
                    report.failures += 1;
                }
            }
        }

        Ok(report)
    }

    /// Run a pass every `interval` on `queue`, starting one interval from
    /// now. Each pass schedules the next, so the sweep stops only when the
    /// queue shuts down. Returns the id of the first pass.
    pub fn schedule(self: Arc<Self>, queue: &QueueHandle, interval: Duration) -> OperationId {
        let job = self;
        let next = queue.clone();

        queue.schedule_after(interval, move || {
            let result = job.run_once(Utc::now());
            Arc::clone(&job).schedule(&next, interval);
            let report = result?;
            info!(
                users = report.users_purged,
                sessions = report.sessions_purged,
                failures = report.failures,
                "Purge pass finished"
            );
            Ok(())
        })
    }
}

impl std::fmt::Debug for PurgeJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PurgeJob")
            .field("session_timeout", &self.session_timeout)
            .finish_non_exhaustive()
    }
}
