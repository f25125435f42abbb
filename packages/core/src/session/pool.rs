//! Session Pool
//!
//! Bounded reuse of sessions. Opening a session is cheap, but callers that
//! process many independent units of work benefit from a cap on concurrency
//! and from warm caches: a released session keeps its pristine cache and is
//! handed out again as-is. Releases above the configured minimum drop the
//! session instead of parking it.
//!
//! Acquisition waits on a semaphore with a configurable timeout; a saturated
//! pool fails with [`SessionError::PoolTimeout`] instead of queueing forever.

use crate::config::PoolConfig;
use crate::repository::Repository;
use crate::session::{Session, SessionError};
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Bounded pool of reusable sessions over one repository.
pub struct SessionPool {
    repo: Arc<Repository>,
    permits: Arc<Semaphore>,
    idle: Arc<Mutex<Vec<Session>>>,
    acquire_timeout: Duration,
    min_idle: usize,
}

impl SessionPool {
    pub(crate) fn new(repo: Arc<Repository>, config: &PoolConfig) -> Self {
        let pool = SessionPool {
            permits: Arc::new(Semaphore::new(config.max_sessions)),
            idle: Arc::new(Mutex::new(Vec::new())),
            acquire_timeout: Duration::from_millis(config.acquire_timeout_ms),
            min_idle: config.min_idle.min(config.max_sessions),
            repo,
        };
        {
            let mut idle = pool.idle.lock().unwrap_or_else(|e| e.into_inner());
            for _ in 0..config.min_idle.min(config.max_sessions) {
                idle.push(pool.repo.open_session());
            }
        }
        pool
    }

    /// Checks out a session, reusing an idle one when available.
    ///
    /// # Errors
    ///
    /// [`SessionError::PoolTimeout`] when no slot frees up within the
    /// configured timeout; [`SessionError::PoolClosed`] after `close()`.
    pub async fn acquire(&self) -> Result<PooledSession, SessionError> {
        let permit = tokio::time::timeout(
            self.acquire_timeout,
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        .map_err(|_| SessionError::PoolTimeout)?
        .map_err(|_| SessionError::PoolClosed)?;

        let session = {
            let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
            idle.pop()
        };
        let session = session.unwrap_or_else(|| self.repo.open_session());
        debug!(session = session.id(), "pooled session checked out");
        Ok(PooledSession {
            session: Some(session),
            idle: Arc::clone(&self.idle),
            min_idle: self.min_idle,
            _permit: permit,
        })
    }

    /// Number of idle sessions currently parked.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Shuts the pool down: waiting and future `acquire()` calls fail with
    /// [`SessionError::PoolClosed`]. Checked-out sessions finish normally.
    pub fn close(&self) {
        self.permits.close();
        self.idle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

/// A checked-out session. Dereferences to [`Session`]; dropping it returns
/// the session to the pool with pending work discarded.
pub struct PooledSession {
    session: Option<Session>,
    idle: Arc<Mutex<Vec<Session>>>,
    min_idle: usize,
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for PooledSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledSession")
            .field("session_id", &self.session.as_ref().map(Session::id))
            .field("min_idle", &self.min_idle)
            .finish_non_exhaustive()
    }
}

impl Deref for PooledSession {
    type Target = Session;

    fn deref(&self) -> &Session {
        // Present until drop by construction.
        self.session.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledSession {
    fn deref_mut(&mut self) -> &mut Session {
        self.session.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        if let Some(mut session) = self.session.take() {
            // Unsaved work does not leak into the next borrower. The
            // pristine cache survives rollback-free saves, but rollback here
            // is the safe reset: the next borrower starts from the store.
            session.rollback();
            // Only the configured minimum is kept warm; the rest close.
            let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
            if idle.len() < self.min_idle {
                idle.push(session);
            }
        }
    }
}
