//! Process-local cache of the active configuration set.
//!
//! Every ingested trade is evaluated against every active config; hitting
//! the store per trade is prohibitive, so reads go through this snapshot,
//! refreshed lazily on a TTL. Readers always observe a complete set (the
//! old one or the new one), never a partial reload.

use crate::db::Repository;
use crate::domain::PositionConfig;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

pub struct ConfigCache {
    repo: Arc<Repository>,
    refresh_interval: Duration,
    inner: RwLock<CacheState>,
}

struct CacheState {
    configs: Arc<Vec<PositionConfig>>,
    last_refresh: Option<Instant>,
}

impl ConfigCache {
    pub fn new(repo: Arc<Repository>, refresh_interval: Duration) -> Self {
        Self {
            repo,
            refresh_interval,
            inner: RwLock::new(CacheState {
                configs: Arc::new(Vec::new()),
                last_refresh: None,
            }),
        }
    }

    /// The active configuration set, reloading when the cache is empty or
    /// older than the refresh interval.
    ///
    /// The DB read happens without the lock held; the swap under the write
    /// lock is what keeps reads atomic.
    pub async fn active_configs(&self) -> Result<Arc<Vec<PositionConfig>>, sqlx::Error> {
        {
            let state = self.inner.read().await;
            if let Some(last_refresh) = state.last_refresh {
                if last_refresh.elapsed() < self.refresh_interval {
                    return Ok(state.configs.clone());
                }
            }
        }

        let fresh = Arc::new(self.repo.find_active_configs().await?);
        debug!(configs = fresh.len(), "refreshed active config cache");

        let mut state = self.inner.write().await;
        state.configs = fresh.clone();
        state.last_refresh = Some(Instant::now());
        Ok(fresh)
    }

    /// Drop the cached set so the next read reloads. Config CRUD calls this
    /// after every mutation.
    pub async fn invalidate(&self) {
        let mut state = self.inner.write().await;
        state.last_refresh = None;
    }
}
