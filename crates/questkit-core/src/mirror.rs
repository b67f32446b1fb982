//! Download mirror resolution.
//!
//! Some mod hosts are slow or unreachable in some regions. A published table
//! maps original download URLs to mirrors; anything not in the table, or any
//! failure to get the table, falls back to the original URL.

use std::sync::{PoisonError, RwLock, RwLockReadGuard};
use std::time::{Duration, Instant};

use reqwest::Client;

use questkit_schema::MirrorTable;

use crate::io::download::fetch_json;
use crate::io::latest::Supersede;

#[derive(Debug, Default)]
struct Cached {
    table: MirrorTable,
    fetched_at: Option<Instant>,
}

#[derive(Debug)]
pub struct MirrorResolver {
    client: Client,
    url: Option<String>,
    ttl: Duration,
    cached: RwLock<Cached>,
    refresh: Supersede,
}

impl MirrorResolver {
    /// `url` is the mirror table location; `None` makes every lookup a pass-through.
    pub fn new(client: Client, url: Option<String>, ttl: Duration) -> Self {
        Self {
            client,
            url,
            ttl,
            cached: RwLock::new(Cached::default()),
            refresh: Supersede::new(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Cached> {
        self.cached.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Never fetched successfully, or older than the TTL.
    fn is_stale(&self) -> bool {
        self.read()
            .fetched_at
            .is_none_or(|at| at.elapsed() >= self.ttl)
    }

    /// Fetch the table. Returns `true` if a new table was applied.
    ///
    /// The refresh time only moves on success, so a failed fetch is retried
    /// on the next lookup.
    pub async fn refresh(&self) -> bool {
        let Some(url) = self.url.as_deref() else {
            return false;
        };

        let ticket = self.refresh.begin();
        let fetched = self
            .refresh
            .run(&ticket, fetch_json::<MirrorTable>(&self.client, url))
            .await;

        match fetched {
            None => false,
            Some(Err(e)) => {
                tracing::warn!(url, "Failed to refresh mirror table: {e}");
                false
            }
            Some(Ok(table)) => {
                let count = table.len();
                let applied = self
                    .refresh
                    .commit(&ticket, || {
                        let mut cached = self.cached.write().unwrap_or_else(PoisonError::into_inner);
                        cached.table = table;
                        cached.fetched_at = Some(Instant::now());
                    })
                    .is_some();
                if applied {
                    tracing::debug!(count, "Mirror table updated");
                }
                applied
            }
        }
    }

    /// The mirror for `original` if one is known, else `original` unchanged.
    pub async fn resolve(&self, original: &str) -> String {
        if self.url.is_some() && self.is_stale() {
            self.refresh().await;
        }

        match self.read().table.lookup(original) {
            Some(mirror) => {
                tracing::info!(original, mirror, "Using download mirror");
                mirror.to_string()
            }
            None => original.to_string(),
        }
    }
}
