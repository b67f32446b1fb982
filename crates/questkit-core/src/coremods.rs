//! Remote manifest of the mods each app version needs to work at all.
//!
//! The manifest is fetched per target app and cached in memory. Fetch
//! failures are soft: they are logged and the previous manifest stays.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use reqwest::Client;

use questkit_schema::{CoreModEntry, CoreModIndex};

use crate::io::download::fetch_json;
use crate::io::latest::Supersede;

/// What a call to [`CoreModManifest::refresh`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new manifest was applied, listing this many app versions.
    Updated(usize),
    /// The fetch failed; the previous manifest is still in use.
    Kept,
    /// A newer refresh or a change of target app made this one obsolete.
    Superseded,
    /// No manifest is published for the target app; the manifest is now empty.
    NoManifestForApp,
}

#[derive(Debug, Default)]
struct Cached {
    package_id: String,
    index: CoreModIndex,
    refreshed_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct CoreModManifest {
    client: Client,
    urls: BTreeMap<String, String>,
    cached: RwLock<Cached>,
    refresh: Supersede,
}

impl CoreModManifest {
    /// `urls` maps package ids to the manifest URL for that app.
    pub fn new(client: Client, urls: BTreeMap<String, String>, package_id: &str) -> Self {
        Self {
            client,
            urls,
            cached: RwLock::new(Cached {
                package_id: package_id.to_string(),
                ..Cached::default()
            }),
            refresh: Supersede::new(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Cached> {
        self.cached.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Cached> {
        self.cached.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn package_id(&self) -> String {
        self.read().package_id.clone()
    }

    /// Switch to another app. Cancels an in-flight refresh and drops the cached manifest.
    pub fn set_package_id(&self, package_id: &str) {
        self.refresh.cancel();
        let mut cached = self.write();
        *cached = Cached {
            package_id: package_id.to_string(),
            ..Cached::default()
        };
        tracing::debug!(package_id, "Core mod manifest cleared for new target app");
    }

    /// Fetch the manifest for the current app, superseding any refresh in flight.
    pub async fn refresh(&self) -> RefreshOutcome {
        let ticket = self.refresh.begin();
        let package_id = self.package_id();

        let Some(url) = self.urls.get(&package_id) else {
            let applied = self.refresh.commit(&ticket, || {
                let mut cached = self.write();
                cached.index = CoreModIndex::default();
                cached.refreshed_at = None;
            });
            return match applied {
                Some(()) => {
                    tracing::info!(package_id = %package_id, "No core mod manifest published for this app");
                    RefreshOutcome::NoManifestForApp
                }
                None => RefreshOutcome::Superseded,
            };
        };

        tracing::debug!(url = %url, "Refreshing core mod manifest");
        let fetched = self
            .refresh
            .run(&ticket, fetch_json::<CoreModIndex>(&self.client, url))
            .await;

        match fetched {
            None => RefreshOutcome::Superseded,
            Some(Err(e)) => {
                if self.refresh.is_current(&ticket) {
                    tracing::warn!(url = %url, "Failed to refresh core mod manifest, keeping previous: {e}");
                    RefreshOutcome::Kept
                } else {
                    RefreshOutcome::Superseded
                }
            }
            Some(Ok(index)) => {
                let versions = index.versions().len();
                let applied = self.refresh.commit(&ticket, || {
                    let mut cached = self.write();
                    cached.index = index;
                    cached.refreshed_at = Some(Utc::now());
                });
                match applied {
                    Some(()) => {
                        tracing::info!(versions, "Core mod manifest updated");
                        RefreshOutcome::Updated(versions)
                    }
                    None => RefreshOutcome::Superseded,
                }
            }
        }
    }

    /// Required mods for `app_version`; empty if the manifest does not list it.
    pub fn get_required(&self, app_version: &str) -> Vec<CoreModEntry> {
        self.read().index.get_required(app_version)
    }

    pub fn supports(&self, app_version: &str) -> bool {
        self.read().index.supports(app_version)
    }

    /// App versions with a published core mod set, oldest first.
    pub fn supported_versions(&self) -> Vec<String> {
        self.read()
            .index
            .versions()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// When the cached manifest was last fetched successfully.
    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.read().refreshed_at
    }
}
