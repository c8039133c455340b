// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! GCE instance metadata client.
//!
//! Discovers the project, zone, master zone, and cluster name the controller
//! is running in, plus short-lived access tokens for the container API.
//! Successful lookups are cached per key for the lifetime of the adapter
//! (read-mostly, write-once-per-key; concurrent writers race benignly to the
//! same value). Lookup failures log and return an empty string, which callers
//! treat as absent.

use crate::constants::{CLOUD_USER_AGENT, METADATA_PROBE_TIMEOUT_SECS};
use crate::errors::{TurndownError, TurndownResult};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, error};

/// Cache key for the project id
const PROJECT_ID_KEY: &str = "projectid";

/// Cache key for the instance zone
const ZONE_KEY: &str = "zone";

/// Cache key for the control-plane zone
const MASTER_ZONE_KEY: &str = "master-zone";

/// Cache key for the cluster name
const CLUSTER_NAME_KEY: &str = "cluster-name";

/// Default metadata service host; overridable for tests via `GCE_METADATA_HOST`
const DEFAULT_METADATA_HOST: &str = "metadata.google.internal";

/// Token response from the instance service account endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// GCE metadata client with a per-key success cache.
pub struct GkeMetadata {
    http: reqwest::Client,
    base_url: String,
    cache: RwLock<HashMap<String, String>>,
}

impl Default for GkeMetadata {
    fn default() -> Self {
        Self::new()
    }
}

impl GkeMetadata {
    /// Create a metadata client against the standard metadata host (or the
    /// `GCE_METADATA_HOST` override).
    #[must_use]
    pub fn new() -> Self {
        let host =
            std::env::var("GCE_METADATA_HOST").unwrap_or_else(|_| DEFAULT_METADATA_HOST.to_string());
        Self::with_base_url(format!("http://{host}/computeMetadata/v1"))
    }

    /// Create a metadata client against an explicit base URL.
    #[must_use]
    pub fn with_base_url(base_url: String) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(CLOUD_USER_AGENT)
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            http,
            base_url,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Whether the metadata service answers at all. Used once at startup for
    /// provider detection, with a short timeout so non-GCE clusters are not
    /// held up.
    pub async fn on_gce(&self) -> bool {
        let result = self
            .http
            .get(&self.base_url)
            .header("Metadata-Flavor", "Google")
            .timeout(Duration::from_secs(METADATA_PROBE_TIMEOUT_SECS))
            .send()
            .await;

        match result {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    /// Fetch a metadata path, returning the raw body.
    async fn fetch(&self, path: &str) -> TurndownResult<String> {
        let url = format!("{}/{path}", self.base_url);
        let resp = self
            .http
            .get(&url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| TurndownError::ProviderUnavailable(format!("metadata {path}: {e}")))?;

        if !resp.status().is_success() {
            return Err(TurndownError::ProviderUnavailable(format!(
                "metadata {path}: HTTP {}",
                resp.status()
            )));
        }

        resp.text()
            .await
            .map_err(|e| TurndownError::ProviderUnavailable(format!("metadata {path}: {e}")))
    }

    /// Fetch through the cache: a hit returns immediately, a successful miss
    /// populates the cache, a failed miss logs and returns empty.
    async fn cached(&self, key: &str, path: &str) -> String {
        if let Some(value) = self.cache.read().expect("metadata cache poisoned").get(key) {
            return value.clone();
        }

        match self.fetch(path).await {
            Ok(value) => {
                let value = value.trim().to_string();
                self.cache
                    .write()
                    .expect("metadata cache poisoned")
                    .insert(key.to_string(), value.clone());
                value
            }
            Err(e) => {
                error!(key, error = %e, "Metadata lookup failed");
                String::new()
            }
        }
    }

    /// The GCP project id, or empty when unavailable.
    pub async fn project_id(&self) -> String {
        self.cached(PROJECT_ID_KEY, "project/project-id").await
    }

    /// The instance zone (e.g. `us-central1-a`), or empty when unavailable.
    pub async fn zone(&self) -> String {
        if let Some(value) = self
            .cache
            .read()
            .expect("metadata cache poisoned")
            .get(ZONE_KEY)
        {
            return value.clone();
        }

        // The endpoint answers `projects/<num>/zones/<zone>`.
        match self.fetch("instance/zone").await {
            Ok(raw) => {
                let zone = raw.trim().rsplit('/').next().unwrap_or_default().to_string();
                self.cache
                    .write()
                    .expect("metadata cache poisoned")
                    .insert(ZONE_KEY.to_string(), zone.clone());
                zone
            }
            Err(e) => {
                error!(error = %e, "Failed getting zone");
                String::new()
            }
        }
    }

    /// The control-plane zone, extracted from the `ZONE` line of the
    /// `kube-env` instance attribute. Empty when unavailable.
    pub async fn master_zone(&self) -> String {
        if let Some(value) = self
            .cache
            .read()
            .expect("metadata cache poisoned")
            .get(MASTER_ZONE_KEY)
        {
            return value.clone();
        }

        match self.fetch("instance/attributes/kube-env").await {
            Ok(kube_env) => match parse_kube_env_zone(&kube_env) {
                Some(zone) => {
                    self.cache
                        .write()
                        .expect("metadata cache poisoned")
                        .insert(MASTER_ZONE_KEY.to_string(), zone.clone());
                    zone
                }
                None => {
                    error!("kube-env instance attribute carries no ZONE line");
                    String::new()
                }
            },
            Err(e) => {
                error!(error = %e, "Failed getting master zone from kube-env");
                String::new()
            }
        }
    }

    /// The GKE cluster name, or empty when unavailable.
    pub async fn cluster_name(&self) -> String {
        self.cached(CLUSTER_NAME_KEY, "instance/attributes/cluster-name")
            .await
    }

    /// A fresh access token for the instance's default service account.
    /// Never cached: tokens expire.
    ///
    /// # Errors
    ///
    /// Returns [`TurndownError::ProviderUnavailable`] when the token endpoint
    /// is unreachable or answers malformed JSON.
    pub async fn access_token(&self) -> TurndownResult<String> {
        let body = self
            .fetch("instance/service-accounts/default/token")
            .await?;
        let token: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            TurndownError::ProviderUnavailable(format!("malformed token response: {e}"))
        })?;
        debug!("Fetched instance service account token");
        Ok(token.access_token)
    }
}

/// Extract the `ZONE` value from a `kube-env` attribute body.
///
/// The attribute is a YAML-ish list of `KEY: value` lines.
#[must_use]
pub fn parse_kube_env_zone(kube_env: &str) -> Option<String> {
    for line in kube_env.lines() {
        if let Some((key, value)) = line.split_once(": ") {
            if key == "ZONE" && !value.trim().is_empty() {
                return Some(value.trim().to_string());
            }
        }
    }
    None
}

#[cfg(test)]
#[path = "gke_metadata_tests.rs"]
mod gke_metadata_tests;
