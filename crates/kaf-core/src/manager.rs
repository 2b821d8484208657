//! Connection cache keyed by cluster name.
//!
//! [`ConnManager`] resolves a cluster by name from the config file, builds
//! its [`ClientConfig`], connects, and keeps the client for the rest of the
//! process. The config is re-read on every lookup that misses the cache, so
//! edits made by `kaf config` commands are picked up.
//!
//! Name resolution differs between entry points:
//! - [`ConnManager::get_client`] needs an exact name.
//! - [`ConnManager::get_admin_client`] and [`ConnManager::get_config`] treat
//!   an empty or unknown name as the active cluster.
//!
//! Clients are cached under the name that was asked for, so `""` and the
//! active cluster's own name are separate cache entries.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::admin::ClusterAdmin;
use crate::broker::BrokerConnection;
use crate::client::ClusterClient;
use crate::client_config::ClientConfig;
use crate::config::{Cluster, Config};
use crate::error::{ConfigError, ConfigResult, Result};
use crate::offsets::{OffsetRequest, OffsetResponse};

/// Source of the cluster configuration.
pub trait ConfigLoader: Send + Sync {
    /// Load the current configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be read.
    fn load(&self) -> ConfigResult<Config>;
}

/// Reads the YAML config file on every load.
#[derive(Debug, Clone, Default)]
pub struct FileConfigLoader {
    path: Option<PathBuf>,
}

impl FileConfigLoader {
    /// Load from `path`, or from `~/.kaf/config` when `None`.
    #[must_use]
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

impl ConfigLoader for FileConfigLoader {
    fn load(&self) -> ConfigResult<Config> {
        Config::read(self.path.as_deref())
    }
}

/// A fixed, in-memory configuration.
impl ConfigLoader for Config {
    fn load(&self) -> ConfigResult<Config> {
        Ok(self.clone())
    }
}

/// Cache of one [`ClusterClient`] per cluster name.
pub struct ConnManager {
    loader: Box<dyn ConfigLoader>,
    /// Held across client creation so concurrent first uses of a name
    /// create one client.
    clients: Mutex<HashMap<String, Arc<ClusterClient>>>,
}

impl std::fmt::Debug for ConnManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnManager").finish_non_exhaustive()
    }
}

impl Default for ConnManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnManager {
    /// A manager reading `~/.kaf/config`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_loader(FileConfigLoader::default())
    }

    /// A manager with a custom config source.
    #[must_use]
    pub fn with_loader(loader: impl ConfigLoader + 'static) -> Self {
        Self {
            loader: Box::new(loader),
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Connect to `cluster` (resolved like [`get_admin_client`](Self::get_admin_client))
    /// and cache the client.
    ///
    /// # Errors
    ///
    /// Returns any resolution, configuration or connection error.
    pub async fn connect(&self, cluster: &str) -> Result<()> {
        self.get_admin_client(cluster).await.map(|_| ())
    }

    /// The client for the cluster named exactly `cluster`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ClusterNotFound`] if no cluster has that name,
    /// or any configuration or connection error.
    #[instrument(skip(self))]
    pub async fn get_client(&self, cluster: &str) -> Result<Arc<ClusterClient>> {
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(cluster) {
            return Ok(Arc::clone(client));
        }

        let config = self.loader.load()?;
        let resolved = config
            .find_cluster(cluster)
            .ok_or_else(|| ConfigError::ClusterNotFound(cluster.to_string()))?;

        let client = Self::connect_cluster(resolved).await?;
        clients.insert(cluster.to_string(), Arc::clone(&client));
        Ok(client)
    }

    /// An admin handle for `cluster`; empty or unknown names fall back to
    /// the active cluster.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ClusterNotFound`] if there is no active cluster
    /// to fall back to, or any configuration or connection error.
    #[instrument(skip(self))]
    pub async fn get_admin_client(&self, cluster: &str) -> Result<ClusterAdmin> {
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(cluster) {
            return Ok(ClusterAdmin::from_client(Arc::clone(client)));
        }

        let config = self.loader.load()?;
        let resolved = resolve_with_fallback(&config, cluster)?;

        let client = Self::connect_cluster(resolved).await?;
        clients.insert(cluster.to_string(), Arc::clone(&client));
        Ok(ClusterAdmin::from_client(client))
    }

    /// A fresh transport config for `cluster`; empty or unknown names fall
    /// back to the active cluster. Nothing is cached.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be loaded, no cluster resolves,
    /// or the cluster's settings are invalid.
    pub fn get_config(&self, cluster: &str) -> ConfigResult<ClientConfig> {
        let config = self.loader.load()?;
        ClientConfig::from_cluster(resolve_with_fallback(&config, cluster)?)
    }

    /// Look up offsets on `broker`, reconnecting once on failure.
    ///
    /// On error the broker is closed and re-opened with a freshly built
    /// config for `cluster`, and the request is retried once. A failed
    /// re-open is only logged; the retry then reports the failure.
    ///
    /// # Errors
    ///
    /// Returns the config error if the config cannot be rebuilt, otherwise
    /// the result of the retry.
    #[instrument(skip(self, broker, request), fields(broker_id = broker.id()))]
    pub async fn get_available_offsets(
        &self,
        broker: &BrokerConnection,
        cluster: &str,
        request: &OffsetRequest,
    ) -> Result<OffsetResponse> {
        match broker.get_available_offsets(request).await {
            Ok(response) => Ok(response),
            Err(e) => {
                warn!(error = %e, "offset request failed, reconnecting broker");
                broker.close().await;

                let config = self.get_config(cluster)?;
                if let Err(e) = broker.open(&config).await {
                    warn!(error = %e, "failed to reopen broker");
                }
                broker.get_available_offsets(request).await
            }
        }
    }

    /// Names currently cached.
    pub async fn cached_clusters(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clients.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Close and forget every cached client.
    pub async fn close_all(&self) {
        let clients: Vec<_> = self.clients.lock().await.drain().collect();
        for (name, client) in clients {
            debug!(cluster = %name, "closing cached client");
            client.close().await;
        }
    }

    async fn connect_cluster(cluster: &Cluster) -> Result<Arc<ClusterClient>> {
        cluster.validate()?;
        let config = ClientConfig::from_cluster(cluster)?;
        info!(cluster = %cluster.name, brokers = ?cluster.brokers, "connecting to cluster");
        ClusterClient::connect(&cluster.brokers, config).await
    }
}

/// Resolve `name` exactly, falling back to the active cluster when it is
/// empty or unknown.
fn resolve_with_fallback<'a>(config: &'a Config, name: &str) -> ConfigResult<&'a Cluster> {
    let exact = if name.is_empty() {
        None
    } else {
        config.find_cluster(name)
    };

    exact.or_else(|| config.active_cluster()).ok_or_else(|| {
        let missing = if name.is_empty() {
            config.current_cluster.as_str()
        } else {
            name
        };
        ConfigError::ClusterNotFound(missing.to_string())
    })
}
