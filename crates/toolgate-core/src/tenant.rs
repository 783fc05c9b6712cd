//! Tenant resolution and context caching
//!
//! Resolution maps a tenant identifier to an immutable [`TenantContext`]
//! snapshot: per-backend credentials, the connectors the tenant may use,
//! and its rate quota. Snapshots are shared behind `Arc` across
//! concurrent requests and are never mutated; credential rotation goes
//! through explicit cache invalidation.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use toolgate_connectors::{ConnectorKind, CredentialSet};
use tracing::{debug, info, warn};

/// Request quota for one tenant
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RateQuota {
    /// Requests allowed per interval
    pub max_requests: u32,
    /// Interval length in seconds
    pub interval_secs: u64,
}

impl RateQuota {
    /// Interval as a `Duration`
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for RateQuota {
    fn default() -> Self {
        Self {
            max_requests: 60,
            interval_secs: 60,
        }
    }
}

/// Immutable per-tenant context snapshot
#[derive(Debug, Clone, Deserialize)]
pub struct TenantContext {
    /// Tenant identifier
    #[serde(default)]
    pub tenant_id: String,
    /// Per-backend secrets
    #[serde(default)]
    pub credentials: CredentialSet,
    /// Connectors this tenant may invoke
    #[serde(default)]
    pub allowed_connectors: HashSet<ConnectorKind>,
    /// Request quota
    #[serde(default)]
    pub rate_quota: RateQuota,
    /// Suspended tenants are rejected at resolution time
    #[serde(default)]
    pub suspended: bool,
}

/// Backing store for tenant contexts
#[async_trait]
pub trait TenantStore: Send + Sync {
    /// Load a tenant context; `None` when the tenant does not exist
    async fn load(&self, tenant_id: &str) -> Result<Option<TenantContext>>;
}

/// Read-mostly tenant store backed by a TOML document loaded at startup
pub struct StaticTenantStore {
    tenants: HashMap<String, TenantContext>,
}

#[derive(Debug, Deserialize)]
struct TenantsFile {
    #[serde(default)]
    tenants: HashMap<String, TenantContext>,
}

impl StaticTenantStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self {
            tenants: HashMap::new(),
        }
    }

    /// Parse a store from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: TenantsFile = toml::from_str(text)
            .map_err(|e| Error::Internal(format!("invalid tenants file: {e}")))?;
        let tenants = file
            .tenants
            .into_iter()
            .map(|(id, mut ctx)| {
                ctx.tenant_id = id.clone();
                (id, ctx)
            })
            .collect::<HashMap<_, _>>();
        info!(tenant_count = tenants.len(), "Loaded tenant store");
        Ok(Self { tenants })
    }

    /// Load a store from a TOML file on disk
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Internal(format!(
                "failed to read tenants file {:?}: {e}",
                path.as_ref()
            ))
        })?;
        Self::from_toml_str(&text)
    }

    /// Insert a tenant (used by tests and programmatic setup)
    pub fn insert(&mut self, context: TenantContext) {
        self.tenants.insert(context.tenant_id.clone(), context);
    }
}

impl Default for StaticTenantStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TenantStore for StaticTenantStore {
    async fn load(&self, tenant_id: &str) -> Result<Option<TenantContext>> {
        Ok(self.tenants.get(tenant_id).cloned())
    }
}

/// Resolver cache configuration
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// How long a cached context stays fresh
    pub ttl: Duration,
    /// Upper bound on cached entries
    pub max_entries: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_entries: 10_000,
        }
    }
}

struct CacheEntry {
    context: Arc<TenantContext>,
    cached_at: Instant,
}

/// Tenant resolver with a bounded, time-expiring cache
pub struct TenantResolver {
    store: Arc<dyn TenantStore>,
    cache: RwLock<HashMap<String, CacheEntry>>,
    config: ResolverConfig,
}

impl TenantResolver {
    /// Create a resolver over a backing store
    #[must_use]
    pub fn new(store: Arc<dyn TenantStore>, config: ResolverConfig) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Resolve a tenant to an immutable context snapshot.
    ///
    /// # Errors
    ///
    /// `UnknownTenant` when the backing store has no such tenant,
    /// `TenantSuspended` when it exists but is suspended. Neither is
    /// ever retried by the gateway.
    pub async fn resolve(&self, tenant_id: &str) -> Result<Arc<TenantContext>> {
        if let Some(context) = self.cached(tenant_id).await {
            return Self::check_suspension(context);
        }

        let loaded = self
            .store
            .load(tenant_id)
            .await?
            .ok_or_else(|| Error::UnknownTenant(tenant_id.to_string()))?;
        let context = Arc::new(loaded);

        self.cache_insert(tenant_id, Arc::clone(&context)).await;
        debug!(tenant = %tenant_id, "Tenant context resolved from store");
        Self::check_suspension(context)
    }

    /// Drop the cached entry for a tenant (credential rotation,
    /// auth failures from a backend).
    pub async fn invalidate(&self, tenant_id: &str) {
        let removed = self.cache.write().await.remove(tenant_id).is_some();
        if removed {
            info!(tenant = %tenant_id, "Tenant cache entry invalidated");
        }
    }

    /// Number of cached entries (fresh or stale)
    pub async fn cached_entries(&self) -> usize {
        self.cache.read().await.len()
    }

    fn check_suspension(context: Arc<TenantContext>) -> Result<Arc<TenantContext>> {
        if context.suspended {
            warn!(tenant = %context.tenant_id, "Rejecting suspended tenant");
            return Err(Error::TenantSuspended(context.tenant_id.clone()));
        }
        Ok(context)
    }

    async fn cached(&self, tenant_id: &str) -> Option<Arc<TenantContext>> {
        let cache = self.cache.read().await;
        let entry = cache.get(tenant_id)?;
        if entry.cached_at.elapsed() < self.config.ttl {
            Some(Arc::clone(&entry.context))
        } else {
            None
        }
    }

    async fn cache_insert(&self, tenant_id: &str, context: Arc<TenantContext>) {
        let mut cache = self.cache.write().await;
        if cache.len() >= self.config.max_entries {
            let ttl = self.config.ttl;
            cache.retain(|_, entry| entry.cached_at.elapsed() < ttl);
        }
        // Still full after expiry sweep: serve uncached rather than grow.
        if cache.len() >= self.config.max_entries {
            warn!(tenant = %tenant_id, "Tenant cache full, entry not cached");
            return;
        }
        cache.insert(
            tenant_id.to_string(),
            CacheEntry {
                context,
                cached_at: Instant::now(),
            },
        );
    }
}
