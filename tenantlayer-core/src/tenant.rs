//! Tenant identity and API key management.
//!
//! Every operation in the workspace takes an explicit [`RequestContext`] naming the tenant the
//! caller authenticated as. The context is produced by an [`IdentityResolver`], which maps a
//! request key to a [`TenantId`]. [`TenantDirectory`] adds provisioning and key management
//! on top, and [`KeyRegistry`] is the in-process implementation of both.

use async_trait::async_trait;
use uuid::Uuid;
use chrono::{DateTime, Utc};
use mea::rwlock::RwLock;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, sync::Arc};
use tracing::info;

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// Opaque identifier of a tenant application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Wraps an identifier.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Unauthorized`] for a blank identifier.
    pub fn new(id: impl Into<String>) -> DocumentStoreResult<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(DocumentStoreError::Unauthorized(
                "tenant identifier must not be empty".to_string(),
            ));
        }
        Ok(TenantId(id))
    }

    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        TenantId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The authenticated caller of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    tenant: TenantId,
    request_id: String,
}

impl RequestContext {
    /// Creates a context with a generated request id.
    pub fn new(tenant: TenantId) -> Self {
        Self { tenant, request_id: Uuid::new_v4().to_string() }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

/// Resolves a request key to the tenant it belongs to.
#[async_trait]
pub trait IdentityResolver: Send + Sync + fmt::Debug {
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Unauthorized`] if the key is unknown.
    async fn resolve(&self, key: &str) -> DocumentStoreResult<TenantId>;
}

#[async_trait]
impl<R> IdentityResolver for &R
where
    R: IdentityResolver,
{
    async fn resolve(&self, key: &str) -> DocumentStoreResult<TenantId> {
        (*self).resolve(key).await
    }
}

#[async_trait]
impl<R> IdentityResolver for Arc<R>
where
    R: IdentityResolver + ?Sized,
{
    async fn resolve(&self, key: &str) -> DocumentStoreResult<TenantId> {
        (**self).resolve(key).await
    }
}

/// A provisioned tenant application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A key that authenticates requests as one tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKey {
    pub key: String,
    pub tenant: TenantId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct RegistryState {
    tenants: HashMap<TenantId, Tenant>,
    keys: HashMap<String, ApiKey>,
}

/// In-memory tenant and key registry.
///
/// Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct KeyRegistry {
    state: Arc<RwLock<RegistryState>>,
}

/// Provisions tenants and manages the keys that resolve to them.
///
/// The admin side of an [`IdentityResolver`]. [`KeyRegistry`] is the in-process
/// implementation; a deployment backed by an external identity service implements this
/// trait instead.
#[async_trait]
pub trait TenantDirectory: IdentityResolver {
    /// Creates a tenant and its first key.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidDocument`] for a blank name.
    async fn provision(&self, name: &str) -> DocumentStoreResult<(Tenant, ApiKey)>;

    /// Issues an additional key for an existing tenant.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::DocumentNotFound`] for an unknown tenant.
    async fn generate_key(&self, tenant: &TenantId) -> DocumentStoreResult<ApiKey>;

    /// Keys issued to a tenant, oldest first.
    async fn keys(&self, tenant: &TenantId) -> Vec<ApiKey>;

    /// All tenants, oldest first.
    async fn tenants(&self) -> Vec<Tenant>;

    /// The oldest tenant with the given name.
    async fn tenant_by_name(&self, name: &str) -> Option<Tenant>;

    /// Removes a tenant and every key issued to it.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::DocumentNotFound`] for an unknown tenant.
    async fn revoke_tenant(&self, tenant: &TenantId) -> DocumentStoreResult<Tenant>;

    /// Revokes one key of `tenant`. Returns whether the tenant held that key.
    async fn revoke_key(&self, tenant: &TenantId, key: &str) -> bool;
}

#[async_trait]
impl<R> TenantDirectory for Arc<R>
where
    R: TenantDirectory + ?Sized,
{
    async fn provision(&self, name: &str) -> DocumentStoreResult<(Tenant, ApiKey)> {
        (**self).provision(name).await
    }

    async fn generate_key(&self, tenant: &TenantId) -> DocumentStoreResult<ApiKey> {
        (**self).generate_key(tenant).await
    }

    async fn keys(&self, tenant: &TenantId) -> Vec<ApiKey> {
        (**self).keys(tenant).await
    }

    async fn tenants(&self) -> Vec<Tenant> {
        (**self).tenants().await
    }

    async fn tenant_by_name(&self, name: &str) -> Option<Tenant> {
        (**self).tenant_by_name(name).await
    }

    async fn revoke_tenant(&self, tenant: &TenantId) -> DocumentStoreResult<Tenant> {
        (**self).revoke_tenant(tenant).await
    }

    async fn revoke_key(&self, tenant: &TenantId, key: &str) -> bool {
        (**self).revoke_key(tenant, key).await
    }
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TenantDirectory for KeyRegistry {
    async fn provision(&self, name: &str) -> DocumentStoreResult<(Tenant, ApiKey)> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DocumentStoreError::InvalidDocument(
                "tenant name must not be empty".to_string(),
            ));
        }

        let tenant = Tenant {
            id: TenantId::generate(),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        let key = new_key(&tenant.id);

        let mut state = self.state.write().await;
        state.tenants.insert(tenant.id.clone(), tenant.clone());
        state.keys.insert(key.key.clone(), key.clone());

        info!(tenant = %tenant.id, name = %tenant.name, "provisioned tenant");

        Ok((tenant, key))
    }

    async fn generate_key(&self, tenant: &TenantId) -> DocumentStoreResult<ApiKey> {
        let mut state = self.state.write().await;
        if !state.tenants.contains_key(tenant) {
            return Err(DocumentStoreError::DocumentNotFound(
                tenant.to_string(),
                "tenants".to_string(),
            ));
        }

        let key = new_key(tenant);
        state.keys.insert(key.key.clone(), key.clone());

        Ok(key)
    }

    async fn keys(&self, tenant: &TenantId) -> Vec<ApiKey> {
        let state = self.state.read().await;
        let mut keys: Vec<_> = state
            .keys
            .values()
            .filter(|key| &key.tenant == tenant)
            .cloned()
            .collect();
        keys.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.key.cmp(&b.key)));
        keys
    }

    async fn tenants(&self) -> Vec<Tenant> {
        let state = self.state.read().await;
        let mut tenants: Vec<_> = state.tenants.values().cloned().collect();
        tenants.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        tenants
    }

    async fn tenant_by_name(&self, name: &str) -> Option<Tenant> {
        self.tenants()
            .await
            .into_iter()
            .find(|tenant| tenant.name == name.trim())
    }

    async fn revoke_tenant(&self, tenant: &TenantId) -> DocumentStoreResult<Tenant> {
        let mut state = self.state.write().await;
        let removed = state.tenants.remove(tenant).ok_or_else(|| {
            DocumentStoreError::DocumentNotFound(tenant.to_string(), "tenants".to_string())
        })?;
        state.keys.retain(|_, key| &key.tenant != tenant);

        info!(tenant = %tenant, "revoked tenant");

        Ok(removed)
    }

    async fn revoke_key(&self, tenant: &TenantId, key: &str) -> bool {
        let mut state = self.state.write().await;
        if state.keys.get(key).is_none_or(|issued| &issued.tenant != tenant) {
            return false;
        }
        state.keys.remove(key);

        info!(tenant = %tenant, "revoked key");
        true
    }
}

#[async_trait]
impl IdentityResolver for KeyRegistry {
    async fn resolve(&self, key: &str) -> DocumentStoreResult<TenantId> {
        self.state
            .read()
            .await
            .keys
            .get(key)
            .map(|key| key.tenant.clone())
            .ok_or_else(|| DocumentStoreError::Unauthorized("unknown api key".to_string()))
    }
}

fn new_key(tenant: &TenantId) -> ApiKey {
    ApiKey {
        key: Uuid::new_v4().to_string(),
        tenant: tenant.clone(),
        created_at: Utc::now(),
    }
}
