//! Transport-agnostic request routing.
//!
//! [`Api`] maps the public route surface onto a [`DocumentStore`] and a
//! [`TenantDirectory`]. It does no HTTP parsing: an adapter decodes method, path, key and
//! parameters into an [`ApiRequest`] and writes the [`ApiResponse`] back out.
//!
//! | route | methods | caller |
//! |---|---|---|
//! | `/system/time` | GET | anyone |
//! | `/collection/:name` | GET, POST, PUT, DELETE | tenant |
//! | `/collection/:name/:id` | GET, POST, PUT, DELETE | tenant |
//! | `/channels/:path+` | GET, POST | tenant |
//! | `/key/:name` | GET, POST | tenant |
//! | `/apps/keys` | GET, POST | tenant |
//! | `/apps/keys/:key` | DELETE | tenant |
//! | `/apps/configs` | GET, POST | tenant |
//! | `/apps/configs/:name` | DELETE | tenant |
//! | `/apps/modules` | GET, POST | tenant |
//! | `/apps/modules/:name` | DELETE | tenant |
//! | `/apps` | DELETE | tenant |
//! | `/apps` | POST | admin |
//! | `/apps/list` | GET | admin |
//! | `/apps/by_name/:name` | GET | admin |
//!
//! Admin routes answer only to the key set with [`Api::with_admin_key`]; without one they
//! are closed.
//!
//! # Example
//!
//! ```ignore
//! use tenantlayer::api::{Api, ApiRequest, Method};
//! use tenantlayer::params::RequestParams;
//! use serde_json::json;
//!
//! let api = Api::new(store, registry);
//! let response = api
//!     .handle(
//!         ApiRequest::new(Method::Get, "/collection/todos")
//!             .with_key(key)
//!             .with_params(RequestParams::from_value(json!({ "q": [["done", false]] }))),
//!     )
//!     .await;
//! assert_eq!(response.status, 200);
//! ```

use bson::{Bson, Document};
use chrono::Utc;
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use tenantlayer_core::{
    backend::StoreBackend,
    error::{DocumentStoreError, DocumentStoreResult},
    filter::FilterParser,
    params::RequestParams,
    query::Expr,
    spec::QuerySpec,
    store::DocumentStore,
    tenant::{IdentityResolver, KeyRegistry, RequestContext, TenantDirectory, TenantId},
    update::UpdateSpec,
    value::{bson_to_json, document_from_json, json_to_bson},
};

/// Request methods the route table distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "GET" => Some(Method::Get),
            "POST" => Some(Method::Post),
            "PUT" => Some(Method::Put),
            "DELETE" => Some(Method::Delete),
            _ => None,
        }
    }
}

/// A decoded request.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    /// The API key the caller presented, if any.
    pub key: Option<String>,
    /// Correlation id to carry into logs. Generated when absent.
    pub request_id: Option<String>,
    pub params: RequestParams,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            key: None,
            request_id: None,
            params: RequestParams::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_params(mut self, params: RequestParams) -> Self {
        self.params = params;
        self
    }
}

/// A status code and JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    /// Renders an error as `{ "error": kind, "message": text }`.
    pub fn from_error(error: &DocumentStoreError) -> Self {
        Self {
            status: error.status_code(),
            body: json!({ "error": error.kind(), "message": error.to_string() }),
        }
    }

    fn route_not_found(method: Method, path: &str) -> Self {
        Self {
            status: 404,
            body: json!({
                "error": "route_not_found",
                "message": format!("no route for {method:?} {path}"),
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Routes requests to a document store on behalf of key-authenticated tenants.
///
/// # Type Parameters
///
/// * `B` - The backend implementation type
/// * `D` - Where tenants and their keys live
#[derive(Debug)]
pub struct Api<B: StoreBackend, D: TenantDirectory = KeyRegistry> {
    store: DocumentStore<B>,
    directory: D,
    admin_key: Option<String>,
}

impl<B: StoreBackend, D: TenantDirectory> Api<B, D> {
    pub fn new(store: DocumentStore<B>, directory: D) -> Self {
        Self { store, directory, admin_key: None }
    }

    /// Opens the admin routes to callers presenting `key`.
    pub fn with_admin_key(mut self, key: impl Into<String>) -> Self {
        self.admin_key = Some(key.into());
        self
    }

    pub fn store(&self) -> &DocumentStore<B> {
        &self.store
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }

    /// Handles one request. Failures are rendered as error responses, never as partial
    /// success bodies.
    #[instrument(skip_all, fields(method = ?request.method, path = %request.path))]
    pub async fn handle(&self, request: ApiRequest) -> ApiResponse {
        match self.dispatch(request).await {
            Ok(response) => response,
            Err(error) => {
                if error.is_client_error() {
                    debug!(%error, "request rejected");
                } else {
                    warn!(%error, "request failed");
                }
                ApiResponse::from_error(&error)
            }
        }
    }

    /// Deletes everything a tenant owns across all collections and revokes its keys.
    ///
    /// Returns the number of records removed.
    pub async fn remove_tenant(&self, tenant: &TenantId) -> DocumentStoreResult<u64> {
        let removed = self.store.purge_tenant(tenant).await?;
        self.directory.revoke_tenant(tenant).await?;
        Ok(removed)
    }

    async fn dispatch(&self, request: ApiRequest) -> DocumentStoreResult<ApiResponse> {
        let path = request.path.trim_matches('/');
        let segments: Vec<&str> = path.split('/').collect();
        let method = request.method;

        match (method, segments.as_slice()) {
            (Method::Get, ["system", "time"]) => {
                return Ok(ApiResponse::ok(json!(Utc::now().timestamp())));
            }
            (Method::Post, ["apps"])
            | (Method::Get, ["apps", "list"])
            | (Method::Get, ["apps", "by_name", _]) => {
                self.authorize_admin(&request)?;
                return self.admin(method, &segments, &request.params).await;
            }
            _ => {}
        }

        let ctx = self.authenticate(&request).await?;
        let params = &request.params;

        match (method, segments.as_slice()) {
            (_, ["collection", name]) => self.collection(method, &ctx, name, params).await,
            (_, ["collection", name, id]) => {
                self.record(method, &ctx, name, id, params).await
            }
            (Method::Get | Method::Post, ["channels", path @ ..]) if !path.is_empty() => {
                self.channel(method, &ctx, &path.join("/"), params).await
            }
            (Method::Get, ["key", name]) => Ok(ApiResponse::ok(bson_to_json(
                &self.store.keys(&ctx).get(name).await?,
            ))),
            (Method::Post, ["key", name]) => {
                let value = params.get("value").map(json_to_bson).unwrap_or(Bson::Null);
                let entry = self.store.keys(&ctx).set(name, value).await?;
                Ok(ApiResponse::ok(bson_to_json(&entry)))
            }
            (Method::Get, ["apps", "keys"]) => Ok(ApiResponse::ok(serde_json::to_value(
                self.directory.keys(ctx.tenant()).await,
            )?)),
            (Method::Post, ["apps", "keys"]) => Ok(ApiResponse::ok(serde_json::to_value(
                self.directory.generate_key(ctx.tenant()).await?,
            )?)),
            (Method::Delete, ["apps", "keys", key]) => {
                let revoked = self.directory.revoke_key(ctx.tenant(), key).await;
                Ok(ApiResponse::ok(json!({ "success": revoked })))
            }
            (_, ["apps", kind @ ("configs" | "modules"), rest @ ..]) if rest.len() <= 1 => {
                self.named(method, &ctx, kind, rest.first().copied(), params).await
            }
            (Method::Delete, ["apps"]) => {
                let removed = self.remove_tenant(ctx.tenant()).await?;
                Ok(ApiResponse::ok(json!({ "success": true, "removed": removed })))
            }
            _ => Ok(ApiResponse::route_not_found(method, &request.path)),
        }
    }

    async fn authenticate(&self, request: &ApiRequest) -> DocumentStoreResult<RequestContext> {
        let key = request
            .key
            .as_deref()
            .ok_or_else(|| DocumentStoreError::Unauthorized("missing api key".to_string()))?;
        let tenant = self.directory.resolve(key).await?;

        let ctx = RequestContext::new(tenant);
        Ok(match &request.request_id {
            Some(request_id) => ctx.with_request_id(request_id.as_str()),
            None => ctx,
        })
    }

    fn authorize_admin(&self, request: &ApiRequest) -> DocumentStoreResult<()> {
        let key = request
            .key
            .as_deref()
            .ok_or_else(|| DocumentStoreError::Unauthorized("missing api key".to_string()))?;

        match &self.admin_key {
            Some(admin_key) if admin_key == key => Ok(()),
            _ => Err(DocumentStoreError::Forbidden("admin key required".to_string())),
        }
    }

    async fn admin(
        &self,
        method: Method,
        segments: &[&str],
        params: &RequestParams,
    ) -> DocumentStoreResult<ApiResponse> {
        match (method, segments) {
            (Method::Post, ["apps"]) => {
                let app = params.structured("app").unwrap_or(Value::Null);
                let name = app.get("name").and_then(Value::as_str).ok_or_else(|| {
                    DocumentStoreError::InvalidDocument("app needs a name".to_string())
                })?;
                let (tenant, key) = self.directory.provision(name).await?;
                Ok(ApiResponse::ok(json!({
                    "app": serde_json::to_value(tenant)?,
                    "key": serde_json::to_value(key)?,
                })))
            }
            (Method::Get, ["apps", "list"]) => {
                Ok(ApiResponse::ok(serde_json::to_value(self.directory.tenants().await)?))
            }
            (Method::Get, ["apps", "by_name", name]) => Ok(ApiResponse::ok(
                serde_json::to_value(self.directory.tenant_by_name(name).await)?,
            )),
            _ => Ok(ApiResponse::route_not_found(method, &segments.join("/"))),
        }
    }

    async fn named(
        &self,
        method: Method,
        ctx: &RequestContext,
        kind: &str,
        name: Option<&str>,
        params: &RequestParams,
    ) -> DocumentStoreResult<ApiResponse> {
        let records = if kind == "configs" {
            self.store.configs(ctx)
        } else {
            self.store.modules(ctx)
        };

        match (method, name) {
            (Method::Get, None) => Ok(ApiResponse::ok(Value::Array(
                records.list().await?.iter().map(bson_to_json).collect(),
            ))),
            // A batch of configs, or a single module
            (Method::Post, None) if kind == "configs" => {
                let configs = match params.structured("configs") {
                    Some(Value::Array(items)) => items
                        .iter()
                        .map(document_from_json)
                        .collect::<DocumentStoreResult<Vec<_>>>()?,
                    Some(_) => {
                        return Err(DocumentStoreError::InvalidDocument(
                            "configs must be an array".to_string(),
                        ));
                    }
                    None => Vec::new(),
                };
                records.put_all(configs).await?;
                Ok(ApiResponse::ok(json!({ "success": true })))
            }
            (Method::Post, None) => {
                let module = match params.structured("module") {
                    Some(module) => document_from_json(&module)?,
                    None => Document::new(),
                };
                Ok(ApiResponse::ok(bson_to_json(&records.put(module).await?)))
            }
            (Method::Delete, Some(name)) => {
                let removed = records.remove(name).await?;
                Ok(ApiResponse::ok(json!({ "success": removed > 0 })))
            }
            _ => Ok(ApiResponse::route_not_found(method, &format!("/apps/{kind}"))),
        }
    }

    fn filter(&self, params: &RequestParams) -> DocumentStoreResult<Option<Expr>> {
        match params.structured("q") {
            Some(value) => FilterParser::new(self.store.config()).parse(&value),
            None => Ok(None),
        }
    }

    async fn collection(
        &self,
        method: Method,
        ctx: &RequestContext,
        name: &str,
        params: &RequestParams,
    ) -> DocumentStoreResult<ApiResponse> {
        let collection = self.store.collection(ctx, name)?;

        match method {
            Method::Get => {
                let spec = QuerySpec::parse(params, self.store.config())?;
                Ok(ApiResponse::ok(collection.find(spec).await?.into_json()))
            }
            Method::Post => {
                let record = collection.create(payload(params)?).await?;
                Ok(ApiResponse::ok(bson_to_json(&record)))
            }
            Method::Put => {
                let filter = self.filter(params)?;
                let report = collection.update(filter, UpdateSpec::parse(params)?).await?;
                Ok(ApiResponse::ok(serde_json::to_value(report)?))
            }
            Method::Delete => {
                let deleted = collection.delete(self.filter(params)?).await?;
                Ok(ApiResponse::ok(json!({ "success": deleted })))
            }
        }
    }

    async fn record(
        &self,
        method: Method,
        ctx: &RequestContext,
        name: &str,
        id: &str,
        params: &RequestParams,
    ) -> DocumentStoreResult<ApiResponse> {
        let collection = self.store.collection(ctx, name)?;

        match method {
            Method::Get => Ok(ApiResponse::ok(bson_to_json(&collection.find_by_id(id).await?))),
            Method::Put => {
                let record = collection.update_by_id(id, UpdateSpec::parse(params)?).await?;
                Ok(ApiResponse::ok(bson_to_json(&record)))
            }
            // Plain field replacement only
            Method::Post => {
                collection.update_by_id(id, UpdateSpec::raw(payload(params)?)).await?;
                Ok(ApiResponse::ok(json!({ "success": true })))
            }
            Method::Delete => {
                collection.delete_by_id(id).await?;
                Ok(ApiResponse::ok(json!({ "success": true })))
            }
        }
    }

    async fn channel(
        &self,
        method: Method,
        ctx: &RequestContext,
        path: &str,
        params: &RequestParams,
    ) -> DocumentStoreResult<ApiResponse> {
        let channel = self.store.channel(ctx, path)?;

        if method == Method::Post {
            let message = channel.publish(payload(params)?).await?;
            return Ok(ApiResponse::ok(bson_to_json(&message)));
        }

        let messages = channel.messages(self.filter(params)?).await?;
        Ok(ApiResponse::ok(Value::Array(messages.iter().map(bson_to_json).collect())))
    }
}

/// The `data` object of a write request; absent data is an empty record.
fn payload(params: &RequestParams) -> DocumentStoreResult<Document> {
    match params.structured("data") {
        Some(data) => document_from_json(&data),
        None => Ok(Document::new()),
    }
}
