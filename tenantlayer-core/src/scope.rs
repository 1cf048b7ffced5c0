//! Tenant scoping of every backend operation.
//!
//! The collection layer only hands backends values produced here. [`ScopedFilter`],
//! [`ScopedQuery`] and [`ScopedAggregate`] cannot be built outside this module, and each one
//! carries `app_id == tenant` AND-ed with the caller's predicate exactly once.

use bson::{Bson, Document};
use tracing::{debug, warn};

use crate::{
    error::{DocumentStoreError, DocumentStoreResult},
    query::{Aggregate, AggregateQuery, Expr, FieldOp, Filter, Query, QueryVisitor},
    record::{self, CREATED_AT_FIELD, ID_FIELD, TENANT_FIELD, UPDATED_AT_FIELD},
    tenant::{RequestContext, TenantId},
};

/// A filter confined to one tenant.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopedFilter(Expr);

impl ScopedFilter {
    pub fn expr(&self) -> &Expr {
        &self.0
    }

    pub fn into_expr(self) -> Expr {
        self.0
    }
}

/// A query whose filter is confined to one tenant.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopedQuery(Query);

impl ScopedQuery {
    pub fn query(&self) -> &Query {
        &self.0
    }

    pub fn into_query(self) -> Query {
        self.0
    }
}

/// An aggregation whose filter is confined to one tenant.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopedAggregate(AggregateQuery);

impl ScopedAggregate {
    pub fn aggregate(&self) -> &AggregateQuery {
        &self.0
    }

    pub fn into_aggregate(self) -> AggregateQuery {
        self.0
    }
}

/// The scoping guard for one authenticated caller.
#[derive(Debug, Clone)]
pub struct TenantScope {
    tenant: TenantId,
}

impl TenantScope {
    pub fn new(ctx: &RequestContext) -> Self {
        Self { tenant: ctx.tenant().clone() }
    }

    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    fn predicate(&self) -> Expr {
        Filter::eq(TENANT_FIELD, self.tenant.as_str())
    }

    /// Confines a filter to the tenant.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::ForbiddenFilter`] if the filter names the tenant field.
    pub fn filter(&self, filter: Option<Expr>) -> DocumentStoreResult<ScopedFilter> {
        Ok(ScopedFilter(match filter {
            Some(filter) => {
                reject_tenant_field(&filter)?;
                Expr::And(vec![self.predicate(), filter])
            }
            None => self.predicate(),
        }))
    }

    /// Confines a filter to one record of the tenant.
    pub fn by_id(&self, id: &str) -> ScopedFilter {
        ScopedFilter(Expr::And(vec![self.predicate(), Filter::eq(ID_FIELD, id)]))
    }

    /// Confines a query to the tenant.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::ForbiddenFilter`] if the filter names the tenant field.
    pub fn query(&self, mut query: Query) -> DocumentStoreResult<ScopedQuery> {
        query.filter = Some(self.filter(query.filter.take())?.into_expr());
        Ok(ScopedQuery(query))
    }

    /// Confines an aggregation to the tenant.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::ForbiddenFilter`] if the filter names the tenant field.
    pub fn aggregate(
        &self,
        filter: Option<Expr>,
        group_by: Vec<String>,
        aggregate: Aggregate,
    ) -> DocumentStoreResult<ScopedAggregate> {
        Ok(ScopedAggregate(AggregateQuery {
            filter: Some(self.filter(filter)?.into_expr()),
            group_by,
            aggregate,
        }))
    }

    /// Turns a client payload into a new record owned by the tenant.
    ///
    /// Client-supplied `_id`, `app_id` and `created_at` are dropped; the record gets a fresh
    /// id, the tenant field and both timestamps.
    pub fn stamp(&self, mut payload: Document) -> Document {
        let stripped = record::strip_protected(&mut payload);
        if !stripped.is_empty() {
            debug!(?stripped, "dropped server-managed fields from payload");
        }

        let now = record::now();
        let mut stamped = Document::new();
        stamped.insert(ID_FIELD, record::new_record_id());
        stamped.insert(TENANT_FIELD, self.tenant.as_str());
        for (key, value) in payload {
            stamped.insert(key, value);
        }
        stamped.insert(CREATED_AT_FIELD, now.clone());
        stamped.insert(UPDATED_AT_FIELD, now);
        stamped
    }
}

/// Fails if any leaf of the expression names the tenant field.
fn reject_tenant_field(expr: &Expr) -> DocumentStoreResult<()> {
    TenantFieldCheck.visit_expr(expr)
}

struct TenantFieldCheck;

impl TenantFieldCheck {
    fn check(&self, field: &str) -> DocumentStoreResult<()> {
        if field == TENANT_FIELD {
            warn!(field, "filter referenced the tenant scoping field");
            return Err(DocumentStoreError::ForbiddenFilter(format!(
                "filtering on {TENANT_FIELD} is not allowed"
            )));
        }
        Ok(())
    }
}

impl QueryVisitor for TenantFieldCheck {
    type Output = ();
    type Error = DocumentStoreError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<(), DocumentStoreError> {
        exprs.iter().try_for_each(|expr| self.visit_expr(expr))
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<(), DocumentStoreError> {
        exprs.iter().try_for_each(|expr| self.visit_expr(expr))
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<(), DocumentStoreError> {
        self.visit_expr(expr)
    }

    fn visit_exists(&mut self, field: &str, _should_exist: bool) -> Result<(), DocumentStoreError> {
        self.check(field)
    }

    fn visit_field(
        &mut self,
        field: &str,
        _op: &FieldOp,
        _value: &Bson,
    ) -> Result<(), DocumentStoreError> {
        self.check(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn scope(tenant: &str) -> TenantScope {
        TenantScope::new(&RequestContext::new(TenantId::new(tenant).unwrap()))
    }

    #[test]
    fn wraps_filters_once() {
        let scoped = scope("a").filter(Some(Filter::eq("title", "x"))).unwrap();
        assert_eq!(
            scoped.into_expr(),
            Expr::And(vec![Filter::eq("app_id", "a"), Filter::eq("title", "x")])
        );

        let scoped = scope("a").filter(None).unwrap();
        assert_eq!(scoped.into_expr(), Filter::eq("app_id", "a"));
    }

    #[test]
    fn programmatic_filters_on_the_tenant_field_are_rejected() {
        let forged = Filter::or([Filter::eq("title", "x"), Filter::eq("app_id", "b")]);
        let err = scope("a").filter(Some(forged)).unwrap_err();
        assert!(matches!(err, DocumentStoreError::ForbiddenFilter(_)));

        let query = Query::builder().filter(Filter::not_exists("app_id")).build();
        assert!(scope("a").query(query).is_err());
    }

    #[test]
    fn scoped_query_keeps_shape() {
        let query = Query::builder().sort("title", crate::query::SortDirection::Asc).limit(3).build();
        let scoped = scope("a").query(query).unwrap().into_query();
        assert_eq!(scoped.filter, Some(Filter::eq("app_id", "a")));
        assert_eq!(scoped.limit, Some(3));
        assert_eq!(scoped.sort.len(), 1);
    }

    #[test]
    fn stamp_overrides_client_identity() {
        let record = scope("a").stamp(doc! {
            "_id": "forged", "app_id": "b", "created_at": 0, "title": "x",
        });

        assert_eq!(record.get_str("app_id").unwrap(), "a");
        assert_ne!(record.get_str("_id").unwrap(), "forged");
        assert_eq!(record.get_str("title").unwrap(), "x");
        assert!(record.get_datetime("created_at").is_ok());
        assert!(record.get_datetime("updated_at").is_ok());
    }
}
