//! Query execution planning.
//!
//! A [`QuerySpec`] maps to exactly one [`ExecutionPlan`], chosen in this order:
//!
//! 1. [`ExecutionPlan::Aggregate`] when an aggregation is requested. Sorting and
//!    pagination are ignored.
//! 2. [`ExecutionPlan::Paginate`] when a page descriptor is present.
//! 3. [`ExecutionPlan::First`] when only the first record is wanted.
//! 4. [`ExecutionPlan::Fetch`] otherwise.

use bson::Bson;
use serde_json::{Value, json};

use crate::{
    backend::StoreBackend,
    error::DocumentStoreResult,
    page::{Page, PaginationParams},
    query::{AggregateMethod, AggregateRow, Query},
    scope::{ScopedAggregate, ScopedQuery, TenantScope},
    spec::QuerySpec,
    value::bson_to_json,
};

/// A scoped, ready-to-run read.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionPlan {
    Aggregate(ScopedAggregate),
    Paginate {
        query: ScopedQuery,
        page: PaginationParams,
    },
    First(ScopedQuery),
    Fetch(ScopedQuery),
}

impl ExecutionPlan {
    /// Chooses the plan for a request and confines it to the caller's tenant.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::DocumentStoreError::ForbiddenFilter`] if the filter names the
    /// tenant field.
    pub fn from_spec(spec: QuerySpec, scope: &TenantScope) -> DocumentStoreResult<Self> {
        let QuerySpec {
            filter,
            sort,
            group_by,
            offset,
            limit,
            aggregate,
            page,
            first,
        } = spec;

        if let Some(aggregate) = aggregate {
            return Ok(ExecutionPlan::Aggregate(
                scope.aggregate(filter, group_by, aggregate)?,
            ));
        }

        let query = Query { filter, sort, group_by, offset, limit };

        if let Some(page) = page {
            let query = Query {
                offset: Some(page.offset()),
                limit: Some(page.per_page),
                ..query
            };
            return Ok(ExecutionPlan::Paginate { query: scope.query(query)?, page });
        }

        if first {
            let query = Query { limit: Some(1), ..query };
            return Ok(ExecutionPlan::First(scope.query(query)?));
        }

        Ok(ExecutionPlan::Fetch(scope.query(query)?))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionPlan::Aggregate(_) => "aggregate",
            ExecutionPlan::Paginate { .. } => "paginate",
            ExecutionPlan::First(_) => "first",
            ExecutionPlan::Fetch(_) => "fetch",
        }
    }

    /// Runs the plan against one collection.
    pub async fn execute<B: StoreBackend>(
        self,
        backend: &B,
        collection: &str,
    ) -> DocumentStoreResult<QueryOutcome> {
        match self {
            ExecutionPlan::Aggregate(scoped) => {
                let query = scoped.into_aggregate();
                let method = query.aggregate.method;
                let grouped = !query.group_by.is_empty();
                let rows = backend.aggregate_documents(query, collection).await?;

                if grouped {
                    Ok(QueryOutcome::GroupedAggregate(rows))
                } else {
                    Ok(QueryOutcome::Aggregate(ungrouped_value(method, rows)))
                }
            }
            ExecutionPlan::Paginate { query, page } => {
                let query = query.into_query();
                let count_query = Query { offset: None, limit: None, ..query.clone() };

                let total = backend.count_documents(count_query, collection).await?;
                let items = backend.query_documents(query, collection).await?;

                Ok(QueryOutcome::Page(page.page_of(items, total as usize)))
            }
            ExecutionPlan::First(query) => {
                let mut records = backend.query_documents(query.into_query(), collection).await?;
                Ok(QueryOutcome::First(if records.is_empty() {
                    None
                } else {
                    Some(records.swap_remove(0))
                }))
            }
            ExecutionPlan::Fetch(query) => Ok(QueryOutcome::Records(
                backend.query_documents(query.into_query(), collection).await?,
            )),
        }
    }
}

fn ungrouped_value(method: AggregateMethod, rows: Vec<AggregateRow>) -> Bson {
    match rows.into_iter().next() {
        Some(row) if row.value != Bson::Null => row.value,
        _ => method.empty_value(),
    }
}

/// The result of a read.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Records(Vec<Bson>),
    Page(Page<Bson>),
    First(Option<Bson>),
    Aggregate(Bson),
    GroupedAggregate(Vec<AggregateRow>),
}

impl QueryOutcome {
    /// Renders the outcome as the JSON body a client receives.
    pub fn into_json(self) -> Value {
        match self {
            QueryOutcome::Records(records) => {
                Value::Array(records.iter().map(bson_to_json).collect())
            }
            QueryOutcome::Page(page) => {
                let page = page.map(|record| bson_to_json(&record));
                json!({
                    "items": page.items,
                    "total_count": page.total_count,
                    "page": page.page,
                    "page_size": page.page_size,
                    "next_page": page.next_page,
                    "previous_page": page.previous_page,
                })
            }
            QueryOutcome::First(record) => record.as_ref().map(bson_to_json).unwrap_or(Value::Null),
            QueryOutcome::Aggregate(value) => bson_to_json(&value),
            QueryOutcome::GroupedAggregate(rows) => Value::Array(
                rows.into_iter()
                    .map(|row| {
                        json!({
                            "group": bson_to_json(&Bson::Document(row.group)),
                            "value": bson_to_json(&row.value),
                        })
                    })
                    .collect(),
            ),
        }
    }

    /// The records of a fetch, page or first-only outcome.
    pub fn into_records(self) -> Vec<Bson> {
        match self {
            QueryOutcome::Records(records) => records,
            QueryOutcome::Page(page) => page.items,
            QueryOutcome::First(record) => record.into_iter().collect(),
            QueryOutcome::Aggregate(_) | QueryOutcome::GroupedAggregate(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        query::{Aggregate, Filter},
        tenant::{RequestContext, TenantId},
    };

    fn scope() -> TenantScope {
        TenantScope::new(&RequestContext::new(TenantId::new("a").unwrap()))
    }

    #[test]
    fn aggregation_takes_precedence() {
        let spec = QuerySpec::new()
            .with_aggregate(Aggregate::count())
            .with_page(PaginationParams::new(1, 10))
            .first_only();
        let plan = ExecutionPlan::from_spec(spec, &scope()).unwrap();
        assert_eq!(plan.kind(), "aggregate");
    }

    #[test]
    fn page_overrides_offset_and_limit() {
        let spec = QuerySpec::new()
            .with_offset(3)
            .with_limit(2)
            .with_page(PaginationParams::new(2, 5))
            .first_only();

        match ExecutionPlan::from_spec(spec, &scope()).unwrap() {
            ExecutionPlan::Paginate { query, page } => {
                assert_eq!(page, PaginationParams::new(2, 5));
                assert_eq!(query.query().offset, Some(5));
                assert_eq!(query.query().limit, Some(5));
            }
            other => panic!("expected paginate, got {}", other.kind()),
        }
    }

    #[test]
    fn first_keeps_offset_and_limits_to_one() {
        let spec = QuerySpec::new().with_offset(4).first_only();
        match ExecutionPlan::from_spec(spec, &scope()).unwrap() {
            ExecutionPlan::First(query) => {
                assert_eq!(query.query().offset, Some(4));
                assert_eq!(query.query().limit, Some(1));
            }
            other => panic!("expected first, got {}", other.kind()),
        }
    }

    #[test]
    fn every_plan_is_scoped() {
        let spec = QuerySpec::new().with_filter(Filter::eq("done", true));
        match ExecutionPlan::from_spec(spec, &scope()).unwrap() {
            ExecutionPlan::Fetch(query) => assert_eq!(
                query.query().filter,
                Some(Filter::and([Filter::eq("app_id", "a"), Filter::eq("done", true)]))
            ),
            other => panic!("expected fetch, got {}", other.kind()),
        }
    }

    #[test]
    fn empty_ungrouped_aggregates_use_sentinels() {
        assert_eq!(ungrouped_value(AggregateMethod::Sum, vec![]), Bson::Int64(0));
        assert_eq!(ungrouped_value(AggregateMethod::Count, vec![]), Bson::Int64(0));
        assert_eq!(ungrouped_value(AggregateMethod::Max, vec![]), Bson::Null);
    }

    #[test]
    fn grouped_rows_render_as_objects() {
        let outcome = QueryOutcome::GroupedAggregate(vec![AggregateRow {
            group: bson::doc! { "status": "open" },
            value: Bson::Int64(2),
        }]);
        assert_eq!(
            outcome.into_json(),
            json!([{ "group": { "status": "open" }, "value": 2 }])
        );
    }
}
