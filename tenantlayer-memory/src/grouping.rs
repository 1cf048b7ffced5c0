//! Sorting, grouping and aggregation over in-memory result sets.

use std::cmp::Ordering;
use bson::{Bson, Document};

use tenantlayer_core::{
    error::DocumentStoreResult,
    query::{Aggregate, AggregateMethod, AggregateRow, Sort, SortDirection},
    value::{add_numeric, as_f64, is_numeric},
};

use crate::evaluator::{compare_values, lookup, values_equal};

/// Stable multi-key sort. Later keys only break ties left by earlier ones.
pub(crate) fn sort_documents(documents: &mut [Document], keys: &[Sort]) {
    if keys.is_empty() {
        return;
    }

    documents.sort_by(|a, b| {
        keys.iter().fold(Ordering::Equal, |ordering, key| {
            ordering.then_with(|| {
                let ordering = compare_values(lookup(a, &key.field), lookup(b, &key.field));
                match key.direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                }
            })
        })
    });
}

/// The group key of a document: the values of `fields`, missing values as null.
pub(crate) fn group_key(document: &Document, fields: &[String]) -> Document {
    fields
        .iter()
        .map(|field| {
            (
                field.clone(),
                lookup(document, field).cloned().unwrap_or(Bson::Null),
            )
        })
        .collect()
}

fn same_group(left: &Document, right: &Document) -> bool {
    left.iter()
        .zip(right.iter())
        .all(|((_, a), (_, b))| values_equal(Some(a), Some(b)))
}

fn compare_groups(left: &Document, right: &Document) -> Ordering {
    left.iter()
        .zip(right.iter())
        .fold(Ordering::Equal, |ordering, ((_, a), (_, b))| {
            ordering.then_with(|| compare_values(Some(a), Some(b)))
        })
}

/// Splits documents into groups in order of first appearance.
fn partition(documents: Vec<Document>, fields: &[String]) -> Vec<(Document, Vec<Document>)> {
    let mut groups: Vec<(Document, Vec<Document>)> = Vec::new();

    for document in documents {
        let key = group_key(&document, fields);
        match groups.iter_mut().find(|(existing, _)| same_group(existing, &key)) {
            Some((_, members)) => members.push(document),
            None => groups.push((key, vec![document])),
        }
    }

    groups
}

/// Keeps the first document of every distinct group key, preserving input order.
pub(crate) fn first_per_group(documents: Vec<Document>, fields: &[String]) -> Vec<Document> {
    if fields.is_empty() {
        return documents;
    }

    partition(documents, fields)
        .into_iter()
        .filter_map(|(_, members)| members.into_iter().next())
        .collect()
}

/// Number of distinct group keys among `documents`.
pub(crate) fn count_groups(documents: Vec<Document>, fields: &[String]) -> u64 {
    partition(documents, fields).len() as u64
}

/// Computes `aggregate` over `documents`, once per group when `fields` is non-empty.
///
/// Grouped rows come back ordered by group key ascending. An ungrouped aggregate always
/// yields exactly one row.
pub(crate) fn aggregate(
    documents: Vec<Document>,
    fields: &[String],
    aggregate: &Aggregate,
) -> DocumentStoreResult<Vec<AggregateRow>> {
    if fields.is_empty() {
        return Ok(vec![AggregateRow {
            group: Document::new(),
            value: compute(&documents, aggregate)?,
        }]);
    }

    let mut rows = partition(documents, fields)
        .into_iter()
        .map(|(group, members)| {
            Ok(AggregateRow { group, value: compute(&members, aggregate)? })
        })
        .collect::<DocumentStoreResult<Vec<_>>>()?;

    rows.sort_by(|a, b| compare_groups(&a.group, &b.group));
    Ok(rows)
}

fn compute(documents: &[Document], aggregate: &Aggregate) -> DocumentStoreResult<Bson> {
    let field = match (&aggregate.method, &aggregate.field) {
        (AggregateMethod::Count, _) => return Ok(Bson::Int64(documents.len() as i64)),
        (_, Some(field)) => field.as_str(),
        (method, None) => return Ok(method.empty_value()),
    };

    let values = documents
        .iter()
        .filter_map(|document| lookup(document, field))
        .filter(|value| !matches!(value, Bson::Null));

    match aggregate.method {
        AggregateMethod::Sum => values
            .filter(|value| is_numeric(value))
            .try_fold(Bson::Int64(0), |total, value| add_numeric(field, Some(&total), value)),
        AggregateMethod::Avg => {
            let numbers = values.filter_map(as_f64).collect::<Vec<_>>();
            if numbers.is_empty() {
                Ok(Bson::Null)
            } else {
                Ok(Bson::Double(numbers.iter().sum::<f64>() / numbers.len() as f64))
            }
        }
        AggregateMethod::Max => Ok(values
            .max_by(|a, b| compare_values(Some(*a), Some(*b)))
            .cloned()
            .unwrap_or(Bson::Null)),
        AggregateMethod::Min => Ok(values
            .min_by(|a, b| compare_values(Some(*a), Some(*b)))
            .cloned()
            .unwrap_or(Bson::Null)),
        AggregateMethod::Count => Ok(Bson::Int64(documents.len() as i64)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn docs() -> Vec<Document> {
        vec![
            doc! { "_id": "1", "status": "open", "priority": 2, "title": "b" },
            doc! { "_id": "2", "status": "done", "priority": 5, "title": "a" },
            doc! { "_id": "3", "status": "open", "priority": 5, "title": "c" },
            doc! { "_id": "4", "status": "open", "title": "d" },
        ]
    }

    fn ids(documents: &[Document]) -> Vec<&str> {
        documents.iter().map(|d| d.get_str("_id").unwrap()).collect()
    }

    #[test]
    fn multi_key_sort_is_stable() {
        let mut documents = docs();
        sort_documents(&mut documents, &[Sort::desc("priority")]);
        assert_eq!(ids(&documents), ["2", "3", "1", "4"]);

        let mut documents = docs();
        sort_documents(&mut documents, &[Sort::desc("priority"), Sort::desc("title")]);
        assert_eq!(ids(&documents), ["3", "2", "1", "4"]);
    }

    #[test]
    fn grouping_keeps_first_member() {
        let kept = first_per_group(docs(), &["status".to_string()]);
        assert_eq!(ids(&kept), ["1", "2"]);
        assert_eq!(count_groups(docs(), &["status".to_string()]), 2);
    }

    #[test]
    fn aggregates_skip_missing_values() {
        let sum = aggregate(docs(), &[], &Aggregate::of(AggregateMethod::Sum, "priority")).unwrap();
        assert_eq!(sum[0].value, Bson::Int64(12));

        let avg = aggregate(docs(), &[], &Aggregate::of(AggregateMethod::Avg, "priority")).unwrap();
        assert_eq!(avg[0].value, Bson::Double(4.0));

        let max = aggregate(docs(), &[], &Aggregate::of(AggregateMethod::Max, "priority")).unwrap();
        assert_eq!(max[0].value, Bson::Int32(5));

        let count = aggregate(docs(), &[], &Aggregate::count()).unwrap();
        assert_eq!(count[0].value, Bson::Int64(4));
    }

    #[test]
    fn empty_sets() {
        let sum = aggregate(vec![], &[], &Aggregate::of(AggregateMethod::Sum, "n")).unwrap();
        assert_eq!(sum[0].value, Bson::Int64(0));
        let min = aggregate(vec![], &[], &Aggregate::of(AggregateMethod::Min, "n")).unwrap();
        assert_eq!(min[0].value, Bson::Null);
    }

    #[test]
    fn grouped_rows_are_ordered_by_key() {
        let rows = aggregate(docs(), &["status".to_string()], &Aggregate::count()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].group, doc! { "status": "done" });
        assert_eq!(rows[0].value, Bson::Int64(1));
        assert_eq!(rows[1].group, doc! { "status": "open" });
        assert_eq!(rows[1].value, Bson::Int64(3));
    }

    #[test]
    fn mixed_sum_promotes_to_double() {
        let documents = vec![doc! { "n": 1 }, doc! { "n": 2.5 }, doc! { "n": "x" }];
        let sum = aggregate(documents, &[], &Aggregate::of(AggregateMethod::Sum, "n")).unwrap();
        assert_eq!(sum[0].value, Bson::Double(3.5));
    }
}
