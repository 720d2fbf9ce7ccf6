//! Query-parameter filters (`?name=eq:foo&created_at=gt:2024-01-01`) and their translation
//! into parameterized SQLite predicates.

use std::collections::BTreeMap;

use lazy_static::lazy_static;
use regex::Regex;
use sqlx::{QueryBuilder, Sqlite};

use crate::model::params::{QueryParams, LIMIT, SKIP, SORT_BY};

lazy_static! {
    static ref FILTER_REGEX: Regex = Regex::new(r"^([~\w]+):([\w\x2D-\x5F ]+)$").expect("static regex");
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("there are errors in the query parameter filters specified")]
    Malformed,
    #[error("the specified column cannot be filtered: {0}")]
    ColumnNotFilterable(String),
    #[error("the specified filter predicate is not supported for this column: {0} {1}")]
    PredicateNotSupported(String, String),
    #[error("column format does not support sorting: {0}")]
    NotSortable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    GreaterThan,
    GreaterThanOrEquals,
    LessThan,
    LessThanOrEquals,
    Equals,
    NotEquals,
    ApproximatelyEquals,
}

impl FilterOperator {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "gt" => Some(Self::GreaterThan),
            "gte" => Some(Self::GreaterThanOrEquals),
            "lt" => Some(Self::LessThan),
            "lte" => Some(Self::LessThanOrEquals),
            "eq" => Some(Self::Equals),
            "neq" => Some(Self::NotEquals),
            "~eq" => Some(Self::ApproximatelyEquals),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GreaterThan => "gt",
            Self::GreaterThanOrEquals => "gte",
            Self::LessThan => "lt",
            Self::LessThanOrEquals => "lte",
            Self::Equals => "eq",
            Self::NotEquals => "neq",
            Self::ApproximatelyEquals => "~eq",
        }
    }

    fn sql(&self) -> &'static str {
        match self {
            Self::GreaterThan => ">",
            Self::GreaterThanOrEquals => ">=",
            Self::LessThan => "<",
            Self::LessThanOrEquals => "<=",
            Self::Equals => "=",
            Self::NotEquals => "<>",
            Self::ApproximatelyEquals => "LIKE",
        }
    }
}

const NUMERIC_OPERATORS: &[FilterOperator] = &[
    FilterOperator::Equals,
    FilterOperator::NotEquals,
    FilterOperator::GreaterThan,
    FilterOperator::GreaterThanOrEquals,
    FilterOperator::LessThan,
    FilterOperator::LessThanOrEquals,
];
const STRING_OPERATORS: &[FilterOperator] =
    &[FilterOperator::Equals, FilterOperator::NotEquals, FilterOperator::ApproximatelyEquals];
const BOOL_OPERATORS: &[FilterOperator] = &[FilterOperator::Equals, FilterOperator::NotEquals];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Numeric,
    String,
    Time,
    Bool,
}

impl ColumnKind {
    pub fn operators(&self) -> &'static [FilterOperator] {
        match self {
            ColumnKind::Numeric | ColumnKind::Time => NUMERIC_OPERATORS,
            ColumnKind::String => STRING_OPERATORS,
            ColumnKind::Bool => BOOL_OPERATORS,
        }
    }
}

/// Filterable and sortable columns of one listing endpoint.
#[derive(Debug)]
pub struct FilterSchema {
    pub columns: &'static [(&'static str, ColumnKind)],
    pub sortable: &'static [&'static str],
}

impl FilterSchema {
    pub fn column(&self, name: &str) -> Option<ColumnKind> {
        self.columns.iter().find(|(col, _)| *col == name).map(|(_, kind)| *kind)
    }

    pub fn is_sortable(&self, name: &str) -> bool {
        self.sortable.contains(&name)
    }

    pub fn is_string_column(&self, name: &str) -> bool {
        self.column(name) == Some(ColumnKind::String)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParameterFilter {
    pub name: String,
    pub operator: FilterOperator,
    pub value: String,
    pub kind: Option<ColumnKind>,
}

#[derive(Debug, Default, Clone)]
pub struct QueryParameterFilterMap(BTreeMap<String, Vec<QueryParameterFilter>>);

impl QueryParameterFilterMap {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    pub fn get(&self, name: &str) -> Option<&[QueryParameterFilter]> {
        self.0.get(name).map(Vec::as_slice)
    }

    pub fn add(&mut self, filter: QueryParameterFilter) {
        self.0.entry(filter.name.clone()).or_default().push(filter);
    }

    /// Removes and returns the filters on `name`, for columns a handler applies itself.
    pub fn take(&mut self, name: &str) -> Vec<QueryParameterFilter> {
        self.0.remove(name).unwrap_or_default()
    }

    /// Rejects unknown columns and unsupported operators, and records each column kind
    /// so values are bound with the right SQLite type.
    pub fn validate(&mut self, schema: &FilterSchema) -> Result<(), FilterError> {
        for (name, filters) in self.0.iter_mut() {
            let kind = schema.column(name).ok_or_else(|| FilterError::ColumnNotFilterable(name.clone()))?;
            for filter in filters.iter_mut() {
                if !kind.operators().contains(&filter.operator) {
                    return Err(FilterError::PredicateNotSupported(
                        filter.name.clone(),
                        filter.operator.as_str().to_string(),
                    ));
                }
                filter.kind = Some(kind);
            }
        }
        Ok(())
    }

    /// Appends ` AND <predicate>` for every filter. Column names come from a validated
    /// schema, values are always bound.
    pub fn push_sql(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        self.push_sql_with_prefix(qb, "");
    }

    pub fn push_sql_with_prefix(&self, qb: &mut QueryBuilder<'_, Sqlite>, table_alias: &str) {
        for filter in self.0.values().flatten() {
            qb.push(" AND ");
            qb.push(table_alias);
            qb.push(&filter.name);
            push_predicate(qb, filter);
        }
    }
}

fn push_predicate(qb: &mut QueryBuilder<'_, Sqlite>, filter: &QueryParameterFilter) {
    let is_null = filter.value.eq_ignore_ascii_case("null");
    match filter.operator {
        FilterOperator::Equals if is_null => {
            qb.push(" IS NULL");
        }
        FilterOperator::NotEquals if is_null => {
            qb.push(" IS NOT NULL");
        }
        FilterOperator::ApproximatelyEquals => {
            qb.push(" LIKE '%' || ").push_bind(filter.value.clone()).push(" || '%'");
        }
        op => {
            qb.push(" ").push(op.sql()).push(" ");
            match filter.kind {
                Some(ColumnKind::Numeric) => {
                    if let Ok(v) = filter.value.parse::<i64>() {
                        qb.push_bind(v);
                    } else if let Ok(v) = filter.value.parse::<f64>() {
                        qb.push_bind(v);
                    } else {
                        qb.push_bind(filter.value.clone());
                    }
                }
                Some(ColumnKind::Bool) => match filter.value.to_ascii_lowercase().as_str() {
                    "true" => {
                        qb.push_bind(true);
                    }
                    "false" => {
                        qb.push_bind(false);
                    }
                    _ => {
                        qb.push_bind(filter.value.clone());
                    }
                },
                _ => {
                    qb.push_bind(filter.value.clone());
                }
            }
        }
    }
}

/// Parses every non-reserved query parameter as `operator:value`.
///
/// `skip`, `limit` and `sort_by` are always reserved; handlers pass their own extra
/// parameters (`include_counts`, `scope`, ...) in `reserved`.
pub fn parse_query_filters(
    params: &QueryParams,
    reserved: &[&str],
) -> Result<QueryParameterFilterMap, FilterError> {
    let mut map = QueryParameterFilterMap::default();
    for (name, raw) in params.iter() {
        if name == SKIP || name == LIMIT || name == SORT_BY || reserved.contains(&name) {
            continue;
        }
        let caps = FILTER_REGEX.captures(raw).ok_or(FilterError::Malformed)?;
        let operator = FilterOperator::parse(&caps[1]).ok_or(FilterError::Malformed)?;
        map.add(QueryParameterFilter {
            name: name.to_string(),
            operator,
            value: caps[2].to_string(),
            kind: None,
        });
    }
    Ok(map)
}

/// Parses, then validates against `schema`.
pub fn parse_validated_filters(
    params: &QueryParams,
    reserved: &[&str],
    schema: &FilterSchema,
) -> Result<QueryParameterFilterMap, FilterError> {
    let mut filters = parse_query_filters(params, reserved)?;
    filters.validate(schema)?;
    Ok(filters)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: FilterSchema = FilterSchema {
        columns: &[
            ("name", ColumnKind::String),
            ("id", ColumnKind::Numeric),
            ("is_default", ColumnKind::Bool),
            ("created_at", ColumnKind::Time),
        ],
        sortable: &["name", "id"],
    };

    fn params(pairs: &[(&str, &str)]) -> QueryParams {
        QueryParams::from_pairs(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
    }

    #[test]
    fn parses_operator_and_value() {
        let map = parse_query_filters(&params(&[("name", "~eq:tier zero"), ("skip", "10")]), &[]).unwrap();
        let filters = map.get("name").unwrap();
        assert_eq!(filters.len(), 1);
        assert_eq!(filters[0].operator, FilterOperator::ApproximatelyEquals);
        assert_eq!(filters[0].value, "tier zero");
        assert!(map.get("skip").is_none());
    }

    #[test]
    fn value_may_contain_colons() {
        let map = parse_query_filters(&params(&[("created_at", "gt:2024-01-01T10:00:00Z")]), &[]).unwrap();
        assert_eq!(map.get("created_at").unwrap()[0].value, "2024-01-01T10:00:00Z");
    }

    #[test]
    fn missing_operator_is_malformed() {
        assert_eq!(parse_query_filters(&params(&[("name", "foo")]), &[]).unwrap_err(), FilterError::Malformed);
        assert_eq!(parse_query_filters(&params(&[("name", "like:foo")]), &[]).unwrap_err(), FilterError::Malformed);
    }

    #[test]
    fn reserved_parameters_are_skipped() {
        let map = parse_query_filters(&params(&[("include_counts", "true")]), &["include_counts"]).unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn validate_rejects_unknown_column_and_operator() {
        let err = parse_validated_filters(&params(&[("nope", "eq:1")]), &[], &SCHEMA).unwrap_err();
        assert_eq!(err.to_string(), "the specified column cannot be filtered: nope");

        let err = parse_validated_filters(&params(&[("is_default", "gt:1")]), &[], &SCHEMA).unwrap_err();
        assert_eq!(err, FilterError::PredicateNotSupported("is_default".into(), "gt".into()));
    }

    #[test]
    fn builds_sql_with_binds() {
        let map = parse_validated_filters(
            &params(&[("id", "gte:3"), ("name", "eq:null"), ("is_default", "eq:true")]),
            &[],
            &SCHEMA,
        )
        .unwrap();
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM t WHERE 1=1");
        map.push_sql(&mut qb);
        assert_eq!(qb.sql(), "SELECT * FROM t WHERE 1=1 AND id >= ? AND is_default = ? AND name IS NULL");
    }

    #[test]
    fn approximate_equals_uses_like() {
        let map = parse_validated_filters(&params(&[("name", "~eq:admin")]), &[], &SCHEMA).unwrap();
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM t WHERE 1=1");
        map.push_sql_with_prefix(&mut qb, "t.");
        assert_eq!(qb.sql(), "SELECT * FROM t WHERE 1=1 AND t.name LIKE '%' || ? || '%'");
    }
}
