//! Translate REST list parameters into parameterised SQL.
//!
//! A listable resource is described once by a static [`ResourceSpec`]. Request
//! parameters are parsed into [`ListParams`], and [`ListQuery`] resolves every
//! name through the spec. Client text only ever reaches Postgres as a bound
//! value.
//!
//! ```text
//! /doctors?search=card&gender=MALE&appointmentFee[lte]=500
//!         &sortBy=user.name&sortOrder=asc&page=2&limit=5&include=specialties
//! ```

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::error::ApiError;

pub const DEFAULT_PAGE: i64 = 1;
pub const DEFAULT_LIMIT: i64 = 10;
pub const MAX_LIMIT: i64 = 100;
/// Largest page whose offset still fits in an i64 at any allowed limit.
pub const MAX_PAGE: i64 = i64::MAX / MAX_LIMIT;

const RESERVED_KEYS: [&str; 7] = [
    "search",
    "page",
    "limit",
    "sortBy",
    "sortOrder",
    "fields",
    "include",
];

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum QueryError {
    #[error("cannot sort by `{0}`")]
    UnknownSortField(String),
    #[error("unknown field `{0}`")]
    UnknownField(String),
    #[error("invalid value `{value}` for `{field}`")]
    InvalidValue { field: String, value: String },
    #[error("operator `{op}` is not supported on `{field}`")]
    UnsupportedOperator { field: String, op: &'static str },
}

/* ============================================================
   Resource description
   ============================================================ */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Number,
    Bool,
    Uuid,
    Timestamp,
    /// Postgres enum; compared through its text form.
    Enum,
}

#[derive(Debug, Clone, Copy)]
pub enum Target {
    /// Expression reachable from the resource FROM clause (own column or to-one join).
    Column(&'static str),
    /// To-many relation probed with `EXISTS`. `from` ends in a WHERE clause that
    /// correlates with the outer row.
    Many {
        from: &'static str,
        column: &'static str,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    pub target: Target,
    pub kind: FieldKind,
}

impl Field {
    pub const fn col(name: &'static str, column: &'static str, kind: FieldKind) -> Self {
        Field { name, target: Target::Column(column), kind }
    }

    pub const fn many(
        name: &'static str,
        from: &'static str,
        column: &'static str,
        kind: FieldKind,
    ) -> Self {
        Field { name, target: Target::Many { from, column }, kind }
    }
}

/// A relation that can be embedded in each row as a JSON value.
#[derive(Debug, Clone, Copy)]
pub struct Include {
    pub name: &'static str,
    /// Scalar SQL expression producing `jsonb`, correlated with the outer row.
    pub expr: &'static str,
}

#[derive(Debug)]
pub struct ResourceSpec {
    pub from: &'static str,
    /// Unique row key (one or more columns), appended to every ORDER BY.
    pub primary_key: &'static str,
    pub default_sort: &'static str,
    pub fields: &'static [Field],
    /// Fields projected into each row. `fields=` may only pick from these.
    pub projection: &'static [&'static str],
    pub searchable: &'static [&'static str],
    pub filterable: &'static [&'static str],
    pub includes: &'static [Include],
    pub default_includes: &'static [&'static str],
}

impl ResourceSpec {
    fn field(&self, name: &str) -> Option<&'static Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    fn include(&self, name: &str) -> Option<&'static Include> {
        self.includes.iter().find(|i| i.name == name)
    }
}

/* ============================================================
   Request parameters
   ============================================================ */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Not,
    Lt,
    Lte,
    Gt,
    Gte,
    Contains,
    StartsWith,
    EndsWith,
    In,
    NotIn,
}

impl FilterOp {
    fn parse(op: &str) -> Option<Self> {
        Some(match op {
            "equals" => FilterOp::Eq,
            "not" => FilterOp::Not,
            "lt" => FilterOp::Lt,
            "lte" => FilterOp::Lte,
            "gt" => FilterOp::Gt,
            "gte" => FilterOp::Gte,
            "contains" => FilterOp::Contains,
            "startsWith" => FilterOp::StartsWith,
            "endsWith" => FilterOp::EndsWith,
            "in" => FilterOp::In,
            "notIn" => FilterOp::NotIn,
            _ => return None,
        })
    }

    fn as_str(self) -> &'static str {
        match self {
            FilterOp::Eq => "equals",
            FilterOp::Not => "not",
            FilterOp::Lt => "lt",
            FilterOp::Lte => "lte",
            FilterOp::Gt => "gt",
            FilterOp::Gte => "gte",
            FilterOp::Contains => "contains",
            FilterOp::StartsWith => "startsWith",
            FilterOp::EndsWith => "endsWith",
            FilterOp::In => "in",
            FilterOp::NotIn => "notIn",
        }
    }

    fn is_list(self) -> bool {
        matches!(self, FilterOp::In | FilterOp::NotIn)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub key: String,
    pub op: FilterOp,
    pub values: Vec<String>,
}

/// Raw list parameters. Everything that is not a reserved key becomes a filter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListParams {
    pub search: Option<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub fields: Option<String>,
    pub include: Option<String>,
    pub filters: Vec<Filter>,
}

fn split_operator(key: &str) -> Option<(&str, &str)> {
    let open = key.find('[')?;
    let op = key[open + 1..].strip_suffix(']')?;
    Some((&key[..open], op))
}

impl ListParams {
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut params = ListParams::default();

        for (key, value) in pairs {
            let value = value.trim().to_string();
            if value.is_empty() {
                continue;
            }

            match key.as_str() {
                "search" => params.search = Some(value),
                "page" => params.page = Some(value),
                "limit" => params.limit = Some(value),
                "sortBy" => params.sort_by = Some(value),
                "sortOrder" => params.sort_order = Some(value),
                "fields" => params.fields = Some(value),
                "include" => params.include = Some(value),
                _ => {
                    let (field, op) = match split_operator(&key) {
                        Some((field, raw_op)) => match FilterOp::parse(raw_op) {
                            Some(op) => (field, op),
                            None => continue,
                        },
                        None => (key.as_str(), FilterOp::Eq),
                    };
                    if field.is_empty() || RESERVED_KEYS.contains(&field) {
                        continue;
                    }
                    params.push_filter(field, op, value);
                }
            }
        }

        params
    }

    fn push_filter(&mut self, field: &str, op: FilterOp, value: String) {
        let values: Vec<String> = if op.is_list() {
            value
                .split(',')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .collect()
        } else {
            vec![value]
        };

        // A repeated plain key turns into an `in` list.
        if let Some(existing) = self
            .filters
            .iter_mut()
            .find(|f| f.key == field && (f.op == op || (op == FilterOp::Eq && f.op == FilterOp::In)))
        {
            match existing.op {
                FilterOp::Eq => {
                    existing.op = FilterOp::In;
                    existing.values.extend(values);
                }
                FilterOp::In | FilterOp::NotIn => existing.values.extend(values),
                _ => existing.values = values,
            }
            return;
        }

        self.filters.push(Filter {
            key: field.to_string(),
            op,
            values,
        });
    }
}

/* ============================================================
   Values
   ============================================================ */

/// A loosely typed query-string value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

pub fn parse_scalar(raw: &str) -> Scalar {
    match raw {
        "true" => return Scalar::Bool(true),
        "false" => return Scalar::Bool(false),
        _ => {}
    }
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
        if let Ok(i) = trimmed.parse::<i64>() {
            return Scalar::Int(i);
        }
        if let Ok(f) = trimmed.parse::<f64>() {
            if f.is_finite() {
                return Scalar::Float(f);
            }
        }
    }
    Scalar::Text(raw.to_string())
}

/// A value ready to be bound to a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Bound {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Uuid(Uuid),
    Time(DateTime<Utc>),
}

impl From<bool> for Bound {
    fn from(v: bool) -> Self {
        Bound::Bool(v)
    }
}

impl From<Uuid> for Bound {
    fn from(v: Uuid) -> Self {
        Bound::Uuid(v)
    }
}

impl From<&str> for Bound {
    fn from(v: &str) -> Self {
        Bound::Text(v.to_string())
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
}

fn coerce(field: &Field, raw: &str) -> Result<Bound, QueryError> {
    let invalid = || QueryError::InvalidValue {
        field: field.name.to_string(),
        value: raw.to_string(),
    };

    match field.kind {
        FieldKind::Text | FieldKind::Enum => Ok(Bound::Text(raw.to_string())),
        FieldKind::Number => match parse_scalar(raw) {
            Scalar::Int(i) => Ok(Bound::Int(i)),
            Scalar::Float(f) => Ok(Bound::Float(f)),
            _ => Err(invalid()),
        },
        FieldKind::Bool => match parse_scalar(raw) {
            Scalar::Bool(b) => Ok(Bound::Bool(b)),
            _ => Err(invalid()),
        },
        FieldKind::Uuid => Uuid::parse_str(raw).map(Bound::Uuid).map_err(|_| invalid()),
        FieldKind::Timestamp => parse_timestamp(raw).map(Bound::Time).ok_or_else(invalid),
    }
}

fn like_pattern(raw: &str, op: FilterOp) -> String {
    let escaped = raw
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    match op {
        FilterOp::StartsWith => format!("{escaped}%"),
        FilterOp::EndsWith => format!("%{escaped}"),
        _ => format!("%{escaped}%"),
    }
}

fn push_bound(qb: &mut QueryBuilder<'_, Postgres>, value: Bound) {
    match value {
        Bound::Bool(v) => qb.push_bind(v),
        Bound::Int(v) => qb.push_bind(v),
        Bound::Float(v) => qb.push_bind(v),
        Bound::Text(v) => qb.push_bind(v),
        Bound::Uuid(v) => qb.push_bind(v),
        Bound::Time(v) => qb.push_bind(v),
    };
}

/* ============================================================
   Query
   ============================================================ */

#[derive(Debug, Clone)]
enum Condition {
    Search(String),
    Filter {
        field: &'static Field,
        op: FilterOp,
        values: Vec<Bound>,
    },
    Eq {
        column: &'static str,
        value: Bound,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    fn sql(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
}

impl PageMeta {
    pub fn new(page: i64, limit: i64, total: i64) -> Self {
        let total_pages = if limit > 0 { (total + limit - 1) / limit } else { 0 };
        PageMeta { page, limit, total, total_pages }
    }
}

#[derive(Debug, Serialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub meta: PageMeta,
}

pub struct ListQuery<'p> {
    spec: &'static ResourceSpec,
    params: &'p ListParams,
    conditions: Vec<Condition>,
    page: i64,
    limit: i64,
    sort: (&'static str, SortOrder),
    select: Option<Vec<&'static Field>>,
    includes: Vec<&'static Include>,
}

fn positive_or(raw: Option<&String>, default: i64) -> i64 {
    raw.and_then(|s| s.trim().parse::<i64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

fn column_of(field: &Field) -> Option<&'static str> {
    match field.target {
        Target::Column(c) => Some(c),
        Target::Many { .. } => None,
    }
}

impl<'p> ListQuery<'p> {
    pub fn new(spec: &'static ResourceSpec, params: &'p ListParams) -> Self {
        let default_sort = spec
            .field(spec.default_sort)
            .and_then(column_of)
            .unwrap_or(spec.primary_key);

        ListQuery {
            spec,
            params,
            conditions: Vec::new(),
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
            sort: (default_sort, SortOrder::Desc),
            select: None,
            includes: Vec::new(),
        }
    }

    /// OR of case-insensitive substring matches over the searchable fields.
    pub fn search(mut self) -> Self {
        if let Some(term) = self.params.search.as_deref() {
            if !self.spec.searchable.is_empty() {
                self.conditions.push(Condition::Search(term.to_string()));
            }
        }
        self
    }

    /// AND of the filter parameters on filterable fields. Other keys are ignored.
    pub fn filter(mut self) -> Result<Self, QueryError> {
        let params = self.params;
        for f in &params.filters {
            if !self.spec.filterable.contains(&f.key.as_str()) {
                continue;
            }
            let Some(field) = self.spec.field(&f.key) else {
                continue;
            };

            let textual = matches!(field.kind, FieldKind::Text | FieldKind::Enum);
            match f.op {
                FilterOp::Contains | FilterOp::StartsWith | FilterOp::EndsWith if !textual => {
                    return Err(QueryError::UnsupportedOperator {
                        field: field.name.to_string(),
                        op: f.op.as_str(),
                    });
                }
                FilterOp::Contains | FilterOp::StartsWith | FilterOp::EndsWith => {
                    let pattern = like_pattern(&f.values[0], f.op);
                    self.conditions.push(Condition::Filter {
                        field,
                        op: f.op,
                        values: vec![Bound::Text(pattern)],
                    });
                }
                _ => {
                    let values = f
                        .values
                        .iter()
                        .map(|raw| coerce(field, raw))
                        .collect::<Result<Vec<_>, _>>()?;
                    self.conditions.push(Condition::Filter { field, op: f.op, values });
                }
            }
        }
        Ok(self)
    }

    /// Fixed equality condition chosen by the server, e.g. soft-delete or ownership.
    pub fn where_eq(mut self, column: &'static str, value: impl Into<Bound>) -> Self {
        self.conditions.push(Condition::Eq {
            column,
            value: value.into(),
        });
        self
    }

    pub fn paginate(mut self) -> Self {
        self.page = positive_or(self.params.page.as_ref(), DEFAULT_PAGE).min(MAX_PAGE);
        self.limit = positive_or(self.params.limit.as_ref(), DEFAULT_LIMIT).min(MAX_LIMIT);
        self
    }

    pub fn sort(mut self) -> Result<Self, QueryError> {
        let order = match self.params.sort_order.as_deref() {
            Some("asc") => SortOrder::Asc,
            _ => SortOrder::Desc,
        };
        let name = self.params.sort_by.as_deref().unwrap_or(self.spec.default_sort);
        let column = self
            .spec
            .field(name)
            .and_then(column_of)
            .ok_or_else(|| QueryError::UnknownSortField(name.to_string()))?;
        self.sort = (column, order);
        Ok(self)
    }

    /// Restrict each row to the listed fields. Includes are dropped when set.
    pub fn fields(mut self) -> Result<Self, QueryError> {
        let Some(raw) = self.params.fields.as_deref() else {
            return Ok(self);
        };
        let mut picked = Vec::new();
        for name in raw.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            if !self.spec.projection.contains(&name) {
                return Err(QueryError::UnknownField(name.to_string()));
            }
            let field = self
                .spec
                .field(name)
                .ok_or_else(|| QueryError::UnknownField(name.to_string()))?;
            picked.push(field);
        }
        if !picked.is_empty() {
            self.select = Some(picked);
        }
        Ok(self)
    }

    /// Always embed these relations (unknown names are ignored).
    pub fn include(mut self, relations: &[&str]) -> Self {
        for name in relations {
            self.add_include(name);
        }
        self
    }

    /// Embed the default relations plus whatever `include=` asks for.
    pub fn dynamic_include(mut self) -> Self {
        let (spec, params) = (self.spec, self.params);
        for name in spec.default_includes {
            self.add_include(name);
        }
        if let Some(raw) = params.include.as_deref() {
            for name in raw.split(',').map(str::trim) {
                self.add_include(name);
            }
        }
        self
    }

    fn add_include(&mut self, name: &str) {
        if let Some(inc) = self.spec.include(name) {
            if !self.includes.iter().any(|i| i.name == inc.name) {
                self.includes.push(inc);
            }
        }
    }

    #[cfg(test)]
    pub fn page(&self) -> i64 {
        self.page
    }

    #[cfg(test)]
    pub fn limit(&self) -> i64 {
        self.limit
    }

    fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }

    fn push_projection(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        let fields: Vec<&Field> = match &self.select {
            Some(picked) => picked.clone(),
            None => self
                .spec
                .projection
                .iter()
                .filter_map(|name| self.spec.field(name))
                .collect(),
        };

        qb.push("jsonb_build_object(");
        let mut first = true;
        for field in fields {
            if let Some(column) = column_of(field) {
                if !first {
                    qb.push(", ");
                }
                first = false;
                qb.push(format!("'{}', {}", field.name, column));
            }
        }
        qb.push(")");

        if self.select.is_none() && !self.includes.is_empty() {
            qb.push(" || jsonb_build_object(");
            for (i, inc) in self.includes.iter().enumerate() {
                if i > 0 {
                    qb.push(", ");
                }
                qb.push(format!("'{}', ({})", inc.name, inc.expr));
            }
            qb.push(")");
        }
    }

    fn push_where(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        qb.push(" WHERE TRUE");
        for cond in &self.conditions {
            qb.push(" AND ");
            match cond {
                Condition::Search(term) => {
                    let pattern = like_pattern(term, FilterOp::Contains);
                    qb.push("(");
                    let mut first = true;
                    for field in self.spec.searchable.iter().filter_map(|n| self.spec.field(n)) {
                        if !first {
                            qb.push(" OR ");
                        }
                        first = false;
                        match field.target {
                            Target::Column(col) => {
                                qb.push(format!("{col}::text ILIKE "));
                                qb.push_bind(pattern.clone());
                            }
                            Target::Many { from, column } => {
                                qb.push(format!("EXISTS (SELECT 1 FROM {from} AND {column}::text ILIKE "));
                                qb.push_bind(pattern.clone());
                                qb.push(")");
                            }
                        }
                    }
                    if first {
                        qb.push("TRUE");
                    }
                    qb.push(")");
                }
                Condition::Filter { field, op, values } => match field.target {
                    Target::Column(col) => push_comparison(qb, col, field.kind, *op, values),
                    Target::Many { from, column } => {
                        qb.push(format!("EXISTS (SELECT 1 FROM {from} AND "));
                        push_comparison(qb, column, field.kind, *op, values);
                        qb.push(")");
                    }
                },
                Condition::Eq { column, value } => {
                    qb.push(format!("{column} = "));
                    push_bound(qb, value.clone());
                }
            }
        }
    }

    /// `SELECT <row json> FROM ... LIMIT/OFFSET` for the current page.
    pub fn data_sql(&self) -> QueryBuilder<'static, Postgres> {
        let mut qb = QueryBuilder::new("SELECT ");
        self.push_projection(&mut qb);
        qb.push(format!(" AS row FROM {}", self.spec.from));
        self.push_where(&mut qb);
        let (column, order) = self.sort;
        qb.push(format!(" ORDER BY {column} {}", order.sql()));
        if column != self.spec.primary_key {
            qb.push(format!(", {} ASC", self.spec.primary_key));
        }
        qb.push(" LIMIT ");
        qb.push_bind(self.limit);
        qb.push(" OFFSET ");
        qb.push_bind(self.offset());
        qb
    }

    pub fn count_sql(&self) -> QueryBuilder<'static, Postgres> {
        let mut qb = QueryBuilder::new(format!("SELECT COUNT(*) FROM {}", self.spec.from));
        self.push_where(&mut qb);
        qb
    }

    /// Run the count and page queries concurrently.
    pub async fn execute(self, db: &PgPool) -> Result<Paginated<serde_json::Value>, ApiError> {
        let mut count_qb = self.count_sql();
        let mut data_qb = self.data_sql();

        let (total, data) = tokio::try_join!(
            count_qb.build_query_scalar::<i64>().fetch_one(db),
            data_qb.build_query_scalar::<serde_json::Value>().fetch_all(db),
        )
        .map_err(ApiError::db)?;

        tracing::debug!(from = self.spec.from, total, page = self.page, "list query");

        Ok(Paginated {
            data,
            meta: PageMeta::new(self.page, self.limit, total),
        })
    }

    /// First row of the data query, for detail endpoints that share a list's projection.
    pub async fn fetch_optional(self, db: &PgPool) -> Result<Option<serde_json::Value>, ApiError> {
        let mut qb = self.data_sql();
        qb.build_query_scalar::<serde_json::Value>()
            .fetch_optional(db)
            .await
            .map_err(ApiError::db)
    }
}

fn push_comparison(
    qb: &mut QueryBuilder<'_, Postgres>,
    column: &str,
    kind: FieldKind,
    op: FilterOp,
    values: &[Bound],
) {
    let lhs = if kind == FieldKind::Enum {
        format!("{column}::text")
    } else {
        column.to_string()
    };

    let sql_op = match op {
        FilterOp::Eq => "=",
        FilterOp::Not => "<>",
        FilterOp::Lt => "<",
        FilterOp::Lte => "<=",
        FilterOp::Gt => ">",
        FilterOp::Gte => ">=",
        FilterOp::Contains | FilterOp::StartsWith | FilterOp::EndsWith => "LIKE",
        FilterOp::In | FilterOp::NotIn => {
            if values.is_empty() {
                qb.push(if op == FilterOp::In { "FALSE" } else { "TRUE" });
                return;
            }
            qb.push(format!("{lhs} {} (", if op == FilterOp::In { "IN" } else { "NOT IN" }));
            let mut list = qb.separated(", ");
            for v in values {
                match v.clone() {
                    Bound::Bool(b) => list.push_bind(b),
                    Bound::Int(i) => list.push_bind(i),
                    Bound::Float(f) => list.push_bind(f),
                    Bound::Text(t) => list.push_bind(t),
                    Bound::Uuid(u) => list.push_bind(u),
                    Bound::Time(t) => list.push_bind(t),
                };
            }
            list.push_unseparated(")");
            return;
        }
    };

    qb.push(format!("{lhs} {sql_op} "));
    if let Some(v) = values.first() {
        push_bound(qb, v.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static DOCTORS: ResourceSpec = ResourceSpec {
        from: "doctors d JOIN users u ON u.id = d.user_id",
        primary_key: "d.id",
        default_sort: "createdAt",
        fields: &[
            Field::col("id", "d.id", FieldKind::Uuid),
            Field::col("name", "d.name", FieldKind::Text),
            Field::col("gender", "d.gender", FieldKind::Enum),
            Field::col("appointmentFee", "d.appointment_fee", FieldKind::Number),
            Field::col("isDeleted", "d.is_deleted", FieldKind::Bool),
            Field::col("createdAt", "d.created_at", FieldKind::Timestamp),
            Field::col("user.name", "u.name", FieldKind::Text),
            Field::col("user.email", "u.email", FieldKind::Text),
            Field::many(
                "specialties.specialty.title",
                "doctor_specialties ds JOIN specialties s ON s.id = ds.specialty_id WHERE ds.doctor_id = d.id",
                "s.title",
                FieldKind::Text,
            ),
        ],
        projection: &["id", "name", "gender", "appointmentFee", "createdAt"],
        searchable: &["name", "user.name", "specialties.specialty.title"],
        filterable: &[
            "gender",
            "appointmentFee",
            "isDeleted",
            "createdAt",
            "user.email",
            "specialties.specialty.title",
        ],
        includes: &[
            Include { name: "user", expr: "SELECT jsonb_build_object('id', u.id)" },
            Include { name: "specialties", expr: "SELECT '[]'::jsonb" },
        ],
        default_includes: &[],
    };

    fn params(pairs: &[(&str, &str)]) -> ListParams {
        ListParams::from_pairs(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())))
    }

    #[test]
    fn reserved_keys_are_not_filters() {
        let p = params(&[
            ("search", "john"),
            ("page", "2"),
            ("limit", "5"),
            ("sortBy", "name"),
            ("sortOrder", "asc"),
            ("fields", "id,name"),
            ("include", "user"),
        ]);
        assert!(p.filters.is_empty());
        assert_eq!(p.search.as_deref(), Some("john"));
        assert_eq!(p.sort_order.as_deref(), Some("asc"));
    }

    #[test]
    fn bracket_operators_and_repeated_keys() {
        let p = params(&[
            ("appointmentFee[lt]", "100"),
            ("appointmentFee[gt]", "50"),
            ("gender", "MALE"),
            ("gender", "FEMALE"),
            ("name[bogus]", "x"),
            ("status[notIn]", "CANCELED, COMPLETED"),
            ("empty", ""),
        ]);

        assert_eq!(p.filters.len(), 4);
        assert_eq!(p.filters[0].op, FilterOp::Lt);
        assert_eq!(p.filters[1].op, FilterOp::Gt);
        assert_eq!(
            p.filters[2],
            Filter {
                key: "gender".into(),
                op: FilterOp::In,
                values: vec!["MALE".into(), "FEMALE".into()],
            }
        );
        assert_eq!(p.filters[3].values, vec!["CANCELED", "COMPLETED"]);
    }

    #[test]
    fn scalar_parsing_follows_query_string_conventions() {
        assert_eq!(parse_scalar("true"), Scalar::Bool(true));
        assert_eq!(parse_scalar("false"), Scalar::Bool(false));
        assert_eq!(parse_scalar("42"), Scalar::Int(42));
        assert_eq!(parse_scalar("4.5"), Scalar::Float(4.5));
        assert_eq!(parse_scalar(" "), Scalar::Text(" ".into()));
        assert_eq!(parse_scalar("NaN"), Scalar::Text("NaN".into()));
        assert_eq!(parse_scalar("abc"), Scalar::Text("abc".into()));
    }

    #[test]
    fn pagination_defaults_and_clamps() {
        let p = params(&[("page", "0"), ("limit", "abc")]);
        let q = ListQuery::new(&DOCTORS, &p).paginate();
        assert_eq!((q.page(), q.limit()), (1, 10));

        let p = params(&[("page", "3"), ("limit", "1000")]);
        let q = ListQuery::new(&DOCTORS, &p).paginate();
        assert_eq!((q.page(), q.limit()), (3, MAX_LIMIT));

        let p = params(&[("page", "9223372036854775807"), ("limit", "100")]);
        let q = ListQuery::new(&DOCTORS, &p).paginate();
        assert_eq!(q.page(), MAX_PAGE);
        assert!(q.offset() >= 0);
        assert!(q.data_sql().sql().contains("LIMIT $1 OFFSET $2"));

        assert_eq!(PageMeta::new(1, 10, 21).total_pages, 3);
        assert_eq!(PageMeta::new(1, 10, 20).total_pages, 2);
        assert_eq!(PageMeta::new(1, 10, 0).total_pages, 0);
    }

    #[test]
    fn default_query_sorts_by_created_at_desc_with_tiebreak() {
        let p = ListParams::default();
        let q = ListQuery::new(&DOCTORS, &p).paginate().sort().unwrap();
        let sql = q.data_sql().sql().to_string();
        assert!(sql.starts_with("SELECT jsonb_build_object('id', d.id, 'name', d.name"));
        assert!(sql.contains("FROM doctors d JOIN users u ON u.id = d.user_id WHERE TRUE"));
        assert!(sql.contains("ORDER BY d.created_at DESC, d.id ASC LIMIT $1 OFFSET $2"));
    }

    #[test]
    fn nested_sort_resolves_through_join() {
        let p = params(&[("sortBy", "user.name"), ("sortOrder", "asc")]);
        let q = ListQuery::new(&DOCTORS, &p).sort().unwrap();
        assert!(q.data_sql().sql().contains("ORDER BY u.name ASC"));

        let p = params(&[("sortBy", "password_hash; DROP TABLE users")]);
        assert!(matches!(
            ListQuery::new(&DOCTORS, &p).sort(),
            Err(QueryError::UnknownSortField(_))
        ));

        let p = params(&[("sortBy", "specialties.specialty.title")]);
        assert!(ListQuery::new(&DOCTORS, &p).sort().is_err());
    }

    #[test]
    fn search_spans_columns_and_to_many_relations() {
        let p = params(&[("search", "cardio")]);
        let q = ListQuery::new(&DOCTORS, &p).search();
        let sql = q.count_sql().sql().to_string();
        assert_eq!(
            sql,
            "SELECT COUNT(*) FROM doctors d JOIN users u ON u.id = d.user_id WHERE TRUE AND \
             (d.name::text ILIKE $1 OR u.name::text ILIKE $2 OR EXISTS (SELECT 1 FROM \
             doctor_specialties ds JOIN specialties s ON s.id = ds.specialty_id WHERE \
             ds.doctor_id = d.id AND s.title::text ILIKE $3))"
        );
    }

    #[test]
    fn filters_are_typed_and_whitelisted() {
        let p = params(&[
            ("appointmentFee[lte]", "500"),
            ("gender", "MALE"),
            ("isDeleted", "false"),
            ("user.email", "a@b.c"),
            ("name", "ignored because not filterable"),
            ("password", "ignored because unknown"),
        ]);
        let q = ListQuery::new(&DOCTORS, &p).filter().unwrap();
        let sql = q.count_sql().sql().to_string();
        assert!(sql.contains("d.appointment_fee <= $1"));
        assert!(sql.contains("d.gender::text = $2"));
        assert!(sql.contains("d.is_deleted = $3"));
        assert!(sql.contains("u.email = $4"));
        assert!(!sql.contains("d.name"));
        assert!(!sql.contains("password"));
    }

    #[test]
    fn filter_value_mismatch_is_rejected() {
        let p = params(&[("appointmentFee", "cheap")]);
        assert_eq!(
            ListQuery::new(&DOCTORS, &p).filter().err(),
            Some(QueryError::InvalidValue {
                field: "appointmentFee".into(),
                value: "cheap".into(),
            })
        );

        let p = params(&[("appointmentFee[contains]", "5")]);
        assert!(matches!(
            ListQuery::new(&DOCTORS, &p).filter(),
            Err(QueryError::UnsupportedOperator { .. })
        ));

        let p = params(&[("createdAt[gte]", "2024-01-01")]);
        assert!(ListQuery::new(&DOCTORS, &p).filter().is_ok());
    }

    #[test]
    fn in_lists_and_relation_filters() {
        let p = params(&[
            ("gender", "MALE"),
            ("gender", "FEMALE"),
            ("specialties.specialty.title", "Cardiology"),
        ]);
        let q = ListQuery::new(&DOCTORS, &p).filter().unwrap();
        let sql = q.count_sql().sql().to_string();
        assert!(sql.contains("d.gender::text IN ($1, $2)"));
        assert!(sql.contains("EXISTS (SELECT 1 FROM doctor_specialties ds"));
        assert!(sql.contains("AND s.title = $3)"));
    }

    #[test]
    fn like_patterns_escape_wildcards() {
        assert_eq!(like_pattern("50%_off", FilterOp::Contains), "%50\\%\\_off%");
        assert_eq!(like_pattern("Dr", FilterOp::StartsWith), "Dr%");
        assert_eq!(like_pattern("son", FilterOp::EndsWith), "%son");
    }

    #[test]
    fn where_eq_applies_to_count_and_data() {
        let p = ListParams::default();
        let q = ListQuery::new(&DOCTORS, &p).where_eq("d.is_deleted", false);
        assert!(q.count_sql().sql().contains("AND d.is_deleted = $1"));
        assert!(q.data_sql().sql().contains("AND d.is_deleted = $1"));
    }

    #[test]
    fn includes_are_embedded_unless_fields_selected() {
        let p = params(&[("include", "specialties, nope")]);
        let q = ListQuery::new(&DOCTORS, &p).include(&["user"]).dynamic_include();
        let sql = q.data_sql().sql().to_string();
        assert!(sql.contains(
            "|| jsonb_build_object('user', (SELECT jsonb_build_object('id', u.id)), \
             'specialties', (SELECT '[]'::jsonb))"
        ));
        assert!(!sql.contains("nope"));

        let p = params(&[("fields", "id,name"), ("include", "specialties")]);
        let q = ListQuery::new(&DOCTORS, &p)
            .include(&["user"])
            .dynamic_include()
            .fields()
            .unwrap();
        let sql = q.data_sql().sql().to_string();
        assert!(sql.starts_with("SELECT jsonb_build_object('id', d.id, 'name', d.name) AS row"));
        assert!(!sql.contains("||"));
    }

    #[test]
    fn unknown_projection_field_is_rejected() {
        let p = params(&[("fields", "id,user.email")]);
        assert_eq!(
            ListQuery::new(&DOCTORS, &p).fields().err(),
            Some(QueryError::UnknownField("user.email".into()))
        );
    }
}
