//! Query options and their compilation to ORDER BY / LIMIT / OFFSET plus
//! the extra predicates that search and cursor pagination contribute.

use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;

use crate::document::{copy_at, remove_at};
use crate::error::{DocliteError, Result};
use crate::query::compile::field_expr;
use crate::query::{compile_filter, escape_like, Bindings, CompareOp, FieldOp, Filter, StringOp};
use crate::schema::names::ID_FIELD;
use crate::schema::SchemaDef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn sql(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }

    pub fn reverse(self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn asc(field: impl Into<String>) -> Self {
        SortKey {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        SortKey {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Linear substring search over a list of fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Search {
    pub text: String,
    pub fields: Vec<String>,
    pub case_sensitive: bool,
}

/// A page boundary: the anchor document's id and, optionally, its values
/// for each entry of the sort list. Missing values are read from the
/// anchor document.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorPosition {
    pub id: String,
    pub sort_values: Option<Vec<Value>>,
}

impl CursorPosition {
    pub fn new(id: impl Into<String>) -> Self {
        CursorPosition {
            id: id.into(),
            sort_values: None,
        }
    }

    pub fn with_values(id: impl Into<String>, values: impl IntoIterator<Item = Value>) -> Self {
        CursorPosition {
            id: id.into(),
            sort_values: Some(values.into_iter().collect()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Cursor {
    pub after: Option<CursorPosition>,
    pub before: Option<CursorPosition>,
}

/// Options for a find. Every method returns a new value.
pub struct QueryOptions<T> {
    pub sort: Vec<SortKey>,
    pub limit: Option<u64>,
    pub skip: Option<u64>,
    pub select: Option<Vec<String>>,
    pub omit: Option<Vec<String>>,
    pub search: Option<Search>,
    pub cursor: Option<Cursor>,
    _doc: PhantomData<fn() -> T>,
}

impl<T> QueryOptions<T> {
    pub fn new() -> Self {
        QueryOptions {
            sort: Vec::new(),
            limit: None,
            skip: None,
            select: None,
            omit: None,
            search: None,
            cursor: None,
            _doc: PhantomData,
        }
    }

    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort.push(SortKey {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn sort_asc(self, field: impl Into<String>) -> Self {
        self.sort(field, SortDirection::Asc)
    }

    pub fn sort_desc(self, field: impl Into<String>) -> Self {
        self.sort(field, SortDirection::Desc)
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn skip(mut self, n: u64) -> Self {
        self.skip = Some(n);
        self
    }

    pub fn select<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.select = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn omit<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.omit = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Case-insensitive search for `text` in any of `fields`.
    pub fn search<S: Into<String>>(self, text: impl Into<String>, fields: impl IntoIterator<Item = S>) -> Self {
        self.search_with(text, fields, false)
    }

    pub fn search_with<S: Into<String>>(
        mut self,
        text: impl Into<String>,
        fields: impl IntoIterator<Item = S>,
        case_sensitive: bool,
    ) -> Self {
        self.search = Some(Search {
            text: text.into(),
            fields: fields.into_iter().map(Into::into).collect(),
            case_sensitive,
        });
        self
    }

    pub fn after(mut self, position: CursorPosition) -> Self {
        self.cursor.get_or_insert_with(Cursor::default).after = Some(position);
        self
    }

    pub fn before(mut self, position: CursorPosition) -> Self {
        self.cursor.get_or_insert_with(Cursor::default).before = Some(position);
        self
    }

    pub fn projection(&self) -> Projection {
        Projection {
            select: self.select.clone(),
            omit: self.omit.clone(),
        }
    }
}

impl<T> Default for QueryOptions<T> {
    fn default() -> Self {
        QueryOptions::new()
    }
}

impl<T> Clone for QueryOptions<T> {
    fn clone(&self) -> Self {
        QueryOptions {
            sort: self.sort.clone(),
            limit: self.limit,
            skip: self.skip,
            select: self.select.clone(),
            omit: self.omit.clone(),
            search: self.search.clone(),
            cursor: self.cursor.clone(),
            _doc: PhantomData,
        }
    }
}

impl<T> fmt::Debug for QueryOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryOptions")
            .field("sort", &self.sort)
            .field("limit", &self.limit)
            .field("skip", &self.skip)
            .field("select", &self.select)
            .field("omit", &self.omit)
            .field("search", &self.search)
            .field("cursor", &self.cursor)
            .finish()
    }
}

// ── Projection ───────────────────────────────────────────────────────

/// Field projection applied to decoded payloads. `select` keeps only the
/// named fields, then `omit` drops fields from what remains, so a field in
/// both lists is dropped. `_id` is carried on the document envelope and is
/// unaffected by either list.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Projection {
    pub select: Option<Vec<String>>,
    pub omit: Option<Vec<String>>,
}

impl Projection {
    pub fn is_identity(&self) -> bool {
        self.select.is_none() && self.omit.as_ref().map_or(true, |o| o.is_empty())
    }

    pub fn apply(&self, payload: &mut Value) {
        if let Some(select) = &self.select {
            let mut kept = Value::Object(serde_json::Map::new());
            for field in select.iter().filter(|f| f.as_str() != ID_FIELD) {
                copy_at(payload, &mut kept, field);
            }
            *payload = kept;
        }
        if let Some(omit) = &self.omit {
            for field in omit.iter().filter(|f| f.as_str() != ID_FIELD) {
                remove_at(payload, field);
            }
        }
    }
}

// ── Compilation ──────────────────────────────────────────────────────

/// A find compiled to clause text. `where_sql` and the clauses share one
/// placeholder sequence, recorded in `params`.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFind {
    pub where_sql: String,
    /// ` ORDER BY ...` or empty.
    pub order_by: String,
    /// ` LIMIT ... OFFSET ...` or empty.
    pub limit: String,
    pub params: Vec<(String, SqlValue)>,
    /// Rows come back in reverse of the requested order and must be
    /// flipped by the caller.
    pub reversed: bool,
}

impl CompiledFind {
    /// Everything after `FROM <table>`.
    pub fn tail(&self) -> String {
        format!(" WHERE {}{}{}", self.where_sql, self.order_by, self.limit)
    }
}

/// A sort key resolved against the schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSort {
    pub field: String,
    pub expr: String,
    pub direction: SortDirection,
}

/// Resolve the sort list, appending `_id ASC` as the final tie-breaker
/// when anything is sorted (or a cursor needs a total order) and `_id`
/// is not already a key.
pub fn resolve_sort<T>(sort: &[SortKey], with_cursor: bool, schema: &SchemaDef<T>) -> Result<Vec<ResolvedSort>> {
    let mut keys = sort
        .iter()
        .map(|k| {
            Ok(ResolvedSort {
                field: k.field.clone(),
                expr: field_expr(&k.field, schema)?,
                direction: k.direction,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    if (!keys.is_empty() || with_cursor) && !keys.iter().any(|k| k.field == ID_FIELD) {
        keys.push(ResolvedSort {
            field: ID_FIELD.to_string(),
            expr: ID_FIELD.to_string(),
            direction: SortDirection::Asc,
        });
    }
    Ok(keys)
}

/// `SELECT <sort exprs> FROM <table> WHERE _id = :p1`: the anchor values a
/// cursor compares against, read exactly as ORDER BY sees them.
pub fn anchor_values_sql<T>(table_sql: &str, sort: &[SortKey], schema: &SchemaDef<T>) -> Result<String> {
    let exprs = sort
        .iter()
        .map(|k| field_expr(&k.field, schema))
        .collect::<Result<Vec<_>>>()?;
    if exprs.is_empty() {
        return Ok(format!("SELECT {ID_FIELD} FROM {table_sql} WHERE {ID_FIELD} = :p1"));
    }
    Ok(format!(
        "SELECT {} FROM {table_sql} WHERE {ID_FIELD} = :p1",
        exprs.join(", ")
    ))
}

/// Compile `filter` together with `options`. Cursor positions must already
/// carry their sort values.
pub fn compile_find<T>(filter: &Filter, options: &QueryOptions<T>, schema: &SchemaDef<T>) -> Result<CompiledFind> {
    let cursor = options.cursor.clone().unwrap_or_default();
    let has_cursor = cursor.after.is_some() || cursor.before.is_some();
    let keys = resolve_sort(&options.sort, has_cursor, schema)?;

    let mut parts = vec![filter.clone()];
    if let Some(search) = &options.search {
        parts.push(search_filter(search)?);
    }
    if let Some(after) = &cursor.after {
        parts.push(keyset_filter(&options.sort, &keys, after, false)?);
    }
    if let Some(before) = &cursor.before {
        parts.push(keyset_filter(&options.sort, &keys, before, true)?);
    }
    let combined = Filter::conjoin(parts);

    let mut bindings = Bindings::new();
    let where_sql = compile_filter(&combined, schema, &mut bindings)?;

    let reversed = cursor.before.is_some() && cursor.after.is_none();
    let order_by = if keys.is_empty() {
        String::new()
    } else {
        let terms: Vec<String> = keys
            .iter()
            .map(|k| {
                let dir = if reversed { k.direction.reverse() } else { k.direction };
                format!("{} {}", k.expr, dir.sql())
            })
            .collect();
        format!(" ORDER BY {}", terms.join(", "))
    };

    let limit = match (options.limit, options.skip) {
        (None, None) => String::new(),
        (Some(n), None) => format!(" LIMIT {}", bindings.bind(SqlValue::Integer(clamp(n)))),
        (limit, Some(skip)) => {
            // SQLite only accepts OFFSET after a LIMIT; -1 means unbounded.
            let l = bindings.bind(SqlValue::Integer(limit.map(clamp).unwrap_or(-1)));
            let o = bindings.bind(SqlValue::Integer(clamp(skip)));
            format!(" LIMIT {l} OFFSET {o}")
        }
    };

    Ok(CompiledFind {
        where_sql,
        order_by,
        limit,
        params: bindings.into_params(),
        reversed,
    })
}

fn clamp(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// `Or` of per-field LIKE conditions. Empty text matches everything.
pub fn search_filter(search: &Search) -> Result<Filter> {
    if search.fields.is_empty() {
        return Err(DocliteError::InvalidOperation(
            "search requires at least one field".into(),
        ));
    }
    if search.text.is_empty() {
        return Ok(Filter::Empty);
    }
    let pattern = format!("%{}%", escape_like(&search.text));
    let op = if search.case_sensitive {
        StringOp::Like(pattern)
    } else {
        StringOp::ILike(pattern)
    };
    Ok(Filter::Or(
        search
            .fields
            .iter()
            .map(|f| Filter::Field(f.clone(), FieldOp::String(op.clone())))
            .collect(),
    ))
}

/// Lexicographic "strictly beyond the anchor" predicate over the resolved
/// keys:
///
/// `(k1 > v1) OR (k1 = v1 AND k2 > v2) OR ...`
///
/// with each comparison's sense taken from the key direction, flipped for
/// `before`. SQLite orders NULL first ascending, and the predicate follows
/// that order. Keys after the first `_id` are unreachable and dropped.
pub fn keyset_filter(
    sort: &[SortKey],
    keys: &[ResolvedSort],
    anchor: &CursorPosition,
    before: bool,
) -> Result<Filter> {
    let values = anchor.sort_values.clone().unwrap_or_default();
    if values.len() != sort.len() {
        return Err(DocliteError::InvalidOperation(format!(
            "cursor carries {} sort values but the query sorts on {} fields",
            values.len(),
            sort.len()
        )));
    }

    let mut bounded: Vec<(&ResolvedSort, Value)> = Vec::new();
    for (i, key) in keys.iter().enumerate() {
        let value = if key.field == ID_FIELD {
            Value::String(anchor.id.clone())
        } else {
            values.get(i).cloned().unwrap_or(Value::Null)
        };
        bounded.push((key, value));
        if key.field == ID_FIELD {
            break;
        }
    }

    let mut branches = Vec::with_capacity(bounded.len());
    for i in 0..bounded.len() {
        let mut conds: Vec<Filter> = bounded[..i]
            .iter()
            .map(|(k, v)| Filter::Field(k.field.clone(), FieldOp::Compare(CompareOp::Eq(v.clone()))))
            .collect();
        let (key, value) = &bounded[i];
        let ascending = (key.direction == SortDirection::Asc) != before;
        conds.push(beyond(&key.field, value, ascending, key.field == ID_FIELD));
        branches.push(Filter::conjoin(conds));
    }
    Ok(Filter::Or(branches))
}

fn beyond(field: &str, value: &Value, ascending: bool, never_null: bool) -> Filter {
    let field_op = |op: FieldOp| Filter::Field(field.to_string(), op);
    match (ascending, value.is_null()) {
        (false, false) if never_null => field_op(FieldOp::Compare(CompareOp::Lt(value.clone()))),
        (true, false) => field_op(FieldOp::Compare(CompareOp::Gt(value.clone()))),
        (true, true) => field_op(FieldOp::Exists(true)),
        (false, false) => Filter::Or(vec![
            field_op(FieldOp::Compare(CompareOp::Lt(value.clone()))),
            field_op(FieldOp::Exists(false)),
        ]),
        // Nothing sorts after NULL in descending order.
        (false, true) => Filter::Or(Vec::new()),
    }
}
