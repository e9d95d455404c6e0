//! Typed collection handles: inserts, reads and bulk writes. The atomic
//! find-and-modify operations live in [`atomic`].

pub mod atomic;
mod types;

#[cfg(test)]
mod tests;

pub use types::{
    DeleteResult, FindAndModifyOptions, InsertManyResult, ReplaceOptions, ReturnDocument,
    UpdateResult,
};
pub(crate) use types::MutationState;

use crate::clock::{next_updated_at, Clock};
use crate::document::{display_value, to_body, value_at, Document, StoredRow};
use crate::engine::{sql_to_json, Engine};
use crate::error::{
    classify_sqlite, constraint_message, parse_constraint_failure, ConstraintFailure,
    DocliteError, Result,
};
use crate::ids::IdGenerator;
use crate::options::{anchor_values_sql, compile_find, Cursor, QueryOptions, SortKey};
use crate::query::compile::{field_expr, field_json_expr, ALWAYS_TRUE};
use crate::query::{compile_query, Filter, Query};
use crate::schema::names::{quote_ident, ID_FIELD};
use crate::schema::{SchemaDef, TableDdl};
use crate::transaction::transact;
use crate::validation::validate_and_prepare;
use rusqlite::types::Value as SqlValue;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Shared state behind every handle to one collection.
pub(crate) struct CollectionInner<T> {
    name: String,
    table_sql: String,
    ddl: TableDdl,
    schema: SchemaDef<T>,
    engine: Arc<Engine>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl<T> CollectionInner<T> {
    pub(crate) fn new(
        ddl: TableDdl,
        schema: SchemaDef<T>,
        engine: Arc<Engine>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        CollectionInner {
            name: ddl.table.clone(),
            table_sql: quote_ident(&ddl.table),
            ddl,
            schema,
            engine,
            ids,
            clock,
        }
    }
}

/// A handle to one collection of `T` payloads. Cheap to clone; all clones
/// share the store connection.
pub struct Collection<T> {
    inner: Arc<CollectionInner<T>>,
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Collection {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Collection<T> {
    pub(crate) fn from_inner(inner: Arc<CollectionInner<T>>) -> Self {
        Collection { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn schema(&self) -> &SchemaDef<T> {
        &self.inner.schema
    }

    pub fn ddl(&self) -> &TableDdl {
        &self.inner.ddl
    }

    fn engine(&self) -> &Engine {
        &self.inner.engine
    }

    fn timestamps(&self) -> bool {
        self.inner.schema.timestamps
    }

    /// Column list every row read uses, matching [`StoredRow::from_row`].
    fn columns(&self) -> &'static str {
        if self.timestamps() {
            "_id, body, createdAt, updatedAt"
        } else {
            "_id, body, 0, 0"
        }
    }

    fn select_sql(&self, tail: &str) -> String {
        format!("SELECT {} FROM {}{tail}", self.columns(), self.inner.table_sql)
    }

    fn trace(&self, state: MutationState) {
        log::trace!("{}: {state}", self.inner.name);
    }

    fn not_found(&self, id: &str) -> DocliteError {
        DocliteError::NotFound {
            collection: self.inner.name.clone(),
            id: id.to_string(),
        }
    }
}

fn param(name: &str, value: SqlValue) -> (String, SqlValue) {
    (name.to_string(), value)
}

impl<T: Serialize + DeserializeOwned> Collection<T> {
    // ── Inserts ──────────────────────────────────────────────────────

    /// Validate, assign an id and timestamps, and store `data`.
    pub fn insert_one(&self, data: T) -> Result<Document<T>> {
        self.insert_value(data)
    }

    /// Insert every item in one transaction: either all are stored or none.
    pub fn insert_many(&self, items: Vec<T>) -> Result<InsertManyResult<T>> {
        if items.is_empty() {
            return Ok(InsertManyResult {
                documents: Vec::new(),
                inserted_count: 0,
            });
        }
        let documents = transact(self.engine(), || {
            items
                .into_iter()
                .map(|item| self.insert_value(item))
                .collect::<Result<Vec<_>>>()
        })?;
        Ok(InsertManyResult {
            inserted_count: documents.len() as u64,
            documents,
        })
    }

    fn insert_value(&self, data: T) -> Result<Document<T>> {
        let (data, payload) = validate_and_prepare(&self.inner.schema, data)?;
        let body = to_body(&payload)?;
        let id = self.inner.ids.next_id();
        let (sql, params, now) = if self.timestamps() {
            let now = self.inner.clock.now_millis();
            (
                format!(
                    "INSERT INTO {} (_id, body, createdAt, updatedAt) VALUES (:p1, :p2, :p3, :p4)",
                    self.inner.table_sql
                ),
                vec![
                    param(":p1", SqlValue::Text(id.clone())),
                    param(":p2", SqlValue::Text(body)),
                    param(":p3", SqlValue::Integer(now)),
                    param(":p4", SqlValue::Integer(now)),
                ],
                now,
            )
        } else {
            (
                format!(
                    "INSERT INTO {} (_id, body) VALUES (:p1, :p2)",
                    self.inner.table_sql
                ),
                vec![
                    param(":p1", SqlValue::Text(id.clone())),
                    param(":p2", SqlValue::Text(body)),
                ],
                0,
            )
        };
        self.engine()
            .try_execute(&sql, &params)
            .map_err(|e| self.write_error(e, &sql, &id, &payload))?;
        Ok(Document {
            id,
            data,
            created_at: now,
            updated_at: now,
        })
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Documents matching `query`, shaped by `options`.
    ///
    /// `select`/`omit` are applied before decoding, so `T` must be buildable
    /// from the trimmed payload (`Value`, or a struct whose dropped fields
    /// are optional). Otherwise this fails with `InvalidOperation`; use
    /// [`Collection::find_projected`] instead.
    pub fn find(&self, query: &Query<T>, options: &QueryOptions<T>) -> Result<Vec<Document<T>>> {
        let projection = options.projection();
        let rows = self.find_rows(query.filter(), options)?;
        if projection.is_identity() {
            return rows.iter().map(|row| row.decode()).collect();
        }
        rows.iter()
            .map(|row| {
                row.decode_with(|payload| projection.apply(payload))
                    .map_err(|e| match e {
                        DocliteError::Serialization(msg) => DocliteError::InvalidOperation(format!(
                            "projected payload does not fit collection '{}' ({msg}); use find_projected",
                            self.inner.name
                        )),
                        other => other,
                    })
            })
            .collect()
    }

    /// Like `find`, with payloads returned as JSON so any `select`/`omit`
    /// works whatever `T` requires.
    pub fn find_projected(
        &self,
        query: &Query<T>,
        options: &QueryOptions<T>,
    ) -> Result<Vec<Document<Value>>> {
        let projection = options.projection();
        self.find_rows(query.filter(), options)?
            .iter()
            .map(|row| row.decode_with(|payload| projection.apply(payload)))
            .collect()
    }

    pub fn find_all(&self) -> Result<Vec<Document<T>>> {
        self.find(&Query::empty(), &QueryOptions::new())
    }

    /// The first document `find` would return.
    pub fn find_one(&self, query: &Query<T>, options: &QueryOptions<T>) -> Result<Option<Document<T>>> {
        let options = options.clone().limit(1);
        Ok(self.find(query, &options)?.into_iter().next())
    }

    pub fn find_by_id(&self, id: &str) -> Result<Option<Document<T>>> {
        self.row_by_id(id)?.map(|row| row.decode()).transpose()
    }

    /// Documents for the given ids, in the order given. Unknown ids are
    /// skipped.
    pub fn find_by_ids<S: AsRef<str>>(&self, ids: &[S]) -> Result<Vec<Document<T>>> {
        let query = Query::is_in(ID_FIELD, ids.iter().map(|id| id.as_ref().to_string()));
        let mut found: std::collections::HashMap<String, Document<T>> = self
            .find(&query, &QueryOptions::new())?
            .into_iter()
            .map(|doc| (doc.id.clone(), doc))
            .collect();
        Ok(ids.iter().filter_map(|id| found.remove(id.as_ref())).collect())
    }

    pub fn exists(&self, query: &Query<T>) -> Result<bool> {
        let compiled = compile_query(query, &self.inner.schema)?;
        let sql = format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE {})",
            self.inner.table_sql, compiled.sql
        );
        Ok(self.engine().query_count(&sql, &compiled.params)? > 0)
    }

    pub fn count(&self, query: &Query<T>) -> Result<u64> {
        let compiled = compile_query(query, &self.inner.schema)?;
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {}",
            self.inner.table_sql, compiled.sql
        );
        self.engine().query_count(&sql, &compiled.params)
    }

    /// Distinct non-null values of `field` among matching documents, in
    /// ascending SQL order. Values come back as they appear in the payload.
    pub fn distinct(&self, field: &str, query: Option<&Query<T>>) -> Result<Vec<Value>> {
        let expr = field_expr(field, &self.inner.schema)?;
        let json = field_json_expr(field, &self.inner.schema)?;
        let (predicate, params) = match query {
            Some(q) => {
                let compiled = compile_query(q, &self.inner.schema)?;
                (compiled.sql, compiled.params)
            }
            None => (ALWAYS_TRUE.to_string(), Vec::new()),
        };
        let sql = format!(
            "SELECT j FROM (SELECT DISTINCT {json} AS j, {expr} AS v FROM {} \
             WHERE ({predicate}) AND {expr} IS NOT NULL) ORDER BY v ASC, j ASC",
            self.inner.table_sql
        );
        self.engine()
            .query_map(&sql, &params, |row| row.get::<_, String>(0))?
            .iter()
            .map(|text| {
                serde_json::from_str(text).map_err(|e| DocliteError::Serialization(e.to_string()))
            })
            .collect()
    }

    // ── Updates ──────────────────────────────────────────────────────

    /// Apply `update` to the first matching document (lowest id).
    pub fn update_one<F>(&self, query: &Query<T>, update: F) -> Result<UpdateResult>
    where
        F: FnOnce(T) -> T,
    {
        self.mutate(|| {
            let Some(row) = self.first_match(query.filter(), &[])? else {
                self.trace(MutationState::NoMatch);
                return Ok(UpdateResult::default());
            };
            self.trace(MutationState::Matched);
            let current: Document<T> = row.decode()?;
            self.rewrite(&row, update(current.data))?;
            self.trace(MutationState::Applied);
            Ok(UpdateResult {
                matched_count: 1,
                modified_count: 1,
                upserted_id: None,
            })
        })
    }

    /// Apply `update` to every matching document.
    pub fn update_many<F>(&self, query: &Query<T>, mut update: F) -> Result<UpdateResult>
    where
        F: FnMut(T) -> T,
    {
        self.mutate(|| {
            let rows = self.find_rows(query.filter(), &QueryOptions::new().sort_asc(ID_FIELD))?;
            if rows.is_empty() {
                self.trace(MutationState::NoMatch);
            } else {
                self.trace(MutationState::Matched);
            }
            for row in &rows {
                let current: Document<T> = row.decode()?;
                self.rewrite(row, update(current.data))?;
            }
            self.trace(MutationState::Applied);
            Ok(UpdateResult {
                matched_count: rows.len() as u64,
                modified_count: rows.len() as u64,
                upserted_id: None,
            })
        })
    }

    /// Apply `update` to the document with `id`; `NotFound` if there is none.
    pub fn update_by_id<F>(&self, id: &str, update: F) -> Result<Document<T>>
    where
        F: FnOnce(T) -> T,
    {
        self.mutate(|| {
            let row = self.row_by_id(id)?.ok_or_else(|| self.not_found(id))?;
            self.trace(MutationState::Matched);
            let current: Document<T> = row.decode()?;
            let updated = self.rewrite(&row, update(current.data))?;
            self.trace(MutationState::Applied);
            Ok(updated)
        })
    }

    /// Replace the payload of the first matching document, or insert
    /// `replacement` when nothing matches and `options.upsert` is set.
    pub fn replace_one(&self, query: &Query<T>, replacement: T, options: ReplaceOptions) -> Result<UpdateResult> {
        self.mutate(|| match self.first_match(query.filter(), &[])? {
            Some(row) => {
                self.trace(MutationState::Matched);
                self.rewrite(&row, replacement)?;
                self.trace(MutationState::Applied);
                Ok(UpdateResult {
                    matched_count: 1,
                    modified_count: 1,
                    upserted_id: None,
                })
            }
            None if options.upsert => {
                self.trace(MutationState::NoMatch);
                let inserted = self.insert_value(replacement)?;
                self.trace(MutationState::Inserted);
                Ok(UpdateResult {
                    matched_count: 0,
                    modified_count: 0,
                    upserted_id: Some(inserted.id),
                })
            }
            None => {
                self.trace(MutationState::NoMatch);
                Ok(UpdateResult::default())
            }
        })
    }

    pub fn replace_by_id(&self, id: &str, replacement: T) -> Result<Document<T>> {
        self.mutate(|| {
            let row = self.row_by_id(id)?.ok_or_else(|| self.not_found(id))?;
            self.trace(MutationState::Matched);
            let replaced = self.rewrite(&row, replacement)?;
            self.trace(MutationState::Applied);
            Ok(replaced)
        })
    }

    // ── Deletes ──────────────────────────────────────────────────────

    /// Delete the first matching document (lowest id).
    pub fn delete_one(&self, query: &Query<T>) -> Result<DeleteResult> {
        let compiled = compile_query(query, &self.inner.schema)?;
        let sql = format!(
            "DELETE FROM {table} WHERE _id IN (SELECT _id FROM {table} WHERE {} ORDER BY _id ASC LIMIT 1)",
            compiled.sql,
            table = self.inner.table_sql
        );
        let deleted = self.engine().execute(&sql, &compiled.params)?;
        Ok(DeleteResult {
            deleted_count: deleted as u64,
        })
    }

    pub fn delete_many(&self, query: &Query<T>) -> Result<DeleteResult> {
        let compiled = compile_query(query, &self.inner.schema)?;
        let sql = format!("DELETE FROM {} WHERE {}", self.inner.table_sql, compiled.sql);
        let deleted = self.engine().execute(&sql, &compiled.params)?;
        Ok(DeleteResult {
            deleted_count: deleted as u64,
        })
    }

    /// Returns whether a document was deleted.
    pub fn delete_by_id(&self, id: &str) -> Result<bool> {
        Ok(self.delete_row(id)? > 0)
    }

    // ── Internals ────────────────────────────────────────────────────

    /// Run a write inside a transaction scope and log how it ended.
    fn mutate<R>(&self, body: impl FnOnce() -> Result<R>) -> Result<R> {
        self.trace(MutationState::Pending);
        let outcome = transact(self.engine(), body);
        self.trace(if outcome.is_ok() {
            MutationState::Committed
        } else {
            MutationState::RolledBack
        });
        outcome
    }

    fn fetch_rows(&self, sql: &str, params: &[(String, SqlValue)]) -> Result<Vec<StoredRow>> {
        self.engine().query_map(sql, params, StoredRow::from_row)
    }

    fn row_by_id(&self, id: &str) -> Result<Option<StoredRow>> {
        let sql = self.select_sql(" WHERE _id = :p1");
        let rows = self.fetch_rows(&sql, &[param(":p1", SqlValue::Text(id.to_string()))])?;
        Ok(rows.into_iter().next())
    }

    /// Rows for `filter` under `options`, with cursor anchors resolved and
    /// before-only pages put back into the requested order.
    fn find_rows(&self, filter: &Filter, options: &QueryOptions<T>) -> Result<Vec<StoredRow>> {
        let mut effective = options.clone();
        effective.cursor = self.resolve_cursor(options)?;
        let compiled = compile_find(filter, &effective, &self.inner.schema)?;
        let sql = self.select_sql(&compiled.tail());
        let mut rows = self.fetch_rows(&sql, &compiled.params)?;
        if compiled.reversed {
            rows.reverse();
        }
        Ok(rows)
    }

    /// The first row matching `filter` under `sort` (plus the `_id`
    /// tie-breaker; `_id` alone when `sort` is empty).
    fn first_match(&self, filter: &Filter, sort: &[SortKey]) -> Result<Option<StoredRow>> {
        let mut options = QueryOptions::new().limit(1);
        options.sort = if sort.is_empty() {
            vec![SortKey::asc(ID_FIELD)]
        } else {
            sort.to_vec()
        };
        Ok(self.find_rows(filter, &options)?.into_iter().next())
    }

    fn resolve_cursor(&self, options: &QueryOptions<T>) -> Result<Option<Cursor>> {
        let Some(cursor) = &options.cursor else {
            return Ok(None);
        };
        let mut resolved = cursor.clone();
        for position in [&mut resolved.after, &mut resolved.before].into_iter().flatten() {
            if position.sort_values.is_none() {
                position.sort_values = Some(self.anchor_values(&options.sort, &position.id)?);
            }
        }
        Ok(Some(resolved))
    }

    /// The anchor document's values for each sort key, as SQL sees them.
    fn anchor_values(&self, sort: &[SortKey], id: &str) -> Result<Vec<Value>> {
        let sql = anchor_values_sql(&self.inner.table_sql, sort, &self.inner.schema)?;
        let width = sort.len();
        let rows = self.engine().query_map(
            &sql,
            &[param(":p1", SqlValue::Text(id.to_string()))],
            |row| {
                (0..width)
                    .map(|i| row.get::<_, SqlValue>(i).map(sql_to_json))
                    .collect::<rusqlite::Result<Vec<_>>>()
            },
        )?;
        rows.into_iter().next().ok_or_else(|| self.not_found(id))
    }

    /// Write a new payload over an existing row, keeping its id and
    /// `createdAt` and advancing `updatedAt`.
    fn rewrite(&self, row: &StoredRow, data: T) -> Result<Document<T>> {
        let (data, payload) = validate_and_prepare(&self.inner.schema, data)?;
        let body = to_body(&payload)?;
        let (sql, params, updated_at) = if self.timestamps() {
            let updated_at = next_updated_at(self.inner.clock.now_millis(), row.updated_at);
            (
                format!(
                    "UPDATE {} SET body = :p1, updatedAt = :p2 WHERE _id = :p3",
                    self.inner.table_sql
                ),
                vec![
                    param(":p1", SqlValue::Text(body)),
                    param(":p2", SqlValue::Integer(updated_at)),
                    param(":p3", SqlValue::Text(row.id.clone())),
                ],
                updated_at,
            )
        } else {
            (
                format!("UPDATE {} SET body = :p1 WHERE _id = :p2", self.inner.table_sql),
                vec![
                    param(":p1", SqlValue::Text(body)),
                    param(":p2", SqlValue::Text(row.id.clone())),
                ],
                0,
            )
        };
        self.engine()
            .try_execute(&sql, &params)
            .map_err(|e| self.write_error(e, &sql, &row.id, &payload))?;
        Ok(Document {
            id: row.id.clone(),
            data,
            created_at: row.created_at,
            updated_at,
        })
    }

    fn delete_row(&self, id: &str) -> Result<usize> {
        let sql = format!("DELETE FROM {} WHERE _id = :p1", self.inner.table_sql);
        self.engine()
            .execute(&sql, &[param(":p1", SqlValue::Text(id.to_string()))])
    }

    /// Map a failed write onto the schema: unique violations name the
    /// field(s) and the offending value(s) taken from the payload.
    fn write_error(&self, err: rusqlite::Error, sql: &str, id: &str, payload: &Value) -> DocliteError {
        let failure = constraint_message(&err)
            .and_then(|message| parse_constraint_failure(&self.inner.name, message));
        let unique = |fields: &[String]| DocliteError::UniqueConstraint {
            field: fields.join(", "),
            value: fields
                .iter()
                .map(|f| self.field_value(f, id, payload))
                .collect::<Vec<_>>()
                .join(", "),
        };
        match failure {
            Some(ConstraintFailure::UniqueColumns(columns)) => unique(&columns),
            Some(ConstraintFailure::UniqueIndex(index)) => match self.inner.ddl.index_by_name(&index) {
                Some(plan) => unique(&plan.fields),
                None => DocliteError::UniqueConstraint {
                    field: index,
                    value: String::new(),
                },
            },
            Some(ConstraintFailure::NotNull(column)) => {
                DocliteError::validation(&column, format!("Field '{column}' must not be null"))
            }
            None => classify_sqlite(err, Some(sql)),
        }
    }

    fn field_value(&self, field: &str, id: &str, payload: &Value) -> String {
        if field == ID_FIELD {
            return id.to_string();
        }
        let path = self
            .inner
            .schema
            .field(field)
            .map(|f| f.json_path())
            .unwrap_or_else(|| format!("$.{field}"));
        display_value(value_at(payload, &path))
    }
}
