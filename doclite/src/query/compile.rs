// Predicate compiler: Filter + SchemaDef -> WHERE text and ordered bound
// parameters. Literal values never appear in the SQL text.

use rusqlite::types::Value as SqlValue;
use serde_json::Value;

use crate::engine::values::json_to_sql;
use crate::engine::FOLD_FN;
use crate::error::{DocliteError, Result};
use crate::schema::ddl::extraction_expr;
use crate::schema::names::{
    is_metadata_field, is_valid_field_name, quote_ident, quote_literal, BODY_COLUMN, ID_FIELD,
};
use crate::schema::SchemaDef;

use super::ops::{ArrayOp, CompareOp, FieldOp};
use super::{Filter, Query};

pub const ALWAYS_TRUE: &str = "1 = 1";
pub const ALWAYS_FALSE: &str = "1 = 0";

/// A WHERE fragment and the parameters it references, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledPredicate {
    pub sql: String,
    pub params: Vec<(String, SqlValue)>,
}

/// Placeholder allocator shared by every fragment of one statement.
/// Names are `:p1`, `:p2`, ... and are never reused.
#[derive(Debug, Default)]
pub struct Bindings {
    params: Vec<(String, SqlValue)>,
    aliases: usize,
}

impl Bindings {
    pub fn new() -> Self {
        Bindings::default()
    }

    pub fn bind(&mut self, value: SqlValue) -> String {
        let name = format!(":p{}", self.params.len() + 1);
        self.params.push((name.clone(), value));
        name
    }

    pub fn bind_json(&mut self, value: &Value) -> String {
        self.bind(json_to_sql(value))
    }

    fn next_alias(&mut self) -> String {
        self.aliases += 1;
        format!("je{}", self.aliases)
    }

    pub fn params(&self) -> &[(String, SqlValue)] {
        &self.params
    }

    pub fn into_params(self) -> Vec<(String, SqlValue)> {
        self.params
    }
}

/// Where a field name is looked up.
#[derive(Debug, Clone)]
enum Scope {
    Document,
    /// Inside `elem_match`; the alias names the json_each row.
    Element(String),
}

/// A JSON location inside `body`, rendered as json_* function arguments.
#[derive(Debug, Clone)]
struct PathRef {
    /// json_each alias whose `fullkey` the suffix is appended to.
    base: Option<String>,
    suffix: String,
}

impl PathRef {
    fn args(&self) -> String {
        match &self.base {
            None => format!("{BODY_COLUMN}, {}", quote_literal(&self.suffix)),
            Some(alias) if self.suffix.is_empty() => format!("{BODY_COLUMN}, {alias}.fullkey"),
            Some(alias) => format!(
                "{BODY_COLUMN}, {alias}.fullkey || {}",
                quote_literal(&self.suffix)
            ),
        }
    }

    fn child(&self, step: &str) -> PathRef {
        PathRef {
            base: self.base.clone(),
            suffix: format!("{}{step}", self.suffix),
        }
    }
}

/// A resolved field: the SQL expression for its value, and its JSON
/// location when it has one (metadata columns do not).
#[derive(Debug, Clone)]
struct Target {
    sql: String,
    path: Option<PathRef>,
}

fn resolve<T>(name: &str, scope: &Scope, schema: &SchemaDef<T>) -> Result<Target> {
    match scope {
        Scope::Document => resolve_document_field(name, schema),
        Scope::Element(alias) => {
            if name.is_empty() {
                return Ok(Target {
                    sql: format!("{alias}.value"),
                    path: Some(PathRef {
                        base: Some(alias.clone()),
                        suffix: String::new(),
                    }),
                });
            }
            if !is_valid_field_name(name) {
                return Err(DocliteError::compile(format!(
                    "Malformed field reference '{name}'"
                )));
            }
            let path = PathRef {
                base: Some(alias.clone()),
                suffix: format!(".{name}"),
            };
            Ok(Target {
                sql: format!("json_extract({})", path.args()),
                path: Some(path),
            })
        }
    }
}

/// Resolution order: metadata column, generated column, JSON extraction.
fn resolve_document_field<T>(name: &str, schema: &SchemaDef<T>) -> Result<Target> {
    if name.is_empty() {
        return Err(DocliteError::compile(
            "Empty field name is only valid inside elem_match",
        ));
    }
    if is_metadata_field(name) {
        if name != ID_FIELD && !schema.timestamps {
            return Err(DocliteError::compile(format!(
                "'{name}' is unavailable: timestamps are disabled for this collection"
            )));
        }
        return Ok(Target {
            sql: name.to_string(),
            path: None,
        });
    }
    if !is_valid_field_name(name) {
        return Err(DocliteError::compile(format!(
            "Malformed field reference '{name}'"
        )));
    }
    match schema.field(name) {
        Some(def) => Ok(Target {
            sql: if def.indexed {
                quote_ident(&def.name)
            } else {
                extraction_expr(def)
            },
            path: Some(PathRef {
                base: None,
                suffix: def.json_path(),
            }),
        }),
        None => {
            let path = PathRef {
                base: None,
                suffix: format!("$.{name}"),
            };
            Ok(Target {
                sql: format!("json_extract({})", path.args()),
                path: Some(path),
            })
        }
    }
}

/// SQL expression for a field at document level, as used by ORDER BY and
/// DISTINCT.
pub(crate) fn field_expr<T>(name: &str, schema: &SchemaDef<T>) -> Result<String> {
    resolve_document_field(name, schema).map(|t| t.sql)
}

/// SQL expression for a field's value as JSON text. Booleans, arrays and
/// objects keep their JSON form, which the plain extraction loses.
pub(crate) fn field_json_expr<T>(name: &str, schema: &SchemaDef<T>) -> Result<String> {
    let target = resolve_document_field(name, schema)?;
    Ok(match target.path {
        Some(path) => format!("{BODY_COLUMN} -> {}", quote_literal(&path.suffix)),
        None => format!("json_quote({})", target.sql),
    })
}

/// Compile a typed query into a standalone predicate.
pub fn compile_query<T>(query: &Query<T>, schema: &SchemaDef<T>) -> Result<CompiledPredicate> {
    let mut bindings = Bindings::new();
    let sql = compile_filter(query.filter(), schema, &mut bindings)?;
    Ok(CompiledPredicate {
        sql,
        params: bindings.into_params(),
    })
}

/// Compile `filter`, allocating placeholders from `bindings` so the result
/// can be combined with other fragments of the same statement.
pub fn compile_filter<T>(
    filter: &Filter,
    schema: &SchemaDef<T>,
    bindings: &mut Bindings,
) -> Result<String> {
    let mut compiler = Compiler { schema, bindings };
    compiler.filter(filter, &Scope::Document, false)
}

struct Compiler<'a, T> {
    schema: &'a SchemaDef<T>,
    bindings: &'a mut Bindings,
}

impl<'a, T> Compiler<'a, T> {
    fn filter(&mut self, filter: &Filter, scope: &Scope, nested: bool) -> Result<String> {
        match filter {
            Filter::Empty => Ok(ALWAYS_TRUE.to_string()),
            Filter::Field(name, op) => self.field(name, op, scope),
            Filter::And(parts) => self.junction(parts, " AND ", ALWAYS_TRUE, scope, nested),
            Filter::Or(parts) => self.junction(parts, " OR ", ALWAYS_FALSE, scope, nested),
            Filter::Nor(parts) => {
                let inner = self.junction(parts, " OR ", ALWAYS_FALSE, scope, false)?;
                Ok(format!("NOT ({inner})"))
            }
            Filter::Not(inner) => {
                let inner = self.filter(inner, scope, false)?;
                Ok(format!("NOT ({inner})"))
            }
        }
    }

    fn junction(
        &mut self,
        parts: &[Filter],
        joiner: &str,
        identity: &str,
        scope: &Scope,
        nested: bool,
    ) -> Result<String> {
        match parts {
            [] => Ok(identity.to_string()),
            [only] => self.filter(only, scope, nested),
            _ => {
                let compiled = parts
                    .iter()
                    .map(|p| self.filter(p, scope, true))
                    .collect::<Result<Vec<_>>>()?;
                let joined = compiled.join(joiner);
                Ok(if nested { format!("({joined})") } else { joined })
            }
        }
    }

    fn field(&mut self, name: &str, op: &FieldOp, scope: &Scope) -> Result<String> {
        let target = resolve(name, scope, self.schema)?;
        match op {
            FieldOp::Compare(cmp) => Ok(self.compare(&target.sql, cmp)),
            FieldOp::String(s) => {
                let (pattern, case_insensitive) = s.pattern();
                let p = self.bindings.bind(SqlValue::Text(pattern));
                let e = &target.sql;
                Ok(if case_insensitive {
                    format!("{FOLD_FN}({e}) LIKE {FOLD_FN}({p}) ESCAPE '\\'")
                } else {
                    format!("{e} LIKE {p} ESCAPE '\\'")
                })
            }
            FieldOp::Array(arr) => {
                let path = target.path.ok_or_else(|| {
                    DocliteError::compile(format!(
                        "Array operator applied to metadata field '{name}'"
                    ))
                })?;
                self.array(&path, arr)
            }
            FieldOp::Exists(true) => Ok(format!("{} IS NOT NULL", target.sql)),
            FieldOp::Exists(false) => Ok(format!("{} IS NULL", target.sql)),
        }
    }

    fn compare(&mut self, e: &str, op: &CompareOp) -> String {
        match op {
            CompareOp::Eq(Value::Null) => format!("{e} IS NULL"),
            CompareOp::Eq(v) => format!("{e} = {}", self.bindings.bind_json(v)),
            CompareOp::Ne(Value::Null) => format!("{e} IS NOT NULL"),
            CompareOp::Ne(v) => format!("{e} IS NOT {}", self.bindings.bind_json(v)),
            CompareOp::Gt(v) => format!("{e} > {}", self.bindings.bind_json(v)),
            CompareOp::Gte(v) => format!("{e} >= {}", self.bindings.bind_json(v)),
            CompareOp::Lt(v) => format!("{e} < {}", self.bindings.bind_json(v)),
            CompareOp::Lte(v) => format!("{e} <= {}", self.bindings.bind_json(v)),
            CompareOp::In(vs) if vs.is_empty() => ALWAYS_FALSE.to_string(),
            CompareOp::In(vs) => format!("{e} IN ({})", self.bind_list(vs)),
            CompareOp::NotIn(vs) if vs.is_empty() => ALWAYS_TRUE.to_string(),
            CompareOp::NotIn(vs) => {
                format!("({e} IS NULL OR {e} NOT IN ({}))", self.bind_list(vs))
            }
        }
    }

    fn bind_list(&mut self, values: &[Value]) -> String {
        values
            .iter()
            .map(|v| self.bindings.bind_json(v))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn array(&mut self, path: &PathRef, op: &ArrayOp) -> Result<String> {
        match op {
            ArrayOp::All(values) if values.is_empty() => Ok(ALWAYS_TRUE.to_string()),
            ArrayOp::All(values) => {
                let mut checks: Vec<String> = values
                    .iter()
                    .map(|v| {
                        let alias = self.bindings.next_alias();
                        let p = self.bindings.bind_json(v);
                        format!(
                            "EXISTS (SELECT 1 FROM json_each({}) AS {alias} WHERE {alias}.value = {p})",
                            path.args()
                        )
                    })
                    .collect();
                Ok(if checks.len() == 1 {
                    checks.remove(0)
                } else {
                    format!("({})", checks.join(" AND "))
                })
            }
            ArrayOp::Size(n) => {
                let p = self.bindings.bind(SqlValue::Integer(*n as i64));
                Ok(format!("json_array_length({}) = {p}", path.args()))
            }
            ArrayOp::ElemMatch(inner) => {
                let alias = self.bindings.next_alias();
                let scope = Scope::Element(alias.clone());
                let condition = self.filter(inner, &scope, false)?;
                Ok(format!(
                    "EXISTS (SELECT 1 FROM json_each({}) AS {alias} WHERE {condition})",
                    path.args()
                ))
            }
            ArrayOp::Index(i, v) => {
                let element = format!("json_extract({})", path.child(&format!("[{i}]")).args());
                Ok(self.compare(&element, &CompareOp::Eq(v.clone())))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::op;
    use crate::schema::{FieldDef, SqlType};
    use pretty_assertions::assert_eq;

    type Doc = serde_json::Value;

    fn schema() -> SchemaDef<Doc> {
        SchemaDef::builder()
            .indexed("name", SqlType::Text)
            .indexed("age", SqlType::Integer)
            .unique("email", SqlType::Text)
            .field(FieldDef::new("city", SqlType::Text).path("$.address.city"))
            .build()
            .unwrap()
    }

    fn compile(q: Query<Doc>) -> CompiledPredicate {
        compile_query(&q, &schema()).unwrap()
    }

    fn names(p: &CompiledPredicate) -> Vec<&str> {
        p.params.iter().map(|(n, _)| n.as_str()).collect()
    }

    #[test]
    fn test_field_resolution_order() {
        let p = compile(Query::eq("_id", "abc"));
        assert_eq!(p.sql, "_id = :p1");

        let p = compile(Query::gt("createdAt", 10));
        assert_eq!(p.sql, "createdAt > :p1");

        let p = compile(Query::eq("name", "A"));
        assert_eq!(p.sql, "\"name\" = :p1");

        let p = compile(Query::eq("city", "Oslo"));
        assert_eq!(p.sql, "json_extract(body, '$.address.city') = :p1");

        let p = compile(Query::eq("profile.nick", "z"));
        assert_eq!(p.sql, "json_extract(body, '$.profile.nick') = :p1");
        assert_eq!(p.params, vec![(":p1".to_string(), SqlValue::Text("z".into()))]);
    }

    #[test]
    fn test_field_json_expr() {
        let schema = schema();
        assert_eq!(field_json_expr("name", &schema).unwrap(), "body -> '$.name'");
        assert_eq!(field_json_expr("city", &schema).unwrap(), "body -> '$.address.city'");
        assert_eq!(field_json_expr("_id", &schema).unwrap(), "json_quote(_id)");
        assert!(field_json_expr("", &schema).is_err());
    }

    #[test]
    fn test_compare_operators() {
        let q = Query::and([
            Query::ne("name", "x"),
            Query::gte("age", 18),
            Query::lt("age", 65),
            Query::lte("score", 1.5),
            Query::eq("flag", true),
        ]);
        let p = compile(q);
        assert_eq!(
            p.sql,
            "\"name\" IS NOT :p1 AND \"age\" >= :p2 AND \"age\" < :p3 AND \
             json_extract(body, '$.score') <= :p4 AND json_extract(body, '$.flag') = :p5"
        );
        assert_eq!(p.params[3].1, SqlValue::Real(1.5));
        assert_eq!(p.params[4].1, SqlValue::Integer(1));
    }

    #[test]
    fn test_null_comparisons() {
        assert_eq!(compile(Query::eq("name", Doc::Null)).sql, "\"name\" IS NULL");
        let p = compile(Query::ne("name", Doc::Null));
        assert_eq!(p.sql, "\"name\" IS NOT NULL");
        assert!(p.params.is_empty());
    }

    #[test]
    fn test_in_and_not_in() {
        let p = compile(Query::is_in("age", [1, 2, 3]));
        assert_eq!(p.sql, "\"age\" IN (:p1, :p2, :p3)");

        let p = compile(Query::not_in("age", [1]));
        assert_eq!(p.sql, "(\"age\" IS NULL OR \"age\" NOT IN (:p1))");
    }

    #[test]
    fn test_empty_in_lists_short_circuit() {
        let empty: Vec<i64> = Vec::new();
        for name in ["_id", "name", "nested.value", "createdAt"] {
            let p = compile(Query::is_in(name, empty.clone()));
            assert_eq!(p.sql, ALWAYS_FALSE);
            assert!(p.params.is_empty());

            let p = compile(Query::not_in(name, empty.clone()));
            assert_eq!(p.sql, ALWAYS_TRUE);
            assert!(p.params.is_empty());
        }
    }

    #[test]
    fn test_placeholders_never_collide() {
        let q = Query::or([Query::eq("name", "same"), Query::eq("email", "same")]);
        let p = compile(q);
        assert_eq!(p.sql, "\"name\" = :p1 OR \"email\" = :p2");
        assert_eq!(names(&p), vec![":p1", ":p2"]);
    }

    #[test]
    fn test_nested_junctions_are_parenthesized() {
        let q = Query::and([
            Query::eq("name", "A"),
            Query::or([Query::eq("age", 1), Query::eq("age", 2)]),
        ]);
        assert_eq!(
            compile(q).sql,
            "\"name\" = :p1 AND (\"age\" = :p2 OR \"age\" = :p3)"
        );

        let q = Query::or([
            Query::and([Query::eq("name", "A"), Query::eq("age", 1)]),
            Query::and([Query::eq("name", "B"), Query::eq("age", 2)]),
        ]);
        assert_eq!(
            compile(q).sql,
            "(\"name\" = :p1 AND \"age\" = :p2) OR (\"name\" = :p3 AND \"age\" = :p4)"
        );
    }

    #[test]
    fn test_not_and_nor() {
        let q = Query::not(Query::eq("name", "A"));
        assert_eq!(compile(q).sql, "NOT (\"name\" = :p1)");

        let q = Query::nor([Query::eq("name", "A"), Query::eq("name", "B")]);
        assert_eq!(compile(q).sql, "NOT (\"name\" = :p1 OR \"name\" = :p2)");

        let nor = Query::nor([Query::eq("a", 1), Query::eq("b", 2)]);
        let not_or = Query::not(Query::or([Query::eq("a", 1), Query::eq("b", 2)]));
        assert_eq!(compile(nor), compile(not_or));
    }

    #[test]
    fn test_degenerate_junctions() {
        assert_eq!(compile(Query::and([])).sql, ALWAYS_TRUE);
        assert_eq!(compile(Query::or([])).sql, ALWAYS_FALSE);
        assert_eq!(compile(Query::empty()).sql, ALWAYS_TRUE);
        assert_eq!(compile(Query::and([Query::eq("age", 3)])).sql, "\"age\" = :p1");
    }

    #[test]
    fn test_string_operators() {
        let p = compile(op::contains("li").bind("name"));
        assert_eq!(p.sql, "\"name\" LIKE :p1 ESCAPE '\\'");
        assert_eq!(p.params[0].1, SqlValue::Text("%li%".into()));

        let p = compile(op::ilike("al%").bind("name"));
        assert_eq!(p.sql, "unicode_lower(\"name\") LIKE unicode_lower(:p1) ESCAPE '\\'");
    }

    #[test]
    fn test_exists() {
        assert_eq!(
            compile(Query::exists("bio", true)).sql,
            "json_extract(body, '$.bio') IS NOT NULL"
        );
        assert_eq!(compile(Query::exists("name", false)).sql, "\"name\" IS NULL");
    }

    #[test]
    fn test_array_all_and_size() {
        let p = compile(op::all(["a", "b"]).bind("tags"));
        assert_eq!(
            p.sql,
            "(EXISTS (SELECT 1 FROM json_each(body, '$.tags') AS je1 WHERE je1.value = :p1) AND \
             EXISTS (SELECT 1 FROM json_each(body, '$.tags') AS je2 WHERE je2.value = :p2))"
        );

        let empty: Vec<String> = Vec::new();
        assert_eq!(compile(op::all(empty).bind("tags")).sql, ALWAYS_TRUE);

        let p = compile(op::size(3).bind("tags"));
        assert_eq!(p.sql, "json_array_length(body, '$.tags') = :p1");
        assert_eq!(p.params[0].1, SqlValue::Integer(3));
    }

    #[test]
    fn test_array_index() {
        let p = compile(op::at(2, "x").bind("tags"));
        assert_eq!(p.sql, "json_extract(body, '$.tags[2]') = :p1");
    }

    #[test]
    fn test_elem_match() {
        let element = Query::<Doc>::and([Query::eq("sku", "A1"), Query::gt("qty", 2)]);
        let p = compile(op::elem_match(element).bind("items"));
        assert_eq!(
            p.sql,
            "EXISTS (SELECT 1 FROM json_each(body, '$.items') AS je1 WHERE \
             json_extract(body, je1.fullkey || '.sku') = :p1 AND \
             json_extract(body, je1.fullkey || '.qty') > :p2)"
        );

        let p = compile(op::elem_match(op::gt(5).on_element()).bind("scores"));
        assert_eq!(
            p.sql,
            "EXISTS (SELECT 1 FROM json_each(body, '$.scores') AS je1 WHERE je1.value > :p1)"
        );
    }

    #[test]
    fn test_nested_elem_match() {
        let inner = op::elem_match(op::eq("red").on_element()).bind::<Doc>("colors");
        let p = compile(op::elem_match(inner).bind("variants"));
        assert_eq!(
            p.sql,
            "EXISTS (SELECT 1 FROM json_each(body, '$.variants') AS je1 WHERE \
             EXISTS (SELECT 1 FROM json_each(body, je1.fullkey || '.colors') AS je2 WHERE je2.value = :p1))"
        );
    }

    #[test]
    fn test_deterministic() {
        let q = || Query::<Doc>::eq("name", "A").and_also(Query::is_in("age", [1, 2]));
        assert_eq!(compile(q()), compile(q()));
    }

    #[test]
    fn test_compile_errors() {
        let s = schema();
        let err = compile_query(&Query::<Doc>::eq("bad name", 1), &s).unwrap_err();
        assert!(matches!(err, DocliteError::Query { sql: None, .. }));

        let err = compile_query(&op::size(1).bind::<Doc>("_id"), &s).unwrap_err();
        assert!(err.to_string().contains("metadata"));

        assert!(compile_query(&Query::<Doc>::exists("", true), &s).is_err());

        let no_ts: SchemaDef<Doc> = SchemaDef::builder().timestamps(false).build().unwrap();
        assert!(compile_query(&Query::<Doc>::gt("updatedAt", 1), &no_ts).is_err());
    }

    #[test]
    fn test_bindings_continue_across_fragments() {
        let s = schema();
        let mut bindings = Bindings::new();
        let a = compile_filter(Query::<Doc>::eq("name", "A").filter(), &s, &mut bindings).unwrap();
        let b = compile_filter(Query::<Doc>::eq("age", 3).filter(), &s, &mut bindings).unwrap();
        assert_eq!(a, "\"name\" = :p1");
        assert_eq!(b, "\"age\" = :p2");
        assert_eq!(bindings.params().len(), 2);
    }
}
