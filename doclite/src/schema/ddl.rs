// Schema/index builder: derives idempotent DDL from a SchemaDef.

use crate::error::{DocliteError, Result};

use super::names::{
    is_valid_identifier, quote_ident, quote_literal, BODY_COLUMN, CREATED_AT_FIELD, ID_FIELD,
    UPDATED_AT_FIELD,
};
use super::types::{FieldDef, SchemaDef};

/// A virtual column computed from the document body.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedColumn {
    pub field: String,
    /// Column definition as it appears in CREATE TABLE / ADD COLUMN.
    pub definition: String,
}

/// An index the builder emits, kept so constraint failures can be mapped
/// back to field names.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexPlan {
    pub name: String,
    pub fields: Vec<String>,
    pub unique: bool,
    pub sql: String,
}

/// All DDL for one collection table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDdl {
    pub table: String,
    pub create_table: String,
    pub generated_columns: Vec<GeneratedColumn>,
    pub indexes: Vec<IndexPlan>,
}

impl TableDdl {
    pub fn create_index_statements(&self) -> impl Iterator<Item = &str> {
        self.indexes.iter().map(|i| i.sql.as_str())
    }

    pub fn add_column_statement(&self, column: &GeneratedColumn) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {}",
            quote_ident(&self.table),
            column.definition
        )
    }

    pub fn index_by_name(&self, name: &str) -> Option<&IndexPlan> {
        self.indexes.iter().find(|i| i.name == name)
    }
}

/// `json_extract(body, '<path>')` for a declared field.
pub fn extraction_expr(field: &FieldDef) -> String {
    format!(
        "json_extract({BODY_COLUMN}, {})",
        quote_literal(&field.json_path())
    )
}

pub fn single_index_name(table: &str, field: &str) -> String {
    format!("idx_{table}_{}", field.replace(['.', '[', ']'], "_"))
}

pub fn compound_index_name(table: &str, index: &str) -> String {
    format!("cidx_{table}_{index}")
}

/// Build the CREATE TABLE and CREATE INDEX statements for `table`.
/// Every statement uses IF NOT EXISTS so re-running them is a no-op.
pub fn build_table_ddl<T>(table: &str, schema: &SchemaDef<T>) -> Result<TableDdl> {
    if !is_valid_identifier(table) {
        return Err(DocliteError::Schema(format!(
            "Invalid collection name '{table}'"
        )));
    }
    schema.check()?;

    let generated_columns: Vec<GeneratedColumn> = schema
        .fields
        .iter()
        .filter(|f| f.indexed)
        .map(|f| GeneratedColumn {
            field: f.name.clone(),
            definition: generated_column_definition(f),
        })
        .collect();

    let mut columns = vec![
        format!("{ID_FIELD} TEXT PRIMARY KEY"),
        format!("{BODY_COLUMN} TEXT NOT NULL"),
    ];
    if schema.timestamps {
        columns.push(format!("{CREATED_AT_FIELD} INTEGER NOT NULL"));
        columns.push(format!("{UPDATED_AT_FIELD} INTEGER NOT NULL"));
    }
    columns.extend(generated_columns.iter().map(|c| c.definition.clone()));

    let create_table = format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        quote_ident(table),
        columns.join(",\n    ")
    );

    let mut indexes = Vec::new();
    for field in schema.fields.iter().filter(|f| f.indexed) {
        let name = single_index_name(table, &field.name);
        let sql = create_index_sql(&name, table, field.unique, &[quote_ident(&field.name)]);
        indexes.push(IndexPlan {
            name,
            fields: vec![field.name.clone()],
            unique: field.unique,
            sql,
        });
    }

    for index in &schema.indexes {
        let mut keys = Vec::with_capacity(index.fields.len());
        for name in &index.fields {
            let field = schema.field(name).ok_or_else(|| {
                DocliteError::Schema(format!(
                    "Index '{}' references undeclared field '{name}'",
                    index.name
                ))
            })?;
            if field.indexed {
                keys.push(quote_ident(&field.name));
            } else {
                keys.push(extraction_expr(field));
            }
        }
        let name = compound_index_name(table, &index.name);
        let sql = create_index_sql(&name, table, index.unique, &keys);
        indexes.push(IndexPlan {
            name,
            fields: index.fields.clone(),
            unique: index.unique,
            sql,
        });
    }

    Ok(TableDdl {
        table: table.to_string(),
        create_table,
        generated_columns,
        indexes,
    })
}

fn generated_column_definition(field: &FieldDef) -> String {
    let not_null = if field.nullable { "" } else { " NOT NULL" };
    format!(
        "{} {} GENERATED ALWAYS AS ({}) VIRTUAL{not_null}",
        quote_ident(&field.name),
        field.sql_type.column_type(),
        extraction_expr(field)
    )
}

fn create_index_sql(name: &str, table: &str, unique: bool, keys: &[String]) -> String {
    format!(
        "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
        if unique { "UNIQUE " } else { "" },
        quote_ident(name),
        quote_ident(table),
        keys.join(", ")
    )
}
