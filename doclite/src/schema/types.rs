use crate::error::{DocliteError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use super::names::{is_valid_field_name, is_valid_identifier, is_valid_json_path, METADATA_FIELDS};

/// Payload hook run before every write. May rewrite the payload.
pub type Validator<T> = Arc<dyn Fn(T) -> std::result::Result<T, String> + Send + Sync>;

/// SQL storage class of a promoted field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlType {
    Text,
    Integer,
    Real,
    Blob,
    Numeric,
    Boolean,
}

impl SqlType {
    /// Declared column type. SQLite has no boolean storage class.
    pub fn column_type(self) -> &'static str {
        match self {
            SqlType::Text => "TEXT",
            SqlType::Integer | SqlType::Boolean => "INTEGER",
            SqlType::Real => "REAL",
            SqlType::Blob => "BLOB",
            SqlType::Numeric => "NUMERIC",
        }
    }
}

/// A declared payload field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(rename = "type")]
    pub sql_type: SqlType,
    #[serde(default)]
    pub indexed: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default = "default_true")]
    pub nullable: bool,
}

fn default_true() -> bool {
    true
}

impl FieldDef {
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        FieldDef {
            name: name.into(),
            path: None,
            sql_type,
            indexed: false,
            unique: false,
            nullable: true,
        }
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    /// Unique fields are always indexed.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self.indexed = true;
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// JSON path into the document body, `$.<name>` unless overridden.
    pub fn json_path(&self) -> String {
        match &self.path {
            Some(p) => p.clone(),
            None => format!("$.{}", self.name),
        }
    }
}

/// A compound index over declared fields. Field order is the index key order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub fields: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

impl IndexDef {
    pub fn new<I, S>(name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        IndexDef {
            name: name.into(),
            fields: fields.into_iter().map(Into::into).collect(),
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Declarative description of one collection.
pub struct SchemaDef<T> {
    pub fields: Vec<FieldDef>,
    pub indexes: Vec<IndexDef>,
    pub timestamps: bool,
    pub validate: Option<Validator<T>>,
}

impl<T> SchemaDef<T> {
    /// A schema with no promoted fields and timestamps enabled.
    pub fn new() -> Self {
        SchemaDef {
            fields: Vec::new(),
            indexes: Vec::new(),
            timestamps: true,
            validate: None,
        }
    }

    pub fn builder() -> SchemaBuilder<T> {
        SchemaBuilder { def: SchemaDef::new() }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn index(&self, name: &str) -> Option<&IndexDef> {
        self.indexes.iter().find(|i| i.name == name)
    }

    /// Check the structural invariants: valid and distinct names,
    /// `unique => indexed`, and compound indexes naming declared fields.
    pub fn check(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for field in &self.fields {
            if !is_valid_field_name(&field.name) {
                return Err(DocliteError::Schema(format!(
                    "Invalid field name '{}'",
                    field.name
                )));
            }
            if METADATA_FIELDS.contains(&field.name.as_str()) || field.name == "body" {
                return Err(DocliteError::Schema(format!(
                    "Field name '{}' is reserved",
                    field.name
                )));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(DocliteError::Schema(format!(
                    "Field '{}' declared twice",
                    field.name
                )));
            }
            if let Some(path) = &field.path {
                if !is_valid_json_path(path) {
                    return Err(DocliteError::Schema(format!(
                        "Invalid JSON path '{path}' for field '{}'",
                        field.name
                    )));
                }
            }
            if field.unique && !field.indexed {
                return Err(DocliteError::Schema(format!(
                    "Field '{}' is unique but not indexed",
                    field.name
                )));
            }
        }

        let mut index_names = HashSet::new();
        for index in &self.indexes {
            if !is_valid_identifier(&index.name) {
                return Err(DocliteError::Schema(format!(
                    "Invalid index name '{}'",
                    index.name
                )));
            }
            if !index_names.insert(index.name.as_str()) {
                return Err(DocliteError::Schema(format!(
                    "Index '{}' declared twice",
                    index.name
                )));
            }
            if index.fields.is_empty() {
                return Err(DocliteError::Schema(format!(
                    "Index '{}' has no fields",
                    index.name
                )));
            }
            for name in &index.fields {
                if self.field(name).is_none() {
                    return Err(DocliteError::Schema(format!(
                        "Index '{}' references undeclared field '{name}'",
                        index.name
                    )));
                }
            }
        }
        Ok(())
    }
}

impl<T> Default for SchemaDef<T> {
    fn default() -> Self {
        SchemaDef::new()
    }
}

impl<T> Clone for SchemaDef<T> {
    fn clone(&self) -> Self {
        SchemaDef {
            fields: self.fields.clone(),
            indexes: self.indexes.clone(),
            timestamps: self.timestamps,
            validate: self.validate.clone(),
        }
    }
}

impl<T> fmt::Debug for SchemaDef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaDef")
            .field("fields", &self.fields)
            .field("indexes", &self.indexes)
            .field("timestamps", &self.timestamps)
            .field("validate", &self.validate.is_some())
            .finish()
    }
}

/// Fluent construction of a [`SchemaDef`].
pub struct SchemaBuilder<T> {
    def: SchemaDef<T>,
}

impl<T> SchemaBuilder<T> {
    pub fn field(mut self, field: FieldDef) -> Self {
        self.def.fields.push(field);
        self
    }

    /// Shorthand for an indexed field.
    pub fn indexed(self, name: impl Into<String>, sql_type: SqlType) -> Self {
        self.field(FieldDef::new(name, sql_type).indexed())
    }

    /// Shorthand for a unique (and therefore indexed) field.
    pub fn unique(self, name: impl Into<String>, sql_type: SqlType) -> Self {
        self.field(FieldDef::new(name, sql_type).unique())
    }

    pub fn index(mut self, index: IndexDef) -> Self {
        self.def.indexes.push(index);
        self
    }

    pub fn timestamps(mut self, enabled: bool) -> Self {
        self.def.timestamps = enabled;
        self
    }

    pub fn validate<F>(mut self, f: F) -> Self
    where
        F: Fn(T) -> std::result::Result<T, String> + Send + Sync + 'static,
    {
        self.def.validate = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> Result<SchemaDef<T>> {
        self.def.check()?;
        Ok(self.def)
    }
}
