use crate::error::{DocliteError, Result};
use serde::Deserialize;
use std::path::Path;

use super::types::{FieldDef, IndexDef, SchemaDef};

/// On-disk form of a schema. The validate hook can only be attached in code.
#[derive(Debug, Deserialize)]
struct SchemaFile {
    #[serde(default)]
    fields: Vec<FieldDef>,
    #[serde(default)]
    indexes: Vec<IndexDef>,
    #[serde(default = "default_timestamps")]
    timestamps: bool,
}

fn default_timestamps() -> bool {
    true
}

/// Parse a schema YAML file into a SchemaDef
pub fn parse_schema<T>(path: &Path) -> Result<SchemaDef<T>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        DocliteError::Schema(format!("Failed to read {}: {e}", path.display()))
    })?;
    parse_schema_str(&content)
}

/// Parse a schema YAML string into a SchemaDef
pub fn parse_schema_str<T>(content: &str) -> Result<SchemaDef<T>> {
    let file: SchemaFile = serde_yaml::from_str(content)?;
    let mut fields = file.fields;
    for field in &mut fields {
        // `unique: true` alone is enough in YAML
        if field.unique {
            field.indexed = true;
        }
    }
    let schema = SchemaDef {
        fields,
        indexes: file.indexes,
        timestamps: file.timestamps,
        validate: None,
    };
    schema.check()?;
    Ok(schema)
}

impl<T> SchemaDef<T> {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        parse_schema_str(content)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        parse_schema(path)
    }
}
