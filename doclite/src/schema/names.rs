// Identifier and path rules shared by the DDL builder and the query compiler.
// Names end up inside SQL text, so anything that does not match is rejected
// rather than escaped.

use regex::Regex;
use std::sync::OnceLock;

pub const ID_FIELD: &str = "_id";
pub const CREATED_AT_FIELD: &str = "createdAt";
pub const UPDATED_AT_FIELD: &str = "updatedAt";
pub const BODY_COLUMN: &str = "body";

pub const METADATA_FIELDS: [&str; 3] = [ID_FIELD, CREATED_AT_FIELD, UPDATED_AT_FIELD];

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex"))
}

fn field_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\[[0-9]+\])*(\.[A-Za-z_][A-Za-z0-9_]*(\[[0-9]+\])*)*$")
            .expect("static regex")
    })
}

fn json_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\$(\.[A-Za-z_][A-Za-z0-9_]*|\[[0-9]+\])+$").expect("static regex")
    })
}

/// Table and index names.
pub fn is_valid_identifier(name: &str) -> bool {
    identifier_re().is_match(name)
}

/// Dotted payload field names, e.g. `address.city` or `tags[0]`.
pub fn is_valid_field_name(name: &str) -> bool {
    field_name_re().is_match(name)
}

pub fn is_valid_json_path(path: &str) -> bool {
    json_path_re().is_match(path)
}

pub fn is_metadata_field(name: &str) -> bool {
    METADATA_FIELDS.contains(&name)
}

/// Double-quoted SQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Single-quoted SQL string literal.
pub fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}
