use regex::Regex;
use rusqlite::ErrorCode;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocliteError {
    #[error("Validation error{}: {message}", field_suffix(.field))]
    Validation {
        field: Option<String>,
        message: String,
    },

    #[error("Unique constraint violated on '{field}' (value: {value})")]
    UniqueConstraint { field: String, value: String },

    #[error("Document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("Query error: {message}")]
    Query {
        message: String,
        sql: Option<String>,
    },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Schema error: {0}")]
    Schema(String),
}

pub type Result<T> = std::result::Result<T, DocliteError>;

fn field_suffix(field: &Option<String>) -> String {
    field.as_deref().map(|f| format!(" on '{f}'")).unwrap_or_default()
}

impl DocliteError {
    pub(crate) fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        DocliteError::Validation {
            field: Some(field.into()),
            message: message.into(),
        }
    }

    /// A compile-time rejection: nothing was sent to SQLite.
    pub(crate) fn compile(message: impl Into<String>) -> Self {
        DocliteError::Query {
            message: message.into(),
            sql: None,
        }
    }
}

impl From<serde_json::Error> for DocliteError {
    fn from(e: serde_json::Error) -> Self {
        DocliteError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for DocliteError {
    fn from(e: serde_yaml::Error) -> Self {
        DocliteError::Schema(e.to_string())
    }
}

impl From<std::io::Error> for DocliteError {
    fn from(e: std::io::Error) -> Self {
        DocliteError::Connection(e.to_string())
    }
}

/// A constraint failure reported by SQLite, before it is mapped onto
/// schema field names.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ConstraintFailure {
    /// `UNIQUE constraint failed: t.a, t.b`
    UniqueColumns(Vec<String>),
    /// `UNIQUE constraint failed: index 'idx_t_x'`
    UniqueIndex(String),
    /// `NOT NULL constraint failed: t.a`
    NotNull(String),
}

fn unique_columns_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"UNIQUE constraint failed: (.+)$").expect("static regex")
    })
}

fn unique_index_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"UNIQUE constraint failed: index '([^']+)'").expect("static regex")
    })
}

fn not_null_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"NOT NULL constraint failed: (.+)$").expect("static regex")
    })
}

/// Parse SQLite's constraint message. Column references keep their
/// `table.` prefix stripped.
pub(crate) fn parse_constraint_failure(table: &str, message: &str) -> Option<ConstraintFailure> {
    let strip = |qualified: &str| -> String {
        let qualified = qualified.trim();
        qualified
            .strip_prefix(table)
            .and_then(|rest| rest.strip_prefix('.'))
            .unwrap_or(qualified)
            .to_string()
    };

    if let Some(caps) = unique_index_re().captures(message) {
        return Some(ConstraintFailure::UniqueIndex(caps[1].to_string()));
    }
    if let Some(caps) = unique_columns_re().captures(message) {
        let cols = caps[1].split(", ").map(strip).collect();
        return Some(ConstraintFailure::UniqueColumns(cols));
    }
    if let Some(caps) = not_null_re().captures(message) {
        return Some(ConstraintFailure::NotNull(strip(&caps[1])));
    }
    None
}

/// Map a rusqlite error that is not a recognised constraint failure.
pub(crate) fn classify_sqlite(err: rusqlite::Error, sql: Option<&str>) -> DocliteError {
    if let rusqlite::Error::SqliteFailure(ffi_err, ref msg) = err {
        let message = msg.clone().unwrap_or_else(|| ffi_err.to_string());
        match ffi_err.code {
            ErrorCode::CannotOpen
            | ErrorCode::NotADatabase
            | ErrorCode::PermissionDenied
            | ErrorCode::AuthorizationForStatementDenied
            | ErrorCode::SystemIoFailure => return DocliteError::Connection(message),
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                return DocliteError::Transaction(message)
            }
            _ => {
                return DocliteError::Query {
                    message,
                    sql: sql.map(str::to_string),
                }
            }
        }
    }
    match err {
        rusqlite::Error::InvalidPath(p) => {
            DocliteError::Connection(format!("invalid database path: {}", p.display()))
        }
        rusqlite::Error::FromSqlConversionFailure(_, _, e) => {
            DocliteError::Serialization(e.to_string())
        }
        other => DocliteError::Query {
            message: other.to_string(),
            sql: sql.map(str::to_string),
        },
    }
}

/// The raw message of a constraint violation, if `err` is one.
pub(crate) fn constraint_message(err: &rusqlite::Error) -> Option<&str> {
    match err {
        rusqlite::Error::SqliteFailure(e, Some(msg))
            if e.code == ErrorCode::ConstraintViolation =>
        {
            Some(msg.as_str())
        }
        _ => None,
    }
}
