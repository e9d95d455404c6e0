// Document envelope and the body codec: payloads are stored as minified
// JSON in the `body` column.

use crate::error::{DocliteError, Result};
use rusqlite::Row;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A stored document: the caller's payload plus the metadata the store
/// maintains. Timestamps read as 0 when the collection has them disabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document<T> {
    #[serde(rename = "_id")]
    pub id: String,
    pub data: T,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
    #[serde(rename = "updatedAt")]
    pub updated_at: i64,
}

impl<T> Document<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Document<U> {
        Document {
            id: self.id,
            data: f(self.data),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// A row as read from a collection table, before decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub id: String,
    pub body: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl StoredRow {
    /// Column order every collection SELECT uses.
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(StoredRow {
            id: row.get(0)?,
            body: row.get(1)?,
            created_at: row.get(2)?,
            updated_at: row.get(3)?,
        })
    }

    pub fn parse_body(&self) -> Result<Value> {
        serde_json::from_str(&self.body).map_err(|e| {
            DocliteError::Serialization(format!("Corrupt body for document '{}': {e}", self.id))
        })
    }

    /// Decode the payload as stored.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<Document<T>> {
        self.decode_with(|_| {})
    }

    /// Decode the payload after `shape` has rewritten its JSON form
    /// (used for field projection).
    pub fn decode_with<T: DeserializeOwned>(&self, shape: impl FnOnce(&mut Value)) -> Result<Document<T>> {
        let mut value = self.parse_body()?;
        shape(&mut value);
        let data = decode_payload(value)?;
        Ok(Document {
            id: self.id.clone(),
            data,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Serialize a payload to its JSON tree.
pub fn encode_payload<T: Serialize>(data: &T) -> Result<Value> {
    serde_json::to_value(data).map_err(|e| DocliteError::Serialization(e.to_string()))
}

pub fn decode_payload<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| DocliteError::Serialization(e.to_string()))
}

/// Canonical body text for a payload tree.
pub fn to_body(value: &Value) -> Result<String> {
    serde_json::to_string(value).map_err(|e| DocliteError::Serialization(e.to_string()))
}

// ── JSON paths ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Step<'a> {
    Key(&'a str),
    Index(usize),
}

/// Split `a.b[2].c` (optionally prefixed with `$.`) into steps.
fn steps(path: &str) -> Option<Vec<Step<'_>>> {
    let path = path.strip_prefix("$.").or_else(|| path.strip_prefix('$')).unwrap_or(path);
    let mut out = Vec::new();
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        let (key, mut rest) = match segment.find('[') {
            Some(i) => (&segment[..i], &segment[i..]),
            None => (segment, ""),
        };
        if !key.is_empty() {
            out.push(Step::Key(key));
        }
        while let Some(stripped) = rest.strip_prefix('[') {
            let end = stripped.find(']')?;
            out.push(Step::Index(stripped[..end].parse().ok()?));
            rest = &stripped[end + 1..];
        }
    }
    Some(out)
}

/// The value at a field name or JSON path, if present.
pub fn value_at<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    let mut current = value;
    for step in steps(path)? {
        current = match step {
            Step::Key(k) => current.get(k)?,
            Step::Index(i) => current.get(i)?,
        };
    }
    Some(current)
}

/// Remove the value at a dotted field name. Returns whether anything was
/// removed.
pub fn remove_at(value: &mut Value, path: &str) -> bool {
    let Some(steps) = steps(path) else {
        return false;
    };
    let Some((last, parents)) = steps.split_last() else {
        return false;
    };
    let mut current = value;
    for step in parents {
        let next = match step {
            Step::Key(k) => current.get_mut(*k),
            Step::Index(i) => current.get_mut(*i),
        };
        match next {
            Some(v) => current = v,
            None => return false,
        }
    }
    match (last, current) {
        (Step::Key(k), Value::Object(map)) => map.remove(*k).is_some(),
        (Step::Index(i), Value::Array(items)) if *i < items.len() => {
            items.remove(*i);
            true
        }
        _ => false,
    }
}

/// Copy the value at a dotted field name from `source` into `target`,
/// creating intermediate objects. Array subscripts are not copied
/// element-wise; the whole array under the key is taken instead.
pub fn copy_at(source: &Value, target: &mut Value, path: &str) {
    let Some(steps) = steps(path) else {
        return;
    };
    let keys: Vec<&str> = steps
        .iter()
        .map_while(|s| match s {
            Step::Key(k) => Some(*k),
            Step::Index(_) => None,
        })
        .collect();
    if keys.is_empty() {
        return;
    }
    let mut src = source;
    for k in &keys {
        match src.get(*k) {
            Some(v) => src = v,
            None => return,
        }
    }
    let mut dst = target;
    for (i, k) in keys.iter().enumerate() {
        if !dst.is_object() {
            *dst = Value::Object(serde_json::Map::new());
        }
        let Value::Object(map) = dst else {
            return;
        };
        if i + 1 == keys.len() {
            map.insert((*k).to_string(), src.clone());
            return;
        }
        dst = map
            .entry((*k).to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }
}

/// Render a payload value for an error message: strings raw, everything
/// else as JSON.
pub fn display_value(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(v) => v.to_string(),
        None => "null".to_string(),
    }
}
