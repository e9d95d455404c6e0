// Operator vocabulary. Operators are generic over their value type so typed
// field handles can constrain what a caller passes; the compiler works on
// the JSON-valued form.

use serde_json::Value;

use super::Filter;

/// Scalar comparisons.
#[derive(Debug, Clone, PartialEq)]
pub enum CompareOp<V = Value> {
    Eq(V),
    Ne(V),
    Gt(V),
    Gte(V),
    Lt(V),
    Lte(V),
    In(Vec<V>),
    NotIn(Vec<V>),
}

impl<V> CompareOp<V> {
    pub fn map<U>(self, mut f: impl FnMut(V) -> U) -> CompareOp<U> {
        match self {
            CompareOp::Eq(v) => CompareOp::Eq(f(v)),
            CompareOp::Ne(v) => CompareOp::Ne(f(v)),
            CompareOp::Gt(v) => CompareOp::Gt(f(v)),
            CompareOp::Gte(v) => CompareOp::Gte(f(v)),
            CompareOp::Lt(v) => CompareOp::Lt(f(v)),
            CompareOp::Lte(v) => CompareOp::Lte(f(v)),
            CompareOp::In(vs) => CompareOp::In(vs.into_iter().map(f).collect()),
            CompareOp::NotIn(vs) => CompareOp::NotIn(vs.into_iter().map(f).collect()),
        }
    }
}

/// LIKE-style matching. Patterns use `%` and `_` wildcards with `\` as the
/// escape character.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StringOp {
    Like(String),
    /// Case-insensitive `Like`, folding with full Unicode lowercasing.
    ILike(String),
    Contains(String),
    StartsWith(String),
    EndsWith(String),
}

impl StringOp {
    /// The LIKE pattern and whether it matches case-insensitively.
    /// The sugar forms match their argument literally.
    pub fn pattern(&self) -> (String, bool) {
        match self {
            StringOp::Like(p) => (p.clone(), false),
            StringOp::ILike(p) => (p.clone(), true),
            StringOp::Contains(s) => (format!("%{}%", escape_like(s)), false),
            StringOp::StartsWith(s) => (format!("{}%", escape_like(s)), false),
            StringOp::EndsWith(s) => (format!("%{}", escape_like(s)), false),
        }
    }
}

/// Escape LIKE wildcards so `text` matches literally.
pub fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Operators over array-valued fields.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayOp<V = Value> {
    /// Contains every listed value. Vacuously true for an empty list.
    All(Vec<V>),
    /// Array length is exactly n.
    Size(usize),
    /// Some element satisfies the filter. Inside it, the empty field name
    /// addresses the element itself and other names address its sub-fields.
    ElemMatch(Box<Filter>),
    /// The element at position i equals the value.
    Index(usize, V),
}

impl<V> ArrayOp<V> {
    pub fn map<U>(self, mut f: impl FnMut(V) -> U) -> ArrayOp<U> {
        match self {
            ArrayOp::All(vs) => ArrayOp::All(vs.into_iter().map(f).collect()),
            ArrayOp::Size(n) => ArrayOp::Size(n),
            ArrayOp::ElemMatch(filter) => ArrayOp::ElemMatch(filter),
            ArrayOp::Index(i, v) => ArrayOp::Index(i, f(v)),
        }
    }
}

/// A condition on a single field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp<V = Value> {
    Compare(CompareOp<V>),
    String(StringOp),
    Array(ArrayOp<V>),
    /// Present and non-null (true) or absent/null (false).
    Exists(bool),
}

impl<V: Into<Value>> FieldOp<V> {
    pub fn into_json(self) -> FieldOp<Value> {
        match self {
            FieldOp::Compare(op) => FieldOp::Compare(op.map(Into::into)),
            FieldOp::String(op) => FieldOp::String(op),
            FieldOp::Array(op) => FieldOp::Array(op.map(Into::into)),
            FieldOp::Exists(b) => FieldOp::Exists(b),
        }
    }
}

impl<V> From<CompareOp<V>> for FieldOp<V> {
    fn from(op: CompareOp<V>) -> Self {
        FieldOp::Compare(op)
    }
}

impl<V> From<StringOp> for FieldOp<V> {
    fn from(op: StringOp) -> Self {
        FieldOp::String(op)
    }
}

impl<V> From<ArrayOp<V>> for FieldOp<V> {
    fn from(op: ArrayOp<V>) -> Self {
        FieldOp::Array(op)
    }
}
