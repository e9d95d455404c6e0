//! Query algebra: a closed set of predicate variants, plus the typed
//! wrappers callers build them with. No execution logic lives here.

pub mod compile;
pub mod ops;

use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;

pub use compile::{compile_filter, compile_query, Bindings, CompiledPredicate};
pub use ops::{escape_like, ArrayOp, CompareOp, FieldOp, StringOp};

/// Untyped filter tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every document.
    Empty,
    Field(String, FieldOp),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Nor(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn field(name: impl Into<String>, op: impl Into<FieldOp>) -> Self {
        Filter::Field(name.into(), op.into())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Filter::Empty)
    }

    /// Conjunction that drops `Empty` members and avoids one-element `And`s.
    pub fn conjoin(filters: impl IntoIterator<Item = Filter>) -> Filter {
        let mut parts: Vec<Filter> = filters.into_iter().filter(|f| !f.is_empty()).collect();
        match parts.len() {
            0 => Filter::Empty,
            1 => parts.pop().unwrap_or(Filter::Empty),
            _ => Filter::And(parts),
        }
    }
}

/// A filter over documents whose payload type is `T`.
pub struct Query<T> {
    filter: Filter,
    _doc: PhantomData<fn() -> T>,
}

impl<T> Query<T> {
    pub fn from_filter(filter: Filter) -> Self {
        Query {
            filter,
            _doc: PhantomData,
        }
    }

    /// Matches every document.
    pub fn empty() -> Self {
        Query::from_filter(Filter::Empty)
    }

    pub fn field<V: Into<Value>>(name: impl Into<String>, op: impl Into<FieldOp<V>>) -> Self {
        Query::from_filter(Filter::Field(name.into(), op.into().into_json()))
    }

    pub fn eq(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Query::field(name, CompareOp::Eq(value.into()))
    }

    pub fn ne(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Query::field(name, CompareOp::Ne(value.into()))
    }

    pub fn gt(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Query::field(name, CompareOp::Gt(value.into()))
    }

    pub fn gte(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Query::field(name, CompareOp::Gte(value.into()))
    }

    pub fn lt(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Query::field(name, CompareOp::Lt(value.into()))
    }

    pub fn lte(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Query::field(name, CompareOp::Lte(value.into()))
    }

    pub fn is_in<V: Into<Value>>(name: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Query::field(name, CompareOp::<Value>::In(values.into_iter().map(Into::into).collect()))
    }

    pub fn not_in<V: Into<Value>>(name: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Query::field(name, CompareOp::<Value>::NotIn(values.into_iter().map(Into::into).collect()))
    }

    pub fn exists(name: impl Into<String>, present: bool) -> Self {
        Query::from_filter(Filter::Field(name.into(), FieldOp::Exists(present)))
    }

    pub fn and(queries: impl IntoIterator<Item = Query<T>>) -> Self {
        Query::from_filter(Filter::And(queries.into_iter().map(Query::into_filter).collect()))
    }

    pub fn or(queries: impl IntoIterator<Item = Query<T>>) -> Self {
        Query::from_filter(Filter::Or(queries.into_iter().map(Query::into_filter).collect()))
    }

    pub fn nor(queries: impl IntoIterator<Item = Query<T>>) -> Self {
        Query::from_filter(Filter::Nor(queries.into_iter().map(Query::into_filter).collect()))
    }

    pub fn not(query: Query<T>) -> Self {
        Query::from_filter(Filter::Not(Box::new(query.filter)))
    }

    /// `self AND other`, flattening nested conjunctions.
    pub fn and_also(self, other: Query<T>) -> Self {
        let mut parts = match self.filter {
            Filter::And(parts) => parts,
            Filter::Empty => Vec::new(),
            f => vec![f],
        };
        match other.filter {
            Filter::And(more) => parts.extend(more),
            Filter::Empty => {}
            f => parts.push(f),
        }
        Query::from_filter(Filter::conjoin(parts))
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    pub fn into_filter(self) -> Filter {
        self.filter
    }
}

impl<T> Default for Query<T> {
    fn default() -> Self {
        Query::empty()
    }
}

impl<T> Clone for Query<T> {
    fn clone(&self) -> Self {
        Query::from_filter(self.filter.clone())
    }
}

impl<T> PartialEq for Query<T> {
    fn eq(&self, other: &Self) -> bool {
        self.filter == other.filter
    }
}

impl<T> fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Query").field(&self.filter).finish()
    }
}

impl<T> From<Query<T>> for Filter {
    fn from(query: Query<T>) -> Self {
        query.filter
    }
}

/// Operators written before the field they apply to. `bind` attaches the
/// field name and yields a query.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Op(FieldOp),
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn and(self, other: Predicate) -> Predicate {
        match self {
            Predicate::All(mut ps) => {
                ps.push(other);
                Predicate::All(ps)
            }
            p => Predicate::All(vec![p, other]),
        }
    }

    pub fn or(self, other: Predicate) -> Predicate {
        match self {
            Predicate::Any(mut ps) => {
                ps.push(other);
                Predicate::Any(ps)
            }
            p => Predicate::Any(vec![p, other]),
        }
    }

    pub fn negate(self) -> Predicate {
        Predicate::Not(Box::new(self))
    }

    pub fn bind<T>(self, name: impl Into<String>) -> Query<T> {
        Query::from_filter(self.bind_filter(&name.into()))
    }

    /// Bind to the array element itself, for use inside `elem_match`.
    pub fn on_element(self) -> Filter {
        self.bind_filter("")
    }

    fn bind_filter(self, name: &str) -> Filter {
        match self {
            Predicate::Op(op) => Filter::Field(name.to_string(), op),
            Predicate::All(ps) => Filter::And(ps.into_iter().map(|p| p.bind_filter(name)).collect()),
            Predicate::Any(ps) => Filter::Or(ps.into_iter().map(|p| p.bind_filter(name)).collect()),
            Predicate::Not(p) => Filter::Not(Box::new(p.bind_filter(name))),
        }
    }
}

/// Free-standing operator constructors for the unbound style:
/// `op::gte(18).and(op::lt(65)).bind("age")`.
pub mod op {
    use super::{ArrayOp, CompareOp, Filter, FieldOp, Predicate, StringOp};
    use serde_json::Value;

    fn compare(op: CompareOp) -> Predicate {
        Predicate::Op(FieldOp::Compare(op))
    }

    pub fn eq(v: impl Into<Value>) -> Predicate {
        compare(CompareOp::Eq(v.into()))
    }

    pub fn ne(v: impl Into<Value>) -> Predicate {
        compare(CompareOp::Ne(v.into()))
    }

    pub fn gt(v: impl Into<Value>) -> Predicate {
        compare(CompareOp::Gt(v.into()))
    }

    pub fn gte(v: impl Into<Value>) -> Predicate {
        compare(CompareOp::Gte(v.into()))
    }

    pub fn lt(v: impl Into<Value>) -> Predicate {
        compare(CompareOp::Lt(v.into()))
    }

    pub fn lte(v: impl Into<Value>) -> Predicate {
        compare(CompareOp::Lte(v.into()))
    }

    pub fn is_in<V: Into<Value>>(vs: impl IntoIterator<Item = V>) -> Predicate {
        compare(CompareOp::In(vs.into_iter().map(Into::into).collect()))
    }

    pub fn not_in<V: Into<Value>>(vs: impl IntoIterator<Item = V>) -> Predicate {
        compare(CompareOp::NotIn(vs.into_iter().map(Into::into).collect()))
    }

    pub fn like(pattern: impl Into<String>) -> Predicate {
        Predicate::Op(FieldOp::String(StringOp::Like(pattern.into())))
    }

    pub fn ilike(pattern: impl Into<String>) -> Predicate {
        Predicate::Op(FieldOp::String(StringOp::ILike(pattern.into())))
    }

    pub fn contains(s: impl Into<String>) -> Predicate {
        Predicate::Op(FieldOp::String(StringOp::Contains(s.into())))
    }

    pub fn starts_with(s: impl Into<String>) -> Predicate {
        Predicate::Op(FieldOp::String(StringOp::StartsWith(s.into())))
    }

    pub fn ends_with(s: impl Into<String>) -> Predicate {
        Predicate::Op(FieldOp::String(StringOp::EndsWith(s.into())))
    }

    pub fn all<V: Into<Value>>(vs: impl IntoIterator<Item = V>) -> Predicate {
        Predicate::Op(FieldOp::Array(ArrayOp::All(vs.into_iter().map(Into::into).collect())))
    }

    pub fn size(n: usize) -> Predicate {
        Predicate::Op(FieldOp::Array(ArrayOp::Size(n)))
    }

    pub fn elem_match(filter: impl Into<Filter>) -> Predicate {
        Predicate::Op(FieldOp::Array(ArrayOp::ElemMatch(Box::new(filter.into()))))
    }

    pub fn at(index: usize, v: impl Into<Value>) -> Predicate {
        Predicate::Op(FieldOp::Array(ArrayOp::Index(index, v.into())))
    }

    pub fn exists(present: bool) -> Predicate {
        Predicate::Op(FieldOp::Exists(present))
    }
}

/// A statically typed field handle: `Field::<User, i64>::new("age").gte(30)`.
pub struct Field<T, V> {
    name: String,
    _marker: PhantomData<fn() -> (T, V)>,
}

impl<T, V: Into<Value>> Field<T, V> {
    pub fn new(name: impl Into<String>) -> Self {
        Field {
            name: name.into(),
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn compare(&self, op: CompareOp<V>) -> Query<T> {
        Query::field(self.name.clone(), op)
    }

    pub fn eq(&self, v: V) -> Query<T> {
        self.compare(CompareOp::Eq(v))
    }

    pub fn ne(&self, v: V) -> Query<T> {
        self.compare(CompareOp::Ne(v))
    }

    pub fn gt(&self, v: V) -> Query<T> {
        self.compare(CompareOp::Gt(v))
    }

    pub fn gte(&self, v: V) -> Query<T> {
        self.compare(CompareOp::Gte(v))
    }

    pub fn lt(&self, v: V) -> Query<T> {
        self.compare(CompareOp::Lt(v))
    }

    pub fn lte(&self, v: V) -> Query<T> {
        self.compare(CompareOp::Lte(v))
    }

    pub fn is_in(&self, vs: impl IntoIterator<Item = V>) -> Query<T> {
        self.compare(CompareOp::In(vs.into_iter().collect()))
    }

    pub fn not_in(&self, vs: impl IntoIterator<Item = V>) -> Query<T> {
        self.compare(CompareOp::NotIn(vs.into_iter().collect()))
    }

    pub fn exists(&self, present: bool) -> Query<T> {
        Query::exists(self.name.clone(), present)
    }
}

impl<T> Field<T, String> {
    fn string(&self, op: StringOp) -> Query<T> {
        Query::from_filter(Filter::Field(self.name.clone(), FieldOp::String(op)))
    }

    pub fn like(&self, pattern: impl Into<String>) -> Query<T> {
        self.string(StringOp::Like(pattern.into()))
    }

    pub fn ilike(&self, pattern: impl Into<String>) -> Query<T> {
        self.string(StringOp::ILike(pattern.into()))
    }

    pub fn contains(&self, s: impl Into<String>) -> Query<T> {
        self.string(StringOp::Contains(s.into()))
    }

    pub fn starts_with(&self, s: impl Into<String>) -> Query<T> {
        self.string(StringOp::StartsWith(s.into()))
    }

    pub fn ends_with(&self, s: impl Into<String>) -> Query<T> {
        self.string(StringOp::EndsWith(s.into()))
    }
}

impl<T, E: Into<Value>> Field<T, Vec<E>> {
    fn array(&self, op: ArrayOp<E>) -> Query<T> {
        Query::field(self.name.clone(), FieldOp::Array(op))
    }

    pub fn all(&self, vs: impl IntoIterator<Item = E>) -> Query<T> {
        self.array(ArrayOp::All(vs.into_iter().collect()))
    }

    pub fn size(&self, n: usize) -> Query<T> {
        self.array(ArrayOp::Size(n))
    }

    pub fn elem_match(&self, filter: impl Into<Filter>) -> Query<T> {
        self.array(ArrayOp::ElemMatch(Box::new(filter.into())))
    }

    pub fn at(&self, index: usize, v: E) -> Query<T> {
        self.array(ArrayOp::Index(index, v))
    }
}
