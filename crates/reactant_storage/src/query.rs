//! Match predicates, projections, modifiers and query planning.
//!
//! A query names an entity or relation, a match expression over
//! [`MatchAtom`]s, an [`AttributeQuery`] projection and a [`Modifier`].
//! [`QueryPlanner::plan`] resolves filtered and merged nodes onto the table
//! that actually stores their records and works out which relation paths
//! must be hydrated before the predicate can be evaluated in memory.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use reactant_foundation::{BoolExp, Error, Record, RecordId, Result, Value};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::schema::Schema;

/// Boolean expression over match atoms.
pub type MatchExp = BoolExp<MatchAtom>;

/// Comparison operator of a [`MatchAtom`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Comparator {
    /// `=`
    #[cfg_attr(feature = "serde", serde(rename = "="))]
    Eq,
    /// `!=`
    #[cfg_attr(feature = "serde", serde(rename = "!="))]
    Ne,
    /// `<`
    #[cfg_attr(feature = "serde", serde(rename = "<"))]
    Lt,
    /// `<=`
    #[cfg_attr(feature = "serde", serde(rename = "<="))]
    Le,
    /// `>`
    #[cfg_attr(feature = "serde", serde(rename = ">"))]
    Gt,
    /// `>=`
    #[cfg_attr(feature = "serde", serde(rename = ">="))]
    Ge,
    /// SQL-style pattern with `%` and `_`.
    #[cfg_attr(feature = "serde", serde(rename = "like"))]
    Like,
    /// Membership in a list value.
    #[cfg_attr(feature = "serde", serde(rename = "in"))]
    In,
    /// Inclusive range given as a two-element list.
    #[cfg_attr(feature = "serde", serde(rename = "between"))]
    Between,
    /// Absence test; the atom value `false` inverts it.
    #[cfg_attr(feature = "serde", serde(rename = "is_null"))]
    IsNull,
}

impl Comparator {
    /// Returns the operator's textual form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Like => "like",
            Self::In => "in",
            Self::Between => "between",
            Self::IsNull => "is_null",
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Comparator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "=" => Self::Eq,
            "!=" => Self::Ne,
            "<" => Self::Lt,
            "<=" => Self::Le,
            ">" => Self::Gt,
            ">=" => Self::Ge,
            "like" => Self::Like,
            "in" => Self::In,
            "between" => Self::Between,
            "is_null" => Self::IsNull,
            other => return Err(Error::invalid_expression(format!("unknown comparator: {other}"))),
        })
    }
}

/// A single comparison against a (possibly dotted) attribute path.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MatchAtom {
    /// Attribute path, e.g. `"status"` or `"owner.name"`.
    pub key: String,
    /// Comparison operator.
    pub comparator: Comparator,
    /// Right-hand side.
    pub value: Value,
}

impl MatchAtom {
    /// Creates an atom.
    #[must_use]
    pub fn new(key: impl Into<String>, comparator: Comparator, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            comparator,
            value: value.into(),
        }
    }

    /// `key = value`
    #[must_use]
    pub fn eq(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(key, Comparator::Eq, value)
    }

    /// `id = id`
    #[must_use]
    pub fn id(id: RecordId) -> Self {
        Self::eq("id", id)
    }

    /// Wraps the atom into a one-node expression.
    #[must_use]
    pub fn exp(self) -> MatchExp {
        BoolExp::atom(self)
    }

    /// Returns the dotted path segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.key.split('.')
    }

    /// Returns true if the key addresses a top-level column.
    #[must_use]
    pub fn is_flat(&self) -> bool {
        !self.key.contains('.')
    }

    /// Evaluates the atom against a (hydrated) record.
    ///
    /// Paths crossing a list, as produced by to-many relations, match when
    /// any element matches.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        let mut found = Vec::new();
        let mut segments = self.key.split('.');
        if let Some(first) = segments.next() {
            let rest: Vec<&str> = segments.collect();
            if let Some(value) = record.get(first) {
                collect_values(value, &rest, &mut found);
            }
        }

        match self.comparator {
            Comparator::IsNull => {
                let is_null = found.iter().all(|v| v.is_nil());
                is_null == !matches!(self.value, Value::Bool(false))
            }
            Comparator::Ne => !found.iter().any(|v| loose_eq(v, &self.value)),
            _ => found.iter().any(|v| self.compare(v)),
        }
    }

    fn compare(&self, actual: &Value) -> bool {
        match self.comparator {
            Comparator::Eq => loose_eq(actual, &self.value),
            Comparator::Lt => ordered(actual, &self.value).is_some_and(Ordering::is_lt),
            Comparator::Le => ordered(actual, &self.value).is_some_and(Ordering::is_le),
            Comparator::Gt => ordered(actual, &self.value).is_some_and(Ordering::is_gt),
            Comparator::Ge => ordered(actual, &self.value).is_some_and(Ordering::is_ge),
            Comparator::Like => match (actual.as_str(), self.value.as_str()) {
                (Some(text), Some(pattern)) => like(text, pattern),
                _ => false,
            },
            Comparator::In => self
                .value
                .as_list()
                .is_some_and(|items| items.iter().any(|item| loose_eq(actual, item))),
            Comparator::Between => match self.value.as_list() {
                Some(bounds) if bounds.len() == 2 => {
                    let (Some(lo), Some(hi)) = (bounds.get(0), bounds.get(1)) else {
                        return false;
                    };
                    ordered(actual, lo).is_some_and(Ordering::is_ge)
                        && ordered(actual, hi).is_some_and(Ordering::is_le)
                }
                _ => false,
            },
            Comparator::Ne | Comparator::IsNull => false,
        }
    }
}

fn collect_values<'a>(value: &'a Value, rest: &[&str], out: &mut Vec<&'a Value>) {
    match (value, rest.split_first()) {
        (Value::List(items), Some(_)) => {
            for item in items {
                collect_values(item, rest, out);
            }
        }
        (Value::Map(map), Some((segment, tail))) => {
            if let Some(next) = map.get(*segment) {
                collect_values(next, tail, out);
            }
        }
        (_, Some(_)) => {}
        (Value::List(items), None) => {
            out.push(value);
            out.extend(items.iter());
        }
        (v, None) => out.push(v),
    }
}

/// Equality that treats ints and floats numerically and compares record
/// references by id, so `owner = #3` matches a hydrated `owner` record.
fn loose_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a, b) {
        (Value::Id(_), _) | (_, Value::Id(_)) => {
            matches!((a.as_record_id(), b.as_record_id()), (Some(x), Some(y)) if x == y)
        }
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            a.total_cmp(b) == Ordering::Equal
        }
        _ => false,
    }
}

fn ordered(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_))
        | (Value::String(_), Value::String(_))
        | (Value::Id(_), Value::Id(_))
        | (Value::Bool(_), Value::Bool(_)) => Some(a.total_cmp(b)),
        _ => None,
    }
}

fn like(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    let (mut t, mut p) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('%') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some('_') => {
                t += 1;
                p += 1;
            }
            Some(c) if *c == text[t] => {
                t += 1;
                p += 1;
            }
            _ => match backtrack {
                Some((bp, bt)) => {
                    p = bp + 1;
                    t = bt + 1;
                    backtrack = Some((bp, bt + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|c| *c == '%')
}

// =============================================================================
// Projection and Modifiers
// =============================================================================

/// One entry of an attribute projection.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AttributeField {
    /// Every visible column (`*`).
    All,
    /// A single column.
    Field(String),
    /// A relation property projected with its own sub-query.
    Nested(String, AttributeQuery),
}

/// Attribute projection of a query. `id` is always returned.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AttributeQuery {
    /// Projected fields.
    pub fields: Vec<AttributeField>,
}

impl AttributeQuery {
    /// Projects every visible column.
    #[must_use]
    pub fn all() -> Self {
        Self {
            fields: vec![AttributeField::All],
        }
    }

    /// Projects the given columns.
    #[must_use]
    pub fn fields<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: names
                .into_iter()
                .map(|n| AttributeField::Field(n.into()))
                .collect(),
        }
    }

    /// Adds a column.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>) -> Self {
        self.fields.push(AttributeField::Field(name.into()));
        self
    }

    /// Adds a nested relation projection.
    #[must_use]
    pub fn with_nested(mut self, name: impl Into<String>, sub: AttributeQuery) -> Self {
        self.fields.push(AttributeField::Nested(name.into(), sub));
        self
    }

    /// Applies the projection to a hydrated record.
    ///
    /// `*` keeps every column except hidden `__`-prefixed ones; hidden
    /// columns are returned only when named explicitly.
    #[must_use]
    pub fn project(&self, record: &Record) -> Record {
        let mut out = Record::new();
        if let Some(id) = record.get("id") {
            out.set("id", id.clone());
        }
        for field in &self.fields {
            match field {
                AttributeField::All => {
                    for (k, v) in record.iter() {
                        if !k.starts_with("__") {
                            out.set(k.clone(), v.clone());
                        }
                    }
                }
                AttributeField::Field(name) => {
                    if let Some(v) = record.get(name.as_str()) {
                        out.set(name.clone(), v.clone());
                    }
                }
                AttributeField::Nested(name, sub) => {
                    let projected = match record.get(name.as_str()) {
                        Some(Value::Map(inner)) => Value::Map(sub.project(inner)),
                        Some(Value::List(items)) => Value::List(
                            items
                                .iter()
                                .map(|item| match item {
                                    Value::Map(inner) => Value::Map(sub.project(inner)),
                                    other => other.clone(),
                                })
                                .collect(),
                        ),
                        Some(other) => other.clone(),
                        None => continue,
                    };
                    out.set(name.clone(), projected);
                }
            }
        }
        out
    }

    fn nested(&self) -> impl Iterator<Item = (&str, &AttributeQuery)> {
        self.fields.iter().filter_map(|f| match f {
            AttributeField::Nested(name, sub) => Some((name.as_str(), sub)),
            _ => None,
        })
    }
}

/// Sort direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Order {
    /// Ascending.
    #[default]
    Asc,
    /// Descending.
    Desc,
}

/// Result modifiers applied after matching.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Modifier {
    /// Maximum number of records.
    pub limit: Option<usize>,
    /// Records to skip.
    pub offset: Option<usize>,
    /// Sort keys, most significant first. Unordered results follow id order.
    pub order_by: Vec<(String, Order)>,
}

impl Modifier {
    /// Creates an empty modifier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the limit.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the offset.
    #[must_use]
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Appends a sort key.
    #[must_use]
    pub fn order_by(mut self, key: impl Into<String>, order: Order) -> Self {
        self.order_by.push((key.into(), order));
        self
    }

    /// Sorts, skips and truncates matched records in place.
    pub fn apply(&self, records: &mut Vec<Record>) {
        self.apply_by(records, |r| r);
    }

    /// Like [`apply`](Self::apply), sorting items by the record `key` returns.
    pub fn apply_by<T, F>(&self, items: &mut Vec<T>, key: F)
    where
        F: Fn(&T) -> &Record,
    {
        if !self.order_by.is_empty() {
            items.sort_by(|a, b| {
                let (a, b) = (key(a), key(b));
                for (key, order) in &self.order_by {
                    let left = a.path(key).unwrap_or(&Value::Nil);
                    let right = b.path(key).unwrap_or(&Value::Nil);
                    let ord = match order {
                        Order::Asc => left.total_cmp(right),
                        Order::Desc => right.total_cmp(left),
                    };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }
        let offset = self.offset.unwrap_or(0).min(items.len());
        items.drain(..offset);
        if let Some(limit) = self.limit {
            items.truncate(limit);
        }
    }
}

// =============================================================================
// Planning
// =============================================================================

/// Relation properties that must be resolved on a record before matching,
/// keyed by property name, each with its own nested paths.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PathTree(pub BTreeMap<String, PathTree>);

impl PathTree {
    /// Returns true if nothing needs hydrating.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Adds every path of `other`.
    pub fn merge(&mut self, other: &PathTree) {
        for (key, sub) in &other.0 {
            self.0.entry(key.clone()).or_default().merge(sub);
        }
    }

    /// Returns the nested paths below `key`, if `key` is present.
    #[must_use]
    pub fn child(&self, key: &str) -> Option<&PathTree> {
        self.0.get(key)
    }

    fn insert(&mut self, path: &[String]) {
        if let Some((head, tail)) = path.split_first() {
            self.0.entry(head.clone()).or_default().insert(tail);
        }
    }
}

/// An executable query against one storage table.
#[derive(Clone, Debug)]
pub struct QueryPlan {
    /// The entity or relation the caller named.
    pub record_name: String,
    /// The node whose table stores the records.
    pub table: String,
    /// Node filters followed by the caller predicate.
    pub predicate: Option<MatchExp>,
    /// The part of `predicate` the adapter can evaluate on flat columns.
    pub pushdown: Option<MatchExp>,
    /// Relation paths to hydrate before matching or projecting.
    pub hydrate: PathTree,
    /// The part of `hydrate` the projection returns.
    pub projection: PathTree,
    /// Projection.
    pub attributes: AttributeQuery,
    /// Ordering and paging.
    pub modifier: Modifier,
}

impl QueryPlan {
    /// Returns true if the hydrated record satisfies the full predicate.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        self.predicate.as_ref().is_none_or(|exp| {
            exp.evaluate(|atom| Ok::<_, std::convert::Infallible>(atom.matches(record)))
                .is_ok()
        })
    }
}

/// Rewrites queries onto storage tables.
pub struct QueryPlanner;

impl QueryPlanner {
    /// Plans a query.
    ///
    /// Filtered nodes are resolved onto their source with the node filter
    /// placed before the caller predicate; merged inputs are filtered views
    /// of the merged node, so they resolve the same way.
    ///
    /// # Errors
    ///
    /// Returns [`reactant_foundation::ErrorKind::UnknownRecord`] if `name`
    /// is not in the schema.
    pub fn plan(
        schema: &Schema,
        name: &str,
        match_exp: Option<&MatchExp>,
        attributes: &AttributeQuery,
        modifier: &Modifier,
    ) -> Result<QueryPlan> {
        let (table, filter) = schema.resolve_storage(name)?;
        let predicate = MatchExp::and_all([filter, match_exp.cloned()]);

        let mut hydrate = PathTree::default();
        if let Some(exp) = &predicate {
            for atom in exp.atoms() {
                let segments: Vec<&str> = atom.segments().collect();
                let hops = Self::relation_hops(schema, &table, &segments)?;
                hydrate.insert(&hops);
            }
        }
        for (key, _) in &modifier.order_by {
            let segments: Vec<&str> = key.split('.').collect();
            let hops = Self::relation_hops(schema, &table, &segments)?;
            hydrate.insert(&hops);
        }
        let mut projection = PathTree::default();
        Self::attribute_hops(schema, &table, attributes, &mut projection)?;
        hydrate.merge(&projection);

        let pushdown = predicate
            .as_ref()
            .filter(|exp| exp.atoms().iter().all(|atom| atom.is_flat()))
            .cloned();

        Ok(QueryPlan {
            record_name: name.to_string(),
            table,
            predicate,
            pushdown,
            hydrate,
            projection,
            attributes: attributes.clone(),
            modifier: modifier.clone(),
        })
    }

    /// Returns the leading segments of `path` that cross relations.
    fn relation_hops(schema: &Schema, node: &str, path: &[&str]) -> Result<Vec<String>> {
        let mut hops = Vec::new();
        let mut current = node.to_string();
        for segment in path {
            match schema.far_node(&current, segment)? {
                Some(far) => {
                    hops.push((*segment).to_string());
                    current = far;
                }
                None => break,
            }
        }
        Ok(hops)
    }

    fn attribute_hops(
        schema: &Schema,
        node: &str,
        attributes: &AttributeQuery,
        tree: &mut PathTree,
    ) -> Result<()> {
        for (name, sub) in attributes.nested() {
            let Some(far) = schema.far_node(node, name)? else {
                continue;
            };
            let child = tree.0.entry(name.to_string()).or_default();
            let (far_table, _) = schema.resolve_storage(&far)?;
            Self::attribute_hops(schema, &far_table, sub, child)?;
        }
        Ok(())
    }
}
