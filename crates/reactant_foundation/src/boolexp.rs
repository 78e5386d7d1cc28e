//! Immutable boolean expression trees.
//!
//! A [`BoolExp`] is either an atom carrying an opaque payload or an
//! `and`/`or`/`not` node over sub-expressions. Trees are persistent: every
//! combinator returns a new tree sharing its operands.
//!
//! Evaluation walks the tree left to right with short-circuiting and reports
//! the first failing atom as a structured [`EvaluationError`] value rather
//! than as an [`Error`](crate::Error). Under `not`, conjunction and
//! disjunction swap roles so that `not(a and b)` behaves as
//! `not(a) or not(b)`.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use futures::future::{FutureExt, LocalBoxFuture};

#[cfg(feature = "serde")]
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;

/// Boolean operator of an expression node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// Both sides must pass.
    And,
    /// Either side must pass.
    Or,
    /// Negates its single operand.
    Not,
}

impl Operator {
    /// Returns the wire name of the operator.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::And => "and",
            Self::Or => "or",
            Self::Not => "not",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "and" => Ok(Self::And),
            "or" => Ok(Self::Or),
            "not" => Ok(Self::Not),
            other => Err(Error::invalid_expression(format!(
                "unknown operator: {other:?}"
            ))),
        }
    }
}

const ATOM: &str = "atom";
const EXPRESSION: &str = "expression";

enum Node<T> {
    Atom(T),
    And(BoolExp<T>, BoolExp<T>),
    Or(BoolExp<T>, BoolExp<T>),
    Not(BoolExp<T>),
}

/// An immutable boolean expression over atoms of type `T`.
///
/// Cloning is O(1).
pub struct BoolExp<T>(Arc<Node<T>>);

impl<T> Clone for BoolExp<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> From<T> for BoolExp<T> {
    fn from(data: T) -> Self {
        Self::atom(data)
    }
}

/// Failure report of [`BoolExp::evaluate`].
///
/// Carries the atom that decided the failure, whether it was evaluated under
/// an odd number of `not`s, the error the handler returned (if it returned
/// one rather than `false`), and the expression nodes from the root down to
/// the atom's parent.
#[derive(Debug, Clone)]
pub struct EvaluationError<T, E> {
    /// Payload of the failing atom.
    pub data: T,
    /// Ancestor nodes, root first.
    pub stack: Vec<BoolExp<T>>,
    /// Handler error, if the atom failed by error.
    pub error: Option<E>,
    /// Whether the atom was evaluated under negation.
    pub inverse: bool,
}

impl<T: fmt::Debug, E: fmt::Display> fmt::Display for EvaluationError<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.inverse {
            write!(f, "negated condition failed: {:?}", self.data)?;
        } else {
            write!(f, "condition failed: {:?}", self.data)?;
        }
        if let Some(e) = &self.error {
            write!(f, " ({e})")?;
        }
        Ok(())
    }
}

type Evaluated<T, E> = Result<(), EvaluationError<T, E>>;

impl<T> BoolExp<T> {
    /// Creates a leaf expression.
    #[must_use]
    pub fn atom(data: T) -> Self {
        Self(Arc::new(Node::Atom(data)))
    }

    /// Returns `self and other`.
    #[must_use]
    pub fn and(&self, other: impl Into<Self>) -> Self {
        Self(Arc::new(Node::And(self.clone(), other.into())))
    }

    /// Returns `self or other`.
    #[must_use]
    pub fn or(&self, other: impl Into<Self>) -> Self {
        Self(Arc::new(Node::Or(self.clone(), other.into())))
    }

    /// Returns `not self`.
    #[must_use]
    pub fn not(&self) -> Self {
        Self(Arc::new(Node::Not(self.clone())))
    }

    /// Left-folds the present operands with `and`.
    ///
    /// Absent operands are skipped; returns `None` when none are present.
    pub fn and_all<I>(items: I) -> Option<Self>
    where
        I: IntoIterator,
        I::Item: Into<Option<Self>>,
    {
        items
            .into_iter()
            .filter_map(Into::into)
            .reduce(|acc, next| acc.and(next))
    }

    /// Left-folds the present operands with `or`.
    ///
    /// Absent operands are skipped; returns `None` when none are present.
    pub fn or_all<I>(items: I) -> Option<Self>
    where
        I: IntoIterator,
        I::Item: Into<Option<Self>>,
    {
        items
            .into_iter()
            .filter_map(Into::into)
            .reduce(|acc, next| acc.or(next))
    }

    /// Returns true for leaf nodes.
    #[must_use]
    pub fn is_atom(&self) -> bool {
        matches!(*self.0, Node::Atom(_))
    }

    /// Returns the atom payload, if this is a leaf.
    #[must_use]
    pub fn data(&self) -> Option<&T> {
        match &*self.0 {
            Node::Atom(data) => Some(data),
            _ => None,
        }
    }

    /// Returns the operator, if this is an expression node.
    #[must_use]
    pub fn operator(&self) -> Option<Operator> {
        match &*self.0 {
            Node::Atom(_) => None,
            Node::And(..) => Some(Operator::And),
            Node::Or(..) => Some(Operator::Or),
            Node::Not(_) => Some(Operator::Not),
        }
    }

    /// Returns the left operand (the only operand of `not`).
    #[must_use]
    pub fn left(&self) -> Option<&Self> {
        match &*self.0 {
            Node::Atom(_) => None,
            Node::And(l, _) | Node::Or(l, _) | Node::Not(l) => Some(l),
        }
    }

    /// Returns the right operand; `None` for atoms and `not`.
    #[must_use]
    pub fn right(&self) -> Option<&Self> {
        match &*self.0 {
            Node::And(_, r) | Node::Or(_, r) => Some(r),
            Node::Atom(_) | Node::Not(_) => None,
        }
    }

    /// Rebuilds the tree, replacing every atom with the subtree `f` returns.
    pub fn map<U, F>(&self, mut f: F) -> BoolExp<U>
    where
        F: FnMut(&T) -> BoolExp<U>,
    {
        self.map_inner(&mut f)
    }

    fn map_inner<U, F>(&self, f: &mut F) -> BoolExp<U>
    where
        F: FnMut(&T) -> BoolExp<U>,
    {
        match &*self.0 {
            Node::Atom(data) => f(data),
            Node::And(l, r) => {
                let left = l.map_inner(f);
                left.and(r.map_inner(f))
            }
            Node::Or(l, r) => {
                let left = l.map_inner(f);
                left.or(r.map_inner(f))
            }
            Node::Not(inner) => inner.map_inner(f).not(),
        }
    }

    /// Rebuilds the tree, transforming each atom payload.
    pub fn map_atoms<U, F>(&self, mut f: F) -> BoolExp<U>
    where
        F: FnMut(&T) -> U,
    {
        self.map(|data| BoolExp::atom(f(data)))
    }

    /// Like [`map`](Self::map), stopping at the first error.
    ///
    /// # Errors
    ///
    /// Returns the first error produced by `f`, in left-to-right order.
    pub fn try_map<U, E, F>(&self, mut f: F) -> Result<BoolExp<U>, E>
    where
        F: FnMut(&T) -> Result<BoolExp<U>, E>,
    {
        self.try_map_inner(&mut f)
    }

    fn try_map_inner<U, E, F>(&self, f: &mut F) -> Result<BoolExp<U>, E>
    where
        F: FnMut(&T) -> Result<BoolExp<U>, E>,
    {
        Ok(match &*self.0 {
            Node::Atom(data) => f(data)?,
            Node::And(l, r) => {
                let left = l.try_map_inner(f)?;
                left.and(r.try_map_inner(f)?)
            }
            Node::Or(l, r) => {
                let left = l.try_map_inner(f)?;
                left.or(r.try_map_inner(f)?)
            }
            Node::Not(inner) => inner.try_map_inner(f)?.not(),
        })
    }

    /// Returns the first atom, depth-first and left to right, matching `pred`.
    pub fn find<F>(&self, mut pred: F) -> Option<&T>
    where
        F: FnMut(&T) -> bool,
    {
        self.atoms().into_iter().find(|data| pred(data))
    }

    /// Returns every atom payload, left to right.
    #[must_use]
    pub fn atoms(&self) -> Vec<&T> {
        let mut out = Vec::new();
        self.collect_atoms(&mut out);
        out
    }

    fn collect_atoms<'a>(&'a self, out: &mut Vec<&'a T>) {
        match &*self.0 {
            Node::Atom(data) => out.push(data),
            Node::And(l, r) | Node::Or(l, r) => {
                l.collect_atoms(out);
                r.collect_atoms(out);
            }
            Node::Not(inner) => inner.collect_atoms(out),
        }
    }
}

impl<T: Clone> BoolExp<T> {
    /// Evaluates the expression, calling `handler` once per visited atom.
    ///
    /// `Ok(true)` from the handler passes the atom and `Ok(false)` fails it,
    /// both flipped under negation. `Err(e)` fails the atom regardless of
    /// negation and is carried in [`EvaluationError::error`].
    ///
    /// # Errors
    ///
    /// Returns the failing atom's report when the expression does not hold.
    pub fn evaluate<E, F>(&self, mut handler: F) -> Evaluated<T, E>
    where
        F: FnMut(&T) -> Result<bool, E>,
    {
        let mut stack = Vec::new();
        self.evaluate_inner(&mut handler, &mut stack, false)
    }

    fn evaluate_inner<E, F>(
        &self,
        handler: &mut F,
        stack: &mut Vec<BoolExp<T>>,
        inverse: bool,
    ) -> Evaluated<T, E>
    where
        F: FnMut(&T) -> Result<bool, E>,
    {
        match &*self.0 {
            Node::Atom(data) => match handler(data) {
                Ok(passed) if passed != inverse => Ok(()),
                Ok(_) => Err(EvaluationError {
                    data: data.clone(),
                    stack: stack.clone(),
                    error: None,
                    inverse,
                }),
                Err(e) => Err(EvaluationError {
                    data: data.clone(),
                    stack: stack.clone(),
                    error: Some(e),
                    inverse,
                }),
            },
            Node::Not(inner) => {
                stack.push(self.clone());
                let result = inner.evaluate_inner(handler, stack, !inverse);
                stack.pop();
                result
            }
            Node::And(l, r) | Node::Or(l, r) => {
                let conjunctive = matches!(*self.0, Node::And(..)) != inverse;
                stack.push(self.clone());
                let left = l.evaluate_inner(handler, stack, inverse);
                let result = match (conjunctive, left) {
                    (true, Ok(())) | (false, Err(_)) => r.evaluate_inner(handler, stack, inverse),
                    (true, Err(e)) => Err(e),
                    (false, Ok(())) => Ok(()),
                };
                stack.pop();
                result
            }
        }
    }

    /// Asynchronous [`evaluate`](Self::evaluate).
    ///
    /// Each atom handler future completes before the next atom is visited,
    /// so left operands always resolve before right operands start.
    ///
    /// # Errors
    ///
    /// Returns the failing atom's report when the expression does not hold.
    pub fn evaluate_async<'a, E, F, Fut>(&'a self, handler: &'a F) -> LocalBoxFuture<'a, Evaluated<T, E>>
    where
        T: 'a,
        E: 'a,
        F: Fn(&'a T) -> Fut,
        Fut: Future<Output = Result<bool, E>> + 'a,
    {
        self.evaluate_async_inner(handler, Vec::new(), false)
    }

    fn evaluate_async_inner<'a, E, F, Fut>(
        &'a self,
        handler: &'a F,
        stack: Vec<BoolExp<T>>,
        inverse: bool,
    ) -> LocalBoxFuture<'a, Evaluated<T, E>>
    where
        T: 'a,
        E: 'a,
        F: Fn(&'a T) -> Fut,
        Fut: Future<Output = Result<bool, E>> + 'a,
    {
        async move {
            match &*self.0 {
                Node::Atom(data) => match handler(data).await {
                    Ok(passed) if passed != inverse => Ok(()),
                    Ok(_) => Err(EvaluationError {
                        data: data.clone(),
                        stack,
                        error: None,
                        inverse,
                    }),
                    Err(e) => Err(EvaluationError {
                        data: data.clone(),
                        stack,
                        error: Some(e),
                        inverse,
                    }),
                },
                Node::Not(inner) => {
                    let mut stack = stack;
                    stack.push(self.clone());
                    inner.evaluate_async_inner(handler, stack, !inverse).await
                }
                Node::And(l, r) | Node::Or(l, r) => {
                    let conjunctive = matches!(*self.0, Node::And(..)) != inverse;
                    let mut stack = stack;
                    stack.push(self.clone());
                    let left = l.evaluate_async_inner(handler, stack.clone(), inverse).await;
                    match (conjunctive, left) {
                        (true, Ok(())) | (false, Err(_)) => {
                            r.evaluate_async_inner(handler, stack, inverse).await
                        }
                        (true, Err(e)) => Err(e),
                        (false, Ok(())) => Ok(()),
                    }
                }
            }
        }
        .boxed_local()
    }

    /// Converts the tree into its raw serializable form.
    #[must_use]
    pub fn to_raw(&self) -> RawBoolExp<T> {
        match &*self.0 {
            Node::Atom(data) => RawBoolExp {
                kind: ATOM.to_string(),
                data: Some(data.clone()),
                operator: None,
                left: None,
                right: None,
            },
            Node::And(l, r) | Node::Or(l, r) => RawBoolExp {
                kind: EXPRESSION.to_string(),
                data: None,
                operator: self.operator().map(|op| op.as_str().to_string()),
                left: Some(Box::new(l.to_raw())),
                right: Some(Box::new(r.to_raw())),
            },
            Node::Not(inner) => RawBoolExp {
                kind: EXPRESSION.to_string(),
                data: None,
                operator: Some(Operator::Not.as_str().to_string()),
                left: Some(Box::new(inner.to_raw())),
                right: None,
            },
        }
    }
}

impl<T> BoolExp<T> {
    /// Builds a tree from its raw form.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidExpression`](crate::ErrorKind::InvalidExpression)
    /// for an atom without data, an expression without a left operand, a
    /// binary operator without a right operand, a `not` with a right operand,
    /// or an unknown node type or operator.
    pub fn from_raw(raw: RawBoolExp<T>) -> crate::Result<Self> {
        match raw.kind.as_str() {
            ATOM => raw
                .data
                .map(Self::atom)
                .ok_or_else(|| Error::invalid_expression("atom without data")),
            EXPRESSION => {
                let op: Operator = raw
                    .operator
                    .as_deref()
                    .ok_or_else(|| Error::invalid_expression("expression without operator"))?
                    .parse()?;
                let left = raw
                    .left
                    .ok_or_else(|| Error::invalid_expression(format!("{op} without left operand")))?;
                let left = Self::from_raw(*left)?;
                match (op, raw.right) {
                    (Operator::Not, None) => Ok(left.not()),
                    (Operator::Not, Some(_)) => {
                        Err(Error::invalid_expression("not with a right operand"))
                    }
                    (_, None) => Err(Error::invalid_expression(format!(
                        "{op} without right operand"
                    ))),
                    (Operator::And, Some(right)) => Ok(left.and(Self::from_raw(*right)?)),
                    (Operator::Or, Some(right)) => Ok(left.or(Self::from_raw(*right)?)),
                }
            }
            other => Err(Error::invalid_expression(format!(
                "unknown node type: {other:?}"
            ))),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for BoolExp<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0 {
            Node::Atom(data) => write!(f, "{data:?}"),
            Node::And(l, r) => write!(f, "({l:?} and {r:?})"),
            Node::Or(l, r) => write!(f, "({l:?} or {r:?})"),
            Node::Not(inner) => write!(f, "not {inner:?}"),
        }
    }
}

impl<T: PartialEq> PartialEq for BoolExp<T> {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        match (&*self.0, &*other.0) {
            (Node::Atom(a), Node::Atom(b)) => a == b,
            (Node::And(l1, r1), Node::And(l2, r2)) | (Node::Or(l1, r1), Node::Or(l2, r2)) => {
                l1 == l2 && r1 == r2
            }
            (Node::Not(a), Node::Not(b)) => a == b,
            _ => false,
        }
    }
}

/// Serializable form of a [`BoolExp`].
///
/// `kind` is `"atom"` or `"expression"`; expressions carry an `operator` of
/// `"and"`, `"or"` or `"not"` and their operands.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(
    feature = "serde",
    serde(bound(serialize = "T: Serialize", deserialize = "T: Deserialize<'de>"))
)]
pub struct RawBoolExp<T> {
    /// Node type.
    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    pub kind: String,
    /// Atom payload.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub data: Option<T>,
    /// Expression operator.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub operator: Option<String>,
    /// Left operand.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub left: Option<Box<RawBoolExp<T>>>,
    /// Right operand.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub right: Option<Box<RawBoolExp<T>>>,
}

#[cfg(feature = "serde")]
impl<T: Serialize + Clone> Serialize for BoolExp<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_raw().serialize(serializer)
    }
}

#[cfg(feature = "serde")]
impl<'de, T: Deserialize<'de>> Deserialize<'de> for BoolExp<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawBoolExp::<T>::deserialize(deserializer)?;
        Self::from_raw(raw).map_err(serde::de::Error::custom)
    }
}
