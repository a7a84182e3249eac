//! Filter expressions
//!
//! A [`Filter`] is an immutable boolean expression tree over
//! [`Terminal`] predicates. Nodes are shared behind an `Arc`, so cloning a
//! filter or reusing a subtree is cheap, and every node memoizes its
//! content key, its validation result and its disjunctive normal form.
//!
//! ## Combinators
//!
//! `and`, `or` and `negate` build new trees with light constant folding
//! (`x and true` is `x`, `not not x` is `x`). They never normalize; call
//! [`Filter::to_dnf`] for the canonical `Or(And(literal...)...)` shape.

use crate::dnf::Dnf;
use crate::element::Element;
use crate::terminal::{Predicate, Terminal};
use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use typegraph_core::{Result, Value};
use typegraph_primitives::{Complex, List};

/// Shape of a filter node
#[derive(Debug)]
pub enum FilterKind {
    /// Matches everything
    True,
    /// Matches nothing
    False,
    /// Leaf predicate
    Terminal(Terminal),
    /// All operands match
    And(Vec<Filter>),
    /// Any operand matches
    Or(Vec<Filter>),
    /// The operand does not match
    Not(Filter),
}

struct FilterNode {
    kind: FilterKind,
    key: OnceCell<String>,
    validated: OnceCell<Result<()>>,
    normal: OnceCell<Arc<Dnf>>,
    dnf: OnceCell<Filter>,
    canonical: bool,
}

/// Shared, immutable filter expression
#[derive(Clone)]
pub struct Filter {
    node: Arc<FilterNode>,
}

/// Rewrites filters during [`Filter::visit`]
pub trait Transformer {
    /// Replacement for `filter`, or `None` to keep it and visit its operands
    fn transform(&mut self, filter: &Filter) -> Option<Filter>;
}

impl<F> Transformer for F
where
    F: FnMut(&Filter) -> Option<Filter>,
{
    fn transform(&mut self, filter: &Filter) -> Option<Filter> {
        self(filter)
    }
}

impl Filter {
    pub(crate) fn from_kind(kind: FilterKind) -> Self {
        Filter {
            node: Arc::new(FilterNode {
                kind,
                key: OnceCell::new(),
                validated: OnceCell::new(),
                normal: OnceCell::new(),
                dnf: OnceCell::new(),
                canonical: false,
            }),
        }
    }

    /// A node already in normal form, carrying its clause set
    pub(crate) fn canonical(kind: FilterKind, normal: Arc<Dnf>) -> Self {
        Filter {
            node: Arc::new(FilterNode {
                kind,
                key: OnceCell::new(),
                validated: OnceCell::new(),
                normal: OnceCell::with_value(normal),
                dnf: OnceCell::new(),
                canonical: true,
            }),
        }
    }

    // === Constructors ===

    /// Filter matching everything
    pub fn always() -> Self {
        Self::from_kind(FilterKind::True)
    }

    /// Filter matching nothing
    pub fn never() -> Self {
        Self::from_kind(FilterKind::False)
    }

    /// Leaf filter
    pub fn terminal(terminal: Terminal) -> Self {
        Self::from_kind(FilterKind::Terminal(terminal))
    }

    /// property = value
    pub fn equal(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::terminal(Terminal::equal(property, value))
    }

    /// property is one of `values`
    pub fn is_in<V: Into<Value>>(property: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self::terminal(Terminal::is_in(property, values))
    }

    /// property > value
    pub fn greater(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::terminal(Terminal::new(property, Predicate::Greater(value.into())))
    }

    /// property >= value
    pub fn greater_or_equal(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::terminal(Terminal::new(property, Predicate::GreaterOrEqual(value.into())))
    }

    /// property < value
    pub fn less(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::terminal(Terminal::new(property, Predicate::Less(value.into())))
    }

    /// property <= value
    pub fn less_or_equal(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::terminal(Terminal::new(property, Predicate::LessOrEqual(value.into())))
    }

    /// Unanchored, case-sensitive substring match
    pub fn like(property: impl Into<String>, value: impl Into<String>) -> Self {
        Self::terminal(Terminal::like(property, value))
    }

    /// Conjunction of all `filters`; `True` when empty
    pub fn and_all(filters: impl IntoIterator<Item = Filter>) -> Self {
        let mut operands = Vec::new();
        for filter in filters {
            if filter.is_true() {
                continue;
            }
            if filter.is_false() {
                return Self::never();
            }
            if let FilterKind::And(ops) = filter.kind() {
                operands.extend(ops.iter().cloned());
                continue;
            }
            operands.push(filter);
        }
        match operands.len() {
            0 => Self::always(),
            1 => operands.swap_remove(0),
            _ => Self::from_kind(FilterKind::And(operands)),
        }
    }

    /// Disjunction of all `filters`; `False` when empty
    pub fn or_any(filters: impl IntoIterator<Item = Filter>) -> Self {
        let mut operands = Vec::new();
        for filter in filters {
            if filter.is_false() {
                continue;
            }
            if filter.is_true() {
                return Self::always();
            }
            if let FilterKind::Or(ops) = filter.kind() {
                operands.extend(ops.iter().cloned());
                continue;
            }
            operands.push(filter);
        }
        match operands.len() {
            0 => Self::never(),
            1 => operands.swap_remove(0),
            _ => Self::from_kind(FilterKind::Or(operands)),
        }
    }

    // === Combinators ===

    /// self ∧ other
    pub fn and(&self, other: &Filter) -> Filter {
        Self::and_all([self.clone(), other.clone()])
    }

    /// self ∨ other
    pub fn or(&self, other: &Filter) -> Filter {
        Self::or_any([self.clone(), other.clone()])
    }

    /// ¬self
    pub fn negate(&self) -> Filter {
        match self.kind() {
            FilterKind::True => Self::never(),
            FilterKind::False => Self::always(),
            FilterKind::Not(inner) => inner.clone(),
            _ => Self::from_kind(FilterKind::Not(self.clone())),
        }
    }

    // === Inspection ===

    /// Node shape
    pub fn kind(&self) -> &FilterKind {
        &self.node.kind
    }

    /// Whether this node is the constant `True`
    pub fn is_true(&self) -> bool {
        matches!(self.kind(), FilterKind::True)
    }

    /// Whether this node is the constant `False`
    pub fn is_false(&self) -> bool {
        matches!(self.kind(), FilterKind::False)
    }

    /// Whether this filter is a normal form produced by [`Filter::to_dnf`]
    pub fn is_dnf(&self) -> bool {
        self.node.canonical
    }

    /// Direct operands; empty for constants and terminals
    pub fn operands(&self) -> &[Filter] {
        match self.kind() {
            FilterKind::And(ops) | FilterKind::Or(ops) => ops,
            FilterKind::Not(inner) => std::slice::from_ref(inner),
            FilterKind::True | FilterKind::False | FilterKind::Terminal(_) => &[],
        }
    }

    /// Whether both handles share the same node
    pub fn ptr_eq(&self, other: &Filter) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }

    /// Canonical key: structurally equal filters have equal keys
    ///
    /// Operands of `And` and `Or` are keyed as sets.
    pub fn content_key(&self) -> &str {
        self.node.key.get_or_init(|| match self.kind() {
            FilterKind::True => "T".to_string(),
            FilterKind::False => "F".to_string(),
            FilterKind::Terminal(terminal) => terminal.content_key(),
            FilterKind::Not(inner) => format!("!({})", inner.content_key()),
            FilterKind::And(ops) => format!("&({})", sorted_keys(ops)),
            FilterKind::Or(ops) => format!("|({})", sorted_keys(ops)),
        })
    }

    // === Evaluation ===

    /// Check every terminal is well-formed
    ///
    /// The result is memoized per node.
    pub fn validate(&self) -> Result<()> {
        self.node
            .validated
            .get_or_init(|| match self.kind() {
                FilterKind::Terminal(terminal) => terminal.validate(),
                _ => self.operands().iter().try_for_each(Filter::validate),
            })
            .clone()
    }

    /// Whether `element` satisfies this filter
    ///
    /// # Errors
    /// Returns the validation error if the filter is malformed.
    pub fn contains(&self, element: &dyn Element) -> Result<bool> {
        self.validate()?;
        Ok(self.evaluate(element))
    }

    fn evaluate(&self, element: &dyn Element) -> bool {
        match self.kind() {
            FilterKind::True => true,
            FilterKind::False => false,
            FilterKind::Terminal(terminal) => {
                let actual = element.property(terminal.property()).unwrap_or(Value::Null);
                terminal.matches(&actual)
            }
            FilterKind::And(ops) => ops.iter().all(|op| op.evaluate(element)),
            FilterKind::Or(ops) => ops.iter().any(|op| op.evaluate(element)),
            FilterKind::Not(inner) => !inner.evaluate(element),
        }
    }

    /// Complex members of `list` that satisfy this filter, in list order
    pub fn select(&self, list: &List) -> Result<Vec<Complex>> {
        self.validate()?;
        Ok(list
            .complexes()
            .into_iter()
            .filter(|complex| self.evaluate(complex))
            .collect())
    }

    // === Normalization ===

    pub(crate) fn normal_form(&self) -> Arc<Dnf> {
        self.node
            .normal
            .get_or_init(|| {
                let normal = Dnf::of(self);
                debug!(
                    target: "typegraph::filter",
                    clauses = normal.clauses().len(),
                    "DNF computed"
                );
                Arc::new(normal)
            })
            .clone()
    }

    /// Disjunctive normal form
    ///
    /// The result is `True`, `False`, or `Or` of `And`s of terminals and
    /// negated terminals, simplified. It is memoized, and normalizing a
    /// normal form returns it unchanged.
    pub fn to_dnf(&self) -> Filter {
        if self.node.canonical {
            return self.clone();
        }
        self.node
            .dnf
            .get_or_init(|| Dnf::to_filter(&self.normal_form()))
            .clone()
    }

    // === Rewriting ===

    /// Rewrite this filter top-down
    ///
    /// Nodes the transformer replaces are not descended into. Unchanged
    /// subtrees are shared with the original.
    pub fn visit(&self, transformer: &mut dyn Transformer) -> Filter {
        if let Some(replacement) = transformer.transform(self) {
            return replacement;
        }
        let kind = match self.kind() {
            FilterKind::True | FilterKind::False | FilterKind::Terminal(_) => return self.clone(),
            FilterKind::Not(inner) => {
                let visited = inner.visit(transformer);
                if visited.ptr_eq(inner) {
                    return self.clone();
                }
                FilterKind::Not(visited)
            }
            FilterKind::And(ops) => match visit_all(ops, transformer) {
                Some(ops) => FilterKind::And(ops),
                None => return self.clone(),
            },
            FilterKind::Or(ops) => match visit_all(ops, transformer) {
                Some(ops) => FilterKind::Or(ops),
                None => return self.clone(),
            },
        };
        Filter::from_kind(kind)
    }
}

fn sorted_keys(ops: &[Filter]) -> String {
    let mut keys: Vec<&str> = ops.iter().map(Filter::content_key).collect();
    keys.sort_unstable();
    keys.join(",")
}

fn visit_all(ops: &[Filter], transformer: &mut dyn Transformer) -> Option<Vec<Filter>> {
    let visited: Vec<Filter> = ops.iter().map(|op| op.visit(transformer)).collect();
    if visited.iter().zip(ops).all(|(a, b)| a.ptr_eq(b)) {
        None
    } else {
        Some(visited)
    }
}

impl PartialEq for Filter {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.content_key() == other.content_key()
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            FilterKind::True => write!(f, "true"),
            FilterKind::False => write!(f, "false"),
            FilterKind::Terminal(terminal) => write!(f, "{}", terminal),
            FilterKind::Not(inner) => write!(f, "not {}", inner),
            FilterKind::And(ops) => write_joined(f, ops, "and", "true"),
            FilterKind::Or(ops) => write_joined(f, ops, "or", "false"),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, ops: &[Filter], sep: &str, empty: &str) -> fmt::Result {
    if ops.is_empty() {
        return write!(f, "{}", empty);
    }
    write!(f, "(")?;
    for (i, op) in ops.iter().enumerate() {
        if i > 0 {
            write!(f, " {} ", sep)?;
        }
        write!(f, "{}", op)?;
    }
    write!(f, ")")
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Filter({})", self)
    }
}
