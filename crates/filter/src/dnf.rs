//! Disjunctive normal form
//!
//! ## Pipeline
//!
//! ```text
//! filter ──push_negations──▶ NNF tree ──distribute──▶ clauses ──simplify──▶ Dnf
//! ```
//!
//! 1. `push_negations`: De Morgan down to the terminals
//! 2. `distribute`: And over Or (cartesian product), nested And/Or flatten
//!    into one clause set
//! 3. `simplify`: per clause, drop duplicates and contradictions and decide
//!    every literal on a property pinned by a positive equality; across
//!    clauses, drop duplicates, absorbed supersets and detect tautologies
//!
//! A [`Dnf`] with no clauses is `False`; a single empty clause is `True`.

use crate::filter::{Filter, FilterKind};
use crate::terminal::Terminal;
use rustc_hash::FxHashSet;
use std::sync::Arc;
use typegraph_core::Value;

/// A terminal or its negation
#[derive(Debug, Clone)]
pub(crate) struct Literal {
    terminal: Terminal,
    positive: bool,
    key: String,
}

impl Literal {
    pub(crate) fn new(terminal: Terminal, positive: bool) -> Self {
        let key = format!("{}{}", if positive { '+' } else { '-' }, terminal.content_key());
        Self {
            terminal,
            positive,
            key,
        }
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    fn complement_key(&self) -> String {
        format!("{}{}", if self.positive { '-' } else { '+' }, &self.key[1..])
    }

    pub(crate) fn negate(&self) -> Literal {
        Literal {
            terminal: self.terminal.clone(),
            positive: !self.positive,
            key: self.complement_key(),
        }
    }

    fn property(&self) -> &str {
        self.terminal.property()
    }

    /// Value pinned by this literal, if it is a positive equality
    fn pin(&self) -> Option<&Value> {
        if self.positive {
            self.terminal.equality_value()
        } else {
            None
        }
    }

    /// Truth of this literal when its property equals `value`
    fn decide(&self, value: &Value) -> bool {
        self.terminal.matches(value) == self.positive
    }

    fn to_filter(&self) -> Filter {
        let terminal = Filter::terminal(self.terminal.clone());
        if self.positive {
            terminal
        } else {
            Filter::from_kind(FilterKind::Not(terminal))
        }
    }
}

/// Conjunction of literals
#[derive(Debug, Clone, Default)]
pub(crate) struct Clause {
    literals: Vec<Literal>,
}

impl Clause {
    fn unit(literal: Literal) -> Self {
        Self {
            literals: vec![literal],
        }
    }

    pub(crate) fn literals(&self) -> &[Literal] {
        &self.literals
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.literals.is_empty()
    }

    /// Canonical key; only meaningful on normalized clauses
    pub(crate) fn key(&self) -> String {
        let keys: Vec<&str> = self.literals.iter().map(Literal::key).collect();
        keys.join(" & ")
    }

    fn conjoin(&self, other: &Clause) -> Clause {
        let mut literals = self.literals.clone();
        literals.extend(other.literals.iter().cloned());
        Clause { literals }
    }

    pub(crate) fn with(&self, literal: Literal) -> Clause {
        let mut literals = self.literals.clone();
        literals.push(literal);
        Clause { literals }
    }

    fn pinned(&self, property: &str) -> Option<&Value> {
        self.literals
            .iter()
            .filter(|l| l.property() == property)
            .find_map(Literal::pin)
    }

    /// Whether every element satisfying this clause satisfies `literal`
    pub(crate) fn implies(&self, literal: &Literal) -> bool {
        if self.literals.iter().any(|l| l.key == literal.key) {
            return true;
        }
        self.pinned(literal.property())
            .is_some_and(|value| literal.decide(value))
    }

    /// Whether no element satisfying this clause satisfies `literal`
    pub(crate) fn excludes(&self, literal: &Literal) -> bool {
        let complement = literal.complement_key();
        if self.literals.iter().any(|l| l.key == complement) {
            return true;
        }
        self.pinned(literal.property())
            .is_some_and(|value| !literal.decide(value))
    }

    fn is_subset_of(&self, other: &Clause) -> bool {
        self.literals
            .iter()
            .all(|l| other.literals.iter().any(|o| o.key == l.key))
    }

    /// Simplify; `None` when the clause cannot be satisfied
    pub(crate) fn normalize(mut self) -> Option<Clause> {
        self.literals.sort_by(|a, b| a.key.cmp(&b.key));
        self.literals.dedup_by(|a, b| a.key == b.key);

        let keys: FxHashSet<&str> = self.literals.iter().map(Literal::key).collect();
        if self
            .literals
            .iter()
            .any(|l| keys.contains(l.complement_key().as_str()))
        {
            return None;
        }

        // property -> (pinned value, key of the pinning literal)
        let mut pins: Vec<(String, Value, String)> = Vec::new();
        for literal in &self.literals {
            if let Some(value) = literal.pin() {
                if !pins.iter().any(|(p, _, _)| p == literal.property()) {
                    pins.push((literal.property().to_string(), value.clone(), literal.key.clone()));
                }
            }
        }
        if pins
            .iter()
            .any(|(_, value, _)| value.as_float().is_some_and(f64::is_nan))
        {
            return None;
        }

        let mut kept = Vec::with_capacity(self.literals.len());
        for literal in self.literals {
            match pins.iter().find(|(p, _, _)| p == literal.property()) {
                Some((_, _, key)) if *key == literal.key => kept.push(literal),
                Some((_, value, _)) => {
                    if !literal.decide(value) {
                        return None;
                    }
                }
                None => kept.push(literal),
            }
        }
        Some(Clause { literals: kept })
    }
}

/// Disjunction of clauses
#[derive(Debug, Clone, Default)]
pub(crate) struct Dnf {
    clauses: Vec<Clause>,
}

impl Dnf {
    pub(crate) fn tautology() -> Self {
        Self {
            clauses: vec![Clause::default()],
        }
    }

    pub(crate) fn contradiction() -> Self {
        Self {
            clauses: Vec::new(),
        }
    }

    /// Simplified disjunction of `clauses`
    pub(crate) fn from_clauses(clauses: Vec<Clause>) -> Self {
        Dnf { clauses }.simplify()
    }

    /// Normal form of `filter`
    pub(crate) fn of(filter: &Filter) -> Self {
        let nnf = push_negations(filter, false);
        distribute(&nnf).simplify()
    }

    pub(crate) fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub(crate) fn is_tautology(&self) -> bool {
        self.clauses.len() == 1 && self.clauses[0].is_empty()
    }

    pub(crate) fn is_contradiction(&self) -> bool {
        self.clauses.is_empty()
    }

    fn conjoin(&self, other: &Dnf) -> Dnf {
        let mut clauses = Vec::with_capacity(self.clauses.len() * other.clauses.len());
        for a in &self.clauses {
            for b in &other.clauses {
                if let Some(clause) = a.conjoin(b).normalize() {
                    clauses.push(clause);
                }
            }
        }
        Dnf::from_clauses(clauses)
    }

    fn simplify(self) -> Dnf {
        let mut seen = FxHashSet::default();
        let mut clauses: Vec<Clause> = Vec::new();
        for clause in self.clauses {
            let Some(clause) = clause.normalize() else {
                continue;
            };
            if clause.is_empty() {
                return Dnf::tautology();
            }
            if seen.insert(clause.key()) {
                clauses.push(clause);
            }
        }

        // p ∨ ¬p
        let units: FxHashSet<&str> = clauses
            .iter()
            .filter(|c| c.literals.len() == 1)
            .map(|c| c.literals[0].key())
            .collect();
        if units
            .iter()
            .any(|key| units.contains(complement(key).as_str()))
        {
            return Dnf::tautology();
        }

        // Absorption: a ∨ (a ∧ b) = a
        let absorbed: Vec<bool> = clauses
            .iter()
            .enumerate()
            .map(|(i, clause)| {
                clauses.iter().enumerate().any(|(j, other)| {
                    i != j
                        && other.literals.len() < clause.literals.len()
                        && other.is_subset_of(clause)
                })
            })
            .collect();
        let mut clauses: Vec<Clause> = clauses
            .into_iter()
            .zip(absorbed)
            .filter_map(|(clause, absorbed)| (!absorbed).then_some(clause))
            .collect();
        clauses.sort_by_cached_key(Clause::key);
        Dnf { clauses }
    }

    /// Canonical filter for a normal form
    pub(crate) fn to_filter(normal: &Arc<Dnf>) -> Filter {
        let kind = if normal.is_contradiction() {
            FilterKind::False
        } else if normal.is_tautology() {
            FilterKind::True
        } else {
            FilterKind::Or(
                normal
                    .clauses
                    .iter()
                    .map(|clause| {
                        Filter::from_kind(FilterKind::And(
                            clause.literals.iter().map(Literal::to_filter).collect(),
                        ))
                    })
                    .collect(),
            )
        };
        Filter::canonical(kind, normal.clone())
    }

    pub(crate) fn into_filter(self) -> Filter {
        Dnf::to_filter(&Arc::new(self))
    }
}

fn complement(key: &str) -> String {
    match key.strip_prefix('+') {
        Some(rest) => format!("-{}", rest),
        None => format!("+{}", &key[1..]),
    }
}

/// Stage 1: push negations down to the terminals
pub(crate) fn push_negations(filter: &Filter, negated: bool) -> Filter {
    match (filter.kind(), negated) {
        (FilterKind::True, false) | (FilterKind::False, true) => Filter::always(),
        (FilterKind::True, true) | (FilterKind::False, false) => Filter::never(),
        (FilterKind::Terminal(_), false) => filter.clone(),
        (FilterKind::Terminal(_), true) => Filter::from_kind(FilterKind::Not(filter.clone())),
        (FilterKind::Not(inner), _) => push_negations(inner, !negated),
        (FilterKind::And(ops), false) | (FilterKind::Or(ops), true) => Filter::from_kind(FilterKind::And(
            ops.iter().map(|op| push_negations(op, negated)).collect(),
        )),
        (FilterKind::Or(ops), false) | (FilterKind::And(ops), true) => Filter::from_kind(FilterKind::Or(
            ops.iter().map(|op| push_negations(op, negated)).collect(),
        )),
    }
}

/// Stage 2: distribute And over Or on a negation normal form
fn distribute(nnf: &Filter) -> Dnf {
    match nnf.kind() {
        FilterKind::True => Dnf::tautology(),
        FilterKind::False => Dnf::contradiction(),
        FilterKind::Terminal(terminal) => Dnf {
            clauses: vec![Clause::unit(Literal::new(terminal.clone(), true))],
        },
        FilterKind::Not(inner) => match inner.kind() {
            FilterKind::Terminal(terminal) => Dnf {
                clauses: vec![Clause::unit(Literal::new(terminal.clone(), false))],
            },
            _ => distribute(&push_negations(inner, true)),
        },
        FilterKind::And(ops) => ops
            .iter()
            .fold(Dnf::tautology(), |acc, op| acc.conjoin(&distribute(op))),
        FilterKind::Or(ops) => Dnf {
            clauses: ops.iter().flat_map(|op| distribute(op).clauses).collect(),
        },
    }
}
