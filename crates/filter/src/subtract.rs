//! Filter subtraction
//!
//! `a.and_not(b)` could be computed as `a.and(b.negate()).to_dnf()`, but
//! negating a DNF and distributing it back multiplies clause counts. This
//! module works on the two normal forms directly:
//!
//! 1. Clauses of `a` that appear verbatim in `b` are dropped
//! 2. Every remaining clause is subtracted by each clause of `b` in turn,
//!    reasoning per literal: a clause already implying the whole term
//!    vanishes, a clause excluding any literal of the term is kept as is,
//!    otherwise it splits into one clause per literal it does not imply
//!
//! Cost is bounded by the product of the two clause counts and the term
//! width, instead of the full expansion of `¬b`.

use crate::dnf::{Clause, Dnf};
use crate::filter::Filter;
use rustc_hash::FxHashSet;
use tracing::trace;

impl Filter {
    /// self ∧ ¬exclude, in normal form
    pub fn and_not(&self, exclude: &Filter) -> Filter {
        let current = self.normal_form();
        let exclude = exclude.normal_form();
        let result = subtract(&current, &exclude);
        trace!(
            target: "typegraph::filter",
            current = current.clauses().len(),
            exclude = exclude.clauses().len(),
            result = result.clauses().len(),
            "Filter subtracted"
        );
        result.into_filter()
    }
}

pub(crate) fn subtract(current: &Dnf, exclude: &Dnf) -> Dnf {
    if current.is_contradiction() || exclude.is_contradiction() {
        return current.clone();
    }
    if exclude.is_tautology() {
        return Dnf::contradiction();
    }

    let excluded: FxHashSet<String> = exclude.clauses().iter().map(Clause::key).collect();
    let mut clauses = Vec::new();
    for clause in current.clauses() {
        if excluded.contains(&clause.key()) {
            continue;
        }
        let mut remaining = vec![clause.clone()];
        for term in exclude.clauses() {
            remaining = remaining
                .iter()
                .flat_map(|c| subtract_clause(c, term))
                .collect();
            if remaining.is_empty() {
                break;
            }
        }
        clauses.extend(remaining);
    }
    Dnf::from_clauses(clauses)
}

/// clause ∧ ¬term as a disjunction of clauses
fn subtract_clause(clause: &Clause, term: &Clause) -> Vec<Clause> {
    let literals = term.literals();
    if literals.iter().all(|l| clause.implies(l)) {
        return Vec::new();
    }
    if literals.iter().any(|l| clause.excludes(l)) {
        return vec![clause.clone()];
    }
    literals
        .iter()
        .filter(|l| !clause.implies(l))
        .filter_map(|l| clause.with(l.negate()).normalize())
        .collect()
}
