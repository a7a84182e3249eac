//! Filter Algebra Tests
//!
//! Semantic checks over an exhaustive element universe:
//!
//! 1. `to_dnf` preserves meaning and is idempotent
//! 2. `and_not` is set difference
//! 3. Filters over live containers see the ambient transaction

use proptest::prelude::*;
use std::collections::BTreeMap;
use typegraph_concurrency::TransactionManager;
use typegraph_core::Value;
use typegraph_filter::{Filter, FilterKind, FilterSpec};
use typegraph_primitives::{Complex, List};

// ============================================================================
// Test Helpers
// ============================================================================

const PROPERTIES: [&str; 2] = ["a", "b"];

/// Every assignment of a and b to {missing, 0, 1, 2}
fn universe() -> Vec<BTreeMap<String, Value>> {
    let choices = [None, Some(0), Some(1), Some(2)];
    let mut elements = Vec::new();
    for a in choices {
        for b in choices {
            let mut element = BTreeMap::new();
            if let Some(a) = a {
                element.insert("a".to_string(), Value::Int(a));
            }
            if let Some(b) = b {
                element.insert("b".to_string(), Value::Int(b));
            }
            elements.push(element);
        }
    }
    elements
}

fn terminal() -> impl Strategy<Value = Filter> {
    let property = prop::sample::select(PROPERTIES.to_vec());
    prop_oneof![
        (property.clone(), 0i64..3).prop_map(|(p, v)| Filter::equal(p, v)),
        (property.clone(), prop::collection::vec(0i64..3, 1..3)).prop_map(|(p, vs)| Filter::is_in(p, vs)),
        (property.clone(), 0i64..3).prop_map(|(p, v)| Filter::greater(p, v)),
        (property, 0i64..3).prop_map(|(p, v)| Filter::less_or_equal(p, v)),
        Just(Filter::always()),
        Just(Filter::never()),
    ]
}

fn filter() -> impl Strategy<Value = Filter> {
    terminal().prop_recursive(4, 24, 3, |inner| {
        prop_oneof![
            inner.clone().prop_map(|f| f.negate()),
            prop::collection::vec(inner.clone(), 1..4).prop_map(Filter::and_all),
            prop::collection::vec(inner, 1..4).prop_map(Filter::or_any),
        ]
    })
}

fn matches(filter: &Filter, element: &BTreeMap<String, Value>) -> bool {
    filter.contains(element).unwrap()
}

/// Whether a filter is `True`, `False` or `Or(And(literal...)...)`
fn is_canonical(filter: &Filter) -> bool {
    match filter.kind() {
        FilterKind::True | FilterKind::False => true,
        FilterKind::Or(clauses) => clauses.iter().all(|clause| match clause.kind() {
            FilterKind::And(literals) => literals.iter().all(|literal| match literal.kind() {
                FilterKind::Terminal(_) => true,
                FilterKind::Not(inner) => matches!(inner.kind(), FilterKind::Terminal(_)),
                _ => false,
            }),
            _ => false,
        }),
        _ => false,
    }
}

// ============================================================================
// DNF
// ============================================================================

proptest! {
    #[test]
    fn prop_dnf_preserves_meaning(f in filter()) {
        let dnf = f.to_dnf();
        prop_assert!(is_canonical(&dnf));
        for element in universe() {
            prop_assert_eq!(matches(&dnf, &element), matches(&f, &element), "element {:?}", element);
        }
    }

    #[test]
    fn prop_dnf_is_idempotent(f in filter()) {
        let dnf = f.to_dnf();
        prop_assert!(dnf.to_dnf().ptr_eq(&dnf));
        prop_assert!(f.to_dnf().ptr_eq(&dnf));
    }

    #[test]
    fn prop_and_not_is_set_difference(a in filter(), b in filter()) {
        let difference = a.and_not(&b);
        prop_assert!(is_canonical(&difference));
        for element in universe() {
            let expected = matches(&a, &element) && !matches(&b, &element);
            prop_assert_eq!(matches(&difference, &element), expected, "element {:?}", element);
        }
    }

    #[test]
    fn prop_negate_is_complement(f in filter()) {
        let negated = f.negate();
        for element in universe() {
            prop_assert_eq!(matches(&negated, &element), !matches(&f, &element));
        }
    }
}

#[test]
fn test_dnf_contradiction_and_tautology() {
    let a1 = Filter::equal("a", 1);
    let a2 = Filter::equal("a", 2);
    assert!(a1.and(&a2).to_dnf().is_false());
    assert!(a1.or(&Filter::always()).to_dnf().is_true());
    assert!(a1.or(&a1.negate()).to_dnf().is_true());
}

#[test]
fn test_dnf_distributes_and_over_or() {
    let f = Filter::equal("a", 1)
        .or(&Filter::equal("a", 2))
        .and(&Filter::equal("b", 1).or(&Filter::equal("b", 2)));
    let dnf = f.to_dnf();
    assert_eq!(dnf.operands().len(), 4);
    assert!(dnf.operands().iter().all(|clause| clause.operands().len() == 2));
}

#[test]
fn test_and_not_keeps_clause_count_small() {
    // Each exclude term pins a different value of a, so every clause splits at most once
    let current = Filter::or_any((0..3).map(|v| Filter::equal("a", v)));
    let exclude = Filter::or_any((0..3).map(|v| Filter::equal("a", v).and(&Filter::equal("b", v))));
    let difference = current.and_not(&exclude);
    assert_eq!(difference.operands().len(), 3);
}

#[test]
fn test_spec_json_survives_dnf() {
    let f = Filter::equal("a", 1).and(&Filter::greater("b", 0).negate());
    let json = f.to_dnf().to_spec().to_json().unwrap();
    let back = Filter::from_spec(&FilterSpec::from_json(&json).unwrap()).unwrap();
    for element in universe() {
        assert_eq!(matches(&back, &element), matches(&f, &element));
    }
}

// ============================================================================
// Live containers
// ============================================================================

#[test]
fn test_select_sees_pending_changes() {
    let manager = TransactionManager::new();
    let ada = Complex::with_properties(&manager, [("name", "Ada"), ("team", "core")]);
    let grace = Complex::with_properties(&manager, [("name", "Grace"), ("team", "compilers")]);
    let people = List::with_members(&manager, [&ada, &grace]);
    let core = Filter::equal("team", "core");

    assert_eq!(core.select(&people).unwrap(), vec![ada.clone()]);

    let scope = manager.enter().unwrap();
    grace.set("team", "core").unwrap();
    assert_eq!(core.select(&people).unwrap().len(), 2);

    let committed = manager.enter_committed();
    assert_eq!(core.select(&people).unwrap(), vec![ada.clone()]);
    committed.exit().unwrap();

    scope.reject("not yet").unwrap();
    assert_eq!(core.select(&people).unwrap(), vec![ada]);
}

#[test]
fn test_contains_on_complex() {
    let manager = TransactionManager::new();
    let ada = Complex::with_properties(&manager, [("name", "Ada Lovelace")]);
    let f = Filter::like("name", "Love").and(&Filter::equal("retired", Value::Null));
    assert!(f.contains(&ada).unwrap());
}
