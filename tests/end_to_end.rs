//! End-to-end tests through the typegraph facade
//!
//! Scenarios combine the transaction engine, the typed facades and the
//! filter algebra the way an application would:
//!
//! 1. Derived properties maintained by init listeners
//! 2. Validation vetoing a whole transaction
//! 3. Audit trails written by finally listeners
//! 4. Filters over committed and pending state

use std::sync::Arc;
use typegraph::{
    Complex, Error, Filter, List, Member, Rejection, TransactionConfig, TransactionManager,
    ValidationError, Value,
};

// ============================================================================
// Test Helpers
// ============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn item(manager: &TransactionManager, sku: &str, price: i64, qty: i64) -> Complex {
    Complex::with_properties(
        manager,
        [
            ("sku", Member::from(sku)),
            ("price", Member::from(price)),
            ("qty", Member::from(qty)),
        ],
    )
}

fn int(complex: &Complex, name: &str) -> i64 {
    complex
        .get_value(name)
        .and_then(|v| v.as_int())
        .unwrap_or_default()
}

/// An order whose `total` is kept up to date by an init listener
fn order(manager: &TransactionManager, items: &List) -> Complex {
    let order = Complex::with_properties(manager, [("items", items)]);
    let lines = items.clone();
    order.on_init(move |changeset| {
        let total: i64 = lines
            .complexes()
            .iter()
            .map(|line| int(line, "price") * int(line, "qty"))
            .sum();
        changeset
            .set("total", total)
            .map(|_| ())
            .map_err(|e| Rejection::vetoed(e.to_string()))
    });
    order
}

// ============================================================================
// Derived properties
// ============================================================================

#[test]
fn test_init_listener_maintains_total() {
    init_tracing();
    let manager = TransactionManager::new();
    let pen = item(&manager, "pen", 2, 1);
    let book = item(&manager, "book", 15, 1);
    let items = List::with_members(&manager, [&pen, &book]);
    let order = order(&manager, &items);

    // A change two levels below the order reaches its listener
    pen.set("qty", 5).unwrap();
    assert_eq!(int(&order, "total"), 25);
    assert_eq!(order.version(), pen.version());
    assert_eq!(items.version(), pen.version());
    assert_eq!(book.version(), 1);

    // Adding a line in the same transaction as a price change
    let lamp = item(&manager, "lamp", 40, 1);
    manager
        .run(|_| {
            items.push(&lamp)?;
            book.set("price", 20)?;
            Ok(())
        })
        .unwrap();
    assert_eq!(int(&order, "total"), 10 + 20 + 40);
}

#[test]
fn test_validation_rejects_whole_transaction() {
    let manager = TransactionManager::new();
    let pen = item(&manager, "pen", 2, 1);
    let items = List::with_members(&manager, [&pen]);
    let order = order(&manager, &items);
    order.add_validator(|uid, props| match props.get("total") {
        Some(Member::Value(Value::Int(total))) if *total > 100 => {
            vec![ValidationError::for_property(uid, "total", "over budget")]
        }
        _ => Vec::new(),
    });

    let version = manager.current_version();
    let err = pen.set("qty", 51).unwrap_err();
    match err {
        Error::Rejected(Rejection::Validation(errors)) => {
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].property.as_deref(), Some("total"));
        }
        other => panic!("expected a validation rejection, got {:?}", other),
    }

    assert_eq!(manager.current_version(), version);
    assert_eq!(int(&pen, "qty"), 1);
    assert!(order.get("total").is_none());
}

// ============================================================================
// Finally listeners
// ============================================================================

#[test]
fn test_finally_listener_writes_audit_trail() {
    let manager = TransactionManager::new();
    let account = Complex::with_properties(&manager, [("balance", 100)]);
    let audit = List::new(&manager);

    let log = audit.clone();
    let account_handle = account.clone();
    account.on_finally(move |changeset| {
        // Committed state is visible; the nested push commits on its own
        let balance = int(&account_handle, "balance");
        assert_eq!(
            account_handle.container().manager().pending_changesets(changeset.owner()).len(),
            1
        );
        log.push(format!("balance={}", balance))
    });

    account.set("balance", 80).unwrap();
    account.set("balance", 50).unwrap();

    let entries: Vec<Member> = audit.members();
    assert_eq!(entries, vec![Member::from("balance=80"), Member::from("balance=50")]);
    assert!(audit.version() > account.version());
    assert!(!manager.is_committing());
}

// ============================================================================
// Filters
// ============================================================================

#[test]
fn test_filters_over_items() {
    let manager = TransactionManager::new();
    let items = List::with_members(
        &manager,
        [
            item(&manager, "a", 5, 1),
            item(&manager, "b", 12, 1),
            item(&manager, "c", 30, 2),
        ],
    );

    let pricey = Filter::greater("price", 10);
    let not_b = pricey.and_not(&Filter::equal("sku", "b"));
    let selected: Vec<String> = not_b
        .select(&items)
        .unwrap()
        .iter()
        .filter_map(|c| c.get_value("sku").and_then(|v| v.as_str().map(str::to_string)))
        .collect();
    assert_eq!(selected, vec!["c".to_string()]);

    // Pending changes are visible to filters inside the transaction only
    let scope = manager.enter().unwrap();
    items.complexes()[0].set("price", 50).unwrap();
    assert_eq!(pricey.select(&items).unwrap().len(), 3);
    drop(scope);
    assert_eq!(pricey.select(&items).unwrap().len(), 2);
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_manager_from_toml_config() {
    let config = TransactionConfig::from_toml_str("initial_version = 100\nmax_init_passes = 8\n").unwrap();
    let manager = TransactionManager::with_config(config).unwrap();
    let counter = Complex::new(&manager);

    counter.set("n", 1).unwrap();
    assert_eq!(counter.version(), 101);
    assert_eq!(manager.config().max_init_passes, 8);

    let shared = Arc::new(counter);
    assert_eq!(shared.get_value("n"), Some(Value::Int(1)));
}
