//! Complex: a container of named properties
//!
//! Property values are [`Member`]s: primitive values or references to
//! other containers. Setting a property to a container makes this complex a
//! referrer of it, so changes to the referenced container propagate here.

use crate::list::List;
use std::collections::BTreeMap;
use std::fmt;
use typegraph_concurrency::{
    Changeset, Container, ContainerKind, ContainerState, ListenerId, ListenerResult, Member,
    TransactionManager,
};
use typegraph_core::{Error, Result, Uid, Value, ValidationError};

/// Typed facade over a complex container
#[derive(Clone, PartialEq, Eq)]
pub struct Complex {
    container: Container,
}

impl Complex {
    /// Create an empty complex
    pub fn new(manager: &TransactionManager) -> Self {
        Self {
            container: Container::empty(manager, ContainerKind::Complex),
        }
    }

    /// Create a complex with initial properties
    ///
    /// Initial properties are committed state, not a transaction.
    pub fn with_properties<I, K, M>(manager: &TransactionManager, properties: I) -> Self
    where
        I: IntoIterator<Item = (K, M)>,
        K: Into<String>,
        M: Into<Member>,
    {
        let properties: BTreeMap<String, Member> = properties
            .into_iter()
            .map(|(name, member)| (name.into(), member.into()))
            .collect();
        Self {
            container: Container::new(manager, ContainerState::Complex(properties)),
        }
    }

    /// Wrap an existing container
    ///
    /// # Errors
    /// Returns `ArgumentInvalid` if the container is not complex.
    pub fn from_container(container: Container) -> Result<Self> {
        if container.kind() != ContainerKind::Complex {
            return Err(Error::argument_invalid(
                "container",
                format!("expected a complex container, found a {}", container.kind()),
            ));
        }
        Ok(Self { container })
    }

    /// Underlying container
    pub fn container(&self) -> &Container {
        &self.container
    }

    /// Container uid
    pub fn uid(&self) -> Uid {
        self.container.uid()
    }

    /// Committed version
    pub fn version(&self) -> u64 {
        self.container.version()
    }

    // === Reads ===

    /// Property as seen by the ambient transaction
    pub fn get(&self, name: &str) -> Option<Member> {
        self.container
            .read(|state| state.as_complex().and_then(|props| props.get(name).cloned()))
    }

    /// Primitive property value
    pub fn get_value(&self, name: &str) -> Option<Value> {
        match self.get(name)? {
            Member::Value(value) => Some(value),
            Member::Container(_) => None,
        }
    }

    /// Referenced complex
    pub fn get_complex(&self, name: &str) -> Option<Complex> {
        match self.get(name)? {
            Member::Container(container) => Complex::from_container(container).ok(),
            Member::Value(_) => None,
        }
    }

    /// Referenced list
    pub fn get_list(&self, name: &str) -> Option<List> {
        match self.get(name)? {
            Member::Container(container) => List::from_container(container).ok(),
            Member::Value(_) => None,
        }
    }

    /// Property as committed, ignoring pending changes
    pub fn get_committed(&self, name: &str) -> Option<Member> {
        self.container
            .read_committed(|state| state.as_complex().and_then(|props| props.get(name).cloned()))
    }

    /// Names of the present properties, sorted
    pub fn property_names(&self) -> Vec<String> {
        self.container.read(|state| {
            state
                .as_complex()
                .map(|props| props.keys().cloned().collect())
                .unwrap_or_default()
        })
    }

    /// Whether the property is present
    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    // === Writes ===

    /// Set a property
    ///
    /// Returns whether a change was recorded.
    pub fn set(&self, name: &str, member: impl Into<Member>) -> Result<bool> {
        let member = member.into();
        self.container.mutate(|changeset| changeset.set(name, member))
    }

    /// Remove a property
    pub fn unset(&self, name: &str) -> Result<bool> {
        self.container.mutate(|changeset| changeset.unset(name))
    }

    // === Listeners ===

    /// Register an init-phase listener
    pub fn on_init<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Changeset) -> ListenerResult + Send + Sync + 'static,
    {
        self.container.on_init(listener)
    }

    /// Register a will-phase listener
    pub fn on_will<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Changeset) -> ListenerResult + Send + Sync + 'static,
    {
        self.container.on_will(listener)
    }

    /// Register a finally-phase listener
    pub fn on_finally<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Changeset) -> Result<()> + Send + Sync + 'static,
    {
        self.container.on_finally(listener)
    }

    /// Register a validator over the projected properties
    pub fn add_validator<F>(&self, validator: F) -> ListenerId
    where
        F: Fn(Uid, &BTreeMap<String, Member>) -> Vec<ValidationError> + Send + Sync + 'static,
    {
        self.container.add_validator(move |container: &Container, state: &ContainerState| {
            match state.as_complex() {
                Some(props) => validator(container.uid(), props),
                None => Vec::new(),
            }
        })
    }

    /// Unregister a listener or validator
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.container.remove_listener(id)
    }
}

impl From<Complex> for Member {
    fn from(complex: Complex) -> Self {
        Member::Container(complex.container)
    }
}

impl From<&Complex> for Member {
    fn from(complex: &Complex) -> Self {
        Member::Container(complex.container.clone())
    }
}

impl fmt::Debug for Complex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Complex")
            .field("uid", &self.uid())
            .field("version", &self.version())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_outside_scope_commits() {
        let manager = TransactionManager::new();
        let complex = Complex::new(&manager);

        assert!(complex.set("height", 180).unwrap());
        assert_eq!(complex.version(), 2);
        assert_eq!(complex.get_committed("height"), Some(Member::from(180)));
    }

    #[test]
    fn test_set_same_value_is_noop() {
        let manager = TransactionManager::new();
        let complex = Complex::with_properties(&manager, [("height", 180)]);

        assert!(!complex.set("height", 180).unwrap());
        assert_eq!(complex.version(), 1);
        assert_eq!(manager.current_version(), 1);
    }

    #[test]
    fn test_reads_see_pending_changes_in_scope() {
        let manager = TransactionManager::new();
        let complex = Complex::with_properties(&manager, [("name", "Ada")]);

        let scope = manager.enter().unwrap();
        complex.set("name", "Grace").unwrap();
        assert_eq!(complex.get_value("name"), Some(Value::from("Grace")));
        assert_eq!(complex.get_committed("name"), Some(Member::from("Ada")));

        scope.accept().unwrap();
        assert_eq!(complex.get_value("name"), Some(Value::from("Grace")));
    }

    #[test]
    fn test_unset_removes_property() {
        let manager = TransactionManager::new();
        let complex = Complex::with_properties(&manager, [("a", 1), ("b", 2)]);

        assert!(complex.unset("a").unwrap());
        assert!(!complex.unset("missing").unwrap());
        assert_eq!(complex.property_names(), vec!["b".to_string()]);
        assert!(!complex.has("a"));
    }

    #[test]
    fn test_nested_complex_and_list() {
        let manager = TransactionManager::new();
        let address = Complex::new(&manager);
        let tags = List::new(&manager);
        let person = Complex::new(&manager);

        person.set("address", &address).unwrap();
        person.set("tags", &tags).unwrap();

        assert_eq!(person.get_complex("address"), Some(address.clone()));
        assert_eq!(person.get_list("tags"), Some(tags));
        assert!(person.get_list("address").is_none());
        assert!(person.get_value("address").is_none());
    }

    #[test]
    fn test_from_container_checks_kind() {
        let manager = TransactionManager::new();
        let list = Container::empty(&manager, ContainerKind::List);
        assert!(matches!(
            Complex::from_container(list),
            Err(Error::ArgumentInvalid { .. })
        ));
    }

    #[test]
    fn test_validator_rejects_commit() {
        let manager = TransactionManager::new();
        let complex = Complex::new(&manager);
        complex.add_validator(|uid, props| match props.get("age") {
            Some(Member::Value(Value::Int(age))) if *age < 0 => {
                vec![ValidationError::for_property(uid, "age", "must not be negative")]
            }
            _ => Vec::new(),
        });

        let err = complex.set("age", -1).unwrap_err();
        assert!(err.is_rejection());
        assert_eq!(complex.version(), 1);
        assert!(complex.get("age").is_none());

        complex.set("age", 30).unwrap();
        assert_eq!(complex.get_value("age"), Some(Value::Int(30)));
    }
}
