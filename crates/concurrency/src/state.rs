//! Container state and members
//!
//! A container's state is either a map of named properties (`Complex`) or an
//! ordered sequence of elements (`List`). Members are either primitive
//! values or references to other containers; the latter form the reference
//! graph that change propagation walks.

use crate::change::PrimitiveChange;
use crate::container::Container;
use std::collections::BTreeMap;
use std::fmt;
use typegraph_core::{Error, Result, Value};

/// Discriminates the two container shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    /// Named properties
    Complex,
    /// Ordered elements
    List,
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerKind::Complex => write!(f, "complex"),
            ContainerKind::List => write!(f, "list"),
        }
    }
}

/// A property value or list element
#[derive(Debug, Clone)]
pub enum Member {
    /// Primitive value
    Value(Value),
    /// Reference to another container
    Container(Container),
}

impl Member {
    /// Get the primitive value, if this member is one
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Member::Value(v) => Some(v),
            Member::Container(_) => None,
        }
    }

    /// Get the referenced container, if this member is one
    pub fn as_container(&self) -> Option<&Container> {
        match self {
            Member::Container(c) => Some(c),
            Member::Value(_) => None,
        }
    }
}

// Containers compare by identity, values by value
impl PartialEq for Member {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Member::Value(a), Member::Value(b)) => a == b,
            (Member::Container(a), Member::Container(b)) => a.uid() == b.uid(),
            _ => false,
        }
    }
}

macro_rules! member_from_value {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Member {
                fn from(value: $ty) -> Self {
                    Member::Value(value.into())
                }
            }
        )*
    };
}

member_from_value!(Value, bool, i32, i64, f64, String, &str);

impl From<Container> for Member {
    fn from(container: Container) -> Self {
        Member::Container(container)
    }
}

impl From<&Container> for Member {
    fn from(container: &Container) -> Self {
        Member::Container(container.clone())
    }
}

/// Position through which a container references another
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Slot {
    /// A named property of a complex container
    Property(String),
    /// An element of a list container
    Element,
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Property(name) => write!(f, ".{}", name),
            Slot::Element => write!(f, "[]"),
        }
    }
}

/// Stored or projected state of a container
#[derive(Debug, Clone, PartialEq)]
pub enum ContainerState {
    /// Property name to member
    Complex(BTreeMap<String, Member>),
    /// Ordered members
    List(Vec<Member>),
}

impl ContainerState {
    /// Empty state of the given kind
    pub fn empty(kind: ContainerKind) -> Self {
        match kind {
            ContainerKind::Complex => ContainerState::Complex(BTreeMap::new()),
            ContainerKind::List => ContainerState::List(Vec::new()),
        }
    }

    /// Kind of container this state belongs to
    pub fn kind(&self) -> ContainerKind {
        match self {
            ContainerState::Complex(_) => ContainerKind::Complex,
            ContainerState::List(_) => ContainerKind::List,
        }
    }

    /// Properties, if this is complex state
    pub fn as_complex(&self) -> Option<&BTreeMap<String, Member>> {
        match self {
            ContainerState::Complex(props) => Some(props),
            ContainerState::List(_) => None,
        }
    }

    /// Elements, if this is list state
    pub fn as_list(&self) -> Option<&[Member]> {
        match self {
            ContainerState::List(items) => Some(items),
            ContainerState::Complex(_) => None,
        }
    }

    /// Outgoing container references, with the slot each one sits in
    pub fn references(&self) -> Vec<(Slot, Container)> {
        match self {
            ContainerState::Complex(props) => props
                .iter()
                .filter_map(|(name, member)| {
                    member
                        .as_container()
                        .map(|c| (Slot::Property(name.clone()), c.clone()))
                })
                .collect(),
            ContainerState::List(items) => items
                .iter()
                .filter_map(|member| member.as_container().map(|c| (Slot::Element, c.clone())))
                .collect(),
        }
    }

    /// Apply one primitive change in place
    ///
    /// # Errors
    /// Returns `InvalidOperation` if the change does not fit this state's
    /// kind or its positions are out of range. The state is left untouched
    /// on error.
    pub fn apply(&mut self, change: &PrimitiveChange) -> Result<()> {
        match (self, change) {
            (ContainerState::Complex(props), PrimitiveChange::Replace { property, new, .. }) => {
                match new {
                    Some(member) => {
                        props.insert(property.clone(), member.clone());
                    }
                    None => {
                        props.remove(property);
                    }
                }
                Ok(())
            }
            (ContainerState::List(items), PrimitiveChange::Add { index, members }) => {
                if *index > items.len() {
                    return Err(out_of_range("add", *index, items.len()));
                }
                items.splice(*index..*index, members.iter().cloned());
                Ok(())
            }
            (ContainerState::List(items), PrimitiveChange::Remove { index, members }) => {
                let end = index + members.len();
                if end > items.len() {
                    return Err(out_of_range("remove", end, items.len()));
                }
                items.drain(*index..end);
                Ok(())
            }
            (ContainerState::List(items), PrimitiveChange::Move { from, to }) => {
                if *from >= items.len() || *to >= items.len() {
                    return Err(out_of_range("move", (*from).max(*to), items.len()));
                }
                let member = items.remove(*from);
                items.insert(*to, member);
                Ok(())
            }
            (ContainerState::List(items), PrimitiveChange::Sort { permutation }) => {
                if permutation.len() != items.len() || permutation.iter().any(|&i| i >= items.len())
                {
                    return Err(Error::invalid_operation(format!(
                        "sort permutation of length {} does not fit a list of length {}",
                        permutation.len(),
                        items.len()
                    )));
                }
                let sorted: Vec<Member> = permutation.iter().map(|&i| items[i].clone()).collect();
                *items = sorted;
                Ok(())
            }
            (ContainerState::List(items), PrimitiveChange::Clear { .. }) => {
                items.clear();
                Ok(())
            }
            (state, change) => Err(Error::invalid_operation(format!(
                "{} change cannot be applied to a {} container",
                change.kind(),
                state.kind()
            ))),
        }
    }
}

fn out_of_range(op: &str, index: usize, len: usize) -> Error {
    Error::invalid_operation(format!(
        "{} at index {} is out of range for a list of length {}",
        op, index, len
    ))
}
