//! List: an ordered container of members
//!
//! ## Whole-list replacement
//!
//! [`List::set`] does not clear and refill the list. It records the
//! smallest obvious edit script instead:
//!
//! 1. Remove members with no counterpart in the target (back to front)
//! 2. Walk the target; move a later matching member into place, or insert
//!    the target member when none is left
//!
//! Members that survive keep their identity in the change history, and
//! references to contained containers are only dropped for members that
//! actually left the list.

use crate::complex::Complex;
use std::cmp::Ordering;
use std::fmt;
use tracing::trace;
use typegraph_concurrency::{
    Changeset, Container, ContainerKind, ContainerState, ListenerId, ListenerResult, Member,
    TransactionManager,
};
use typegraph_core::{Error, Result, Uid};

/// Typed facade over a list container
#[derive(Clone, PartialEq, Eq)]
pub struct List {
    container: Container,
}

impl List {
    /// Create an empty list
    pub fn new(manager: &TransactionManager) -> Self {
        Self {
            container: Container::empty(manager, ContainerKind::List),
        }
    }

    /// Create a list with initial members
    ///
    /// Initial members are committed state, not a transaction.
    pub fn with_members<I, M>(manager: &TransactionManager, members: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: Into<Member>,
    {
        let members = members.into_iter().map(Into::into).collect();
        Self {
            container: Container::new(manager, ContainerState::List(members)),
        }
    }

    /// Wrap an existing container
    ///
    /// # Errors
    /// Returns `ArgumentInvalid` if the container is not a list.
    pub fn from_container(container: Container) -> Result<Self> {
        if container.kind() != ContainerKind::List {
            return Err(Error::argument_invalid(
                "container",
                format!("expected a list container, found a {}", container.kind()),
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

    fn read<R>(&self, f: impl FnOnce(&[Member]) -> R) -> R {
        self.container
            .read(|state| f(state.as_list().unwrap_or_default()))
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.read(|items| items.len())
    }

    /// Whether the list has no members
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Member at `index`
    pub fn get(&self, index: usize) -> Option<Member> {
        self.read(|items| items.get(index).cloned())
    }

    /// All members, as seen by the ambient transaction
    pub fn members(&self) -> Vec<Member> {
        self.read(|items| items.to_vec())
    }

    /// All members as committed
    pub fn committed_members(&self) -> Vec<Member> {
        self.container
            .read_committed(|state| state.as_list().unwrap_or_default().to_vec())
    }

    /// Members that are complex containers
    pub fn complexes(&self) -> Vec<Complex> {
        self.read(|items| {
            items
                .iter()
                .filter_map(|member| member.as_container())
                .filter_map(|container| Complex::from_container(container.clone()).ok())
                .collect()
        })
    }

    /// Position of the first member equal to `member`
    pub fn index_of(&self, member: &Member) -> Option<usize> {
        self.read(|items| items.iter().position(|m| m == member))
    }

    /// Whether any member equals `member`
    pub fn contains(&self, member: &Member) -> bool {
        self.index_of(member).is_some()
    }

    // === Writes ===

    /// Append a member
    pub fn push(&self, member: impl Into<Member>) -> Result<()> {
        let member = member.into();
        self.container.mutate(|changeset| {
            let len = projected_len(changeset);
            changeset.insert(len, vec![member]).map(|_| ())
        })
    }

    /// Insert a member at `index`
    pub fn insert(&self, index: usize, member: impl Into<Member>) -> Result<()> {
        self.insert_many(index, vec![member.into()])
    }

    /// Insert members at `index`, in order
    pub fn insert_many(&self, index: usize, members: Vec<Member>) -> Result<()> {
        self.container
            .mutate(|changeset| changeset.insert(index, members).map(|_| ()))
    }

    /// Remove and return the member at `index`
    ///
    /// # Errors
    /// Returns `InvalidOperation` if `index` is out of range.
    pub fn remove_at(&self, index: usize) -> Result<Member> {
        self.container.mutate(|changeset| {
            let member = changeset.projected(|state| {
                state
                    .as_list()
                    .and_then(|items| items.get(index).cloned())
            });
            changeset.remove(index, 1)?;
            member.ok_or_else(|| {
                Error::invalid_operation(format!("remove at index {} is out of range", index))
            })
        })
    }

    /// Remove the first member equal to `member`
    ///
    /// Returns whether a member was removed.
    pub fn remove(&self, member: &Member) -> Result<bool> {
        self.container.mutate(|changeset| {
            let position = changeset
                .projected(|state| state.as_list().and_then(|items| items.iter().position(|m| m == member)));
            match position {
                Some(index) => changeset.remove(index, 1),
                None => Ok(false),
            }
        })
    }

    /// Move the member at `from` to `to`
    pub fn move_item(&self, from: usize, to: usize) -> Result<()> {
        self.container
            .mutate(|changeset| changeset.move_item(from, to).map(|_| ()))
    }

    /// Stable-sort the members
    pub fn sort_by<F>(&self, compare: F) -> Result<()>
    where
        F: FnMut(&Member, &Member) -> Ordering,
    {
        self.container
            .mutate(|changeset| changeset.sort_by(compare).map(|_| ()))
    }

    /// Remove every member
    pub fn clear(&self) -> Result<()> {
        self.container.mutate(|changeset| changeset.clear().map(|_| ()))
    }

    /// Replace the members with `target`
    ///
    /// Returns whether any change was recorded.
    pub fn set(&self, target: Vec<Member>) -> Result<bool> {
        self.container.mutate(|changeset| {
            let mut current = changeset.projected(|state| state.as_list().unwrap_or_default().to_vec());
            let mut changed = false;

            // Pair every target member with an unused equal current member
            let mut kept = vec![false; current.len()];
            for member in &target {
                if let Some(index) = (0..current.len()).find(|&i| !kept[i] && current[i] == *member) {
                    kept[index] = true;
                }
            }
            for index in (0..current.len()).rev() {
                if !kept[index] {
                    changeset.remove(index, 1)?;
                    current.remove(index);
                    changed = true;
                }
            }

            for (position, member) in target.iter().enumerate() {
                if current.get(position) == Some(member) {
                    continue;
                }
                let later = (position + 1..current.len()).find(|&i| current[i] == *member);
                match later {
                    Some(from) => {
                        changeset.move_item(from, position)?;
                        let moved = current.remove(from);
                        current.insert(position, moved);
                    }
                    None => {
                        changeset.insert(position, vec![member.clone()])?;
                        current.insert(position, member.clone());
                    }
                }
                changed = true;
            }

            trace!(
                target: "typegraph::changeset",
                uid = %changeset.owner().uid(),
                changes = changeset.change_count(),
                "List replaced"
            );
            Ok(changed)
        })
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

    /// Unregister a listener
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.container.remove_listener(id)
    }
}

fn projected_len(changeset: &Changeset) -> usize {
    changeset.projected(|state| state.as_list().map_or(0, |items| items.len()))
}

impl From<List> for Member {
    fn from(list: List) -> Self {
        Member::Container(list.container)
    }
}

impl From<&List> for Member {
    fn from(list: &List) -> Self {
        Member::Container(list.container.clone())
    }
}

impl fmt::Debug for List {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("List")
            .field("uid", &self.uid())
            .field("version", &self.version())
            .field("len", &self.len())
            .finish()
    }
}
