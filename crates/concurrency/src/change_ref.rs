//! Projected incoming references
//!
//! A [`ChangeRef`] records how a transaction's pending changes alter the
//! set of references pointing at one container. Reads inside the
//! transaction see the stored references with the edits applied; the do
//! phase writes the projection back to the container.

use crate::container::{AmbientRef, Container};

/// Pending edits to one container's incoming references
#[derive(Debug, Clone)]
pub struct ChangeRef {
    container: Container,
    /// Net count per reference: positive adds, negative removes
    edits: Vec<(AmbientRef, i64)>,
}

impl ChangeRef {
    /// Create an empty change-ref for `container`
    pub fn new(container: Container) -> Self {
        Self {
            container,
            edits: Vec::new(),
        }
    }

    /// Container whose incoming references are edited
    pub fn container(&self) -> &Container {
        &self.container
    }

    /// Adjust the count of `reference` by `delta`
    pub fn edit(&mut self, reference: AmbientRef, delta: i64) {
        match self.edits.iter().position(|(r, _)| *r == reference) {
            Some(position) => {
                self.edits[position].1 += delta;
                if self.edits[position].1 == 0 {
                    self.edits.remove(position);
                }
            }
            None if delta != 0 => self.edits.push((reference, delta)),
            None => {}
        }
    }

    /// Whether the edits cancel out
    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// Apply the edits to a stored reference list
    pub fn project(&self, stored: Vec<AmbientRef>) -> Vec<AmbientRef> {
        let mut references = stored;
        for (reference, delta) in &self.edits {
            if *delta > 0 {
                references.extend(std::iter::repeat(reference.clone()).take(*delta as usize));
            } else {
                for _ in 0..delta.unsigned_abs() {
                    if let Some(position) = references.iter().position(|r| r == reference) {
                        references.remove(position);
                    }
                }
            }
        }
        references
    }

    /// Rewire the container's stored references to the projection
    pub fn apply(&self) {
        self.container.with_references_mut(|references| {
            let stored = std::mem::take(references);
            *references = self.project(stored);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::TransactionManager;
    use crate::state::{ContainerKind, Slot};

    #[test]
    fn test_edits_cancel_out() {
        let manager = TransactionManager::new();
        let parent = Container::empty(&manager, ContainerKind::List);
        let child = Container::empty(&manager, ContainerKind::Complex);

        let mut change_ref = ChangeRef::new(child);
        change_ref.edit(AmbientRef::new(&parent, Slot::Element), 1);
        assert!(!change_ref.is_empty());
        change_ref.edit(AmbientRef::new(&parent, Slot::Element), -1);
        assert!(change_ref.is_empty());
    }

    #[test]
    fn test_project_adds_and_removes() {
        let manager = TransactionManager::new();
        let a = Container::empty(&manager, ContainerKind::Complex);
        let b = Container::empty(&manager, ContainerKind::List);
        let child = Container::empty(&manager, ContainerKind::Complex);

        let stored = vec![AmbientRef::new(&a, Slot::Property("x".into()))];
        let mut change_ref = ChangeRef::new(child);
        change_ref.edit(AmbientRef::new(&a, Slot::Property("x".into())), -1);
        change_ref.edit(AmbientRef::new(&b, Slot::Element), 2);

        let projected = change_ref.project(stored);
        assert_eq!(projected.len(), 2);
        assert!(projected.iter().all(|r| r.parent_uid() == b.uid()));
    }

    #[test]
    fn test_apply_rewires_container() {
        let manager = TransactionManager::new();
        let parent = Container::empty(&manager, ContainerKind::Complex);
        let child = Container::empty(&manager, ContainerKind::Complex);

        let mut change_ref = ChangeRef::new(child.clone());
        change_ref.edit(AmbientRef::new(&parent, Slot::Property("child".into())), 1);
        change_ref.apply();

        let references = child.stored_references();
        assert_eq!(references.len(), 1);
        assert_eq!(references[0].parent_uid(), parent.uid());
    }
}
