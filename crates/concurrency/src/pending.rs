//! Committed value with an optional pending overlay

/// A committed value and, when a transaction has pending changes for it,
/// the projected value those changes would produce
#[derive(Debug, Clone, PartialEq)]
pub struct Pending<T> {
    committed: T,
    overlay: Option<T>,
}

impl<T> Pending<T> {
    /// Create a pending view
    pub fn new(committed: T, overlay: Option<T>) -> Self {
        Self { committed, overlay }
    }

    /// A view with no pending overlay
    pub fn committed_only(committed: T) -> Self {
        Self {
            committed,
            overlay: None,
        }
    }

    /// The durably committed value
    pub fn committed(&self) -> &T {
        &self.committed
    }

    /// The projected value, if there are pending changes
    pub fn overlay(&self) -> Option<&T> {
        self.overlay.as_ref()
    }

    /// The value as seen by the ambient transaction
    pub fn current(&self) -> &T {
        self.overlay.as_ref().unwrap_or(&self.committed)
    }

    /// Whether there is a pending overlay
    pub fn is_pending(&self) -> bool {
        self.overlay.is_some()
    }

    /// Take the value as seen by the ambient transaction
    pub fn into_current(self) -> T {
        self.overlay.unwrap_or(self.committed)
    }

    /// Map both the committed value and the overlay
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> Pending<U> {
        Pending {
            committed: f(self.committed),
            overlay: self.overlay.map(f),
        }
    }
}
