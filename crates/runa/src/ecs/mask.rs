//! # Component signatures
//!
//! Every entity carries a [`ComponentMask`] with one bit per registered
//! component type; bit `n` is set when the entity has the component whose
//! [`ComponentId`] is `n`. Queries are keyed by the same type, so "does this
//! entity match" is a single `and` + compare.
//!
//! The mask is a `u64`, which caps the number of distinct component types at
//! [`MAX_COMPONENT_TYPES`]. Registering one more is a programmer error.

use std::fmt;

use super::component::ComponentId;

/// Maximum number of distinct component types a manager can register.
pub const MAX_COMPONENT_TYPES: usize = 64;

/// Fixed-width set of [`ComponentId`]s.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentMask(u64);

impl ComponentMask {
    pub const EMPTY: Self = Self(0);

    pub fn new() -> Self {
        Self::EMPTY
    }

    /// Builder form of [`set`](Self::set).
    pub fn with(mut self, id: ComponentId) -> Self {
        self.set(id);
        self
    }

    pub fn set(&mut self, id: ComponentId) {
        self.0 |= 1 << id.index();
    }

    pub fn clear(&mut self, id: ComponentId) {
        self.0 &= !(1 << id.index());
    }

    pub fn test(self, id: ComponentId) -> bool {
        self.0 & (1 << id.index()) != 0
    }

    /// `true` when every bit of `signature` is also set here. The empty
    /// signature is contained in every mask.
    pub fn contains(self, signature: ComponentMask) -> bool {
        self.0 & signature.0 == signature.0
    }

    /// Bits set in either mask.
    pub fn union(self, other: ComponentMask) -> Self {
        Self(self.0 | other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn count(self) -> u32 {
        self.0.count_ones()
    }

    pub fn bits(self) -> u64 {
        self.0
    }

    /// Ids of the set bits, lowest first.
    pub fn iter(self) -> impl Iterator<Item = ComponentId> {
        let bits = self.0;
        (0..MAX_COMPONENT_TYPES as u8)
            .filter(move |bit| bits & (1 << bit) != 0)
            .map(ComponentId)
    }
}

impl FromIterator<ComponentId> for ComponentMask {
    fn from_iter<I: IntoIterator<Item = ComponentId>>(iter: I) -> Self {
        let mut mask = Self::EMPTY;
        for id in iter {
            mask.set(id);
        }
        mask
    }
}

impl fmt::Debug for ComponentMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(|id| id.index())).finish()
    }
}
