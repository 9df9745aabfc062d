//! # Entity handles and the entity slot table
//!
//! An [`Entity`] is a plain value naming one row of the
//! [`EntityManager`](super::EntityManager) table. It owns nothing: the name,
//! signature, component slots and script list all live in the table row.
//!
//! ## Recycling
//!
//! Destroyed rows are pushed onto a free list and handed out again by the
//! next `create_entity`. To keep old handles from silently aliasing the new
//! occupant, every row carries a generation that is bumped on release:
//!
//! ```text
//! create "a"   -> Entity(0v0)
//! destroy 0v0  -> generations[0] = 1, free = [0]
//! create "b"   -> Entity(0v1)   (0v0 is now stale and every lookup misses)
//! ```
//!
//! The table never shrinks; a row is either alive or on the free list.

use std::fmt;

/// Handle to an entity owned by an [`EntityManager`](super::EntityManager).
///
/// Handles are `Copy` and cheap to store in components, scripts and
/// queries. A handle is only meaningful for the manager that issued it, and
/// only while its generation matches the row.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entity {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl Entity {
    /// Row in the entity table. Recycled after destroy.
    pub fn index(self) -> u32 {
        self.index
    }

    /// How many times the row had been released when this handle was issued.
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({}v{})", self.index, self.generation)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Row bookkeeping for the entity table: generations, liveness and the free
/// list. Row payloads are stored next to it by the entity manager.
///
/// ```text
/// generations: [1, 0, 2]
/// alive:       [true, true, false]
/// free_list:   [2]          <- popped from the back on create
/// ```
#[derive(Debug, Default)]
pub(crate) struct EntitySlots {
    generations: Vec<u32>,
    alive: Vec<bool>,
    free_list: Vec<u32>,
}

impl EntitySlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands out the most recently released row, or appends a fresh one.
    pub fn allocate(&mut self) -> Entity {
        match self.free_list.pop() {
            Some(index) => {
                self.alive[index as usize] = true;
                Entity {
                    index,
                    generation: self.generations[index as usize],
                }
            }
            None => {
                let index = u32::try_from(self.generations.len())
                    .unwrap_or_else(|_| panic!("entity table is full ({} rows)", u32::MAX));
                self.generations.push(0);
                self.alive.push(true);
                Entity {
                    index,
                    generation: 0,
                }
            }
        }
    }

    /// Releases the row behind `entity`. Returns `false` for stale handles.
    pub fn release(&mut self, entity: Entity) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        let idx = entity.index as usize;
        self.generations[idx] = self.generations[idx].wrapping_add(1);
        self.alive[idx] = false;
        self.free_list.push(entity.index);
        true
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        let idx = entity.index as usize;
        idx < self.generations.len() && self.alive[idx] && self.generations[idx] == entity.generation
    }

    /// Current handle for row `index`, if the row is occupied.
    pub fn entity_at(&self, index: u32) -> Option<Entity> {
        let idx = index as usize;
        match self.alive.get(idx) {
            Some(true) => Some(Entity {
                index,
                generation: self.generations[idx],
            }),
            _ => None,
        }
    }

    pub fn contains_index(&self, index: u32) -> bool {
        (index as usize) < self.generations.len()
    }

    pub fn alive_count(&self) -> usize {
        self.generations.len() - self.free_list.len()
    }

    pub fn free_count(&self) -> usize {
        self.free_list.len()
    }

    /// Number of rows ever created; the table never shrinks.
    pub fn total_slots(&self) -> usize {
        self.generations.len()
    }
}
