//! # Entity Manager: the entity table
//!
//! The [`EntityManager`] owns every entity row plus the component and
//! script managers those rows point into. All attach/detach traffic goes
//! through it so it can keep three things in sync:
//!
//! 1. the row's **mask** (one bit per attached component type),
//! 2. the row's ordered **component refs** (`id + slot` into a pool),
//! 3. the **dirty set** of entities whose mask changed since the last
//!    [`Registry::refresh`](super::Registry::refresh).
//!
//! ```text
//! row 0  "player"   mask {0, 1}  refs [Transform@3, Velocity@0]  scripts Some(0)
//! row 1  (free)
//! row 2  "coin_7"   mask {0}     refs [Transform@1]               scripts None
//! ```
//!
//! ## Failure policy
//!
//! Handles that were never issued (index out of range) and attaching to a
//! destroyed entity are programmer errors and panic. Looking something up
//! that is not there (missing component, missing script, unknown name,
//! stale handle) logs a warning and returns `None`/`false`.

use std::any::{Any, TypeId, type_name};
use std::collections::HashSet;
use std::mem;

use glam::Affine2;
use log::{debug, info, warn};

use super::component::{Component, ComponentId, ComponentManager, Slot};
use super::entity::{Entity, EntitySlots};
use super::hierarchy::Hierarchy;
use super::mask::ComponentMask;
use super::script::{Script, ScriptManager, ScriptStatus, ScriptsIndex};
use crate::components::Transform;

/// One attached component: which pool, which slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ComponentRef {
    pub id: ComponentId,
    pub slot: Slot,
}

#[derive(Debug, Default)]
struct EntityRecord {
    name: String,
    mask: ComponentMask,
    components: Vec<ComponentRef>,
    scripts: Option<ScriptsIndex>,
    /// Switched off by [`EntityManager::set_entity_active`]. Inactive rows
    /// drop out of queries and their scripts skip updates.
    inactive: bool,
}

impl EntityRecord {
    fn slot_of(&self, id: ComponentId) -> Option<Slot> {
        self.components.iter().find(|r| r.id == id).map(|r| r.slot)
    }
}

/// Entities whose signature changed, in first-change order, without
/// duplicates.
#[derive(Debug, Default)]
struct DirtySet {
    order: Vec<Entity>,
    members: HashSet<Entity>,
}

impl DirtySet {
    fn insert(&mut self, entity: Entity) {
        if self.members.insert(entity) {
            self.order.push(entity);
        }
    }

    fn take(&mut self) -> Option<Vec<Entity>> {
        if self.order.is_empty() {
            return None;
        }
        self.members.clear();
        Some(mem::take(&mut self.order))
    }
}

/// Table occupancy, as reported by [`EntityManager::pool_stats`].
#[cfg(feature = "diagnostics")]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EntityStats {
    /// Rows ever allocated, live or free.
    pub total_slots: usize,
    /// Rows waiting on the free list.
    pub free_slots: usize,
    pub alive: usize,
    /// Entities created since the previous `pool_stats` call.
    pub created_since_last: usize,
    /// Entities destroyed since the previous `pool_stats` call.
    pub destroyed_since_last: usize,
}

/// Owner of entities, their components and their scripts.
pub struct EntityManager {
    slots: EntitySlots,
    records: Vec<EntityRecord>,
    dirty: DirtySet,
    components: ComponentManager,
    scripts: ScriptManager,
    hierarchy: Hierarchy,
    #[cfg(feature = "diagnostics")]
    created: usize,
    #[cfg(feature = "diagnostics")]
    destroyed: usize,
}

impl Default for EntityManager {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityManager {
    /// Empty table with the built-in components registered.
    pub fn new() -> Self {
        let mut components = ComponentManager::new();
        components.register_default::<Transform>();
        components.register_serde::<Transform>();
        Self {
            slots: EntitySlots::new(),
            records: Vec::new(),
            dirty: DirtySet::default(),
            components,
            scripts: ScriptManager::new(),
            hierarchy: Hierarchy::default(),
            #[cfg(feature = "diagnostics")]
            created: 0,
            #[cfg(feature = "diagnostics")]
            destroyed: 0,
        }
    }

    pub fn components(&self) -> &ComponentManager {
        &self.components
    }

    /// Registration entry point (`register_default`, `register_serde`).
    pub fn components_mut(&mut self) -> &mut ComponentManager {
        &mut self.components
    }

    pub fn scripts(&self) -> &ScriptManager {
        &self.scripts
    }

    /// Factory registration entry point.
    pub fn scripts_mut(&mut self) -> &mut ScriptManager {
        &mut self.scripts
    }

    // -- handle checks ------------------------------------------------------

    fn check_index(&self, entity: Entity) {
        assert!(
            self.slots.contains_index(entity.index),
            "entity {entity} is out of range (table has {} rows)",
            self.records.len()
        );
    }

    /// Row of a live entity. Stale handles log and miss.
    fn live(&self, entity: Entity) -> Option<usize> {
        self.check_index(entity);
        if self.slots.is_alive(entity) {
            Some(entity.index as usize)
        } else {
            warn!("entity {entity} is no longer alive");
            None
        }
    }

    /// Row of a live entity. Stale handles panic.
    fn expect_live(&self, entity: Entity, action: &str, subject: &str) -> usize {
        self.check_index(entity);
        assert!(
            self.slots.is_alive(entity),
            "cannot {action} `{subject}`: entity {entity} is no longer alive"
        );
        entity.index as usize
    }

    // -- lifecycle ------------------------------------------------------------

    /// Creates an entity, reusing the most recently freed row if any. An
    /// empty name becomes `entity_<index>`.
    pub fn create_entity(&mut self, name: &str) -> Entity {
        let entity = self.slots.allocate();
        let idx = entity.index as usize;
        if idx == self.records.len() {
            self.records.push(EntityRecord::default());
        }
        let record = &mut self.records[idx];
        record.name = if name.is_empty() {
            format!("entity_{}", entity.index)
        } else {
            name.to_string()
        };
        info!("created entity `{}` ({entity})", record.name);
        self.dirty.insert(entity);
        #[cfg(feature = "diagnostics")]
        {
            self.created += 1;
        }
        entity
    }

    /// Creates an entity carrying a copy of every component of `source`.
    ///
    /// Scripts are not cloned. With an empty `name` the clone is called
    /// `entity_<index>_cloneof_<source name>`. A cloned `Transform` starts
    /// outside the hierarchy.
    ///
    /// # Panics
    ///
    /// Panics if `source` is not alive.
    pub fn clone_entity(&mut self, source: Entity, name: &str) -> Entity {
        let src = self.expect_live(source, "clone", "entity");
        let refs = self.records[src].components.clone();
        let source_name = self.records[src].name.clone();

        let clone = self.create_entity(name);
        let idx = clone.index as usize;
        if name.is_empty() {
            let record = &mut self.records[idx];
            record.name.push_str("_cloneof_");
            record.name.push_str(&source_name);
        }
        for r in refs {
            let slot = self.components.copy(r.id, r.slot);
            let record = &mut self.records[idx];
            record.components.push(ComponentRef { id: r.id, slot });
            record.mask.set(r.id);
        }
        self.dirty.insert(clone);
        clone
    }

    /// Releases every component and script of `entity` and frees its row.
    /// Returns `false` for handles that are already dead.
    pub fn destroy_entity(&mut self, entity: Entity) -> bool {
        let Some(idx) = self.live(entity) else {
            return false;
        };
        self.hierarchy.detach(entity);
        let record = mem::take(&mut self.records[idx]);
        for r in &record.components {
            self.components.remove(r.id, r.slot);
        }
        if let Some(scripts) = record.scripts {
            self.scripts.release(scripts);
        }
        self.dirty.insert(entity);
        self.slots.release(entity);
        info!("destroyed entity `{}` ({entity})", record.name);
        #[cfg(feature = "diagnostics")]
        {
            self.destroyed += 1;
        }
        true
    }

    // -- read interface -------------------------------------------------------

    /// `false` for stale handles and handles from another manager.
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.slots.is_alive(entity)
    }

    /// Live entities in row order.
    pub fn iter(&self) -> impl Iterator<Item = Entity> + '_ {
        (0..self.records.len() as u32).filter_map(|i| self.slots.entity_at(i))
    }

    pub fn len(&self) -> usize {
        self.slots.alive_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rows ever created, live or free. Never shrinks.
    pub fn capacity(&self) -> usize {
        self.records.len()
    }

    pub fn mask_of(&self, entity: Entity) -> Option<ComponentMask> {
        self.live(entity).map(|idx| self.records[idx].mask)
    }

    /// Attached component ids, in attach order.
    pub fn component_ids_of(&self, entity: Entity) -> Vec<ComponentId> {
        self.live(entity)
            .map(|idx| self.records[idx].components.iter().map(|r| r.id).collect())
            .unwrap_or_default()
    }

    /// `alive && active && mask ⊇ signature`, without logging.
    pub fn matches(&self, entity: Entity, signature: ComponentMask) -> bool {
        if !self.slots.is_alive(entity) {
            return false;
        }
        let record = &self.records[entity.index as usize];
        !record.inactive && record.mask.contains(signature)
    }

    // -- activation -----------------------------------------------------------

    /// Switches the whole entity on or off. An inactive entity keeps its
    /// components and scripts but leaves every query at the next refresh,
    /// and its scripts get no `update`/`fixed_update` calls. Returns `false`
    /// for stale handles.
    pub fn set_entity_active(&mut self, entity: Entity, active: bool) -> bool {
        let Some(idx) = self.live(entity) else {
            return false;
        };
        let record = &mut self.records[idx];
        if record.inactive == active {
            record.inactive = !active;
            self.dirty.insert(entity);
            debug!("entity `{}` is now {}", record.name, if active { "active" } else { "inactive" });
        }
        true
    }

    /// `false` for inactive entities and stale handles.
    pub fn is_entity_active(&self, entity: Entity) -> bool {
        self.slots.is_alive(entity) && !self.records[entity.index as usize].inactive
    }

    pub(crate) fn component_refs(&self, entity: Entity) -> Option<&[ComponentRef]> {
        self.live(entity)
            .map(|idx| self.records[idx].components.as_slice())
    }

    pub(crate) fn scripts_index(&self, entity: Entity) -> Option<ScriptsIndex> {
        self.live(entity).and_then(|idx| self.records[idx].scripts)
    }

    // -- names ----------------------------------------------------------------

    pub fn name_of(&self, entity: Entity) -> Option<&str> {
        self.live(entity).map(|idx| self.records[idx].name.as_str())
    }

    /// Renames a live entity. A file saved under the old name is not moved.
    pub fn set_name(&mut self, entity: Entity, name: &str) {
        let idx = self.expect_live(entity, "rename", name);
        self.records[idx].name = name.to_string();
    }

    /// First live entity (in row order) called `name`.
    pub fn entity_by_name(&self, name: &str) -> Option<Entity> {
        let found = self
            .iter()
            .find(|e| self.records[e.index as usize].name == name);
        if found.is_none() {
            warn!("no entity named `{name}`");
        }
        found
    }

    // -- components -----------------------------------------------------------

    /// Attaches `component`, registering its type on first use.
    ///
    /// If the entity already has a `T`, the existing value is returned and
    /// `component` is dropped.
    ///
    /// # Panics
    ///
    /// Panics if `entity` is not alive.
    pub fn add_component<T: Component>(&mut self, entity: Entity, component: T) -> &mut T {
        let idx = self.expect_live(entity, "add component", type_name::<T>());
        let id = self.components.register::<T>();
        let record = &mut self.records[idx];
        let slot = match record.slot_of(id) {
            Some(slot) => slot,
            None => {
                let (_, slot) = self.components.insert(component);
                record.components.push(ComponentRef { id, slot });
                record.mask.set(id);
                self.dirty.insert(entity);
                slot
            }
        };
        self.components.get_mut::<T>(slot)
    }

    /// Attaches a default-constructed component by id (editor path).
    ///
    /// # Panics
    ///
    /// Panics if `entity` is not alive or the type has no registered
    /// default constructor.
    pub fn add_component_by_id(&mut self, entity: Entity, id: ComponentId) -> &mut dyn Any {
        let idx = self.expect_live(entity, "add component", self.components.name_of(id));
        let record = &mut self.records[idx];
        let slot = match record.slot_of(id) {
            Some(slot) => slot,
            None => {
                let slot = self.components.add(id);
                record.components.push(ComponentRef { id, slot });
                record.mask.set(id);
                self.dirty.insert(entity);
                slot
            }
        };
        self.components.get_any_mut(id, slot)
    }

    /// Puts a freshly stored slot on `entity`, replacing (and releasing) any
    /// value of the same type.
    pub(crate) fn attach_slot(&mut self, entity: Entity, id: ComponentId, slot: Slot) {
        let idx = self.expect_live(entity, "attach", self.components.name_of(id));
        let record = &mut self.records[idx];
        match record.components.iter_mut().find(|r| r.id == id) {
            Some(existing) => {
                let old = mem::replace(&mut existing.slot, slot);
                self.components.remove(id, old);
            }
            None => {
                record.components.push(ComponentRef { id, slot });
                record.mask.set(id);
                self.dirty.insert(entity);
            }
        }
    }

    fn slot_or_warn<T: 'static>(&self, idx: usize) -> Option<Slot> {
        let record = &self.records[idx];
        let slot = self
            .components
            .id_of::<T>()
            .and_then(|id| record.slot_of(id));
        if slot.is_none() {
            warn!(
                "entity `{}` has no `{}` component",
                record.name,
                type_name::<T>()
            );
        }
        slot
    }

    pub fn get_component<T: Component>(&self, entity: Entity) -> Option<&T> {
        let idx = self.live(entity)?;
        let slot = self.slot_or_warn::<T>(idx)?;
        Some(self.components.get::<T>(slot))
    }

    pub fn get_component_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        let idx = self.live(entity)?;
        let slot = self.slot_or_warn::<T>(idx)?;
        Some(self.components.get_mut::<T>(slot))
    }

    /// Type-erased lookup by id.
    pub fn get_component_any(&self, entity: Entity, id: ComponentId) -> Option<&dyn Any> {
        let idx = self.live(entity)?;
        match self.records[idx].slot_of(id) {
            Some(slot) => Some(self.components.get_any(id, slot)),
            None => {
                warn!(
                    "entity `{}` has no `{}` component",
                    self.records[idx].name,
                    self.components.name_of(id)
                );
                None
            }
        }
    }

    pub fn get_component_any_mut(&mut self, entity: Entity, id: ComponentId) -> Option<&mut dyn Any> {
        let idx = self.live(entity)?;
        match self.records[idx].slot_of(id) {
            Some(slot) => Some(self.components.get_any_mut(id, slot)),
            None => {
                warn!(
                    "entity `{}` has no `{}` component",
                    self.records[idx].name,
                    self.components.name_of(id)
                );
                None
            }
        }
    }

    /// Like `get_component`, but silent on a miss.
    fn peek<T: Component>(&self, entity: Entity) -> Option<&T> {
        if !self.slots.is_alive(entity) {
            return None;
        }
        let id = self.components.id_of::<T>()?;
        let slot = self.records[entity.index as usize].slot_of(id)?;
        Some(self.components.get::<T>(slot))
    }

    pub fn has_component<T: Component>(&self, entity: Entity) -> bool {
        self.components
            .id_of::<T>()
            .is_some_and(|id| self.has_component_id(entity, id))
    }

    pub fn has_component_id(&self, entity: Entity, id: ComponentId) -> bool {
        self.slots.is_alive(entity) && self.records[entity.index as usize].mask.test(id)
    }

    /// Detaches and drops the entity's `T`. Returns `false` if it had none.
    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> bool {
        match self.components.id_of::<T>() {
            Some(id) => self.remove_component_by_id(entity, id),
            None => false,
        }
    }

    pub fn remove_component_by_id(&mut self, entity: Entity, id: ComponentId) -> bool {
        let Some(idx) = self.live(entity) else {
            return false;
        };
        let Some(pos) = self.records[idx].components.iter().position(|r| r.id == id) else {
            return false;
        };
        if self.components.id_of::<Transform>() == Some(id) {
            self.hierarchy.detach(entity);
        }
        let record = &mut self.records[idx];
        let removed = record.components.remove(pos);
        record.mask.clear(id);
        self.components.remove(id, removed.slot);
        self.dirty.insert(entity);
        true
    }

    // -- change tracking ------------------------------------------------------

    /// Queues `entity` for the next query refresh even though its mask did
    /// not change.
    pub fn mark_as_modified(&mut self, entity: Entity) {
        self.dirty.insert(entity);
    }

    /// Drains the dirty set. `None` when nothing changed since the last call.
    /// Entities come back in the order they were first modified.
    pub fn take_modified(&mut self) -> Option<Vec<Entity>> {
        self.dirty.take()
    }

    // -- scripts --------------------------------------------------------------

    /// # Panics
    ///
    /// Panics if `entity` is not alive.
    pub fn add_script<T: Script>(&mut self, entity: Entity, script: T) -> &mut T {
        let idx = self.expect_live(entity, "add script", type_name::<T>());
        self.scripts.add(&mut self.records[idx].scripts, entity, script)
    }

    /// Constructs a script through its registered factory.
    pub fn add_script_by_type(&mut self, entity: Entity, type_id: TypeId) -> Option<&mut dyn Script> {
        let idx = self.live(entity)?;
        self.scripts
            .add_by_type(&mut self.records[idx].scripts, entity, type_id)
    }

    pub fn add_script_by_name(&mut self, entity: Entity, name: &str) -> Option<&mut dyn Script> {
        let idx = self.live(entity)?;
        self.scripts
            .add_by_name(&mut self.records[idx].scripts, entity, name)
    }

    pub(crate) fn push_script(&mut self, entity: Entity, type_id: TypeId, script: Box<dyn Script>) {
        let idx = self.expect_live(entity, "add script", script.name());
        self.scripts
            .push(&mut self.records[idx].scripts, entity, type_id, script);
    }

    pub fn get_script<T: Script>(&self, entity: Entity) -> Option<&T> {
        let idx = self.live(entity)?;
        let script = self.scripts.get::<T>(self.records[idx].scripts);
        if script.is_none() {
            warn!(
                "entity `{}` has no `{}` script",
                self.records[idx].name,
                type_name::<T>()
            );
        }
        script
    }

    pub fn get_script_mut<T: Script>(&mut self, entity: Entity) -> Option<&mut T> {
        let idx = self.live(entity)?;
        let record = &self.records[idx];
        let script = self.scripts.get_mut::<T>(record.scripts);
        if script.is_none() {
            warn!("entity `{}` has no `{}` script", record.name, type_name::<T>());
        }
        script
    }

    pub fn has_script<T: Script>(&self, entity: Entity) -> bool {
        self.has_script_type(entity, TypeId::of::<T>())
    }

    pub fn has_script_type(&self, entity: Entity, type_id: TypeId) -> bool {
        self.slots.is_alive(entity)
            && self
                .scripts
                .has(self.records[entity.index as usize].scripts, type_id)
    }

    pub fn remove_script<T: Script>(&mut self, entity: Entity) -> bool {
        self.remove_script_by_type(entity, TypeId::of::<T>())
    }

    pub fn remove_script_by_type(&mut self, entity: Entity, type_id: TypeId) -> bool {
        let Some(idx) = self.live(entity) else {
            return false;
        };
        self.scripts.remove(self.records[idx].scripts, type_id)
    }

    pub fn set_script_active<T: Script>(&mut self, entity: Entity, active: bool) -> bool {
        self.set_script_active_by_type(entity, TypeId::of::<T>(), active)
    }

    pub fn set_script_active_by_type(&mut self, entity: Entity, type_id: TypeId, active: bool) -> bool {
        let Some(idx) = self.live(entity) else {
            return false;
        };
        let found = self
            .scripts
            .set_active(self.records[idx].scripts, type_id, active);
        if !found {
            warn!("entity `{}` has no script of {type_id:?}", self.records[idx].name);
        }
        found
    }

    /// Attached scripts in order, with their activity flag.
    pub fn script_statuses(&self, entity: Entity) -> Vec<ScriptStatus> {
        self.live(entity)
            .map(|idx| self.scripts.statuses(self.records[idx].scripts))
            .unwrap_or_default()
    }

    // -- hierarchy ------------------------------------------------------------

    fn linkable(&self, entity: Entity) -> bool {
        if self.live(entity).is_none() {
            return false;
        }
        if !self.has_component::<Transform>(entity) {
            warn!(
                "entity `{}` has no Transform and cannot join the hierarchy",
                self.records[entity.index as usize].name
            );
            return false;
        }
        true
    }

    /// Moves `child` under `parent`, detaching it from its previous parent.
    /// Both need a [`Transform`]. Self-parenting and links that would close
    /// a cycle are refused.
    pub fn set_parent(&mut self, child: Entity, parent: Entity) -> bool {
        if child == parent || !self.linkable(child) || !self.linkable(parent) {
            return false;
        }
        let linked = self.hierarchy.set_parent(child, parent);
        if !linked {
            warn!("refusing to parent {child} under its own descendant {parent}");
        }
        linked
    }

    /// Detaches `child` from its parent; its world transform becomes its
    /// local one.
    pub fn remove_parent(&mut self, child: Entity) -> Option<Entity> {
        self.live(child)?;
        self.hierarchy.remove_parent(child)
    }

    /// `None` for roots and stale handles.
    pub fn parent_of(&self, entity: Entity) -> Option<Entity> {
        if !self.slots.is_alive(entity) {
            return None;
        }
        self.hierarchy.parent_of(entity)
    }

    /// Empty for leaves and stale handles.
    pub fn children_of(&self, entity: Entity) -> &[Entity] {
        if !self.slots.is_alive(entity) {
            return &[];
        }
        self.hierarchy.children_of(entity)
    }

    /// Hands `from`'s place in the hierarchy (parent and children) to `to`.
    /// `to`'s previous children are orphaned, and `from` ends up detached.
    pub fn move_hierarchy(&mut self, from: Entity, to: Entity) -> bool {
        if !self.linkable(from) || !self.linkable(to) {
            return false;
        }
        match self.hierarchy.transfer(from, to) {
            Some(_) => true,
            None => {
                warn!("cannot move the hierarchy of {from} onto its descendant {to}");
                false
            }
        }
    }

    /// Parent world matrix times local matrix, all the way up.
    pub fn world_transform(&self, entity: Entity) -> Option<Affine2> {
        let mut matrix = self.get_component::<Transform>(entity)?.local_matrix();
        let mut current = self.hierarchy.parent_of(entity);
        while let Some(parent) = current {
            let Some(transform) = self.peek::<Transform>(parent) else {
                break;
            };
            matrix = transform.local_matrix() * matrix;
            current = self.hierarchy.parent_of(parent);
        }
        Some(matrix)
    }

    // -- diagnostics ----------------------------------------------------------

    /// Occupancy of the entity table. Resets the created/destroyed counters.
    #[cfg(feature = "diagnostics")]
    pub fn pool_stats(&mut self) -> EntityStats {
        let stats = EntityStats {
            total_slots: self.slots.total_slots(),
            free_slots: self.slots.free_count(),
            alive: self.slots.alive_count(),
            created_since_last: self.created,
            destroyed_since_last: self.destroyed,
        };
        self.created = 0;
        self.destroyed = 0;
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec2;

    #[derive(Debug, Clone, Copy, Default, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, Copy, Default, PartialEq)]
    struct Velocity {
        dx: f32,
        dy: f32,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Health(u32);

    #[derive(Default)]
    struct Patrol {
        laps: u32,
    }
    impl Script for Patrol {}

    #[derive(Default)]
    struct Blink;
    impl Script for Blink {}

    #[test]
    fn create_names_and_lookup() {
        let mut em = EntityManager::new();
        let player = em.create_entity("player");
        let anon = em.create_entity("");
        assert_eq!(em.name_of(player), Some("player"));
        assert_eq!(em.name_of(anon), Some("entity_1"));
        assert_eq!(em.entity_by_name("player"), Some(player));
        assert_eq!(em.entity_by_name("ghost"), None);
        assert_eq!(em.len(), 2);
    }

    #[test]
    fn add_component_twice_returns_same_instance() {
        let mut em = EntityManager::new();
        let e = em.create_entity("e");
        em.add_component(e, Position { x: 1.0, y: 2.0 }).x = 5.0;
        let again = em.add_component(e, Position { x: 9.0, y: 9.0 });
        assert_eq!(*again, Position { x: 5.0, y: 2.0 });
        let id = em.components().id_of::<Position>().unwrap();
        assert!(em.mask_of(e).unwrap().test(id));
        assert_eq!(em.components().pool::<Position>().unwrap().len(), 1);
    }

    #[test]
    fn remove_then_get_misses_and_slot_is_reused() {
        let mut em = EntityManager::new();
        let a = em.create_entity("a");
        let b = em.create_entity("b");
        em.add_component(a, Health(10));
        em.add_component(b, Health(20));
        assert!(em.remove_component::<Health>(a));
        assert!(!em.remove_component::<Health>(a));
        assert!(em.get_component::<Health>(a).is_none());
        assert!(!em.has_component::<Health>(a));

        em.add_component(a, Health(30));
        let stats = em.components().pool::<Health>().unwrap().stats();
        assert_eq!(stats.capacity, 2);
        assert_eq!(em.get_component::<Health>(b), Some(&Health(20)));
    }

    #[test]
    fn remove_preserves_component_order() {
        let mut em = EntityManager::new();
        let e = em.create_entity("e");
        em.add_component(e, Position::default());
        em.add_component(e, Velocity::default());
        em.add_component(e, Health(1));
        em.remove_component::<Velocity>(e);
        let names: Vec<_> = em
            .component_ids_of(e)
            .into_iter()
            .map(|id| em.components().name_of(id).to_string())
            .collect();
        assert_eq!(names, vec!["Position", "Health"]);
    }

    #[test]
    fn clone_copies_components_independently() {
        let mut em = EntityManager::new();
        let src = em.create_entity("orc");
        em.add_component(src, Position { x: 1.0, y: 1.0 });
        em.add_component(src, Health(7));
        em.add_script(src, Blink);

        let copy = em.clone_entity(src, "");
        assert_eq!(em.name_of(copy), Some("entity_1_cloneof_orc"));
        assert_eq!(em.mask_of(copy), em.mask_of(src));
        em.get_component_mut::<Position>(copy).unwrap().x = 42.0;
        assert_eq!(em.get_component::<Position>(src).unwrap().x, 1.0);
        assert!(!em.has_script::<Blink>(copy));

        let named = em.clone_entity(src, "orc_2");
        assert_eq!(em.name_of(named), Some("orc_2"));
    }

    #[test]
    fn destroy_frees_row_for_reuse() {
        let mut em = EntityManager::new();
        let e1 = em.create_entity("first");
        em.add_component(e1, Health(3));
        em.add_script(e1, Patrol::default());
        assert!(em.destroy_entity(e1));
        assert!(!em.destroy_entity(e1));

        let e2 = em.create_entity("second");
        assert_eq!(e2.index(), e1.index());
        assert_ne!(e2, e1);
        assert_eq!(em.name_of(e2), Some("second"));
        assert!(em.mask_of(e2).unwrap().is_empty());
        assert!(em.component_ids_of(e2).is_empty());
        assert!(!em.has_script::<Patrol>(e2));
        assert_eq!(em.components().pool::<Health>().unwrap().len(), 0);
        assert_eq!(em.scripts().list_count(), 0);
        assert_eq!(em.capacity(), 1);
    }

    #[test]
    fn stale_handle_is_a_miss() {
        let mut em = EntityManager::new();
        let old = em.create_entity("old");
        em.add_component(old, Health(1));
        em.destroy_entity(old);
        let new = em.create_entity("new");
        em.add_component(new, Health(2));
        assert!(em.get_component::<Health>(old).is_none());
        assert!(em.name_of(old).is_none());
        assert!(!em.remove_component::<Health>(old));
        assert_eq!(em.get_component::<Health>(new), Some(&Health(2)));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn foreign_handle_panics() {
        let mut other = EntityManager::new();
        other.create_entity("a");
        let foreign = other.create_entity("b");
        let em = EntityManager::new();
        em.get_component::<Health>(foreign);
    }

    #[test]
    #[should_panic(expected = "no longer alive")]
    fn adding_to_dead_entity_panics() {
        let mut em = EntityManager::new();
        let e = em.create_entity("e");
        em.destroy_entity(e);
        em.add_component(e, Health(1));
    }

    #[test]
    fn dirty_set_tracks_changes() {
        let mut em = EntityManager::new();
        assert!(em.take_modified().is_none());
        let a = em.create_entity("a");
        let b = em.create_entity("b");
        em.take_modified();
        assert!(em.take_modified().is_none());

        em.add_component(b, Health(1));
        em.add_component(a, Health(1));
        em.add_component(b, Position::default());
        assert_eq!(em.take_modified(), Some(vec![b, a]));

        // Re-adding an existing component changes nothing.
        em.add_component(a, Health(5));
        assert!(em.take_modified().is_none());

        em.mark_as_modified(a);
        em.destroy_entity(b);
        assert_eq!(em.take_modified(), Some(vec![a, b]));
    }

    #[test]
    fn iter_skips_free_rows() {
        let mut em = EntityManager::new();
        let a = em.create_entity("a");
        let b = em.create_entity("b");
        let c = em.create_entity("c");
        em.destroy_entity(b);
        assert_eq!(em.iter().collect::<Vec<_>>(), vec![a, c]);
    }

    #[test]
    fn dynamic_component_access() {
        let mut em = EntityManager::new();
        let e = em.create_entity("e");
        let id = em.components_mut().register_default::<Velocity>();
        em.add_component_by_id(e, id)
            .downcast_mut::<Velocity>()
            .unwrap()
            .dx = 3.0;
        let any = em.get_component_any(e, id).unwrap();
        assert_eq!(any.downcast_ref::<Velocity>().unwrap().dx, 3.0);
        assert!(em.has_component_id(e, id));
        assert!(em.remove_component_by_id(e, id));
        assert!(em.get_component_any(e, id).is_none());
    }

    #[test]
    fn scripts_through_the_manager() {
        let mut em = EntityManager::new();
        em.scripts_mut().register::<Blink>();
        let e = em.create_entity("e");
        em.add_script(e, Patrol { laps: 2 }).laps += 1;
        assert!(em.add_script_by_name(e, "Blink").is_some());
        assert!(em.add_script_by_name(e, "Nope").is_none());
        assert_eq!(em.get_script::<Patrol>(e).unwrap().laps, 3);

        assert!(em.set_script_active::<Patrol>(e, false));
        let statuses = em.script_statuses(e);
        assert_eq!(
            statuses,
            vec![
                ScriptStatus { name: "Patrol", active: false },
                ScriptStatus { name: "Blink", active: true },
            ]
        );

        assert!(em.remove_script::<Patrol>(e));
        assert!(em.get_script::<Patrol>(e).is_none());
        assert!(em.has_script::<Blink>(e));
    }

    #[test]
    fn parenting_requires_transforms() {
        let mut em = EntityManager::new();
        let parent = em.create_entity("parent");
        let child = em.create_entity("child");
        assert!(!em.set_parent(child, parent));
        em.add_component(parent, Transform::from_xy(10.0, 0.0));
        em.add_component(child, Transform::from_xy(1.0, 0.0));
        assert!(em.set_parent(child, parent));
        assert!(!em.set_parent(child, child));
        assert_eq!(em.parent_of(child), Some(parent));
        assert_eq!(em.children_of(parent), &[child]);
        assert!(!em.set_parent(parent, child));
    }

    #[test]
    fn world_transform_composes_parents() {
        let mut em = EntityManager::new();
        let root = em.create_entity("root");
        let arm = em.create_entity("arm");
        let hand = em.create_entity("hand");
        em.add_component(root, Transform::from_xy(100.0, 0.0).with_rotation(90.0));
        em.add_component(arm, Transform::from_xy(10.0, 0.0));
        em.add_component(hand, Transform::from_xy(1.0, 0.0));
        em.set_parent(arm, root);
        em.set_parent(hand, arm);

        let p = em.world_transform(hand).unwrap().transform_point2(Vec2::ZERO);
        assert!((p - Vec2::new(100.0, 11.0)).length() < 1e-3);

        em.remove_parent(arm);
        let p = em.world_transform(hand).unwrap().transform_point2(Vec2::ZERO);
        assert!((p - Vec2::new(11.0, 0.0)).length() < 1e-3);
    }

    #[test]
    fn destroying_a_parent_orphans_children() {
        let mut em = EntityManager::new();
        let parent = em.create_entity("parent");
        let child = em.create_entity("child");
        em.add_component(parent, Transform::default());
        em.add_component(child, Transform::from_xy(3.0, 4.0));
        em.set_parent(child, parent);
        em.destroy_entity(parent);
        assert_eq!(em.parent_of(child), None);
        assert_eq!(em.get_component::<Transform>(child).unwrap().position, Vec2::new(3.0, 4.0));
    }

    #[test]
    fn removing_transform_leaves_the_tree() {
        let mut em = EntityManager::new();
        let parent = em.create_entity("parent");
        let child = em.create_entity("child");
        em.add_component(parent, Transform::default());
        em.add_component(child, Transform::default());
        em.set_parent(child, parent);
        em.remove_component::<Transform>(parent);
        assert_eq!(em.parent_of(child), None);
        assert!(em.children_of(parent).is_empty());
    }

    #[test]
    fn cloned_transform_starts_detached() {
        let mut em = EntityManager::new();
        let parent = em.create_entity("parent");
        let child = em.create_entity("child");
        em.add_component(parent, Transform::default());
        em.add_component(child, Transform::from_xy(2.0, 0.0));
        em.set_parent(child, parent);
        let copy = em.clone_entity(child, "copy");
        assert_eq!(em.parent_of(copy), None);
        assert_eq!(em.children_of(parent), &[child]);
        assert_eq!(em.get_component::<Transform>(copy).unwrap().position.x, 2.0);
    }

    #[test]
    fn move_hierarchy_hands_over_links() {
        let mut em = EntityManager::new();
        let names = ["root", "old", "kid", "new", "stray"];
        let [root, old, kid, new, stray] = names.map(|n| {
            let e = em.create_entity(n);
            em.add_component(e, Transform::default());
            e
        });
        em.set_parent(old, root);
        em.set_parent(kid, old);
        em.set_parent(stray, new);

        assert!(em.move_hierarchy(old, new));
        assert_eq!(em.parent_of(new), Some(root));
        assert_eq!(em.children_of(new), &[kid]);
        assert_eq!(em.parent_of(old), None);
        assert_eq!(em.parent_of(stray), None);
    }

    #[test]
    fn stale_handles_see_no_links() {
        let mut em = EntityManager::new();
        let parent = em.create_entity("parent");
        let old = em.create_entity("old");
        em.add_component(parent, Transform::default());
        em.add_component(old, Transform::default());
        em.destroy_entity(old);

        let newcomer = em.create_entity("newcomer");
        assert_eq!(newcomer.index(), old.index());
        em.add_component(newcomer, Transform::default());
        assert!(em.set_parent(newcomer, parent));
        assert_eq!(em.parent_of(newcomer), Some(parent));
        assert_eq!(em.parent_of(old), None);

        let kid = em.create_entity("kid");
        em.add_component(kid, Transform::default());
        em.set_parent(kid, newcomer);
        assert_eq!(em.children_of(newcomer), &[kid]);
        assert!(em.children_of(old).is_empty());
    }

    #[test]
    fn inactive_entities_keep_their_data() {
        let mut em = EntityManager::new();
        let e = em.create_entity("e");
        em.add_component(e, Health(4));
        let id = em.components().id_of::<Health>().unwrap();
        let sig = ComponentMask::EMPTY.with(id);
        em.take_modified();

        assert!(em.is_entity_active(e));
        assert!(em.set_entity_active(e, false));
        assert!(!em.is_entity_active(e));
        assert!(!em.matches(e, sig));
        assert_eq!(em.get_component::<Health>(e), Some(&Health(4)));
        assert_eq!(em.take_modified(), Some(vec![e]));

        // Setting the same state again is not a change.
        em.set_entity_active(e, false);
        assert!(em.take_modified().is_none());

        em.set_entity_active(e, true);
        assert!(em.matches(e, sig));

        em.set_entity_active(e, false);
        em.destroy_entity(e);
        let reused = em.create_entity("reused");
        assert!(em.is_entity_active(reused));
        assert!(!em.set_entity_active(e, true));
    }

    #[cfg(feature = "diagnostics")]
    #[test]
    fn pool_stats_reset_counters() {
        let mut em = EntityManager::new();
        let a = em.create_entity("a");
        em.create_entity("b");
        em.destroy_entity(a);
        let stats = em.pool_stats();
        assert_eq!(stats.total_slots, 2);
        assert_eq!(stats.free_slots, 1);
        assert_eq!(stats.alive, 1);
        assert_eq!(stats.created_since_last, 2);
        assert_eq!(stats.destroyed_since_last, 1);
        let stats = em.pool_stats();
        assert_eq!(stats.created_since_last, 0);
    }
}
