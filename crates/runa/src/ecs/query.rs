//! # Queries: cached entity lists per signature
//!
//! Systems ask the [`Registry`] for the entities carrying some set of
//! components. The first request for a signature scans the whole entity
//! table; after that the list is kept current incrementally:
//!
//! ```text
//! frame N:   add Velocity to e7      -> dirty = [e7]
//!            destroy e3              -> dirty = [e7, e3]
//! refresh:   for each cached signature
//!              e7 now matches?  append, fire on_add(e7)
//!              e3 now matches?  (dead, so no) remove, fire on_remove(e3)
//! ```
//!
//! All [`Query`] handles for one signature share the same list, so a system
//! can hold on to its query across frames. Lists keep insertion order.
//!
//! Callbacks run after the list has been updated and released, so a
//! callback may read the query (or register further callbacks) freely. They
//! also get the entity table, so an "added" callback can look at the
//! components that made the entity match.
//!
//! ## Typed iteration
//!
//! [`Query::each`] hands components to a closure instead of handles:
//!
//! ```text
//! query.each::<(&mut Transform, &Velocity)>(&mut em, |e, (t, v)| t.translate(v.0));
//!
//! 1. lend the Transform and Velocity pools out of the component manager
//! 2. for each listed entity, look up its two slots and fetch from the pools
//! 3. put both pools back
//! ```
//!
//! Holding the pools by value is what lets `&mut Transform` and `&Velocity`
//! coexist without any unsafe code. Naming the same type twice panics.

use std::cell::RefCell;
use std::collections::HashMap;
use std::mem;
use std::rc::Rc;

use log::debug;

use super::component::{Component, ComponentId, ComponentManager, ComponentPool};
use super::entity::Entity;
use super::entity_manager::{ComponentRef, EntityManager};
use super::mask::ComponentMask;

type EntityCallback = Box<dyn FnMut(Entity, &EntityManager)>;

struct QueryState {
    mask: ComponentMask,
    entities: Vec<Entity>,
    on_add: Vec<EntityCallback>,
    on_remove: Vec<EntityCallback>,
}

/// Live view of the entities matching one signature.
///
/// Cloning a `Query` is cheap and yields another view of the same list.
#[derive(Clone)]
pub struct Query {
    state: Rc<RefCell<QueryState>>,
}

impl Query {
    pub fn mask(&self) -> ComponentMask {
        self.state.borrow().mask
    }

    /// Snapshot of the matching entities, in insertion order.
    pub fn entities(&self) -> Vec<Entity> {
        self.state.borrow().entities.clone()
    }

    /// Calls `f` for each matching entity. Works on a snapshot, so `f` may
    /// touch the registry or this query.
    pub fn for_each(&self, mut f: impl FnMut(Entity)) {
        for entity in self.entities() {
            f(entity);
        }
    }

    /// Calls `f` with the components named by `P` for each listed entity
    /// that is still active and carries all of them.
    ///
    /// ```text
    /// query.each::<(&mut Transform, &Velocity)>(&mut em, |_, (t, v)| t.translate(v.0 * dt));
    /// ```
    ///
    /// The pools named by `P` are out of the table while `f` runs, so `f`
    /// gets no access to the entity manager.
    ///
    /// # Panics
    ///
    /// Panics if `P` names the same component type twice.
    pub fn each<P: QueryParam>(&self, entities: &mut EntityManager, mut f: impl FnMut(Entity, P::Item<'_>)) {
        let mut columns = P::extract(entities.components_mut());
        for entity in self.entities() {
            if !entities.is_entity_active(entity) {
                continue;
            }
            let Some(refs) = entities.component_refs(entity) else {
                continue;
            };
            if let Some(item) = P::fetch(&mut columns, refs) {
                f(entity, item);
            }
        }
        P::restore(columns, entities.components_mut());
    }

    pub fn len(&self) -> usize {
        self.state.borrow().entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, entity: Entity) -> bool {
        self.state.borrow().entities.contains(&entity)
    }

    /// Runs `callback` for every entity that starts matching from now on.
    /// The entity is alive when the callback runs, so its components can be
    /// read through the table.
    pub fn on_entity_add(&self, callback: impl FnMut(Entity, &EntityManager) + 'static) {
        self.state.borrow_mut().on_add.push(Box::new(callback));
    }

    /// Runs `callback` for every entity that stops matching from now on,
    /// destroyed entities included. A destroyed entity's handle is already
    /// stale by then.
    pub fn on_entity_remove(&self, callback: impl FnMut(Entity, &EntityManager) + 'static) {
        self.state.borrow_mut().on_remove.push(Box::new(callback));
    }

    /// `true` if both handles view the same cached list.
    pub fn shares_state_with(&self, other: &Query) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }
}

/// Component types that together form a signature, e.g. `(Transform, Velocity)`.
pub trait Signature {
    /// Registers every member type and returns the combined mask.
    fn mask(components: &mut ComponentManager) -> ComponentMask;
}

macro_rules! impl_signature {
    ($($T:ident),+) => {
        impl<$($T: Component),+> Signature for ($($T,)+) {
            fn mask(components: &mut ComponentManager) -> ComponentMask {
                let mut mask = ComponentMask::EMPTY;
                $( mask.set(components.register::<$T>()); )+
                mask
            }
        }
    };
}

/// Component access a typed query can hand out: `&T`, `&mut T`, or a tuple
/// of those.
pub trait QueryParam {
    /// What the closure receives per entity.
    type Item<'c>;

    /// Pools held by value while the query runs.
    type Column;

    /// Registers every member type and returns the combined mask.
    fn mask(components: &mut ComponentManager) -> ComponentMask;

    fn extract(components: &mut ComponentManager) -> Self::Column;

    fn restore(column: Self::Column, components: &mut ComponentManager);

    /// `None` when the entity lacks one of the components.
    fn fetch<'c>(column: &'c mut Self::Column, refs: &[ComponentRef]) -> Option<Self::Item<'c>>;
}

fn slot_in(refs: &[ComponentRef], id: ComponentId) -> Option<super::component::Slot> {
    refs.iter().find(|r| r.id == id).map(|r| r.slot)
}

impl<T: Component> QueryParam for &T {
    type Item<'c> = &'c T;
    type Column = (ComponentId, Box<ComponentPool<T>>);

    fn mask(components: &mut ComponentManager) -> ComponentMask {
        ComponentMask::EMPTY.with(components.register::<T>())
    }

    fn extract(components: &mut ComponentManager) -> Self::Column {
        components.lend_pool::<T>()
    }

    fn restore((id, pool): Self::Column, components: &mut ComponentManager) {
        components.return_pool(id, pool);
    }

    fn fetch<'c>((id, pool): &'c mut Self::Column, refs: &[ComponentRef]) -> Option<Self::Item<'c>> {
        let slot = slot_in(refs, *id)?;
        Some(pool.get(slot))
    }
}

impl<T: Component> QueryParam for &mut T {
    type Item<'c> = &'c mut T;
    type Column = (ComponentId, Box<ComponentPool<T>>);

    fn mask(components: &mut ComponentManager) -> ComponentMask {
        ComponentMask::EMPTY.with(components.register::<T>())
    }

    fn extract(components: &mut ComponentManager) -> Self::Column {
        components.lend_pool::<T>()
    }

    fn restore((id, pool): Self::Column, components: &mut ComponentManager) {
        components.return_pool(id, pool);
    }

    fn fetch<'c>((id, pool): &'c mut Self::Column, refs: &[ComponentRef]) -> Option<Self::Item<'c>> {
        let slot = slot_in(refs, *id)?;
        Some(pool.get_mut(slot))
    }
}

macro_rules! impl_query_param {
    ($($P:ident),+) => {
        impl<$($P: QueryParam),+> QueryParam for ($($P,)+) {
            type Item<'c> = ($($P::Item<'c>,)+);
            type Column = ($($P::Column,)+);

            fn mask(components: &mut ComponentManager) -> ComponentMask {
                let mut mask = ComponentMask::EMPTY;
                $( mask = mask.union($P::mask(components)); )+
                mask
            }

            fn extract(components: &mut ComponentManager) -> Self::Column {
                ($($P::extract(components),)+)
            }

            #[allow(non_snake_case)]
            fn restore(column: Self::Column, components: &mut ComponentManager) {
                let ($($P,)+) = column;
                $( $P::restore($P, components); )+
            }

            #[allow(non_snake_case)]
            fn fetch<'c>(column: &'c mut Self::Column, refs: &[ComponentRef]) -> Option<Self::Item<'c>> {
                let ($($P,)+) = column;
                Some(($($P::fetch($P, refs)?,)+))
            }
        }
    };
}

impl_query_param!(A);
impl_query_param!(A, B);
impl_query_param!(A, B, C);
impl_query_param!(A, B, C, D);
impl_query_param!(A, B, C, D, E);
impl_query_param!(A, B, C, D, E, F);

impl_signature!(A);
impl_signature!(A, B);
impl_signature!(A, B, C);
impl_signature!(A, B, C, D);
impl_signature!(A, B, C, D, E);
impl_signature!(A, B, C, D, E, F);

/// Cache of queries, one per distinct signature.
#[derive(Default)]
pub struct Registry {
    queries: Vec<Rc<RefCell<QueryState>>>,
    by_mask: HashMap<ComponentMask, usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The query for `mask`, built by a full table scan on first request.
    pub fn query(&mut self, mask: ComponentMask, entities: &EntityManager) -> Query {
        if let Some(&i) = self.by_mask.get(&mask) {
            return Query {
                state: Rc::clone(&self.queries[i]),
            };
        }
        let matching: Vec<Entity> = entities
            .iter()
            .filter(|&e| entities.matches(e, mask))
            .collect();
        debug!("new query {mask:?} starts with {} entities", matching.len());
        let state = Rc::new(RefCell::new(QueryState {
            mask,
            entities: matching,
            on_add: Vec::new(),
            on_remove: Vec::new(),
        }));
        self.by_mask.insert(mask, self.queries.len());
        self.queries.push(Rc::clone(&state));
        Query { state }
    }

    /// Typed form of [`query`](Self::query): `registry.query_for::<(Transform, Velocity)>(&mut em)`.
    pub fn query_for<S: Signature>(&mut self, entities: &mut EntityManager) -> Query {
        let mask = S::mask(entities.components_mut());
        self.query(mask, entities)
    }

    /// Looks up the query for the types `P` names and runs
    /// [`Query::each`] on it.
    pub fn each<P: QueryParam>(&mut self, entities: &mut EntityManager, f: impl FnMut(Entity, P::Item<'_>)) {
        let mask = P::mask(entities.components_mut());
        self.query(mask, entities).each::<P>(entities, f);
    }

    /// Every cached query, oldest first.
    pub fn queries(&self) -> impl Iterator<Item = Query> + '_ {
        self.queries.iter().map(|state| Query {
            state: Rc::clone(state),
        })
    }

    /// Number of cached signatures.
    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    /// Drains the dirty set and brings every cached query up to date,
    /// firing add/remove callbacks along the way.
    pub fn refresh(&mut self, entities: &mut EntityManager) {
        let Some(modified) = entities.take_modified() else {
            return;
        };
        debug!("refreshing {} queries for {} modified entities", self.queries.len(), modified.len());
        for state in &self.queries {
            let changes = {
                let mut query = state.borrow_mut();
                let mask = query.mask;
                let mut changes = Vec::new();
                for &entity in &modified {
                    let matches = entities.matches(entity, mask);
                    let cached = query.entities.iter().position(|&e| e == entity);
                    match (matches, cached) {
                        (true, None) => {
                            query.entities.push(entity);
                            changes.push((entity, true));
                        }
                        (false, Some(pos)) => {
                            query.entities.remove(pos);
                            changes.push((entity, false));
                        }
                        _ => {}
                    }
                }
                changes
            };
            if !changes.is_empty() {
                fire(state, &changes, entities);
            }
        }
    }
}

fn fire(state: &Rc<RefCell<QueryState>>, changes: &[(Entity, bool)], entities: &EntityManager) {
    let (mut on_add, mut on_remove) = {
        let mut query = state.borrow_mut();
        (mem::take(&mut query.on_add), mem::take(&mut query.on_remove))
    };
    for &(entity, added) in changes {
        let callbacks = if added { &mut on_add } else { &mut on_remove };
        for callback in callbacks.iter_mut() {
            callback(entity, entities);
        }
    }
    let mut query = state.borrow_mut();
    on_add.append(&mut query.on_add);
    on_remove.append(&mut query.on_remove);
    query.on_add = on_add;
    query.on_remove = on_remove;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Clone, Default)]
    struct Position;
    #[derive(Clone, Default)]
    struct Velocity;
    #[derive(Clone, Default)]
    struct Sprite;

    fn world() -> (EntityManager, Registry) {
        (EntityManager::new(), Registry::new())
    }

    #[test]
    fn first_request_scans_table() {
        let (mut em, mut registry) = world();
        let a = em.create_entity("a");
        let b = em.create_entity("b");
        em.add_component(a, Position);
        em.add_component(a, Velocity);
        em.add_component(b, Position);

        let moving = registry.query_for::<(Position, Velocity)>(&mut em);
        assert_eq!(moving.entities(), vec![a]);
        let placed = registry.query_for::<(Position,)>(&mut em);
        assert_eq!(placed.entities(), vec![a, b]);
    }

    #[test]
    fn same_signature_shares_state() {
        let (mut em, mut registry) = world();
        let q1 = registry.query_for::<(Position, Velocity)>(&mut em);
        let q2 = registry.query_for::<(Velocity, Position)>(&mut em);
        assert!(q1.shares_state_with(&q2));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn refresh_adds_and_removes() {
        let (mut em, mut registry) = world();
        let q = registry.query_for::<(Position, Velocity)>(&mut em);
        let e1 = em.create_entity("e1");
        em.add_component(e1, Position);
        em.add_component(e1, Velocity);
        assert!(q.is_empty());
        registry.refresh(&mut em);
        assert_eq!(q.entities(), vec![e1]);

        em.remove_component::<Velocity>(e1);
        registry.refresh(&mut em);
        assert!(q.is_empty());
    }

    #[test]
    fn insertion_order_is_kept() {
        let (mut em, mut registry) = world();
        let q = registry.query_for::<(Position,)>(&mut em);
        let [a, b, c] = ["a", "b", "c"].map(|n| {
            let e = em.create_entity(n);
            em.add_component(e, Position);
            e
        });
        registry.refresh(&mut em);
        assert_eq!(q.entities(), vec![a, b, c]);

        em.remove_component::<Position>(b);
        registry.refresh(&mut em);
        em.add_component(b, Position);
        registry.refresh(&mut em);
        assert_eq!(q.entities(), vec![a, c, b]);
    }

    #[test]
    fn destroyed_entities_are_purged() {
        let (mut em, mut registry) = world();
        let a = em.create_entity("a");
        em.add_component(a, Position);
        let q = registry.query_for::<(Position,)>(&mut em);
        assert_eq!(q.len(), 1);

        em.destroy_entity(a);
        let b = em.create_entity("b");
        em.add_component(b, Position);
        registry.refresh(&mut em);
        assert_eq!(b.index(), a.index());
        assert_eq!(q.entities(), vec![b]);
        assert!(!q.contains(a));
    }

    #[test]
    fn callbacks_fire_on_membership_changes() {
        let (mut em, mut registry) = world();
        let q = registry.query_for::<(Sprite,)>(&mut em);
        let added = Rc::new(Cell::new(0));
        let removed = Rc::new(Cell::new(0));
        {
            let added = Rc::clone(&added);
            q.on_entity_add(move |_, _| added.set(added.get() + 1));
            let removed = Rc::clone(&removed);
            q.on_entity_remove(move |_, _| removed.set(removed.get() + 1));
        }
        let e = em.create_entity("e");
        em.add_component(e, Sprite);
        em.add_component(e, Position);
        registry.refresh(&mut em);
        assert_eq!((added.get(), removed.get()), (1, 0));

        em.destroy_entity(e);
        registry.refresh(&mut em);
        assert_eq!((added.get(), removed.get()), (1, 1));
    }

    #[test]
    fn callbacks_may_use_the_query() {
        let (mut em, mut registry) = world();
        let q = registry.query_for::<(Sprite,)>(&mut em);
        let seen = Rc::new(Cell::new(0));
        {
            let q2 = q.clone();
            let seen = Rc::clone(&seen);
            q.on_entity_add(move |e, _| {
                assert!(q2.contains(e));
                seen.set(q2.len());
                let seen = Rc::clone(&seen);
                q2.on_entity_remove(move |_, _| seen.set(100));
            });
        }
        let e = em.create_entity("e");
        em.add_component(e, Sprite);
        registry.refresh(&mut em);
        assert_eq!(seen.get(), 1);

        em.remove_component::<Sprite>(e);
        registry.refresh(&mut em);
        assert_eq!(seen.get(), 100);
    }

    #[derive(Clone, Debug, PartialEq)]
    struct Speed(f32);

    #[test]
    fn add_callback_reads_the_new_components() {
        let (mut em, mut registry) = world();
        let q = registry.query_for::<(Speed,)>(&mut em);
        let seen = Rc::new(RefCell::new(Vec::new()));
        {
            let seen = Rc::clone(&seen);
            q.on_entity_add(move |e, em| {
                let speed = em.get_component::<Speed>(e).map(|s| s.0);
                seen.borrow_mut().push((em.name_of(e).map(str::to_string), speed));
            });
        }
        let e = em.create_entity("runner");
        em.add_component(e, Speed(2.5));
        registry.refresh(&mut em);
        assert_eq!(*seen.borrow(), vec![(Some("runner".to_string()), Some(2.5))]);
    }

    #[test]
    fn remove_callback_sees_a_stale_handle_after_destroy() {
        let (mut em, mut registry) = world();
        let e = em.create_entity("e");
        em.add_component(e, Speed(1.0));
        let q = registry.query_for::<(Speed,)>(&mut em);
        let alive = Rc::new(Cell::new(true));
        {
            let alive = Rc::clone(&alive);
            q.on_entity_remove(move |e, em| alive.set(em.is_alive(e)));
        }
        em.destroy_entity(e);
        registry.refresh(&mut em);
        assert!(!alive.get());
    }

    #[test]
    fn each_hands_out_typed_components() {
        let (mut em, mut registry) = world();
        let a = em.create_entity("a");
        let b = em.create_entity("b");
        let c = em.create_entity("c");
        for (e, v) in [(a, 1.0), (b, 2.0), (c, 3.0)] {
            em.add_component(e, Speed(v));
        }
        em.add_component(a, Position);
        em.add_component(c, Position);

        let q = registry.query_for::<(Speed, Position)>(&mut em);
        let mut visited = Vec::new();
        q.each::<(&mut Speed, &Position)>(&mut em, |e, (speed, _)| {
            speed.0 *= 10.0;
            visited.push(e);
        });
        assert_eq!(visited, vec![a, c]);
        assert_eq!(em.get_component::<Speed>(a), Some(&Speed(10.0)));
        assert_eq!(em.get_component::<Speed>(b), Some(&Speed(2.0)));
        assert_eq!(em.get_component::<Speed>(c), Some(&Speed(30.0)));
    }

    #[test]
    fn each_skips_entities_changed_since_the_last_refresh() {
        let (mut em, mut registry) = world();
        let a = em.create_entity("a");
        let b = em.create_entity("b");
        em.add_component(a, Speed(1.0));
        em.add_component(b, Speed(1.0));
        let q = registry.query_for::<(Speed,)>(&mut em);
        em.remove_component::<Speed>(a);
        em.destroy_entity(b);

        let mut count = 0;
        q.each::<(&Speed,)>(&mut em, |_, _| count += 1);
        assert_eq!(count, 0);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn registry_each_builds_the_query() {
        let (mut em, mut registry) = world();
        let e = em.create_entity("e");
        em.add_component(e, Speed(4.0));
        em.add_component(e, Velocity);
        let mut total = 0.0;
        registry.each::<(&Speed, &Velocity)>(&mut em, |_, (speed, _)| total += speed.0);
        assert_eq!(total, 4.0);
        assert_eq!(registry.len(), 1);
        assert!(registry.queries().next().unwrap().contains(e));
    }

    #[test]
    #[should_panic(expected = "requested twice")]
    fn each_rejects_a_repeated_type() {
        let (mut em, mut registry) = world();
        registry.each::<(&mut Speed, &Speed)>(&mut em, |_, _| {});
    }

    #[test]
    fn inactive_entities_leave_the_query() {
        let (mut em, mut registry) = world();
        let e = em.create_entity("e");
        em.add_component(e, Speed(1.0));
        let q = registry.query_for::<(Speed,)>(&mut em);
        let removed = Rc::new(Cell::new(0));
        {
            let removed = Rc::clone(&removed);
            q.on_entity_remove(move |_, _| removed.set(removed.get() + 1));
        }

        em.set_entity_active(e, false);
        registry.refresh(&mut em);
        assert!(q.is_empty());
        assert_eq!(removed.get(), 1);
        assert!(registry.query_for::<(Speed,)>(&mut em).is_empty());

        em.set_entity_active(e, true);
        registry.refresh(&mut em);
        assert_eq!(q.entities(), vec![e]);
    }

    #[test]
    fn empty_signature_matches_every_live_entity() {
        let (mut em, mut registry) = world();
        let a = em.create_entity("a");
        let all = registry.query(ComponentMask::EMPTY, &em);
        assert_eq!(all.entities(), vec![a]);
        let b = em.create_entity("b");
        registry.refresh(&mut em);
        assert_eq!(all.entities(), vec![a, b]);
    }

    #[test]
    fn refresh_without_changes_is_a_no_op() {
        let (mut em, mut registry) = world();
        let q = registry.query_for::<(Position,)>(&mut em);
        registry.refresh(&mut em);
        registry.refresh(&mut em);
        assert!(q.is_empty());
    }
}
