//! # Components and the Component Manager
//!
//! Components are plain data attached to entities: a `Transform`, a
//! `Velocity`, a `Health`. Each component type gets its own
//! [`ComponentPool`], a slot array with a free list, so values of the same
//! type sit next to each other and released slots are recycled before the
//! pool grows.
//!
//! ## Handles, not references
//!
//! The entity table stores [`Slot`] handles (`index + generation`) rather than
//! pointers or boxes. Growing a pool therefore never invalidates anything an
//! entity holds, and a slot that was released and reused is detected instead
//! of silently aliasing another entity's data.
//!
//! ## Dynamic dispatch
//!
//! Each registered type receives a small [`ComponentId`] (its bit in the
//! [`ComponentMask`](super::ComponentMask)). The manager keeps one
//! type-erased pool per id plus optional function pointers recorded at
//! registration time:
//!
//! ```text
//! id 0  Transform  pool<Transform>  default  serialize  deserialize
//! id 1  Velocity   pool<Velocity>   default  -          -
//! id 2  Sprite     pool<Sprite>     -        -          -
//! ```
//!
//! That table is what lets the editor add a component by id, the
//! persistence layer save a component it only knows by name, and entity
//! cloning copy every component without knowing any of their types.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::mem;

use log::{debug, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::mask::{ComponentMask, MAX_COMPONENT_TYPES};

/// Marker trait for component data.
///
/// Anything `'static + Clone + Send + Sync` qualifies. `Clone` is what
/// entity cloning uses to copy components into the new entity.
pub trait Component: 'static + Clone + Send + Sync {}

impl<T: 'static + Clone + Send + Sync> Component for T {}

/// Small integer naming a registered component type; doubles as its bit in
/// a [`ComponentMask`](super::ComponentMask).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(pub(crate) u8);

impl ComponentId {
    /// Position in the registration order, and the mask bit.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Stable handle to one value inside a [`ComponentPool`].
///
/// The generation is bumped every time the slot is released, so a handle
/// kept past a `remove` no longer matches the slot it points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Slot {
    index: u32,
    generation: u32,
}

impl Slot {
    /// Position in the pool's value array.
    pub fn index(self) -> u32 {
        self.index
    }

    /// Release count of the slot at the time this handle was issued.
    pub fn generation(self) -> u32 {
        self.generation
    }
}

/// Occupancy numbers for one pool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Slots ever created. Pools never shrink.
    pub capacity: usize,
    /// Slots holding a value.
    pub occupied: usize,
    /// Released slots waiting to be reused.
    pub free: usize,
}

/// Slot storage for every value of one component type.
///
/// ```text
/// values:      [Some(a), None, Some(c)]
/// generations: [0,       3,    1]
/// free_list:   [1]
/// ```
pub struct ComponentPool<T> {
    values: Vec<Option<T>>,
    generations: Vec<u32>,
    free_list: Vec<u32>,
}

impl<T: Component> Default for ComponentPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Component> ComponentPool<T> {
    pub fn new() -> Self {
        Self {
            values: Vec::new(),
            generations: Vec::new(),
            free_list: Vec::new(),
        }
    }

    /// Stores `value`, reusing the most recently released slot if any.
    pub fn insert(&mut self, value: T) -> Slot {
        if let Some(index) = self.free_list.pop() {
            let idx = index as usize;
            self.values[idx] = Some(value);
            return Slot {
                index,
                generation: self.generations[idx],
            };
        }
        let index = u32::try_from(self.values.len())
            .unwrap_or_else(|_| panic!("`{}` pool is full", type_name::<T>()));
        self.values.push(Some(value));
        self.generations.push(0);
        Slot {
            index,
            generation: 0,
        }
    }

    /// # Panics
    ///
    /// Panics if the slot is out of range or was released.
    pub fn get(&self, slot: Slot) -> &T {
        let idx = self.occupied(slot);
        self.values[idx]
            .as_ref()
            .expect("occupied slot holds a value")
    }

    /// # Panics
    ///
    /// Panics if the slot is out of range or was released.
    pub fn get_mut(&mut self, slot: Slot) -> &mut T {
        let idx = self.occupied(slot);
        self.values[idx]
            .as_mut()
            .expect("occupied slot holds a value")
    }

    /// Takes the value out and recycles the slot. Outstanding handles to
    /// the slot become stale.
    pub fn remove(&mut self, slot: Slot) -> T {
        let idx = self.occupied(slot);
        let value = self.values[idx]
            .take()
            .expect("occupied slot holds a value");
        self.generations[idx] = self.generations[idx].wrapping_add(1);
        self.free_list.push(slot.index);
        value
    }

    /// Clones the value behind `slot` into a new slot.
    pub fn copy(&mut self, slot: Slot) -> Slot {
        let value = self.get(slot).clone();
        self.insert(value)
    }

    pub fn contains(&self, slot: Slot) -> bool {
        let idx = slot.index as usize;
        idx < self.values.len()
            && self.generations[idx] == slot.generation
            && self.values[idx].is_some()
    }

    /// Number of live values.
    pub fn len(&self) -> usize {
        self.values.len() - self.free_list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.values.len(),
            occupied: self.len(),
            free: self.free_list.len(),
        }
    }

    fn occupied(&self, slot: Slot) -> usize {
        let idx = slot.index as usize;
        assert!(
            idx < self.values.len(),
            "`{}` slot {} is out of range (pool has {} slots)",
            type_name::<T>(),
            slot.index,
            self.values.len()
        );
        assert!(
            self.generations[idx] == slot.generation && self.values[idx].is_some(),
            "stale `{}` slot {}v{} (slot is at generation {})",
            type_name::<T>(),
            slot.index,
            slot.generation,
            self.generations[idx]
        );
        idx
    }
}

/// Pool operations the manager performs without knowing `T`.
trait ErasedPool {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
    fn insert_boxed(&mut self, value: Box<dyn Any>) -> Slot;
    fn release(&mut self, slot: Slot);
    fn duplicate(&mut self, slot: Slot) -> Slot;
    fn value(&self, slot: Slot) -> &dyn Any;
    fn value_mut(&mut self, slot: Slot) -> &mut dyn Any;
    fn pool_stats(&self) -> PoolStats;
}

impl<T: Component> ErasedPool for ComponentPool<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }

    fn insert_boxed(&mut self, value: Box<dyn Any>) -> Slot {
        match value.downcast::<T>() {
            Ok(value) => self.insert(*value),
            Err(_) => panic!("value inserted into the `{}` pool has another type", type_name::<T>()),
        }
    }

    fn release(&mut self, slot: Slot) {
        self.remove(slot);
    }

    fn duplicate(&mut self, slot: Slot) -> Slot {
        self.copy(slot)
    }

    fn value(&self, slot: Slot) -> &dyn Any {
        self.get(slot)
    }

    fn value_mut(&mut self, slot: Slot) -> &mut dyn Any {
        self.get_mut(slot)
    }

    fn pool_stats(&self) -> PoolStats {
        self.stats()
    }
}

type DefaultFn = fn() -> Box<dyn Any>;
type SerializeFn = fn(&dyn Any) -> serde_json::Result<Value>;
type DeserializeFn = fn(Value) -> serde_json::Result<Box<dyn Any>>;

fn default_hook<T: Component + Default>() -> Box<dyn Any> {
    Box::new(T::default())
}

fn serialize_hook<T: Component + Serialize>(value: &dyn Any) -> serde_json::Result<Value> {
    let value = value
        .downcast_ref::<T>()
        .unwrap_or_else(|| panic!("serialize hook for `{}` received another type", type_name::<T>()));
    serde_json::to_value(value)
}

fn deserialize_hook<T: Component + DeserializeOwned>(value: Value) -> serde_json::Result<Box<dyn Any>> {
    let value: T = serde_json::from_value(value)?;
    Ok(Box::new(value))
}

/// Everything known about one registered component type.
pub struct ComponentInfo {
    name: String,
    type_name: &'static str,
    type_id: TypeId,
    pool: Box<dyn ErasedPool>,
    default_fn: Option<DefaultFn>,
    serialize_fn: Option<SerializeFn>,
    deserialize_fn: Option<DeserializeFn>,
}

impl ComponentInfo {
    /// Short display name, e.g. `Transform`. Also the key used in saved
    /// entity documents.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fully qualified Rust type name.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Whether [`ComponentManager::add`] can build this type from nothing.
    pub fn is_constructible(&self) -> bool {
        self.default_fn.is_some()
    }

    /// Whether the type can be written to and read from entity documents.
    pub fn is_serializable(&self) -> bool {
        self.serialize_fn.is_some() && self.deserialize_fn.is_some()
    }

    /// Occupancy of the type's pool.
    pub fn stats(&self) -> PoolStats {
        self.pool.pool_stats()
    }
}

/// Registry of component types and owner of their pools.
///
/// Typed access (`insert`, `get`, `get_mut`) registers or looks up the type
/// by `TypeId`. Dynamic access (`add`, `get_any`, `serialize`) goes through a
/// [`ComponentId`] and the hooks recorded by the `register_*` family.
#[derive(Default)]
pub struct ComponentManager {
    infos: Vec<ComponentInfo>,
    by_type: HashMap<TypeId, ComponentId>,
    by_name: HashMap<String, ComponentId>,
    /// Pools currently handed out to a typed query.
    lent: ComponentMask,
}

impl ComponentManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns the next id to `T`. Registering a type twice returns the id
    /// it already has.
    ///
    /// # Panics
    ///
    /// Panics when [`MAX_COMPONENT_TYPES`] types are already registered.
    pub fn register<T: Component>(&mut self) -> ComponentId {
        if let Some(&id) = self.by_type.get(&TypeId::of::<T>()) {
            return id;
        }
        let full_name = type_name::<T>();
        assert!(
            self.infos.len() < MAX_COMPONENT_TYPES,
            "cannot register component `{full_name}`: all {MAX_COMPONENT_TYPES} component ids are in use"
        );
        let id = ComponentId(self.infos.len() as u8);
        let name = short_type_name(full_name);
        if self.by_name.contains_key(&name) {
            warn!("component name `{name}` is used by more than one type; name lookups resolve to the first or to the saved one");
        } else {
            self.by_name.insert(name.clone(), id);
        }
        self.by_type.insert(TypeId::of::<T>(), id);
        debug!("registered component `{name}` as id {}", id.index());
        self.infos.push(ComponentInfo {
            name,
            type_name: full_name,
            type_id: TypeId::of::<T>(),
            pool: Box::new(ComponentPool::<T>::new()),
            default_fn: None,
            serialize_fn: None,
            deserialize_fn: None,
        });
        id
    }

    /// Registers `T` and records its `Default` impl, so it can be added by id.
    pub fn register_default<T: Component + Default>(&mut self) -> ComponentId {
        let id = self.register::<T>();
        self.info_mut(id).default_fn = Some(default_hook::<T>);
        id
    }

    /// Registers `T` with serialize/deserialize hooks for entity documents.
    ///
    /// The short type name is the document key, so it must be unique among
    /// serializable types.
    ///
    /// # Panics
    ///
    /// Panics if another serializable type already uses the same short name
    /// (e.g. `a::Position` and `b::Position`).
    pub fn register_serde<T: Component + Serialize + DeserializeOwned>(&mut self) -> ComponentId {
        let id = self.register::<T>();
        let name = &self.info(id).name;
        if let Some(other) = self
            .infos
            .iter()
            .find(|info| info.type_id != TypeId::of::<T>() && info.name == *name && info.is_serializable())
        {
            panic!(
                "cannot register `{}` for saving: `{}` is already saved under the name `{name}`",
                type_name::<T>(),
                other.type_name
            );
        }
        // Name lookups feed document loading, so the saved type owns the name.
        let name = name.clone();
        self.by_name.insert(name, id);
        let info = self.info_mut(id);
        info.serialize_fn = Some(serialize_hook::<T>);
        info.deserialize_fn = Some(deserialize_hook::<T>);
        id
    }

    pub fn id_of<T: 'static>(&self) -> Option<ComponentId> {
        self.id_of_type(TypeId::of::<T>())
    }

    pub fn id_of_type(&self, type_id: TypeId) -> Option<ComponentId> {
        self.by_type.get(&type_id).copied()
    }

    pub fn id_by_name(&self, name: &str) -> Option<ComponentId> {
        self.by_name.get(name).copied()
    }

    /// # Panics
    ///
    /// Panics if `id` was not issued by this manager.
    pub fn info(&self, id: ComponentId) -> &ComponentInfo {
        self.infos
            .get(id.index())
            .unwrap_or_else(|| panic!("component id {} is not registered", id.index()))
    }

    pub fn type_of(&self, id: ComponentId) -> TypeId {
        self.info(id).type_id
    }

    pub fn name_of(&self, id: ComponentId) -> &str {
        &self.info(id).name
    }

    /// Registered types in id order.
    pub fn registered(&self) -> impl Iterator<Item = (ComponentId, &ComponentInfo)> {
        self.infos
            .iter()
            .enumerate()
            .map(|(i, info)| (ComponentId(i as u8), info))
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// The pool for `T`, if `T` is registered.
    pub fn pool<T: Component>(&self) -> Option<&ComponentPool<T>> {
        let id = self.id_of::<T>()?;
        Some(self.typed_pool::<T>(id))
    }

    /// Stores a typed value, registering `T` on first use.
    pub fn insert<T: Component>(&mut self, value: T) -> (ComponentId, Slot) {
        let id = self.register::<T>();
        let slot = self.typed_pool_mut::<T>(id).insert(value);
        (id, slot)
    }

    /// Stores a default-constructed value of the type behind `id`.
    ///
    /// # Panics
    ///
    /// Panics if the type was not registered with
    /// [`register_default`](Self::register_default).
    pub fn add(&mut self, id: ComponentId) -> Slot {
        let info = self.info_mut(id);
        let make = info.default_fn.unwrap_or_else(|| {
            panic!(
                "component `{}` has no default constructor; register it with `register_default`",
                info.name
            )
        });
        info.pool.insert_boxed(make())
    }

    /// Stores an already boxed value in the pool behind `id`.
    pub fn insert_boxed(&mut self, id: ComponentId, value: Box<dyn Any>) -> Slot {
        self.info_mut(id).pool.insert_boxed(value)
    }

    /// Drops the value and recycles the slot.
    pub fn remove(&mut self, id: ComponentId, slot: Slot) {
        self.info_mut(id).pool.release(slot);
    }

    /// Clones the value behind `slot` into a fresh slot of the same pool.
    pub fn copy(&mut self, id: ComponentId, slot: Slot) -> Slot {
        self.info_mut(id).pool.duplicate(slot)
    }

    pub fn get<T: Component>(&self, slot: Slot) -> &T {
        let id = self.expect_id::<T>();
        self.typed_pool::<T>(id).get(slot)
    }

    pub fn get_mut<T: Component>(&mut self, slot: Slot) -> &mut T {
        let id = self.expect_id::<T>();
        self.typed_pool_mut::<T>(id).get_mut(slot)
    }

    pub fn get_any(&self, id: ComponentId, slot: Slot) -> &dyn Any {
        self.info(id).pool.value(slot)
    }

    pub fn get_any_mut(&mut self, id: ComponentId, slot: Slot) -> &mut dyn Any {
        self.info_mut(id).pool.value_mut(slot)
    }

    /// Serializes the value behind `slot`. `None` when the type has no hooks.
    pub fn serialize(&self, id: ComponentId, slot: Slot) -> Option<serde_json::Result<Value>> {
        let info = self.info(id);
        let serialize = info.serialize_fn?;
        Some(serialize(info.pool.value(slot)))
    }

    /// Builds a value from JSON and stores it. `None` when the type has no
    /// hooks.
    pub fn deserialize(&mut self, id: ComponentId, value: Value) -> Option<serde_json::Result<Slot>> {
        let info = self.info_mut(id);
        let deserialize = info.deserialize_fn?;
        Some(deserialize(value).map(|boxed| info.pool.insert_boxed(boxed)))
    }

    pub fn stats(&self, id: ComponentId) -> PoolStats {
        self.info(id).pool.pool_stats()
    }

    /// Moves `T`'s pool out so a typed query can hold it next to other
    /// pools. Must be handed back with [`return_pool`](Self::return_pool).
    pub(crate) fn lend_pool<T: Component>(&mut self) -> (ComponentId, Box<ComponentPool<T>>) {
        let id = self.register::<T>();
        assert!(
            !self.lent.test(id),
            "component `{}` is requested twice by one query",
            type_name::<T>()
        );
        self.lent.set(id);
        let empty: Box<dyn ErasedPool> = Box::new(ComponentPool::<T>::new());
        let pool = mem::replace(&mut self.info_mut(id).pool, empty);
        match pool.into_any().downcast::<ComponentPool<T>>() {
            Ok(pool) => (id, pool),
            Err(_) => panic!("component id {} does not hold `{}`", id.index(), type_name::<T>()),
        }
    }

    pub(crate) fn return_pool<T: Component>(&mut self, id: ComponentId, pool: Box<ComponentPool<T>>) {
        self.lent.clear(id);
        self.info_mut(id).pool = pool;
    }

    pub(crate) fn expect_id<T: 'static>(&self) -> ComponentId {
        self.id_of::<T>()
            .unwrap_or_else(|| panic!("component `{}` is not registered", type_name::<T>()))
    }

    fn info_mut(&mut self, id: ComponentId) -> &mut ComponentInfo {
        self.infos
            .get_mut(id.index())
            .unwrap_or_else(|| panic!("component id {} is not registered", id.index()))
    }

    fn typed_pool<T: Component>(&self, id: ComponentId) -> &ComponentPool<T> {
        let info = self.info(id);
        info.pool
            .as_any()
            .downcast_ref::<ComponentPool<T>>()
            .unwrap_or_else(|| {
                panic!(
                    "component id {} holds `{}`, not `{}`",
                    id.index(),
                    info.type_name,
                    type_name::<T>()
                )
            })
    }

    fn typed_pool_mut<T: Component>(&mut self, id: ComponentId) -> &mut ComponentPool<T> {
        let info = self.info_mut(id);
        let held = info.type_name;
        info.pool
            .as_any_mut()
            .downcast_mut::<ComponentPool<T>>()
            .unwrap_or_else(|| {
                panic!(
                    "component id {} holds `{held}`, not `{}`",
                    id.index(),
                    type_name::<T>()
                )
            })
    }
}

/// `my_game::physics::Velocity` -> `Velocity`, `alloc::vec::Vec<a::B>` ->
/// `Vec<B>`.
pub(crate) fn short_type_name(full: &str) -> String {
    match full.find('<') {
        Some(angle) if full.ends_with('>') => {
            let prefix = &full[..angle];
            let short_prefix = prefix.rsplit("::").next().unwrap_or(prefix);
            let inner = &full[angle + 1..full.len() - 1];
            let args: Vec<String> = inner.split(", ").map(short_type_name).collect();
            format!("{short_prefix}<{}>", args.join(", "))
        }
        _ => full.rsplit("::").next().unwrap_or(full).to_string(),
    }
}
