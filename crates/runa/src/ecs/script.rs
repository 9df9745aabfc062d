//! # Scripts
//!
//! A [`Script`] is per-entity behaviour: a small object attached to one
//! entity that gets `init`, `update`, `fixed_update` and `handle_event`
//! calls from the scene. Scripts are the dynamic counterpart of components;
//! they carry their own state and are looked up by their concrete type.
//!
//! ## Storage
//!
//! The [`ScriptManager`] owns one ordered list per entity that has ever had
//! a script. The entity keeps an `Option<ScriptsIndex>`: `None` means "no list
//! was ever allocated", `Some` with an empty list means "had scripts, all
//! removed". Released lists go on a free list and are reused.
//!
//! ```text
//! lists: [ Some([Mover, Blink]),   <- entity 3
//!          None,                   <- released, in free_list
//!          Some([Spawner]) ]       <- entity 0
//! ```
//!
//! ## Running scripts
//!
//! While a script runs it is lent out of its entry, so it can receive
//! `&mut EntityManager` and still add, remove or look up other scripts. The
//! entry stays in place; if it is removed (or its entity destroyed) while
//! the script is out, the script is dropped when it comes back.
//!
//! ## Factories
//!
//! Editors and entity documents refer to scripts by type or by name. The
//! factory table maps both to a constructor, and optionally to serde hooks.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;

use log::{debug, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::component::short_type_name;
use super::entity::Entity;
use super::entity_manager::EntityManager;
use crate::event::Event;
use crate::time::Time;

/// Upcast to [`Any`] so trait objects can be downcast to their concrete type.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// What a script sees while it runs.
pub struct ScriptContext<'a> {
    /// The entity the script is attached to.
    pub entity: Entity,
    pub entities: &'a mut EntityManager,
    pub time: &'a Time,
}

/// Per-entity behaviour driven by the scene.
///
/// Every hook has an empty default, so a script only implements what it
/// needs. `fixed_update` runs at the scene's fixed step, which
/// `ctx.time.fixed_step()` reports.
///
/// ```ignore
/// #[derive(Default)]
/// struct Spin { degrees_per_second: f32 }
///
/// impl Script for Spin {
///     fn update(&mut self, ctx: &mut ScriptContext<'_>) {
///         let dt = ctx.time.delta_secs();
///         if let Some(t) = ctx.entities.get_component_mut::<Transform>(ctx.entity) {
///             t.rotation += self.degrees_per_second * dt;
///         }
///     }
/// }
/// ```
pub trait Script: AsAny {
    /// Display name; defaults to the short type name.
    fn name(&self) -> &'static str {
        static_short_name(type_name::<Self>())
    }

    /// Runs once, before the first `update` the script receives.
    fn init(&mut self, _ctx: &mut ScriptContext<'_>) {}

    fn update(&mut self, _ctx: &mut ScriptContext<'_>) {}

    fn fixed_update(&mut self, _ctx: &mut ScriptContext<'_>) {}

    fn handle_event(&mut self, _ctx: &mut ScriptContext<'_>, _event: &Event) {}
}

fn static_short_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Index of an entity's script list in the [`ScriptManager`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ScriptsIndex(u32);

impl ScriptsIndex {
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Name and activity flag of one attached script.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScriptStatus {
    pub name: &'static str,
    pub active: bool,
}

struct ScriptEntry {
    id: u64,
    type_id: TypeId,
    name: &'static str,
    active: bool,
    initialized: bool,
    /// `None` while the script is lent out to run.
    script: Option<Box<dyn Script>>,
}

struct ScriptList {
    owner: Entity,
    entries: Vec<ScriptEntry>,
}

type ConstructFn = Box<dyn Fn() -> Box<dyn Script>>;
type SerializeFn = fn(&dyn Script) -> serde_json::Result<Value>;
type DeserializeFn = fn(Value) -> serde_json::Result<Box<dyn Script>>;

/// Constructor (and optional serde hooks) for one script type.
pub struct ScriptFactory {
    type_id: TypeId,
    name: String,
    construct: ConstructFn,
    serialize_fn: Option<SerializeFn>,
    deserialize_fn: Option<DeserializeFn>,
}

impl ScriptFactory {
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_serializable(&self) -> bool {
        self.serialize_fn.is_some() && self.deserialize_fn.is_some()
    }
}

fn serialize_script<T: Script + Serialize>(script: &dyn Script) -> serde_json::Result<Value> {
    let script = script
        .as_any()
        .downcast_ref::<T>()
        .unwrap_or_else(|| panic!("serialize hook for `{}` received another script", type_name::<T>()));
    serde_json::to_value(script)
}

fn deserialize_script<T: Script + DeserializeOwned>(value: Value) -> serde_json::Result<Box<dyn Script>> {
    let script: T = serde_json::from_value(value)?;
    Ok(Box::new(script))
}

/// How one attached script ends up in an entity document.
pub(crate) enum SavedScript<'a> {
    /// No factory: the script cannot be rebuilt, so it is not saved.
    Unregistered(&'static str),
    /// Factory without serde hooks: saved by name, rebuilt with defaults.
    Plain(&'a str),
    /// Factory with serde hooks: saved by name with its fields.
    Fields(&'a str, serde_json::Result<Value>),
}

/// A script lent out for one callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ScriptTicket {
    pub owner: Entity,
    list: u32,
    entry: u64,
}

/// Which entries a traversal visits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Pass {
    /// Entries that have not had `init` yet.
    Init,
    /// Initialized entries that are active.
    Active,
    /// Every initialized entry.
    Initialized,
}

/// Owner of every script list and of the script factory table.
#[derive(Default)]
pub struct ScriptManager {
    lists: Vec<Option<ScriptList>>,
    free_list: Vec<u32>,
    next_entry: u64,
    factories: Vec<ScriptFactory>,
    factory_by_type: HashMap<TypeId, usize>,
    factory_by_name: HashMap<String, usize>,
}

impl ScriptManager {
    pub fn new() -> Self {
        Self::default()
    }

    // -- factories --------------------------------------------------------

    /// Registers `T` under its short type name, constructed with `Default`.
    pub fn register<T: Script + Default>(&mut self) {
        let name = short_type_name(type_name::<T>());
        self.register_with(&name, T::default);
    }

    /// Registers `T` under `name`, constructed by `construct`.
    pub fn register_with<T: Script>(&mut self, name: &str, construct: impl Fn() -> T + 'static) {
        self.insert_factory(ScriptFactory {
            type_id: TypeId::of::<T>(),
            name: name.to_string(),
            construct: Box::new(move || Box::new(construct()) as Box<dyn Script>),
            serialize_fn: None,
            deserialize_fn: None,
        });
    }

    /// Registers `T` with serde hooks so it survives entity documents.
    pub fn register_serde<T: Script + Default + Serialize + DeserializeOwned>(&mut self) {
        let name = short_type_name(type_name::<T>());
        self.insert_factory(ScriptFactory {
            type_id: TypeId::of::<T>(),
            name,
            construct: Box::new(|| Box::new(T::default()) as Box<dyn Script>),
            serialize_fn: Some(serialize_script::<T>),
            deserialize_fn: Some(deserialize_script::<T>),
        });
    }

    fn insert_factory(&mut self, factory: ScriptFactory) {
        debug!("registered script `{}`", factory.name);
        if let Some(&i) = self.factory_by_type.get(&factory.type_id) {
            self.factory_by_name.remove(&self.factories[i].name);
            self.factory_by_name.insert(factory.name.clone(), i);
            self.factories[i] = factory;
            return;
        }
        let i = self.factories.len();
        self.factory_by_type.insert(factory.type_id, i);
        self.factory_by_name.insert(factory.name.clone(), i);
        self.factories.push(factory);
    }

    /// Registered script types, in registration order.
    pub fn factories(&self) -> impl Iterator<Item = &ScriptFactory> {
        self.factories.iter()
    }

    pub fn factory(&self, type_id: TypeId) -> Option<&ScriptFactory> {
        self.factory_by_type.get(&type_id).map(|&i| &self.factories[i])
    }

    pub fn factory_by_name(&self, name: &str) -> Option<&ScriptFactory> {
        self.factory_by_name.get(name).map(|&i| &self.factories[i])
    }

    // -- lists ------------------------------------------------------------

    /// Appends `script` to the list behind `index`, allocating the list on
    /// first use. Returns the stored script so callers can wire it up.
    pub fn add<T: Script>(&mut self, index: &mut Option<ScriptsIndex>, owner: Entity, script: T) -> &mut T {
        self.push(index, owner, TypeId::of::<T>(), Box::new(script))
            .as_any_mut()
            .downcast_mut::<T>()
            .expect("script was stored under its own type")
    }

    /// Constructs a script through the factory registered for `type_id`.
    pub fn add_by_type(
        &mut self,
        index: &mut Option<ScriptsIndex>,
        owner: Entity,
        type_id: TypeId,
    ) -> Option<&mut dyn Script> {
        let Some(&f) = self.factory_by_type.get(&type_id) else {
            warn!("no script factory registered for {type_id:?}");
            return None;
        };
        let script = (self.factories[f].construct)();
        Some(self.push(index, owner, type_id, script))
    }

    /// Constructs a script through the factory registered under `name`.
    pub fn add_by_name(
        &mut self,
        index: &mut Option<ScriptsIndex>,
        owner: Entity,
        name: &str,
    ) -> Option<&mut dyn Script> {
        let Some(&f) = self.factory_by_name.get(name) else {
            warn!("no script factory registered under `{name}`");
            return None;
        };
        let factory = &self.factories[f];
        let type_id = factory.type_id;
        let script = (factory.construct)();
        Some(self.push(index, owner, type_id, script))
    }

    pub(crate) fn push(
        &mut self,
        index: &mut Option<ScriptsIndex>,
        owner: Entity,
        type_id: TypeId,
        script: Box<dyn Script>,
    ) -> &mut dyn Script {
        let list_index = match *index {
            Some(i) => i,
            None => {
                let i = self.allocate_list(owner);
                *index = Some(i);
                i
            }
        };
        let id = self.next_entry;
        self.next_entry += 1;
        let name = script.name();
        let list = self.lists[list_index.0 as usize]
            .as_mut()
            .unwrap_or_else(|| panic!("script list {} was released", list_index.0));
        list.entries.push(ScriptEntry {
            id,
            type_id,
            name,
            active: true,
            initialized: false,
            script: Some(script),
        });
        list.entries
            .last_mut()
            .and_then(|entry| entry.script.as_deref_mut())
            .expect("fresh entry holds its script")
    }

    fn allocate_list(&mut self, owner: Entity) -> ScriptsIndex {
        let list = ScriptList {
            owner,
            entries: Vec::new(),
        };
        match self.free_list.pop() {
            Some(i) => {
                self.lists[i as usize] = Some(list);
                ScriptsIndex(i)
            }
            None => {
                self.lists.push(Some(list));
                ScriptsIndex((self.lists.len() - 1) as u32)
            }
        }
    }

    fn list(&self, index: Option<ScriptsIndex>) -> Option<&ScriptList> {
        self.lists.get(index?.0 as usize)?.as_ref()
    }

    fn list_mut(&mut self, index: Option<ScriptsIndex>) -> Option<&mut ScriptList> {
        self.lists.get_mut(index?.0 as usize)?.as_mut()
    }

    /// First attached script of type `T`.
    pub fn get<T: Script>(&self, index: Option<ScriptsIndex>) -> Option<&T> {
        self.get_by_type(index, TypeId::of::<T>())?
            .as_any()
            .downcast_ref::<T>()
    }

    pub fn get_mut<T: Script>(&mut self, index: Option<ScriptsIndex>) -> Option<&mut T> {
        self.get_by_type_mut(index, TypeId::of::<T>())?
            .as_any_mut()
            .downcast_mut::<T>()
    }

    pub fn get_by_type(&self, index: Option<ScriptsIndex>, type_id: TypeId) -> Option<&dyn Script> {
        self.list(index)?
            .entries
            .iter()
            .filter(|entry| entry.type_id == type_id)
            .find_map(|entry| entry.script.as_deref())
    }

    pub fn get_by_type_mut(&mut self, index: Option<ScriptsIndex>, type_id: TypeId) -> Option<&mut dyn Script> {
        self.list_mut(index)?
            .entries
            .iter_mut()
            .filter(|entry| entry.type_id == type_id)
            .find_map(|entry| entry.script.as_deref_mut())
    }

    pub fn has(&self, index: Option<ScriptsIndex>, type_id: TypeId) -> bool {
        self.list(index)
            .is_some_and(|list| list.entries.iter().any(|entry| entry.type_id == type_id))
    }

    /// Removes and drops the first script of `type_id`. The remaining
    /// scripts keep their order.
    pub fn remove(&mut self, index: Option<ScriptsIndex>, type_id: TypeId) -> bool {
        let Some(list) = self.list_mut(index) else {
            return false;
        };
        match list.entries.iter().position(|entry| entry.type_id == type_id) {
            Some(pos) => {
                let entry = list.entries.remove(pos);
                debug!("removed script `{}` from entity {}", entry.name, list.owner);
                true
            }
            None => false,
        }
    }

    /// Turns the per-frame `update`/`fixed_update` calls of the first script
    /// of `type_id` on or off.
    pub fn set_active(&mut self, index: Option<ScriptsIndex>, type_id: TypeId, active: bool) -> bool {
        let entry = self
            .list_mut(index)
            .and_then(|list| list.entries.iter_mut().find(|entry| entry.type_id == type_id));
        match entry {
            Some(entry) => {
                entry.active = active;
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, index: Option<ScriptsIndex>, type_id: TypeId) -> Option<bool> {
        self.list(index)?
            .entries
            .iter()
            .find(|entry| entry.type_id == type_id)
            .map(|entry| entry.active)
    }

    /// Attached scripts in order.
    pub fn statuses(&self, index: Option<ScriptsIndex>) -> Vec<ScriptStatus> {
        self.list(index)
            .map(|list| {
                list.entries
                    .iter()
                    .map(|entry| ScriptStatus {
                        name: entry.name,
                        active: entry.active,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn count(&self, index: Option<ScriptsIndex>) -> usize {
        self.list(index).map_or(0, |list| list.entries.len())
    }

    /// Drops every script in the list and recycles the index.
    pub fn release(&mut self, index: ScriptsIndex) {
        let Some(slot) = self.lists.get_mut(index.0 as usize) else {
            return;
        };
        if slot.take().is_some() {
            self.free_list.push(index.0);
        }
    }

    /// Number of allocated (not released) lists.
    pub fn list_count(&self) -> usize {
        self.lists.len() - self.free_list.len()
    }

    // -- persistence --------------------------------------------------------

    /// Serialized form of every attached script, in order.
    pub(crate) fn serialize_list(&self, index: Option<ScriptsIndex>) -> Vec<SavedScript<'_>> {
        let Some(list) = self.list(index) else {
            return Vec::new();
        };
        list.entries
            .iter()
            .filter_map(|entry| {
                let script = entry.script.as_deref()?;
                Some(match self.factory(entry.type_id) {
                    None => SavedScript::Unregistered(entry.name),
                    Some(factory) => match factory.serialize_fn {
                        None => SavedScript::Plain(&factory.name),
                        Some(serialize) => SavedScript::Fields(&factory.name, serialize(script)),
                    },
                })
            })
            .collect()
    }

    /// Rebuilds a script from a document entry. `None` when no factory is
    /// registered under `name`; fields are ignored for factories without
    /// serde hooks.
    pub(crate) fn deserialize_by_name(
        &self,
        name: &str,
        fields: Value,
    ) -> Option<serde_json::Result<(TypeId, Box<dyn Script>)>> {
        let factory = self.factory_by_name(name)?;
        let type_id = factory.type_id;
        Some(match factory.deserialize_fn {
            Some(deserialize) => deserialize(fields).map(|script| (type_id, script)),
            None => {
                if !fields.is_null() {
                    warn!("script `{name}` has no serde hooks; saved fields ignored");
                }
                Ok((type_id, (factory.construct)()))
            }
        })
    }

    // -- traversal ----------------------------------------------------------

    /// Snapshot of the entries a traversal should visit, in list order.
    pub(crate) fn tickets(&self, pass: Pass) -> Vec<ScriptTicket> {
        let mut tickets = Vec::new();
        for (i, list) in self.lists.iter().enumerate() {
            let Some(list) = list else { continue };
            for entry in &list.entries {
                let wanted = match pass {
                    Pass::Init => !entry.initialized,
                    Pass::Active => entry.initialized && entry.active,
                    Pass::Initialized => entry.initialized,
                };
                if wanted {
                    tickets.push(ScriptTicket {
                        owner: list.owner,
                        list: i as u32,
                        entry: entry.id,
                    });
                }
            }
        }
        tickets
    }

    fn entry_mut(&mut self, ticket: ScriptTicket) -> Option<&mut ScriptEntry> {
        let list = self.lists.get_mut(ticket.list as usize)?.as_mut()?;
        if list.owner != ticket.owner {
            return None;
        }
        list.entries.iter_mut().find(|entry| entry.id == ticket.entry)
    }

    /// Lends the script out. `None` if it was removed since the ticket was
    /// issued.
    pub(crate) fn checkout(&mut self, ticket: ScriptTicket) -> Option<Box<dyn Script>> {
        self.entry_mut(ticket)?.script.take()
    }

    /// Returns a lent script. A script whose entry is gone is dropped.
    pub(crate) fn checkin(&mut self, ticket: ScriptTicket, script: Box<dyn Script>, initialized: bool) {
        match self.entry_mut(ticket) {
            Some(entry) => {
                entry.initialized |= initialized;
                entry.script = Some(script);
            }
            None => debug!("script `{}` was detached while running; dropping it", script.name()),
        }
    }
}
