//! # ECS core
//!
//! - [`EntityManager`]: entity table, attach/detach, clone/destroy, dirty set
//! - [`ComponentManager`]: per-type slot pools and the component type table
//! - [`ScriptManager`]: per-entity script lists and script factories
//! - [`Registry`]: cached [`Query`] lists per [`ComponentMask`]
//!
//! Everything is owned by value; there is no global state. A
//! [`Scene`](crate::scene::Scene) bundles one `EntityManager` with one
//! `Registry` and drives them frame by frame.

pub mod component;
pub mod entity;
pub mod entity_manager;
mod hierarchy;
pub mod mask;
pub mod query;
pub mod script;

pub use component::{Component, ComponentId, ComponentInfo, ComponentManager, ComponentPool, PoolStats, Slot};
pub use entity::Entity;
#[cfg(feature = "diagnostics")]
pub use entity_manager::EntityStats;
pub use entity_manager::{ComponentRef, EntityManager};
pub use mask::{ComponentMask, MAX_COMPONENT_TYPES};
pub use query::{Query, QueryParam, Registry, Signature};
pub use script::{AsAny, Script, ScriptContext, ScriptFactory, ScriptManager, ScriptStatus, ScriptsIndex};
