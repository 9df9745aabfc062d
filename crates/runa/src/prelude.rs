//! Convenience re-exports: `use runa::prelude::*` for the common items.

pub use crate::components::Transform;
pub use crate::config::SceneConfig;
pub use crate::ecs::{
    Component, ComponentId, ComponentMask, Entity, EntityManager, Query, QueryParam, Registry, Script,
    ScriptContext, Signature,
};
pub use crate::error::{ConfigError, PersistError};
pub use crate::event::{Event, Key, MouseButton};
pub use crate::persist::{EntityDocument, ScriptDocument};
pub use crate::scene::{Scene, System, SystemContext};
pub use crate::time::Time;
pub use crate::watch::spawn_line_reader;

pub use glam::Vec2;
