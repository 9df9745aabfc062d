//! Read-only snapshots for editor and debug overlays.
//!
//! The UI itself lives outside this crate. It reads these snapshots each
//! frame and calls back into the regular mutation API
//! ([`EntityManager::add_component_by_id`], [`EntityManager::remove_component_by_id`],
//! [`EntityManager::add_script_by_type`], ...) when the user edits something.

use std::any::TypeId;
use std::fmt::{self, Write as _};

use crate::ecs::{ComponentId, Entity, EntityManager, Registry, ScriptStatus};

/// One live entity as the inspector lists it.
#[derive(Clone, Debug, PartialEq)]
pub struct EntitySnapshot {
    pub entity: Entity,
    pub name: String,
    /// Component names in attach order.
    pub components: Vec<String>,
    pub scripts: Vec<ScriptStatus>,
}

/// `player: C(2) S(1)`
impl fmt::Display for EntitySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: C({}) S({})", self.name, self.components.len(), self.scripts.len())
    }
}

/// One cached query.
#[derive(Clone, Debug, PartialEq)]
pub struct QuerySnapshot {
    pub components: Vec<String>,
    /// Entity names in query order.
    pub entities: Vec<String>,
}

/// `[Transform, Velocity]: E(3) C(2)`
impl fmt::Display for QuerySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}]: E({}) C({})",
            self.components.join(", "),
            self.entities.len(),
            self.components.len()
        )
    }
}

/// A registered component type, as offered by an "add component" picker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentTypeSnapshot {
    pub id: ComponentId,
    pub name: String,
    /// Can be added by id (has a default constructor).
    pub constructible: bool,
    pub serializable: bool,
    pub live_values: usize,
}

/// A registered script factory, as offered by an "add script" picker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScriptTypeSnapshot {
    pub type_id: TypeId,
    pub name: String,
    pub serializable: bool,
}

pub fn snapshot_entity(entities: &EntityManager, entity: Entity) -> Option<EntitySnapshot> {
    let name = entities.name_of(entity)?.to_string();
    let components = entities
        .component_ids_of(entity)
        .into_iter()
        .map(|id| entities.components().name_of(id).to_string())
        .collect();
    Some(EntitySnapshot {
        entity,
        name,
        components,
        scripts: entities.script_statuses(entity),
    })
}

/// Every live entity, in table order. Free rows are skipped.
pub fn snapshot(entities: &EntityManager) -> Vec<EntitySnapshot> {
    entities
        .iter()
        .filter_map(|e| snapshot_entity(entities, e))
        .collect()
}

pub fn query_snapshots(registry: &Registry, entities: &EntityManager) -> Vec<QuerySnapshot> {
    registry
        .queries()
        .map(|query| QuerySnapshot {
            components: query
                .mask()
                .iter()
                .map(|id| entities.components().name_of(id).to_string())
                .collect(),
            entities: query
                .entities()
                .into_iter()
                .filter(|&e| entities.is_alive(e))
                .filter_map(|e| entities.name_of(e).map(str::to_string))
                .collect(),
        })
        .collect()
}

pub fn component_types(entities: &EntityManager) -> Vec<ComponentTypeSnapshot> {
    entities
        .components()
        .registered()
        .map(|(id, info)| ComponentTypeSnapshot {
            id,
            name: info.name().to_string(),
            constructible: info.is_constructible(),
            serializable: info.is_serializable(),
            live_values: info.stats().occupied,
        })
        .collect()
}

pub fn script_types(entities: &EntityManager) -> Vec<ScriptTypeSnapshot> {
    entities
        .scripts()
        .factories()
        .map(|f| ScriptTypeSnapshot {
            type_id: f.type_id(),
            name: f.name().to_string(),
            serializable: f.is_serializable(),
        })
        .collect()
}

/// Plain-text dump of the entity tree, for logs and terminal overlays.
///
/// ```text
/// Entities:
///   player: C(2) S(1)
///     Components: Transform, Velocity
///     Scripts: Patrol
/// ```
pub fn render_text(entities: &EntityManager) -> String {
    let mut out = String::from("Entities:\n");
    for snap in snapshot(entities) {
        let _ = writeln!(out, "  {snap}");
        if !snap.components.is_empty() {
            let _ = writeln!(out, "    Components: {}", snap.components.join(", "));
        }
        if !snap.scripts.is_empty() {
            let scripts: Vec<String> = snap
                .scripts
                .iter()
                .map(|s| {
                    if s.active {
                        s.name.to_string()
                    } else {
                        format!("{} (inactive)", s.name)
                    }
                })
                .collect();
            let _ = writeln!(out, "    Scripts: {}", scripts.join(", "));
        }
    }
    out
}
