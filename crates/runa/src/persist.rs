//! # Persistence: one JSON document per entity
//!
//! An entity is saved as `<entity_dir>/<name>.json`:
//!
//! ```json
//! {
//!   "version": 1,
//!   "name": "player",
//!   "components": {
//!     "Transform": { "position": [10.0, 20.0], "rotation": 0.0, "scale": [1.0, 1.0], "origin": [0.0, 0.0] },
//!     "Velocity": { "dx": 1.0, "dy": 0.0 }
//!   },
//!   "scripts": [ { "type": "Patrol", "fields": { "laps": 3 } } ]
//! }
//! ```
//!
//! Components are keyed by their registered short name and converted with
//! the hooks recorded by
//! [`ComponentManager::register_serde`](crate::ecs::ComponentManager::register_serde).
//! Scripts are stored by factory name, with fields when the factory was
//! registered with [`ScriptManager::register_serde`](crate::ecs::ScriptManager::register_serde).
//!
//! Things the document cannot express are skipped with a warning rather
//! than failing the whole save or load: components without hooks, scripts
//! without a factory, unknown names on load. Malformed values for a known
//! type do fail the load.
//!
//! The file name follows the entity name, so renaming an entity leaves its
//! old file behind.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ecs::script::SavedScript;
use crate::ecs::{ComponentId, Entity, EntityManager, Slot};
use crate::error::PersistError;

/// Format version written by this build.
pub const CURRENT_VERSION: u32 = 1;

fn current_version() -> u32 {
    CURRENT_VERSION
}

/// Serialized form of one entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityDocument {
    #[serde(default = "current_version")]
    pub version: u32,
    pub name: String,
    #[serde(default)]
    pub components: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scripts: Vec<ScriptDocument>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScriptDocument {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub fields: Value,
}

impl EntityManager {
    /// Builds the document for a live entity.
    pub fn serialize_entity(&self, entity: Entity) -> Result<EntityDocument, PersistError> {
        let name = self.name_of(entity).ok_or(PersistError::DeadEntity(entity))?;
        let refs = self.component_refs(entity).unwrap_or_default();

        let mut components = BTreeMap::new();
        for r in refs {
            let component = self.components().name_of(r.id);
            match self.components().serialize(r.id, r.slot) {
                Some(Ok(value)) => {
                    components.insert(component.to_string(), value);
                }
                Some(Err(source)) => {
                    return Err(PersistError::Component {
                        component: component.to_string(),
                        source,
                    });
                }
                None => warn!("component `{component}` of `{name}` has no serde hooks; not saved"),
            }
        }

        let mut scripts = Vec::new();
        for saved in self.scripts().serialize_list(self.scripts_index(entity)) {
            match saved {
                SavedScript::Fields(kind, Ok(fields)) => scripts.push(ScriptDocument {
                    kind: kind.to_string(),
                    fields,
                }),
                SavedScript::Fields(kind, Err(source)) => {
                    return Err(PersistError::Script {
                        script: kind.to_string(),
                        source,
                    });
                }
                SavedScript::Plain(kind) => scripts.push(ScriptDocument {
                    kind: kind.to_string(),
                    fields: Value::Null,
                }),
                SavedScript::Unregistered(script) => {
                    warn!("script `{script}` of `{name}` has no registered factory; not saved")
                }
            }
        }

        Ok(EntityDocument {
            version: CURRENT_VERSION,
            name: name.to_string(),
            components,
            scripts,
        })
    }

    /// Creates a new entity from `document`. On failure nothing is left
    /// behind.
    pub fn deserialize_entity(&mut self, document: &EntityDocument) -> Result<Entity, PersistError> {
        check_version(document.version)?;
        let entity = self.create_entity(&document.name);
        if let Err(e) = self.apply_document(entity, document) {
            self.destroy_entity(entity);
            return Err(e);
        }
        Ok(entity)
    }

    /// Adds the components and scripts of `document` to an existing entity.
    /// Components the entity already has are overwritten.
    ///
    /// Everything is converted before anything is attached, so on failure
    /// the entity is left exactly as it was.
    pub fn apply_document(&mut self, entity: Entity, document: &EntityDocument) -> Result<(), PersistError> {
        if !self.is_alive(entity) {
            return Err(PersistError::DeadEntity(entity));
        }
        let mut staged = Vec::with_capacity(document.components.len());
        for (component, value) in &document.components {
            let Some(id) = self.components().id_by_name(component) else {
                warn!(
                    "unknown component `{component}` in document `{}`; skipped",
                    document.name
                );
                continue;
            };
            match self.components_mut().deserialize(id, value.clone()) {
                Some(Ok(slot)) => staged.push((id, slot)),
                Some(Err(source)) => {
                    self.discard_staged(staged);
                    return Err(PersistError::Component {
                        component: component.clone(),
                        source,
                    });
                }
                None => warn!("component `{component}` has no serde hooks; skipped"),
            }
        }
        let mut scripts = Vec::with_capacity(document.scripts.len());
        for script in &document.scripts {
            match self
                .scripts()
                .deserialize_by_name(&script.kind, script.fields.clone())
            {
                Some(Ok(built)) => scripts.push(built),
                Some(Err(source)) => {
                    self.discard_staged(staged);
                    return Err(PersistError::Script {
                        script: script.kind.clone(),
                        source,
                    });
                }
                None => warn!(
                    "unknown script `{}` in document `{}`; skipped",
                    script.kind, document.name
                ),
            }
        }
        for (id, slot) in staged {
            self.attach_slot(entity, id, slot);
        }
        for (type_id, boxed) in scripts {
            self.push_script(entity, type_id, boxed);
        }
        Ok(())
    }

    fn discard_staged(&mut self, staged: Vec<(ComponentId, Slot)>) {
        for (id, slot) in staged {
            self.components_mut().remove(id, slot);
        }
    }

    /// Writes `<dir>/<name>.json`, creating `dir` if needed.
    pub fn save_entity(&self, entity: Entity, dir: impl AsRef<Path>) -> Result<PathBuf, PersistError> {
        let document = self.serialize_entity(entity)?;
        let path = entity_file_path(dir, &document.name)?;
        write_document(&path, &document)?;
        info!("saved entity `{}` to `{}`", document.name, path.display());
        Ok(path)
    }

    /// Reads `<dir>/<name>.json` into a new entity.
    pub fn load_entity(&mut self, name: &str, dir: impl AsRef<Path>) -> Result<Entity, PersistError> {
        let path = entity_file_path(dir, name)?;
        let document = read_document(&path)?;
        let entity = self.deserialize_entity(&document)?;
        info!("loaded entity `{}` from `{}`", document.name, path.display());
        Ok(entity)
    }
}

/// `<dir>/<name>.json`.
///
/// The name has to be a plain file name: empty names, path separators and
/// `.`/`..` are refused so a document can never land outside `dir`.
pub fn entity_file_path(dir: impl AsRef<Path>, name: &str) -> Result<PathBuf, PersistError> {
    let mut parts = Path::new(name).components();
    let plain = matches!(
        (parts.next(), parts.next()),
        (Some(Component::Normal(_)), None)
    );
    if !plain || name.contains(['/', '\\']) {
        return Err(PersistError::InvalidName(name.to_string()));
    }
    Ok(dir.as_ref().join(format!("{name}.json")))
}

fn check_version(version: u32) -> Result<(), PersistError> {
    if version > CURRENT_VERSION {
        return Err(PersistError::UnsupportedVersion {
            found: version,
            supported: CURRENT_VERSION,
        });
    }
    Ok(())
}

/// Writes `document` as pretty-printed JSON.
pub fn write_document(path: &Path, document: &EntityDocument) -> Result<(), PersistError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| PersistError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let json = serde_json::to_string_pretty(document).map_err(|source| PersistError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, json).map_err(|source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Reads and version-checks a document.
pub fn read_document(path: &Path) -> Result<EntityDocument, PersistError> {
    let text = fs::read_to_string(path).map_err(|source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let document: EntityDocument = serde_json::from_str(&text).map_err(|source| PersistError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    check_version(document.version)?;
    Ok(document)
}
