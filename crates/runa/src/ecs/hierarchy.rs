//! # Hierarchy: parent/child links between transforms
//!
//! Entities with a [`Transform`](crate::components::Transform) can be
//! arranged in a tree: a child's world placement is its parent's world
//! placement times its own local one.
//!
//! Links are stored here, in a side table addressed by entity index, rather
//! than inside the component. Handles (with generations) are kept in both
//! directions so the tree can be walked up and down without touching any
//! component pool.
//!
//! ```text
//! nodes[0] { parent: None,      children: [1v0, 4v2] }
//! nodes[1] { parent: Some(0v0), children: [] }
//! nodes[4] { parent: Some(0v0), children: [] }
//! ```
//!
//! Destroying an entity detaches it from its parent and orphans its
//! children; the children keep their local transforms.

use std::mem;

use super::entity::Entity;

#[derive(Debug, Default, Clone)]
struct Node {
    parent: Option<Entity>,
    children: Vec<Entity>,
}

#[derive(Debug, Default)]
pub(crate) struct Hierarchy {
    nodes: Vec<Node>,
}

impl Hierarchy {
    fn node(&self, entity: Entity) -> Option<&Node> {
        self.nodes.get(entity.index as usize)
    }

    fn node_mut(&mut self, entity: Entity) -> &mut Node {
        let idx = entity.index as usize;
        if idx >= self.nodes.len() {
            self.nodes.resize_with(idx + 1, Node::default);
        }
        &mut self.nodes[idx]
    }

    pub fn parent_of(&self, entity: Entity) -> Option<Entity> {
        self.node(entity)?.parent
    }

    pub fn children_of(&self, entity: Entity) -> &[Entity] {
        self.node(entity).map_or(&[], |node| node.children.as_slice())
    }

    /// `true` if `ancestor` is somewhere above `entity`.
    pub fn is_ancestor(&self, ancestor: Entity, entity: Entity) -> bool {
        let mut current = self.parent_of(entity);
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            current = self.parent_of(parent);
        }
        false
    }

    /// Moves `child` under `parent`. Returns `false` (and changes nothing)
    /// for self-parenting or when the link would close a cycle.
    pub fn set_parent(&mut self, child: Entity, parent: Entity) -> bool {
        if child == parent || self.is_ancestor(child, parent) {
            return false;
        }
        if self.parent_of(child) == Some(parent) {
            return true;
        }
        self.unlink(child);
        self.node_mut(child).parent = Some(parent);
        self.node_mut(parent).children.push(child);
        true
    }

    /// Detaches `child` from its parent, returning the former parent.
    pub fn remove_parent(&mut self, child: Entity) -> Option<Entity> {
        self.unlink(child)
    }

    fn unlink(&mut self, child: Entity) -> Option<Entity> {
        let parent = self.nodes.get_mut(child.index as usize)?.parent.take()?;
        if let Some(node) = self.nodes.get_mut(parent.index as usize) {
            node.children.retain(|&c| c != child);
        }
        Some(parent)
    }

    /// Removes `entity` from the tree entirely. Returns the orphaned
    /// children.
    pub fn detach(&mut self, entity: Entity) -> Vec<Entity> {
        self.unlink(entity);
        let children = match self.nodes.get_mut(entity.index as usize) {
            Some(node) => mem::take(&mut node.children),
            None => return Vec::new(),
        };
        for &child in &children {
            if let Some(node) = self.nodes.get_mut(child.index as usize) {
                if node.parent == Some(entity) {
                    node.parent = None;
                }
            }
        }
        children
    }

    /// Moves `from`'s place in the tree onto `to`: `to` leaves its own parent
    /// and orphans its own children, then takes over `from`'s parent and
    /// children. `from` ends up detached.
    ///
    /// Returns the children `to` orphaned, or `None` (nothing changed) when
    /// `to` sits below `from`.
    pub fn transfer(&mut self, from: Entity, to: Entity) -> Option<Vec<Entity>> {
        if from == to {
            return Some(Vec::new());
        }
        if self.is_ancestor(from, to) {
            return None;
        }
        let orphaned = self.detach(to);
        let parent = self.unlink(from);
        let children = match self.nodes.get_mut(from.index as usize) {
            Some(node) => mem::take(&mut node.children),
            None => Vec::new(),
        };
        for &child in &children {
            self.node_mut(child).parent = Some(to);
        }
        self.node_mut(to).children = children;
        if let Some(parent) = parent.filter(|&p| p != to) {
            self.node_mut(to).parent = Some(parent);
            self.node_mut(parent).children.push(to);
        }
        Some(orphaned)
    }
}
