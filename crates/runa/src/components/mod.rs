//! Built-in components every [`EntityManager`](crate::ecs::EntityManager)
//! registers up front.

mod transform;

pub use transform::Transform;
