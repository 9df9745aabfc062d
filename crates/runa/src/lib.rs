//! # Runa: entity/component/script core for 2D games
//!
//! Entities are generational handles into one table. Components live in
//! per-type pools and are attached by slot; scripts are per-entity trait
//! objects; systems see entities through cached, incrementally refreshed
//! queries. A [`Scene`](scene::Scene) ties them together and runs frames.
//!
//! Start with `use runa::prelude::*`:
//!
//! ```no_run
//! use std::time::Duration;
//! use runa::prelude::*;
//!
//! #[derive(Clone, Default)]
//! struct Velocity(Vec2);
//!
//! fn movement(ctx: &mut SystemContext<'_>) {
//!     let dt = ctx.time.delta_secs();
//!     ctx.each::<(&mut Transform, &Velocity)>(|_, (t, v)| t.translate(v.0 * dt));
//! }
//!
//! let mut scene = Scene::new(SceneConfig::new("demo")).unwrap();
//! let ball = scene.entities_mut().create_entity("ball");
//! scene.entities_mut().add_component(ball, Velocity(Vec2::X));
//! scene.add_system(movement);
//! scene.frame(Duration::from_millis(16));
//! ```

pub mod components;
pub mod config;
pub mod ecs;
pub mod error;
pub mod event;
pub mod inspector;
pub mod persist;
pub mod prelude;
pub mod scene;
pub mod time;
pub mod watch;
