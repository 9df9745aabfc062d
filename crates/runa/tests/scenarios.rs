//! End-to-end scenarios over the public API.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use runa::inspector;
use runa::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Velocity {
    dx: f32,
    dy: f32,
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
struct Wander {
    radius: f32,
}
impl Script for Wander {}

fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("runa_scenarios_{}_{name}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn moving_query_follows_composition() {
    init_logging();
    let mut em = EntityManager::new();
    let mut registry = Registry::new();
    let e1 = em.create_entity("e1");
    em.add_component(e1, Position::default());
    em.add_component(e1, Velocity::default());
    let e2 = em.create_entity("e2");
    em.add_component(e2, Position::default());

    let moving = registry.query_for::<(Position, Velocity)>(&mut em);
    assert_eq!(moving.entities(), vec![e1]);

    em.remove_component::<Velocity>(e1);
    assert_eq!(moving.entities(), vec![e1]);
    registry.refresh(&mut em);
    assert!(moving.is_empty());
}

#[test]
fn adding_twice_returns_the_same_instance() {
    let mut em = EntityManager::new();
    let e = em.create_entity("e");
    em.add_component(e, Position { x: 1.0, y: 2.0 });
    let again = em.add_component(e, Position { x: 9.0, y: 9.0 });
    assert_eq!(*again, Position { x: 1.0, y: 2.0 });

    let id = em.components().id_of::<Position>().unwrap();
    assert!(em.mask_of(e).unwrap().test(id));
    assert_eq!(em.components().stats(id).occupied, 1);
}

#[test]
fn freed_rows_are_reused_cleanly() {
    let mut em = EntityManager::new();
    let e1 = em.create_entity("first");
    em.add_component(e1, Position::default());
    em.add_script(e1, Wander::default());
    em.destroy_entity(e1);

    let e2 = em.create_entity("second");
    assert_eq!(e2.index(), e1.index());
    assert_ne!(e2, e1);
    assert!(!em.is_alive(e1));
    assert_eq!(em.name_of(e2), Some("second"));
    assert!(em.component_ids_of(e2).is_empty());
    assert!(!em.has_script::<Wander>(e2));
    assert_eq!(em.entity_by_name("first"), None);

    let id = em.components().id_of::<Position>().unwrap();
    em.add_component(e2, Position::default());
    assert_eq!(em.components().stats(id).capacity, 1);
}

#[test]
fn clones_are_independent() {
    let mut em = EntityManager::new();
    let src = em.create_entity("src");
    em.add_component(src, Position { x: 1.0, y: 1.0 });
    em.add_component(src, Velocity { dx: 2.0, dy: 0.0 });

    let copy = em.clone_entity(src, "copy");
    assert_eq!(em.mask_of(copy), em.mask_of(src));
    em.get_component_mut::<Position>(copy).unwrap().x = 50.0;
    assert_eq!(em.get_component::<Position>(src).unwrap().x, 1.0);
    assert_eq!(em.get_component::<Velocity>(copy).unwrap().dx, 2.0);
}

#[test]
fn destroyed_entities_leave_queries_and_newcomers_join() {
    let mut em = EntityManager::new();
    let mut registry = Registry::new();
    let a = em.create_entity("a");
    em.add_component(a, Position::default());
    let q = registry.query_for::<(Position,)>(&mut em);

    let removed = Rc::new(RefCell::new(Vec::new()));
    {
        let removed = Rc::clone(&removed);
        q.on_entity_remove(move |e, _| removed.borrow_mut().push(e));
    }
    em.destroy_entity(a);
    let b = em.create_entity("b");
    em.add_component(b, Position::default());
    registry.refresh(&mut em);

    assert_eq!(q.entities(), vec![b]);
    assert_eq!(*removed.borrow(), vec![a]);
}

#[test]
fn entity_round_trips_through_a_file() {
    init_logging();
    let dir = temp_dir("round_trip");
    let mut em = EntityManager::new();
    em.components_mut().register_serde::<Position>();
    em.components_mut().register_serde::<Velocity>();
    em.scripts_mut().register_serde::<Wander>();

    let ship = em.create_entity("ship");
    em.add_component(ship, Position { x: 3.5, y: -1.0 });
    em.add_component(ship, Velocity { dx: 0.25, dy: 4.0 });
    em.add_script(ship, Wander { radius: 12.0 });
    let path = em.save_entity(ship, &dir).unwrap();
    assert_eq!(path, dir.join("ship.json"));

    let mut other = EntityManager::new();
    other.components_mut().register_serde::<Position>();
    other.components_mut().register_serde::<Velocity>();
    other.scripts_mut().register_serde::<Wander>();
    let loaded = other.load_entity("ship", &dir).unwrap();

    assert_eq!(other.name_of(loaded), Some("ship"));
    assert_eq!(
        other.get_component::<Position>(loaded),
        Some(&Position { x: 3.5, y: -1.0 })
    );
    assert_eq!(
        other.get_component::<Velocity>(loaded),
        Some(&Velocity { dx: 0.25, dy: 4.0 })
    );
    assert_eq!(other.get_script::<Wander>(loaded), Some(&Wander { radius: 12.0 }));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn missing_file_is_an_error() {
    let mut em = EntityManager::new();
    let result = em.load_entity("nobody", temp_dir("missing"));
    assert!(matches!(result, Err(PersistError::Io { .. })));
    assert!(em.is_empty());
}

#[test]
fn scene_moves_entities_on_fixed_steps() {
    init_logging();
    fn integrate(ctx: &mut SystemContext<'_>) {
        let step = ctx.time.delta_secs();
        for e in ctx.query_for::<(Position, Velocity)>().entities() {
            let v = ctx.entities.get_component::<Velocity>(e).cloned().unwrap_or_default();
            if let Some(p) = ctx.entities.get_component_mut::<Position>(e) {
                p.x += v.dx * step;
                p.y += v.dy * step;
            }
        }
    }

    struct FixedMover;
    impl System for FixedMover {
        fn fixed_update(&mut self, ctx: &mut SystemContext<'_>) {
            let step = ctx.time.fixed_step_secs();
            for e in ctx.query_for::<(Velocity,)>().entities() {
                if let Some(t) = ctx.entities.get_component_mut::<Transform>(e) {
                    t.translate(Vec2::new(step, 0.0));
                }
            }
        }
    }

    let config = SceneConfig::new("movers").with_fixed_timestep(Duration::from_millis(10));
    let mut scene = Scene::new(config).unwrap();
    let e = scene.entities_mut().create_entity("mover");
    scene.entities_mut().add_component(e, Position::default());
    scene.entities_mut().add_component(e, Velocity { dx: 1.0, dy: 0.0 });
    scene.entities_mut().add_component(e, Transform::default());
    scene.add_system(integrate);
    scene.add_system(FixedMover);

    scene.frame(Duration::from_millis(500));
    scene.frame(Duration::from_millis(500));
    let p = scene.entities().get_component::<Position>(e).unwrap();
    assert!((p.x - 1.0).abs() < 1e-4);

    // 8 capped steps per frame of 10ms each.
    let t = scene.entities().get_component::<Transform>(e).unwrap();
    assert!((t.position.x - 0.16).abs() < 1e-4);
}

#[test]
fn inspector_lists_live_entities() {
    let mut em = EntityManager::new();
    let a = em.create_entity("a");
    em.add_component(a, Position::default());
    em.add_script(a, Wander::default());
    let gone = em.create_entity("gone");
    em.destroy_entity(gone);

    let labels: Vec<String> = inspector::snapshot(&em).iter().map(ToString::to_string).collect();
    assert_eq!(labels, vec!["a: C(1) S(1)"]);
}

#[test]
fn systems_see_what_joined_their_query() {
    #[derive(Default)]
    struct Announcer {
        joined: Rc<RefCell<Vec<(String, f32)>>>,
    }

    impl System for Announcer {
        fn init(&mut self, ctx: &mut SystemContext<'_>) {
            let joined = Rc::clone(&self.joined);
            ctx.query_for::<(Position, Velocity)>().on_entity_add(move |e, em| {
                let name = em.name_of(e).unwrap_or_default().to_string();
                let speed = em.get_component::<Velocity>(e).map_or(0.0, |v| v.dx);
                joined.borrow_mut().push((name, speed));
            });
        }
    }

    let joined = Rc::new(RefCell::new(Vec::new()));
    let mut scene = Scene::new(SceneConfig::new("announce")).unwrap();
    scene.add_system(Announcer {
        joined: Rc::clone(&joined),
    });
    scene.frame(Duration::from_millis(16));

    let em = scene.entities_mut();
    let rock = em.create_entity("rock");
    em.add_component(rock, Position::default());
    let comet = em.create_entity("comet");
    em.add_component(comet, Position::default());
    em.add_component(comet, Velocity { dx: 3.0, dy: 0.0 });
    scene.frame(Duration::from_millis(16));

    assert_eq!(*joined.borrow(), vec![("comet".to_string(), 3.0)]);
}

#[test]
fn deactivated_entities_stop_moving() {
    let mut scene = Scene::new(SceneConfig::new("pause").with_fixed_timestep(Duration::from_millis(10))).unwrap();
    scene.add_system_named("drift", |ctx: &mut SystemContext<'_>| {
        ctx.each::<(&mut Position, &Velocity)>(|_, (p, v)| p.x += v.dx);
    });
    let em = scene.entities_mut();
    let a = em.create_entity("a");
    let b = em.create_entity("b");
    for e in [a, b] {
        em.add_component(e, Position::default());
        em.add_component(e, Velocity { dx: 1.0, dy: 0.0 });
    }
    scene.frame(Duration::from_millis(10));
    scene.entities_mut().set_entity_active(b, false);
    scene.frame(Duration::from_millis(10));
    scene.frame(Duration::from_millis(10));

    let x = |e| scene.entities().get_component::<Position>(e).map(|p| p.x);
    assert_eq!(x(a), Some(3.0));
    assert_eq!(x(b), Some(1.0));
    assert!(!scene.query_for::<(Position, Velocity)>().contains(b));
    assert_eq!(scene.system_names().collect::<Vec<_>>(), vec!["drift"]);
}
