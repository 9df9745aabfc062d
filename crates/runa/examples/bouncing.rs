//! Bouncing balls: a headless scene driven by a fixed-step physics system.
//!
//! Spawns a handful of balls inside a box. A fixed-step system moves them and
//! reflects them off the walls; a script on one ball counts its bounces; a
//! render system prints the entity tree once per simulated second. The scene
//! closes itself after five simulated seconds and saves the counting ball.
//!
//! Run with: `RUST_LOG=info cargo run -p runa --example bouncing`

use std::sync::mpsc::Sender;
use std::time::Duration;

use runa::inspector;
use runa::prelude::*;
use serde::{Deserialize, Serialize};

const HALF_EXTENT: Vec2 = Vec2::new(320.0, 240.0);
const RUN_FOR_SECS: f32 = 5.0;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct Velocity(Vec2);

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct Radius(f32);

/// Set for the frame in which a ball hit a wall.
#[derive(Debug, Clone, Copy, Default)]
struct Bounced;

#[derive(Debug, Default, Serialize, Deserialize)]
struct BounceCounter {
    bounces: u32,
}

impl Script for BounceCounter {
    fn init(&mut self, ctx: &mut ScriptContext<'_>) {
        log::info!("counting bounces of `{}`", ctx.entities.name_of(ctx.entity).unwrap_or("?"));
    }

    fn fixed_update(&mut self, ctx: &mut ScriptContext<'_>) {
        if ctx.entities.remove_component::<Bounced>(ctx.entity) {
            self.bounces += 1;
        }
    }
}

struct Physics;

impl System for Physics {
    fn fixed_update(&mut self, ctx: &mut SystemContext<'_>) {
        let dt = ctx.time.fixed_step_secs();
        let mut bounced = Vec::new();
        ctx.each::<(&mut Transform, &mut Velocity, &Radius)>(|e, (t, Velocity(v), &Radius(r))| {
            t.translate(*v * dt);
            let limit = HALF_EXTENT - Vec2::splat(r);
            let mut hit = false;
            if t.position.x.abs() > limit.x {
                t.position.x = t.position.x.clamp(-limit.x, limit.x);
                v.x = -v.x;
                hit = true;
            }
            if t.position.y.abs() > limit.y {
                t.position.y = t.position.y.clamp(-limit.y, limit.y);
                v.y = -v.y;
                hit = true;
            }
            if hit {
                bounced.push(e);
            }
        });
        for e in bounced {
            ctx.entities.add_component(e, Bounced);
        }
    }
}

struct Printer {
    next_print: f32,
    inbox: Sender<Event>,
}

impl System for Printer {
    fn render(&mut self, ctx: &mut SystemContext<'_>) {
        let now = ctx.time.elapsed_secs();
        if now < self.next_print {
            return;
        }
        self.next_print += 1.0;
        println!("t = {now:.2}s, {:.0} fps", ctx.time.fps());
        print!("{}", inspector::render_text(ctx.entities));
        if now >= RUN_FOR_SECS {
            let _ = self.inbox.send(Event::Closed);
        }
    }
}

fn main() {
    env_logger::init();

    let config = SceneConfig::new("bouncing")
        .with_fixed_timestep(Duration::from_millis(10))
        .with_entity_dir(std::env::temp_dir().join("runa_bouncing"))
        .with_frame_limit(120);
    let mut scene = match Scene::new(config) {
        Ok(scene) => scene,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    let em = scene.entities_mut();
    em.components_mut().register_serde::<Velocity>();
    em.components_mut().register_serde::<Radius>();
    em.scripts_mut().register_serde::<BounceCounter>();

    let mut first = None;
    for i in 0..5 {
        let f = i as f32;
        let ball = em.create_entity(&format!("ball_{i}"));
        em.add_component(ball, Transform::from_xy(f * 40.0 - 80.0, f * 15.0));
        em.add_component(ball, Velocity(Vec2::new(120.0 + f * 30.0, 90.0 - f * 45.0)));
        em.add_component(ball, Radius(8.0 + f * 2.0));
        first.get_or_insert(ball);
    }
    let Some(first) = first else { return };
    em.add_script(first, BounceCounter::default());

    scene.add_system(Physics);
    let inbox = scene.event_sender();
    scene.add_system(Printer {
        next_print: 0.0,
        inbox,
    });

    scene.run();

    if let Some(counter) = scene.entities().get_script::<BounceCounter>(first) {
        println!("`ball_0` bounced {} times", counter.bounces);
    }
    match scene.save_entity(first) {
        Ok(path) => println!("saved to {}", path.display()),
        Err(e) => log::error!("{e}"),
    }
}
