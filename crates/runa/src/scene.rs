//! # Scene: the per-frame driver
//!
//! A [`Scene`] owns the entity table, the query registry and an ordered list
//! of [`System`]s, and runs one frame at a time:
//!
//! ```text
//! frame(dt)
//!   0. init        systems and scripts added since the last frame
//!   1. events      drain the inbox; each event goes to systems, then scripts
//!   2. update      scripts (active only)
//!   3. fixed       scripts, as many steps as the script accumulator allows
//!   4. update      systems
//!   5. fixed       systems, independent accumulator
//!      refresh     drain the dirty set into every cached query
//!   6. render      systems
//! ```
//!
//! Systems run in the order they were added. Queries are current when
//! `render` runs, so a drawing system never iterates a half-updated list.
//!
//! Frames are driven with an explicit `dt`, so a headless scene is fully
//! deterministic. [`Scene::run`] wraps `frame` in a wall-clock loop.

use std::any::type_name;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use log::{debug, info};

use crate::config::SceneConfig;
use crate::ecs::component::short_type_name;
use crate::ecs::script::{Pass, Script};
use crate::ecs::{ComponentMask, Entity, EntityManager, Query, QueryParam, Registry, ScriptContext, Signature};
use crate::error::{ConfigError, PersistError};
use crate::event::Event;
use crate::time::{FixedTimestep, FrameClock, Time};
use crate::watch::FileWatcher;

/// What a system sees while it runs.
pub struct SystemContext<'a> {
    pub entities: &'a mut EntityManager,
    pub registry: &'a mut Registry,
    pub time: &'a Time,
}

impl SystemContext<'_> {
    pub fn query(&mut self, mask: ComponentMask) -> Query {
        self.registry.query(mask, self.entities)
    }

    pub fn query_for<S: Signature>(&mut self) -> Query {
        self.registry.query_for::<S>(self.entities)
    }

    /// Typed iteration over the entities carrying everything `P` names:
    /// `ctx.each::<(&mut Transform, &Velocity)>(|e, (t, v)| ..)`.
    pub fn each<P: QueryParam>(&mut self, f: impl FnMut(Entity, P::Item<'_>)) {
        self.registry.each::<P>(self.entities, f);
    }
}

/// Engine-wide behaviour that runs once per frame over queried entities.
///
/// Every hook has an empty default. A plain `FnMut(&mut SystemContext)` is
/// also a system; it runs in the `update` phase.
pub trait System {
    /// Name used in logs and diagnostics; defaults to the short type name.
    fn name(&self) -> String {
        short_type_name(type_name::<Self>())
    }

    /// Runs once, before the first frame the system takes part in. A good
    /// place to grab queries and hook their callbacks.
    fn init(&mut self, _ctx: &mut SystemContext<'_>) {}

    fn update(&mut self, _ctx: &mut SystemContext<'_>) {}

    fn fixed_update(&mut self, _ctx: &mut SystemContext<'_>) {}

    fn handle_event(&mut self, _ctx: &mut SystemContext<'_>, _event: &Event) {}

    fn render(&mut self, _ctx: &mut SystemContext<'_>) {}
}

impl<F: FnMut(&mut SystemContext<'_>)> System for F {
    fn update(&mut self, ctx: &mut SystemContext<'_>) {
        (self)(ctx);
    }
}

struct NamedSystem {
    name: String,
    initialized: bool,
    system: Box<dyn System>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Update,
    FixedUpdate,
    Render,
}

/// Time one system spent in the most recent frame, all phases together.
#[cfg(feature = "diagnostics")]
#[derive(Clone, Debug, PartialEq)]
pub struct SystemTiming {
    pub name: String,
    pub duration_us: f64,
}

pub struct Scene {
    config: SceneConfig,
    entities: EntityManager,
    registry: Registry,
    systems: Vec<NamedSystem>,
    time: Time,
    script_steps: FixedTimestep,
    system_steps: FixedTimestep,
    inbox_tx: mpsc::Sender<Event>,
    inbox_rx: mpsc::Receiver<Event>,
    watcher: Option<FileWatcher>,
    running: bool,
    started: bool,
    #[cfg(feature = "diagnostics")]
    timings: Vec<SystemTiming>,
}

impl Scene {
    pub fn new(config: SceneConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let step = config.fixed_timestep;
        let max_steps = config.max_fixed_steps_per_frame;
        let (inbox_tx, inbox_rx) = mpsc::channel();
        Ok(Self {
            config,
            entities: EntityManager::new(),
            registry: Registry::new(),
            systems: Vec::new(),
            time: Time::new(step),
            script_steps: FixedTimestep::new(step, max_steps),
            system_steps: FixedTimestep::new(step, max_steps),
            inbox_tx,
            inbox_rx,
            watcher: None,
            running: false,
            started: false,
            #[cfg(feature = "diagnostics")]
            timings: Vec::new(),
        })
    }

    pub fn config(&self) -> &SceneConfig {
        &self.config
    }

    pub fn entities(&self) -> &EntityManager {
        &self.entities
    }

    pub fn entities_mut(&mut self) -> &mut EntityManager {
        &mut self.entities
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn query(&mut self, mask: ComponentMask) -> Query {
        self.registry.query(mask, &self.entities)
    }

    pub fn query_for<S: Signature>(&mut self) -> Query {
        self.registry.query_for::<S>(&mut self.entities)
    }

    pub fn time(&self) -> &Time {
        &self.time
    }

    /// Appends a system; it is initialized at the start of the next frame.
    ///
    /// A name already taken (two closures, two instances of one type) gets
    /// a `#n` suffix so diagnostics can tell them apart.
    pub fn add_system<S: System + 'static>(&mut self, system: S) {
        let name = system.name();
        self.push_system(name, system);
    }

    /// Like [`add_system`](Self::add_system), under an explicit name.
    /// Mostly for closures, whose type name says nothing.
    pub fn add_system_named<S: System + 'static>(&mut self, name: &str, system: S) {
        self.push_system(name.to_string(), system);
    }

    fn push_system<S: System + 'static>(&mut self, base: String, system: S) {
        let taken = |name: &str| self.systems.iter().any(|s| s.name == name);
        let mut name = base.clone();
        let mut n = 1;
        while taken(&name) {
            n += 1;
            name = format!("{base}#{n}");
        }
        debug!("scene `{}`: add system `{name}`", self.config.name);
        self.systems.push(NamedSystem {
            name,
            initialized: false,
            system: Box::new(system),
        });
    }

    pub fn system_names(&self) -> impl Iterator<Item = &str> {
        self.systems.iter().map(|s| s.name.as_str())
    }

    /// Sender for the scene inbox. Clone it into background threads; events
    /// are delivered at the start of the next frame.
    pub fn event_sender(&self) -> mpsc::Sender<Event> {
        self.inbox_tx.clone()
    }

    /// Posts `path` changes as [`Event::FileChanged`]. Returns `false` if
    /// the path could not be watched.
    pub fn watch_file(&mut self, path: impl AsRef<Path>) -> bool {
        self.watcher.get_or_insert_with(FileWatcher::new).watch(path)
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Marks the scene running. Called by the first [`frame`](Self::frame)
    /// if not called before.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        info!(
            "scene `{}` starting: {} entities, {} systems, fixed step {:?}",
            self.config.name,
            self.entities.len(),
            self.systems.len(),
            self.config.fixed_timestep
        );
        self.started = true;
        self.running = true;
    }

    /// Asks the scene to stop; the current frame still completes.
    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Runs one frame that took `dt`.
    pub fn frame(&mut self, dt: Duration) {
        self.start();
        self.time.advance(dt);
        #[cfg(feature = "diagnostics")]
        self.reset_timings();

        self.init_pending();
        self.dispatch_events();

        self.run_scripts(Pass::Active, |script, ctx| script.update(ctx));
        for _ in 0..self.script_steps.accumulate(dt) {
            self.run_scripts(Pass::Active, |script, ctx| script.fixed_update(ctx));
        }

        self.run_systems(Phase::Update);
        for _ in 0..self.system_steps.accumulate(dt) {
            self.run_systems(Phase::FixedUpdate);
        }

        self.registry.refresh(&mut self.entities);
        self.run_systems(Phase::Render);
    }

    /// Runs frames off the wall clock until the scene stops, sleeping down
    /// to `frame_limit` when one is configured.
    pub fn run(&mut self) {
        self.start();
        let min_frame = self
            .config
            .frame_limit
            .map(|fps| Duration::from_secs_f64(1.0 / f64::from(fps)));
        let mut clock = FrameClock::new();
        while self.running {
            if let Some(min_frame) = min_frame {
                let spent = clock.peek();
                if spent < min_frame {
                    std::thread::sleep(min_frame - spent);
                }
            }
            let dt = clock.tick();
            self.frame(dt);
        }
        info!(
            "scene `{}` stopped after {} frames",
            self.config.name,
            self.time.frame_count()
        );
    }

    /// Brings cached queries up to date now instead of at the end of the
    /// frame, e.g. after building a level between frames.
    pub fn refresh_queries(&mut self) {
        self.registry.refresh(&mut self.entities);
    }

    /// Saves `entity` into the configured entity directory.
    pub fn save_entity(&self, entity: Entity) -> Result<PathBuf, PersistError> {
        self.entities.save_entity(entity, &self.config.entity_dir)
    }

    /// Loads `<entity_dir>/<name>.json` into a fresh entity.
    pub fn load_entity(&mut self, name: &str) -> Result<Entity, PersistError> {
        self.entities.load_entity(name, &self.config.entity_dir)
    }

    /// Per-system time spent in the most recent frame, in system order.
    #[cfg(feature = "diagnostics")]
    pub fn system_timings(&self) -> &[SystemTiming] {
        &self.timings
    }

    #[cfg(feature = "diagnostics")]
    fn reset_timings(&mut self) {
        self.timings.clear();
        self.timings.extend(self.systems.iter().map(|s| SystemTiming {
            name: s.name.clone(),
            duration_us: 0.0,
        }));
    }

    fn init_pending(&mut self) {
        let Self {
            systems,
            entities,
            registry,
            time,
            ..
        } = self;
        for named in systems.iter_mut().filter(|s| !s.initialized) {
            debug!("init system `{}`", named.name);
            let mut ctx = SystemContext {
                entities: &mut *entities,
                registry: &mut *registry,
                time: &*time,
            };
            named.system.init(&mut ctx);
            named.initialized = true;
        }
        self.run_scripts(Pass::Init, |script, ctx| script.init(ctx));
    }

    fn dispatch_events(&mut self) {
        if let Some(watcher) = &mut self.watcher {
            watcher.forward(&self.inbox_tx);
        }
        let events: Vec<Event> = self.inbox_rx.try_iter().collect();
        for event in &events {
            if event.is_closed() {
                info!("scene `{}` received close request", self.config.name);
                self.running = false;
            }
            let Self {
                systems,
                entities,
                registry,
                time,
                ..
            } = self;
            for named in systems.iter_mut().filter(|s| s.initialized) {
                let mut ctx = SystemContext {
                    entities: &mut *entities,
                    registry: &mut *registry,
                    time: &*time,
                };
                named.system.handle_event(&mut ctx, event);
            }
            self.run_scripts(Pass::Initialized, |script, ctx| script.handle_event(ctx, event));
        }
    }

    fn run_systems(&mut self, phase: Phase) {
        let Self {
            systems,
            entities,
            registry,
            time,
            #[cfg(feature = "diagnostics")]
            timings,
            ..
        } = self;
        for (_i, named) in systems.iter_mut().enumerate().filter(|(_, s)| s.initialized) {
            let mut ctx = SystemContext {
                entities: &mut *entities,
                registry: &mut *registry,
                time: &*time,
            };
            #[cfg(feature = "diagnostics")]
            let start = std::time::Instant::now();
            match phase {
                Phase::Update => named.system.update(&mut ctx),
                Phase::FixedUpdate => named.system.fixed_update(&mut ctx),
                Phase::Render => named.system.render(&mut ctx),
            }
            #[cfg(feature = "diagnostics")]
            if let Some(timing) = timings.get_mut(_i) {
                timing.duration_us += start.elapsed().as_secs_f64() * 1_000_000.0;
            }
        }
    }

    /// Lends each script selected by `pass` out of its list and calls `hook`
    /// on it. Scripts of dead entities are skipped, and so are those of
    /// inactive entities during updates.
    fn run_scripts(&mut self, pass: Pass, mut hook: impl FnMut(&mut dyn Script, &mut ScriptContext<'_>)) {
        for ticket in self.entities.scripts().tickets(pass) {
            if !self.entities.is_alive(ticket.owner) {
                continue;
            }
            if pass == Pass::Active && !self.entities.is_entity_active(ticket.owner) {
                continue;
            }
            let Some(mut script) = self.entities.scripts_mut().checkout(ticket) else {
                continue;
            };
            let mut ctx = ScriptContext {
                entity: ticket.owner,
                entities: &mut self.entities,
                time: &self.time,
            };
            hook(script.as_mut(), &mut ctx);
            self.entities
                .scripts_mut()
                .checkin(ticket, script, pass == Pass::Init);
        }
    }
}
