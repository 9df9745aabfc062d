//! Console colors: background input feeding scripts through the scene inbox.
//!
//! A particle emitter entity carries a `ColorRange`. Two scripts change it:
//!
//! - `ColorsFromConsole` parses lines typed on stdin: `r1 r2 g1 g2 b1 b2`
//! - `ColorsFromFile` re-reads a file whenever it changes on disk
//!
//! Stdin is read on its own thread and the file is watched by `notify`; both
//! only ever post events, so no state is shared with the main loop. Type
//! `quit` to stop.
//!
//! Run with: `RUST_LOG=debug cargo run -p runa --example console_colors -- colors.txt`

use std::path::PathBuf;
use std::sync::mpsc::Sender;
use std::time::Duration;

use runa::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq)]
struct ColorRange {
    r: (u8, u8),
    g: (u8, u8),
    b: (u8, u8),
}

impl Default for ColorRange {
    fn default() -> Self {
        Self {
            r: (0, 255),
            g: (0, 255),
            b: (0, 255),
        }
    }
}

impl ColorRange {
    /// Parses `r1 r2 g1 g2 b1 b2`.
    fn parse(text: &str) -> Option<Self> {
        let values: Vec<u8> = text
            .split_whitespace()
            .map(str::parse)
            .collect::<Result<_, _>>()
            .ok()?;
        let [r1, r2, g1, g2, b1, b2] = values.as_slice() else {
            return None;
        };
        let ordered = |a: u8, b: u8| (a.min(b), a.max(b));
        Some(Self {
            r: ordered(*r1, *r2),
            g: ordered(*g1, *g2),
            b: ordered(*b1, *b2),
        })
    }

    fn midpoint(&self) -> (u8, u8, u8) {
        let mid = |(lo, hi): (u8, u8)| ((u16::from(lo) + u16::from(hi)) / 2) as u8;
        (mid(self.r), mid(self.g), mid(self.b))
    }
}

fn apply(ctx: &mut ScriptContext<'_>, range: ColorRange, source: &str) {
    if let Some(current) = ctx.entities.get_component_mut::<ColorRange>(ctx.entity) {
        *current = range;
        log::info!("colors set from {source}: {range:?}");
    }
}

#[derive(Default)]
struct ColorsFromConsole;

impl Script for ColorsFromConsole {
    fn init(&mut self, _ctx: &mut ScriptContext<'_>) {
        println!("enter rgb low and high (r1 r2 g1 g2 b1 b2), or `quit`:");
    }

    fn handle_event(&mut self, ctx: &mut ScriptContext<'_>, event: &Event) {
        let Event::Line(line) = event else { return };
        match ColorRange::parse(line) {
            Some(range) => apply(ctx, range, "console"),
            None if line.trim() == "quit" => {}
            None => println!("expected six numbers between 0 and 255, got `{line}`"),
        }
    }
}

struct ColorsFromFile {
    path: PathBuf,
}

impl ColorsFromFile {
    fn reload(&self, ctx: &mut ScriptContext<'_>) {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => match ColorRange::parse(&text) {
                Some(range) => apply(ctx, range, &self.path.display().to_string()),
                None => log::warn!("`{}` does not hold six color values", self.path.display()),
            },
            Err(e) => log::warn!("cannot read `{}`: {e}", self.path.display()),
        }
    }
}

impl Script for ColorsFromFile {
    fn init(&mut self, ctx: &mut ScriptContext<'_>) {
        self.reload(ctx);
    }

    fn handle_event(&mut self, ctx: &mut ScriptContext<'_>, event: &Event) {
        if let Event::FileChanged(path) = event
            && path.file_name() == self.path.file_name()
        {
            self.reload(ctx);
        }
    }
}

/// Stops the scene on `quit`.
struct QuitOnCommand {
    inbox: Sender<Event>,
}

impl System for QuitOnCommand {
    fn handle_event(&mut self, _ctx: &mut SystemContext<'_>, event: &Event) {
        if matches!(event, Event::Line(line) if line.trim() == "quit") {
            let _ = self.inbox.send(Event::Closed);
        }
    }
}

/// Prints the emitter color whenever it changes.
#[derive(Default)]
struct ShowColor {
    last: Option<ColorRange>,
}

impl System for ShowColor {
    fn render(&mut self, ctx: &mut SystemContext<'_>) {
        for e in ctx.query_for::<(ColorRange,)>().entities() {
            let Some(&range) = ctx.entities.get_component::<ColorRange>(e) else {
                continue;
            };
            if self.last != Some(range) {
                let (r, g, b) = range.midpoint();
                println!("emitter color is now around #{r:02x}{g:02x}{b:02x}");
                self.last = Some(range);
            }
        }
    }
}

fn main() {
    env_logger::init();

    let config = SceneConfig::new("console_colors")
        .with_fixed_timestep(Duration::from_millis(50))
        .with_frame_limit(30);
    let mut scene = match Scene::new(config) {
        Ok(scene) => scene,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };

    let em = scene.entities_mut();
    let emitter = em.create_entity("emitter");
    em.add_component(emitter, Transform::default());
    em.add_component(emitter, ColorRange::default());
    em.add_script(emitter, ColorsFromConsole);

    if let Some(path) = std::env::args_os().nth(1).map(PathBuf::from) {
        em.add_script(emitter, ColorsFromFile { path: path.clone() });
        if !scene.watch_file(&path) {
            log::warn!("not watching `{}`; edits will not be picked up", path.display());
        }
    }

    let inbox = scene.event_sender();
    scene.add_system(QuitOnCommand {
        inbox: inbox.clone(),
    });
    scene.add_system(ShowColor::default());

    let _reader = spawn_line_reader(std::io::BufReader::new(std::io::stdin()), inbox);
    scene.run();
}
