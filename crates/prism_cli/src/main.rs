//! `prism` - render a JSON scene description to PNG.

mod post;
mod scene_file;

use std::path::PathBuf;
use std::rc::Rc;
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use prism_core::{DebugBuffer, Mesh, RenderSettings};
use prism_render::{LogProfiler, Renderer};

use crate::scene_file::SceneFile;

#[derive(Parser, Debug)]
#[command(author, version, about = "Hybrid deferred + ray-traced reflection/refraction renderer")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render a scene to a PNG image
    Render(RenderArgs),
    /// Write the built-in demo scene description
    Demo {
        #[arg(short, long, default_value = "demo_scene.json")]
        output: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
struct RenderArgs {
    /// Scene description; the demo scene is used when omitted
    #[arg(long)]
    scene: Option<PathBuf>,
    /// Render settings JSON
    #[arg(long)]
    settings: Option<PathBuf>,
    #[arg(short, long, default_value = "prism.png")]
    output: PathBuf,
    /// Also dump the selected buffer as raw native-endian f32 RGBA texels
    #[arg(long)]
    raw: Option<PathBuf>,
    /// Frames to render; the last one is written
    #[arg(long, default_value_t = 1)]
    frames: u32,
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
    /// Bounce path to inspect, `r` for reflection and `t` for refraction (e.g. `rt`)
    #[arg(long, value_parser = parse_debug_path)]
    debug_path: Option<DebugPath>,
    /// Buffer to inspect at the debug path (e.g. `hit_normal`, `shadow_mask`)
    #[arg(long, value_parser = parse_debug_buffer)]
    debug_buffer: Option<DebugBuffer>,
    /// Light whose shadow buffers the debug view shows
    #[arg(long)]
    debug_light: Option<usize>,
    #[arg(long, default_value_t = false)]
    wireframe: bool,
    /// Log per-stage timings after rendering
    #[arg(long, default_value_t = false)]
    profile: bool,
}

/// Branches from the primary layer, `true` = reflection.
#[derive(Debug, Clone, PartialEq)]
struct DebugPath(Vec<bool>);

fn parse_debug_path(s: &str) -> Result<DebugPath, String> {
    s.chars()
        .map(|c| match c {
            'r' | 'R' => Ok(true),
            't' | 'T' => Ok(false),
            other => Err(format!("unexpected '{other}', use 'r' or 't'")),
        })
        .collect::<Result<Vec<_>, _>>()
        .map(DebugPath)
}

fn parse_debug_buffer(s: &str) -> Result<DebugBuffer, String> {
    serde_json::from_value(serde_json::Value::String(s.to_string())).map_err(|e| e.to_string())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Command::Render(args) => render(args),
        Command::Demo { output } => {
            let json = serde_json::to_string_pretty(&SceneFile::demo())?;
            std::fs::write(&output, json).with_context(|| format!("failed to write {}", output.display()))?;
            log::info!("Wrote {}", output.display());
            Ok(())
        }
    }
}

fn load_settings(args: &RenderArgs) -> Result<RenderSettings> {
    let mut settings = match &args.settings {
        Some(path) => RenderSettings::load(path)?,
        None => RenderSettings::default(),
    };
    if let Some(width) = args.width {
        settings.width = width;
    }
    if let Some(height) = args.height {
        settings.height = height;
    }
    if let Some(path) = &args.debug_path {
        settings.debug_view.path = path.0.clone();
    }
    if let Some(buffer) = args.debug_buffer {
        settings.debug_view.buffer = buffer;
    }
    if let Some(light) = args.debug_light {
        settings.debug_view.light_index = light;
    }
    settings.validate()?;
    Ok(settings)
}

fn render(args: RenderArgs) -> Result<()> {
    if args.frames == 0 {
        bail!("--frames must be at least 1");
    }
    let settings = load_settings(&args)?;
    let file = match &args.scene {
        Some(path) => SceneFile::load(path)?,
        None => {
            log::info!("No scene given, rendering the demo scene");
            SceneFile::demo()
        }
    };
    let (scene, selection) = file.build();
    log::info!(
        "Rendering {}x{}, {} layers, {} enabled lights",
        settings.width,
        settings.height,
        settings.max_level_count,
        scene.enabled_lights().count()
    );

    let profiler = Rc::new(LogProfiler::new());
    let mut renderer = Renderer::new(settings.clone())?.with_profiler(Box::new(profiler.clone()));
    renderer.initialize();

    // Selection volumes are scaled by the half extent of the actor bounds.
    let selection_volume = Mesh::cube(1.0);
    let started = Instant::now();
    for _ in 0..args.frames {
        renderer.render_frame(&scene, &file.camera, args.wireframe, &selection, Some(&selection_volume));
    }
    let elapsed = started.elapsed();
    log::info!(
        "Rendered {} frame(s) in {:.1} ms ({} dropped, {} dispatches in the last)",
        args.frames,
        elapsed.as_secs_f64() * 1000.0,
        renderer.dropped_frames(),
        renderer.stats().dispatches
    );

    if args.profile {
        for (event, count, time) in profiler.summary() {
            log::info!(
                "{:?}/{:?} light={:?}: {count} calls, {:.3} ms",
                event.stage,
                event.sub_event,
                event.light_index,
                time.as_secs_f64() * 1000.0
            );
        }
    }

    let frame = renderer
        .last_frame()
        .ok_or_else(|| anyhow!("no frame could be rendered, see the log for the cause"))?;
    if frame.buffer != DebugBuffer::Final {
        log::info!("Writing debug buffer {:?}", frame.buffer);
    }
    if let Some(path) = &args.raw {
        std::fs::write(path, frame.image.as_bytes()).with_context(|| format!("failed to write {}", path.display()))?;
        log::info!("Dumped {}x{} texels to {}", frame.image.width, frame.image.height, path.display());
    }
    let image = post::to_rgba(frame, settings.exposure, settings.antialiasing)?;
    post::save_png(&image, &args.output)?;
    log::info!("Saved {}", args.output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_debug_path() {
        assert_eq!(parse_debug_path("rtr").unwrap(), DebugPath(vec![true, false, true]));
        assert_eq!(parse_debug_path("").unwrap(), DebugPath(Vec::new()));
        assert!(parse_debug_path("rx").is_err());
    }

    #[test]
    fn test_parse_debug_buffer() {
        assert_eq!(parse_debug_buffer("shadow_mask").unwrap(), DebugBuffer::ShadowMask);
        assert!(parse_debug_buffer("nope").is_err());
    }

    #[test]
    fn test_cli_overrides_settings() {
        let cli = Cli::parse_from([
            "prism",
            "render",
            "--width",
            "64",
            "--debug-path",
            "rt",
            "--debug-buffer",
            "hit_albedo",
        ]);
        let Command::Render(args) = cli.command else { panic!("expected render") };
        let settings = load_settings(&args).unwrap();
        assert_eq!(settings.width, 64);
        assert_eq!(settings.debug_view.path, vec![true, false]);
        assert_eq!(settings.debug_view.buffer, DebugBuffer::HitAlbedo);
    }
}
