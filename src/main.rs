//! Entry point for the **slotwm** window manager.
//!
//! Loads the configuration, opens the headless display on its socket and
//! runs the event loop on the main thread.
//!
//! ```text
//! slotwm [--socket PATH] [--output WxH+X+Y]...
//! ```

use log::{error, info, warn};
use slotwm::config::Config;
use slotwm::event_loop;
use slotwm::geometry::Rect;
use slotwm::headless::display::HeadlessDisplay;
use slotwm::launch::ProcessLauncher;
use slotwm::session::Session;
use slotwm::watch::ConfigWatch;
use std::path::{Path, PathBuf};

/// Default socket path for the headless display.
fn default_socket_path() -> PathBuf {
    let runtime = std::env::var("XDG_RUNTIME_DIR").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(runtime).join("slotwm.sock")
}

/// Resolve the config directory (`$XDG_CONFIG_HOME/slotwm`).
fn config_dir() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME").unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        format!("{}/.config", home)
    });
    PathBuf::from(base).join("slotwm")
}

/// Load the config from `path`, falling back to compiled-in defaults.
fn load_config(path: &Path) -> Config {
    match Config::load(path) {
        Ok(cfg) => {
            info!("loaded config from {}", path.display());
            cfg
        }
        Err(e) => {
            info!("no usable config file ({}), using defaults", e);
            Config::default()
        }
    }
}

/// Parse an output given as `WxH+X+Y`.
fn parse_output(spec: &str) -> Option<Rect> {
    let (size, pos) = spec.split_once('+')?;
    let (w, h) = size.split_once('x')?;
    let (x, y) = pos.split_once('+')?;
    Some(Rect::new(
        x.parse().ok()?,
        y.parse().ok()?,
        w.parse().ok()?,
        h.parse().ok()?,
    ))
}

#[derive(Debug, Default, PartialEq)]
struct Args {
    socket: Option<PathBuf>,
    outputs: Vec<Rect>,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Args, String> {
    let mut parsed = Args::default();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--socket" => {
                let path = args.next().ok_or("--socket needs a path")?;
                parsed.socket = Some(PathBuf::from(path));
            }
            "--output" => {
                let spec = args.next().ok_or("--output needs WxH+X+Y")?;
                let area = parse_output(&spec).ok_or_else(|| format!("bad output {:?}", spec))?;
                parsed.outputs.push(area);
            }
            other => return Err(format!("unknown argument {:?}", other)),
        }
    }
    Ok(parsed)
}

//  Main

fn main() {
    env_logger::init();

    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            error!("{}", e);
            std::process::exit(2);
        }
    };

    let dir = config_dir();
    if let Err(e) = std::fs::create_dir_all(dir.join("commands")) {
        warn!("cannot create {}: {}", dir.display(), e);
    }
    let config_path = dir.join("config.json");
    let config = load_config(&config_path);

    let watch = match ConfigWatch::new(&config_path) {
        Ok(w) => Some(w),
        Err(e) => {
            warn!("config hot reload disabled: {}", e);
            None
        }
    };

    let socket = args.socket.unwrap_or_else(default_socket_path);
    let display = match HeadlessDisplay::spawn(&socket, args.outputs) {
        Ok(d) => d,
        Err(e) => {
            error!("failed to open display: {}", e);
            std::process::exit(1);
        }
    };

    let mut session = match Session::new(display, ProcessLauncher::new(), config, dir) {
        Ok(s) => s,
        Err(e) => {
            error!("failed to start session: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = event_loop::run(&mut session, watch, &config_path) {
        error!("event loop failed: {}", e);
        std::process::exit(1);
    }
    info!("slotwm exiting");
}
