//! The single-threaded main loop.
//!
//! Built on a calloop [`EventLoop`] whose data is the [`Session`].  The
//! display descriptor (or the display's feed channel), the configuration
//! watch and a one second idle timer are registered as sources.  Each turn
//! reaps children, dispatches without blocking when events are already
//! queued, handles every queued event, then runs the deadline check and
//! one paint pass.  Errors from individual events are logged; nothing short
//! of the quit chord ends the loop.

use crate::config::Config;
use crate::display::DisplayConnection;
use crate::launch::Launcher;
use crate::session::Session;
use crate::watch::ConfigWatch;
use calloop::channel::Event;
use calloop::generic::Generic;
use calloop::timer::{TimeoutAction, Timer};
use calloop::{EventLoop, Interest, Mode, PostAction};
use log::{debug, error, info, warn};
use std::io;
use std::path::Path;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Interval of the idle menu refresh (clock).
pub const IDLE_REFRESH: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum LoopError {
    #[error("event loop: {0}")]
    Calloop(#[from] calloop::Error),
    #[error("i/o: {0}")]
    Io(#[from] io::Error),
}

/// Run `session` until the quit chord is pressed.
///
/// `watch` reports rewrites of `config_path`; a rewrite reloads the
/// configuration, keeping the old one when the new file does not parse.
/// Fails only when the loop itself cannot be set up.
pub fn run<D: DisplayConnection, L: Launcher>(
    session: &mut Session<D, L>,
    watch: Option<ConfigWatch>,
    config_path: &Path,
) -> Result<(), LoopError> {
    let mut event_loop: EventLoop<Session<D, L>> = EventLoop::try_new()?;
    let handle = event_loop.handle();

    if let Some(fd) = session.display().readiness_fd() {
        // Readiness only wakes the dispatch; the loop body reads the events.
        let fd = fd.try_clone_to_owned()?;
        handle
            .insert_source(
                Generic::new(fd, Interest::READ, Mode::Level),
                |_, _, _| Ok(PostAction::Continue),
            )
            .map_err(|e| e.error)?;
    }

    if let Some(feed) = session.display_mut().take_feed() {
        handle
            .insert_source(feed, |event, _, session: &mut Session<D, L>| match event {
                Event::Msg(message) => session.display_mut().deliver(message),
                Event::Closed => warn!("display feed closed"),
            })
            .map_err(|e| e.error)?;
    }

    if let Some(watch) = watch {
        let path = config_path.to_path_buf();
        handle
            .insert_source(
                Generic::new(watch, Interest::READ, Mode::Level),
                move |_, watch, session: &mut Session<D, L>| match watch.read_events() {
                    Ok(changed) => {
                        if changed {
                            reload(session, &path);
                        }
                        Ok(PostAction::Continue)
                    }
                    Err(e) => {
                        warn!("configuration watch disabled: {}", e);
                        Ok(PostAction::Remove)
                    }
                },
            )
            .map_err(|e| e.error)?;
    }

    handle
        .insert_source(
            Timer::from_duration(IDLE_REFRESH),
            |_, _, session: &mut Session<D, L>| {
                session.on_idle();
                TimeoutAction::ToDuration(IDLE_REFRESH)
            },
        )
        .map_err(|e| e.error)?;

    info!("entering event loop");
    while !session.quit_requested() {
        session.reap();

        let timeout = dispatch_timeout(
            session.display_mut().has_pending(),
            session.next_deadline(),
            Instant::now(),
        );
        if let Err(e) = event_loop.dispatch(timeout, session) {
            warn!("dispatch failed: {}", e);
        }

        while let Some(event) = session.display_mut().next_event() {
            debug!("event {:?}", event);
            if let Err(e) = session.handle(event) {
                error!("event handling error: {}", e);
            }
        }

        let now = Instant::now();
        session.tick(now);
        if let Err(e) = session.paint(now) {
            error!("paint error: {}", e);
        }
    }
    info!("quit requested, leaving event loop");
    Ok(())
}

fn reload<D: DisplayConnection, L: Launcher>(session: &mut Session<D, L>, path: &Path) {
    match Config::load(path) {
        Ok(config) => {
            info!("reloaded config from {}", path.display());
            session.set_config(config);
        }
        Err(e) => warn!("keeping previous config: {}", e),
    }
}

/// How long one dispatch may block.
///
/// Queued events must not wait behind a blocking dispatch, so `pending`
/// means zero.  Otherwise the next menu redraw deadline bounds the wait;
/// `None` blocks until a source fires (the idle timer at the latest).
pub fn dispatch_timeout(
    pending: bool,
    deadline: Option<Instant>,
    now: Instant,
) -> Option<Duration> {
    if pending {
        return Some(Duration::ZERO);
    }
    deadline.map(|at| at.saturating_duration_since(now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::{DisplayEvent, Key, Modifiers};
    use crate::testing::{Cmd, RecorderDisplay, RecorderLauncher};
    use std::path::PathBuf;

    fn quit_chord() -> DisplayEvent {
        DisplayEvent::KeyPress {
            keycode: 24,
            key: Key::Char('q'),
            modifiers: Modifiers::CONTROL | Modifiers::ALT,
            text: String::new(),
            time: 1,
        }
    }

    fn session(display: RecorderDisplay) -> Session<RecorderDisplay, RecorderLauncher> {
        Session::new(
            display,
            RecorderLauncher::new(),
            Config::default(),
            PathBuf::from("/nonexistent/slotwm"),
        )
        .unwrap()
    }

    fn no_config() -> &'static Path {
        Path::new("/nonexistent/slotwm/config.json")
    }

    #[test]
    fn pending_events_never_block() {
        let now = Instant::now();
        assert_eq!(dispatch_timeout(true, None, now), Some(Duration::ZERO));
        assert_eq!(
            dispatch_timeout(true, Some(now + Duration::from_secs(5)), now),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn deadline_bounds_the_wait() {
        let now = Instant::now();
        assert_eq!(
            dispatch_timeout(false, Some(now + Duration::from_millis(250)), now),
            Some(Duration::from_millis(250))
        );
        assert_eq!(
            dispatch_timeout(false, Some(now), now + Duration::from_millis(5)),
            Some(Duration::ZERO)
        );
        assert_eq!(dispatch_timeout(false, None, now), None);
    }

    #[test]
    fn queued_events_are_handled_before_quitting() {
        let mut display = RecorderDisplay::new();
        display.push_event(DisplayEvent::SurfaceCreated {
            window: 0x10,
            geometry: crate::geometry::Rect::new(0, 0, 300, 200),
            override_redirect: false,
        });
        display.push_event(DisplayEvent::MapRequest { window: 0x10 });
        display.push_event(quit_chord());
        let mut s = session(display);

        run(&mut s, None, no_config()).unwrap();

        assert!(s.quit_requested());
        assert!(s.registry().by_native(0x10).is_some());
        assert!(s.display().maps().contains(&0x10));
        assert!(s.display().log.contains(&Cmd::Flush));
    }

    #[test]
    fn flush_failures_do_not_stop_the_loop() {
        let mut display = RecorderDisplay::new();
        display.fail_flush = true;
        display.push_event(DisplayEvent::SurfaceDestroyed { window: 0x99 });
        display.push_event(quit_chord());
        let mut s = session(display);

        run(&mut s, None, no_config()).unwrap();
        assert!(s.quit_requested());
    }

    #[test]
    fn one_flush_per_turn() {
        let mut display = RecorderDisplay::new();
        display.push_event(quit_chord());
        let mut s = session(display);
        s.display_mut().take_log();

        run(&mut s, None, no_config()).unwrap();
        let flushes = s.display().log.iter().filter(|c| **c == Cmd::Flush).count();
        assert!(flushes <= 1, "flushed {} times in one turn", flushes);
    }

    #[test]
    fn feed_wakes_a_blocked_loop() {
        let mut display = RecorderDisplay::new();
        let feed = display.feed();
        let mut s = session(display);

        let sender = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            feed.send(DisplayEvent::SurfaceCreated {
                window: 0x20,
                geometry: crate::geometry::Rect::new(0, 0, 300, 200),
                override_redirect: false,
            })
            .unwrap();
            feed.send(DisplayEvent::MapRequest { window: 0x20 }).unwrap();
            feed.send(quit_chord()).unwrap();
        });

        run(&mut s, None, no_config()).unwrap();
        sender.join().unwrap();

        assert!(s.quit_requested());
        assert!(s.registry().by_native(0x20).is_some());
    }

    #[test]
    fn config_rewrite_reloads_the_session() {
        let dir = std::env::temp_dir().join(format!("slotwm-loop-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        let watch = ConfigWatch::new(&path).unwrap();

        let mut display = RecorderDisplay::new();
        let feed = display.feed();
        let mut s = session(display);
        assert_eq!(s.config().compositor.menu_refresh_ms, 1000);

        let writer = {
            let path = path.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(100));
                std::fs::write(&path, r#"{ "compositor": { "menu_refresh_ms": 250 } }"#).unwrap();
                std::thread::sleep(Duration::from_millis(200));
                feed.send(quit_chord()).unwrap();
            })
        };

        run(&mut s, Some(watch), &path).unwrap();
        writer.join().unwrap();

        assert_eq!(s.config().compositor.menu_refresh_ms, 250);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
