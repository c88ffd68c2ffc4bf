//! Socket side of the headless backend.
//!
//! Binds a Unix stream socket and accepts one connection at a time.  Each
//! line received is parsed as a [`WireMessage`] and sent over a calloop
//! channel, which wakes the event loop on its own.

use super::{HeadlessError, WireMessage};
use calloop::channel::Sender;
use log::{debug, error, info};
use std::io::{BufRead, BufReader};
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};

/// Listener for [`WireMessage`]s on a Unix stream socket.
///
/// Each accepted connection can send any number of messages.  When it
/// closes, the listener waits for the next one.
pub struct SocketListener {
    path: PathBuf,
}

impl SocketListener {
    /// Create a listener for `path`.  The socket file is created by
    /// [`run`](Self::run).
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bind the socket and forward messages to `sink`.
    ///
    /// This method **blocks** until the receiving side goes away.  Run it
    /// on a dedicated thread.
    pub fn run(&mut self, sink: Sender<WireMessage>) -> Result<(), HeadlessError> {
        // Remove stale socket if present.
        let _ = std::fs::remove_file(&self.path);

        let listener = UnixListener::bind(&self.path)?;
        info!("headless display listening on {}", self.path.display());

        for stream in listener.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    error!("accept error: {}", e);
                    continue;
                }
            };
            debug!("client connected");
            for line in BufReader::new(stream).lines() {
                let text = match line {
                    Ok(text) => text,
                    Err(e) => {
                        error!("read error: {}", e);
                        break;
                    }
                };
                if text.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<WireMessage>(&text) {
                    Ok(message) => {
                        debug!("received {:?}", message);
                        if sink.send(message).is_err() {
                            info!("display closed, shutting down listener");
                            let _ = std::fs::remove_file(&self.path);
                            return Ok(());
                        }
                    }
                    Err(e) => error!("bad message {:?}: {}", text, e),
                }
            }
            debug!("client disconnected");
        }
        Ok(())
    }
}

//  Tests

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::DisplayEvent;
    use crate::headless::WindowDescription;
    use crate::registry::WindowType;
    use calloop::channel::{self, Channel, Event};
    use calloop::EventLoop;
    use std::io::Write;
    use std::os::unix::net::UnixStream;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::{Duration, Instant};

    /// Monotonic counter to generate unique socket paths per test.
    static TEST_ID: AtomicU32 = AtomicU32::new(0);

    fn tmp_socket_path() -> PathBuf {
        let id = TEST_ID.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir().join(format!("slotwm-test-{}-{}.sock", std::process::id(), id))
    }

    fn spawn_listener(path: &Path) -> (Channel<WireMessage>, std::thread::JoinHandle<()>) {
        let (tx, rx) = channel::channel();
        let path = path.to_path_buf();
        let handle = std::thread::spawn(move || {
            let mut listener = SocketListener::new(&path);
            let _ = listener.run(tx);
        });
        std::thread::sleep(Duration::from_millis(150));
        (rx, handle)
    }

    /// Dispatch until `expected` messages arrived or two seconds passed.
    fn collect(rx: Channel<WireMessage>, expected: usize) -> Vec<WireMessage> {
        let mut event_loop: EventLoop<Vec<WireMessage>> = EventLoop::try_new().unwrap();
        event_loop
            .handle()
            .insert_source(rx, |event, _, out| {
                if let Event::Msg(message) = event {
                    out.push(message);
                }
            })
            .unwrap();

        let mut out = Vec::new();
        let give_up = Instant::now() + Duration::from_secs(2);
        while out.len() < expected && Instant::now() < give_up {
            event_loop
                .dispatch(Some(Duration::from_millis(50)), &mut out)
                .unwrap();
        }
        out
    }

    #[test]
    fn messages_arrive_in_order() {
        let path = tmp_socket_path();
        let (rx, _) = spawn_listener(&path);

        {
            let mut stream = UnixStream::connect(&path).expect("connect");
            writeln!(
                stream,
                r#"{{"Describe":{{"window":16,"window_type":"Dialog","transient_for":15}}}}"#
            )
            .unwrap();
            writeln!(stream).unwrap();
            writeln!(stream, r#"{{"Event":{{"MapRequest":{{"window":16}}}}}}"#).unwrap();
            stream.shutdown(std::net::Shutdown::Write).unwrap();
        }

        let messages = collect(rx, 2);
        assert_eq!(
            messages,
            vec![
                WireMessage::Describe(WindowDescription {
                    window: 16,
                    window_type: WindowType::Dialog,
                    transient_for: Some(15),
                    pid: None,
                    icon: Vec::new(),
                }),
                WireMessage::Event(DisplayEvent::MapRequest { window: 16 }),
            ]
        );

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn malformed_json_does_not_crash() {
        let path = tmp_socket_path();
        let (rx, _) = spawn_listener(&path);

        {
            let mut stream = UnixStream::connect(&path).expect("connect");
            writeln!(stream, "not json at all").unwrap();
            writeln!(stream, r#"{{"Event":{{"SurfaceDestroyed":{{"window":3}}}}}}"#).unwrap();
            stream.shutdown(std::net::Shutdown::Write).unwrap();
        }

        let messages = collect(rx, 1);
        assert_eq!(
            messages,
            vec![WireMessage::Event(DisplayEvent::SurfaceDestroyed { window: 3 })]
        );

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn listener_stops_when_the_loop_side_is_gone() {
        let path = tmp_socket_path();
        let (rx, handle) = spawn_listener(&path);
        drop(rx);

        {
            let mut stream = UnixStream::connect(&path).expect("connect");
            writeln!(stream, r#"{{"Event":{{"DamageNotify":{{"window":7}}}}}}"#).unwrap();
            stream.shutdown(std::net::Shutdown::Write).unwrap();
        }

        handle.join().unwrap();
        assert!(!path.exists());
    }
}
