//! Hot reload of the configuration file.
//!
//! [`ConfigWatch`] puts an inotify watch on the directory holding the
//! configuration file and reports when the file itself was rewritten or
//! moved into place.  The descriptor is non-blocking and registered with
//! the event loop next to the display connection.  Once a read fails the
//! loop drops the watch for good and the configuration simply stops
//! reloading.

use log::debug;
use std::ffi::{CString, OsStr, OsString};
use std::fs::File;
use std::io::{self, Read};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use std::path::Path;

/// Size of the fixed part of `struct inotify_event`.
const EVENT_HEADER_LEN: usize = 16;

/// Possible errors from the configuration watch.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("inotify error: {0}")]
    Io(#[from] io::Error),
    #[error("path {0:?} cannot be watched")]
    InvalidPath(OsString),
    #[error("truncated inotify event at offset {0}")]
    Truncated(usize),
}

/// One decoded inotify record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub mask: u32,
    /// Name of the directory entry the event is about; empty for events on
    /// the directory itself.
    pub name: OsString,
}

/// Watch over the configuration file's directory.
#[derive(Debug)]
pub struct ConfigWatch {
    inotify: File,
    file_name: OsString,
}

impl ConfigWatch {
    /// Start watching the directory of `config_file`.
    pub fn new(config_file: &Path) -> Result<Self, WatchError> {
        let invalid = || WatchError::InvalidPath(config_file.as_os_str().to_owned());
        let file_name = config_file.file_name().ok_or_else(invalid)?.to_owned();
        let dir = match config_file.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let c_dir = CString::new(dir.as_os_str().as_bytes()).map_err(|_| invalid())?;

        // SAFETY: inotify_init1 takes no pointers and returns a new fd or -1.
        let raw = unsafe { libc::inotify_init1(libc::IN_CLOEXEC | libc::IN_NONBLOCK) };
        if raw < 0 {
            return Err(io::Error::last_os_error().into());
        }
        // SAFETY: raw >= 0 was just returned by inotify_init1 and is owned by nobody else.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        // SAFETY: fd is a live inotify descriptor and c_dir is NUL-terminated.
        let wd = unsafe {
            libc::inotify_add_watch(
                fd.as_raw_fd(),
                c_dir.as_ptr(),
                libc::IN_CLOSE_WRITE | libc::IN_MOVED_TO,
            )
        };
        if wd < 0 {
            return Err(io::Error::last_os_error().into());
        }

        debug!("watching {} for {:?}", dir.display(), file_name);
        Ok(Self {
            inotify: File::from(fd),
            file_name,
        })
    }

    /// Drain pending notifications.  Returns `true` when the configuration
    /// file changed.
    pub fn read_events(&self) -> Result<bool, WatchError> {
        let mut changed = false;
        let mut buf = [0u8; 4096];
        loop {
            match (&self.inotify).read(&mut buf) {
                Ok(0) => return Ok(changed),
                Ok(n) => {
                    let events = parse_events(&buf[..n])?;
                    changed |= events.iter().any(|e| e.name == self.file_name);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(changed),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl AsFd for ConfigWatch {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.inotify.as_fd()
    }
}

/// Decode a buffer of `struct inotify_event` records.
pub fn parse_events(buf: &[u8]) -> Result<Vec<WatchEvent>, WatchError> {
    let mut events = Vec::new();
    let mut offset = 0;
    while offset < buf.len() {
        let header = buf
            .get(offset..offset + EVENT_HEADER_LEN)
            .ok_or(WatchError::Truncated(offset))?;
        let field = |i: usize| u32::from_ne_bytes([header[i], header[i + 1], header[i + 2], header[i + 3]]);
        let mask = field(4);
        let len = field(12) as usize;

        let start = offset + EVENT_HEADER_LEN;
        let raw_name = buf
            .get(start..start + len)
            .ok_or(WatchError::Truncated(offset))?;
        let end = raw_name.iter().position(|b| *b == 0).unwrap_or(raw_name.len());
        events.push(WatchEvent {
            mask,
            name: OsStr::from_bytes(&raw_name[..end]).to_owned(),
        });
        offset = start + len;
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn record(mask: u32, name: &str, padded: usize) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&1i32.to_ne_bytes());
        out.extend_from_slice(&mask.to_ne_bytes());
        out.extend_from_slice(&0u32.to_ne_bytes());
        out.extend_from_slice(&(padded as u32).to_ne_bytes());
        let mut bytes = name.as_bytes().to_vec();
        bytes.resize(padded, 0);
        out.extend_from_slice(&bytes);
        out
    }

    #[test]
    fn parses_consecutive_records() {
        let mut buf = record(libc::IN_CLOSE_WRITE, "config.json", 16);
        buf.extend(record(libc::IN_MOVED_TO, "other", 8));
        let events = parse_events(&buf).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].name, OsString::from("config.json"));
        assert_eq!(events[0].mask, libc::IN_CLOSE_WRITE);
        assert_eq!(events[1].name, OsString::from("other"));
    }

    #[test]
    fn directory_events_have_empty_names() {
        let events = parse_events(&record(libc::IN_CLOSE_WRITE, "", 0)).unwrap();
        assert_eq!(events[0].name, OsString::new());
    }

    #[test]
    fn truncated_buffers_are_rejected() {
        let buf = record(libc::IN_CLOSE_WRITE, "config.json", 16);
        assert!(matches!(
            parse_events(&buf[..10]),
            Err(WatchError::Truncated(0))
        ));
        assert!(matches!(
            parse_events(&buf[..20]),
            Err(WatchError::Truncated(0))
        ));
    }

    static TEST_ID: AtomicU32 = AtomicU32::new(0);

    fn tmp_dir() -> std::path::PathBuf {
        let id = TEST_ID.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!("slotwm-watch-{}-{}", std::process::id(), id));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn rewriting_the_file_is_reported() {
        let dir = tmp_dir();
        let path = dir.join("config.json");
        let watch = ConfigWatch::new(&path).unwrap();
        assert!(!watch.read_events().unwrap());

        std::fs::write(dir.join("unrelated"), "x").unwrap();
        assert!(!watch.read_events().unwrap());
        std::fs::write(&path, "{}").unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert!(watch.read_events().unwrap());
        assert!(!watch.read_events().unwrap());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_directory_fails() {
        let path = std::env::temp_dir().join("slotwm-no-such-dir-4c1f/config.json");
        assert!(matches!(ConfigWatch::new(&path), Err(WatchError::Io(_))));
    }
}
