//! System-container runtime auto-detection.
//!
//! Known socket paths are probed in priority order: Incus first, then the
//! snap-installed LXD, then native LXD. A candidate counts only if the path
//! exists, is a socket, and accepts a Unix connection within two seconds.
//! The first hit pins the runtime for the process lifetime.

use std::os::unix::fs::FileTypeExt;
use std::path::Path;
use std::sync::RwLock;
use std::time::Duration;

use gauntlet_common::errors::{HarnessError, Result};

/// The detected system-container runtime flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Runtime {
    Lxd,
    Incus,
}

impl Runtime {
    /// The CLI binary driving this runtime.
    pub fn binary(&self) -> &'static str {
        match self {
            Runtime::Lxd => "lxc",
            Runtime::Incus => "incus",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub runtime: Runtime,
    pub socket_path: String,
}

const CANDIDATES: [(&str, Runtime); 3] = [
    ("/var/lib/incus/unix.socket", Runtime::Incus),
    ("/var/snap/lxd/common/lxd/unix.socket", Runtime::Lxd),
    ("/var/lib/lxd/unix.socket", Runtime::Lxd),
];

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

static CACHE: RwLock<Option<Detection>> = RwLock::new(None);

/// Detect which runtime is available, caching the result for the process.
pub fn detect_runtime() -> Result<Detection> {
    detect_in(&CACHE, &CANDIDATES, |path| socket_accessible(path))
}

fn detect_in(
    cache: &RwLock<Option<Detection>>,
    candidates: &[(&str, Runtime)],
    probe: impl Fn(&Path) -> bool,
) -> Result<Detection> {
    if let Some(cached) = cache.read().unwrap().clone() {
        return Ok(cached);
    }

    let mut cache = cache.write().unwrap();
    // Another thread may have won the race for the write lock.
    if let Some(cached) = cache.clone() {
        return Ok(cached);
    }

    for (path, runtime) in candidates {
        if probe(Path::new(path)) {
            let detection = Detection {
                runtime: *runtime,
                socket_path: path.to_string(),
            };
            tracing::debug!(runtime = ?detection.runtime, socket = path, "detected system-container runtime");
            *cache = Some(detection.clone());
            return Ok(detection);
        }
    }

    Err(HarnessError::execution(format!(
        "no system-container runtime detected; checked paths: {}",
        candidates
            .iter()
            .map(|(p, _)| *p)
            .collect::<Vec<_>>()
            .join(", ")
    )))
}

/// Classify an explicitly configured socket path without probing.
pub fn runtime_for_socket(path: &str) -> Runtime {
    if path.contains("incus") {
        Runtime::Incus
    } else {
        Runtime::Lxd
    }
}

fn socket_accessible(path: &Path) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    if !metadata.file_type().is_socket() {
        return false;
    }

    // A dangling socket file is useless; require a live listener.
    match connect_with_timeout(path) {
        Ok(()) => true,
        Err(_) => false,
    }
}

/// `UnixStream` has no native connect timeout, so the attempt runs on a
/// scratch thread bounded by the probe deadline.
fn connect_with_timeout(path: &Path) -> std::io::Result<()> {
    let path = path.to_path_buf();
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let result = std::os::unix::net::UnixStream::connect(&path).map(drop);
        let _ = tx.send(result);
    });

    match rx.recv_timeout(CONNECT_TIMEOUT) {
        Ok(result) => result,
        Err(_) => Err(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "socket connect timed out",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;

    #[test]
    fn socket_accessible_requires_a_listener() {
        let dir = tempfile::tempdir().unwrap();
        let sock_path = dir.path().join("live.socket");
        let _listener = UnixListener::bind(&sock_path).unwrap();
        assert!(socket_accessible(&sock_path));
    }

    #[test]
    fn plain_files_and_missing_paths_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("not-a-socket");
        std::fs::write(&file_path, b"x").unwrap();
        assert!(!socket_accessible(&file_path));
        assert!(!socket_accessible(&dir.path().join("missing")));
    }

    #[test]
    fn detection_result_is_cached_after_first_success() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let cache = RwLock::new(None);
        let probes = AtomicUsize::new(0);
        let candidates = [("/tmp/first.socket", Runtime::Incus)];

        let probe = |_: &Path| {
            probes.fetch_add(1, Ordering::SeqCst);
            true
        };

        let first = detect_in(&cache, &candidates, probe).unwrap();
        let second = detect_in(&cache, &candidates, probe).unwrap();
        assert_eq!(first, second);
        assert_eq!(probes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn explicit_socket_paths_classify_by_name() {
        assert_eq!(runtime_for_socket("/var/lib/incus/unix.socket"), Runtime::Incus);
        assert_eq!(
            runtime_for_socket("/var/snap/lxd/common/lxd/unix.socket"),
            Runtime::Lxd
        );
    }
}
