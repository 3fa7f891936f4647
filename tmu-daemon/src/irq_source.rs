//! UIO interrupt source
//!
//! Each TMU exposed through UIO gets one listener thread. A blocking read of
//! the device node returns the interrupt count; the listener then fires the
//! device's bridge. Writing a 32-bit 0 or 1 to the node masks or unmasks the
//! line, which is what the bridge does through [`UioLine`].

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, trace, warn};

use tmu_core::{FireOutcome, IrqHandle, IrqLine};

/// How often a listener re-checks the shutdown flag
const POLL_TIMEOUT_MS: i32 = 500;

/// Interrupt line control through a UIO node
#[derive(Debug)]
pub struct UioLine {
    path: PathBuf,
    file: File,
}

impl UioLine {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    fn control(&self, enable: bool) {
        let value: u32 = enable.into();
        if let Err(e) = (&self.file).write_all(&value.to_ne_bytes()) {
            warn!(path = %self.path.display(), enable, error = %e, "UIO irq control write failed");
        }
    }
}

impl IrqLine for UioLine {
    fn disable_nosync(&self) {
        self.control(false);
    }

    fn enable(&self) {
        self.control(true);
    }
}

/// Wait for the node to become readable, or time out
fn wait_readable(file: &File, timeout_ms: i32) -> io::Result<bool> {
    let mut pfd = libc::pollfd {
        fd: file.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    };
    // SAFETY: pfd is a valid, initialized pollfd that outlives the call, and
    // nfds is 1 to match.
    let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }
    Ok(rc > 0 && pfd.revents & libc::POLLIN != 0)
}

/// Start a listener feeding `handle` from the UIO node at `path`
pub fn spawn_listener(
    name: &str,
    path: &Path,
    handle: IrqHandle,
    shutdown: Arc<AtomicBool>,
) -> io::Result<JoinHandle<()>> {
    let mut file = File::open(path)?;
    let name = name.to_string();
    let path = path.to_path_buf();

    thread::Builder::new()
        .name(format!("tmu-uio-{}", name))
        .spawn(move || {
            debug!(device = %name, path = %path.display(), "UIO listener started");
            let mut count = [0u8; 4];
            while !shutdown.load(Ordering::SeqCst) {
                match wait_readable(&file, POLL_TIMEOUT_MS) {
                    Ok(false) => continue,
                    Ok(true) => {}
                    Err(e) => {
                        error!(device = %name, error = %e, "UIO poll failed, listener stopping");
                        break;
                    }
                }
                if let Err(e) = file.read_exact(&mut count) {
                    error!(device = %name, error = %e, "UIO read failed, listener stopping");
                    break;
                }
                trace!(device = %name, count = u32::from_ne_bytes(count), "UIO interrupt");
                if handle.fire() == FireOutcome::Ignored {
                    break;
                }
            }
            debug!(device = %name, "UIO listener stopped");
        })
}
