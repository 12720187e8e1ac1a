use std::io;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::InfillError;
use crate::supervisor::events::TerminationNotifier;

/// Cap on captured stderr per process lifetime.
pub const MAX_STDERR_BYTES: usize = 2 * 1024 * 1024; // 2MB

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    MacOs,
    Linux,
}

impl Platform {
    /// Platform this binary was built for. Unix flavours other than macOS use
    /// the Linux path.
    pub fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else if cfg!(target_os = "macos") {
            Self::MacOs
        } else {
            Self::Linux
        }
    }
}

/// Platform-specific launch and teardown of the inference server.
///
/// Implementations never block: slow work (waiting on the child, running
/// `taskkill` or `osascript`) happens on spawned tasks. Must be called from
/// within a tokio runtime.
pub trait ProcessBackend: Send + Sync {
    fn platform(&self) -> Platform;

    /// Start `command`. Termination events, if the platform observes them, go to `notifier`.
    fn launch(
        &self,
        command: &str,
        notifier: &TerminationNotifier,
    ) -> Result<ProcessHandle, InfillError>;

    /// Stop whatever `handle` refers to. Failures are logged, never returned.
    fn terminate(&self, handle: ProcessHandle);
}

/// Everything the supervisor knows about one launched server.
#[derive(Debug)]
pub struct ProcessHandle {
    platform: Platform,
    pid: Option<u32>,
    stderr: StderrBuffer,
    exited: CancellationToken,
}

impl ProcessHandle {
    pub fn new(platform: Platform, pid: Option<u32>) -> Self {
        Self {
            platform,
            pid,
            stderr: StderrBuffer::default(),
            exited: CancellationToken::new(),
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn stderr(&self) -> &StderrBuffer {
        &self.stderr
    }

    /// Cancelled once the process has been reaped.
    pub fn exit_marker(&self) -> CancellationToken {
        self.exited.clone()
    }

    pub fn has_exited(&self) -> bool {
        self.exited.is_cancelled()
    }
}

/// Accumulates a child's stderr. Shared between the reader task and the handle.
#[derive(Clone, Debug, Default)]
pub struct StderrBuffer {
    inner: Arc<Mutex<String>>,
}

impl StderrBuffer {
    pub fn append(&self, text: &str) {
        let mut buf = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let room = MAX_STDERR_BYTES.saturating_sub(buf.len());
        if room == 0 {
            return;
        }
        if text.len() <= room {
            buf.push_str(text);
        } else {
            let mut end = room;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            buf.push_str(&text[..end]);
        }
    }

    /// Return the captured text and reset the buffer.
    pub fn take(&self) -> String {
        std::mem::take(&mut *self.inner.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).is_empty()
    }
}

/// Read a pipe to EOF into `buffer`.
pub(crate) fn collect_stderr<R>(mut pipe: R, buffer: StderrBuffer) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = vec![0u8; 8 * 1024];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => buffer.append(&String::from_utf8_lossy(&chunk[..n])),
                Err(e) => {
                    tracing::warn!("stderr pipe read error: {e}");
                    break;
                }
            }
        }
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupSignal {
    Terminate,
    Kill,
}

/// Signal every process in the group led by `pid`.
#[cfg(unix)]
pub(crate) fn signal_group(pid: u32, signal: GroupSignal) -> io::Result<()> {
    let signo = match signal {
        GroupSignal::Terminate => libc::SIGTERM,
        GroupSignal::Kill => libc::SIGKILL,
    };
    let rc = unsafe { libc::kill(-(pid as i32), signo) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
pub(crate) fn signal_group(_pid: u32, _signal: GroupSignal) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "process group signals are not available on this platform",
    ))
}

/// True when the error means the target no longer exists.
pub(crate) fn is_no_such_process(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        err.raw_os_error() == Some(libc::ESRCH)
    }
    #[cfg(not(unix))]
    {
        let _ = err;
        false
    }
}
