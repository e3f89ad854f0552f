// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Byte channels over unnamed pipes and FIFOs.
//
// A single read or write may move fewer bytes than asked; the exact
// variants loop until the request is satisfied, retry on EINTR and report
// end-of-stream as `SyncError::Closed`.

use std::ffi::CString;
use std::fs::OpenOptions;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use crate::shm_region::ShmValue;
use crate::worker::{Context, CANCEL_POLL_INTERVAL};
use crate::{Result, SyncError};

/// Read side of a blocking, ordered byte stream.
pub trait ByteSource {
    /// Fill `buf` completely.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()>;
}

/// Write side of a blocking, ordered byte stream.
///
/// Only write ends implement it:
///
/// ```compile_fail
/// use libsync::ByteSink;
/// let (mut rx, _tx) = libsync::pipe::pipe().unwrap();
/// rx.write_exact(b"x").unwrap();
/// ```
pub trait ByteSink {
    /// Write all of `buf`.
    fn write_exact(&mut self, buf: &[u8]) -> Result<()>;
}

// One read(2), retried on EINTR. Zero means end of stream.
fn read_once(fd: RawFd, buf: &mut [u8]) -> Result<usize> {
    loop {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
        if n >= 0 {
            return Ok(n as usize);
        }
        let e = io::Error::last_os_error();
        if e.kind() != io::ErrorKind::Interrupted {
            return Err(e.into());
        }
    }
}

fn write_once(fd: RawFd, buf: &[u8]) -> Result<usize> {
    loop {
        let n = unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) };
        if n >= 0 {
            return Ok(n as usize);
        }
        let e = io::Error::last_os_error();
        if e.kind() != io::ErrorKind::Interrupted {
            return Err(e.into());
        }
    }
}

fn read_all(fd: RawFd, buf: &mut [u8]) -> Result<()> {
    let requested = buf.len();
    let mut done = 0;
    while done < requested {
        match read_once(fd, &mut buf[done..])? {
            0 => {
                return Err(SyncError::Closed {
                    transferred: done,
                    requested,
                })
            }
            n => done += n,
        }
    }
    Ok(())
}

fn write_all(fd: RawFd, buf: &[u8]) -> Result<()> {
    let requested = buf.len();
    let mut done = 0;
    while done < requested {
        match write_once(fd, &buf[done..]) {
            Ok(0) => break,
            Ok(n) => done += n,
            // The Rust runtime ignores SIGPIPE, so a vanished reader shows up here.
            Err(SyncError::Io(e)) if e.raw_os_error() == Some(libc::EPIPE) => break,
            Err(e) => return Err(e),
        }
    }
    if done < requested {
        return Err(SyncError::Closed {
            transferred: done,
            requested,
        });
    }
    Ok(())
}

/// Read end of a pipe or FIFO.
#[derive(Debug)]
pub struct PipeReader {
    fd: OwnedFd,
}

/// Write end of a pipe or FIFO.
#[derive(Debug)]
pub struct PipeWriter {
    fd: OwnedFd,
}

impl ByteSource for PipeReader {
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        read_all(self.fd.as_raw_fd(), buf)
    }
}

impl ByteSink for PipeWriter {
    fn write_exact(&mut self, buf: &[u8]) -> Result<()> {
        write_all(self.fd.as_raw_fd(), buf)
    }
}

impl PipeReader {
    /// Like [`ByteSource::read_exact`], but the wait for data is a
    /// cancellation point of the calling worker.
    pub fn read_exact_cancellable(&mut self, ctx: &Context, buf: &mut [u8]) -> Result<()> {
        let requested = buf.len();
        let mut done = 0;
        let fd = self.fd.as_raw_fd();
        while done < requested {
            ctx.test_cancel()?;
            if !poll_readable(fd)? {
                continue;
            }
            match read_once(fd, &mut buf[done..])? {
                0 => {
                    return Err(SyncError::Closed {
                        transferred: done,
                        requested,
                    })
                }
                n => done += n,
            }
        }
        Ok(())
    }
}

impl AsRawFd for PipeReader {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl AsRawFd for PipeWriter {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl From<PipeReader> for OwnedFd {
    fn from(r: PipeReader) -> Self {
        r.fd
    }
}

impl From<PipeWriter> for OwnedFd {
    fn from(w: PipeWriter) -> Self {
        w.fd
    }
}

// Waits up to one poll interval. Hang-up counts as readable so the
// following read observes end of stream.
fn poll_readable(fd: RawFd) -> Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let timeout = CANCEL_POLL_INTERVAL.as_millis() as libc::c_int;
    match unsafe { libc::poll(&mut pfd, 1, timeout) } {
        0 => Ok(false),
        n if n > 0 => Ok(pfd.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0),
        _ => {
            let e = io::Error::last_os_error();
            if e.kind() == io::ErrorKind::Interrupted {
                return Ok(false);
            }
            Err(e.into())
        }
    }
}

/// Create an unnamed pipe. Both ends are close-on-exec.
pub fn pipe() -> Result<(PipeReader, PipeWriter)> {
    let mut fds = [0 as libc::c_int; 2];

    #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
    let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };

    #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
    let rc = unsafe {
        let rc = libc::pipe(fds.as_mut_ptr());
        if rc == 0 {
            libc::fcntl(fds[0], libc::F_SETFD, libc::FD_CLOEXEC);
            libc::fcntl(fds[1], libc::F_SETFD, libc::FD_CLOEXEC);
        }
        rc
    };

    if rc != 0 {
        return Err(io::Error::last_os_error().into());
    }
    // Safety: pipe(2) just handed us two fresh descriptors we alone own.
    let (r, w) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    Ok((PipeReader { fd: r }, PipeWriter { fd: w }))
}

/// A named pipe in the filesystem.
#[derive(Debug, Clone)]
pub struct Fifo {
    path: PathBuf,
}

impl Fifo {
    /// Create the FIFO with permission bits `mode`. An existing entry at
    /// `path` is accepted as is.
    pub fn create(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let c = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| SyncError::invalid(e.to_string()))?;
        if unsafe { libc::mkfifo(c.as_ptr(), mode as libc::mode_t) } != 0 {
            let e = io::Error::last_os_error();
            if e.raw_os_error() != Some(libc::EEXIST) {
                return Err(e.into());
            }
            tracing::debug!(path = %path.display(), "fifo already exists");
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the read end. Blocks until a writer opens the FIFO.
    pub fn open_reader(&self) -> Result<PipeReader> {
        let f = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_CLOEXEC)
            .open(&self.path)?;
        Ok(PipeReader { fd: f.into() })
    }

    /// Open the write end. Blocks until a reader opens the FIFO.
    pub fn open_writer(&self) -> Result<PipeWriter> {
        let f = OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_CLOEXEC)
            .open(&self.path)?;
        Ok(PipeWriter { fd: f.into() })
    }

    /// Unlink the FIFO from the filesystem. Open ends keep working.
    pub fn remove(self) -> Result<()> {
        std::fs::remove_file(&self.path)?;
        Ok(())
    }
}

/// Read one plain value in native byte order.
pub fn read_value<T: ShmValue>(ch: &mut impl ByteSource) -> Result<T> {
    let mut buf = vec![0u8; mem::size_of::<T>()];
    ch.read_exact(&mut buf)?;
    // Safety: `ShmValue` types accept any bit pattern and `buf` is exactly
    // one value long.
    Ok(unsafe { std::ptr::read_unaligned(buf.as_ptr().cast::<T>()) })
}

/// Write one plain value in native byte order.
pub fn write_value<T: ShmValue>(ch: &mut impl ByteSink, value: T) -> Result<()> {
    // Safety: `ShmValue` types are padding-free integers.
    let bytes = unsafe {
        std::slice::from_raw_parts((&value as *const T).cast::<u8>(), mem::size_of::<T>())
    };
    ch.write_exact(bytes)
}

/// Write a length-prefixed run of values: an `i32` count, then the values.
pub fn write_values<T: ShmValue>(ch: &mut impl ByteSink, values: &[T]) -> Result<()> {
    let count = i32::try_from(values.len())
        .map_err(|_| SyncError::invalid(format!("{} values exceed an i32 count", values.len())))?;
    write_value(ch, count)?;
    values.iter().try_for_each(|v| write_value(ch, *v))
}

/// Read a run written by [`write_values`].
pub fn read_values<T: ShmValue>(ch: &mut impl ByteSource) -> Result<Vec<T>> {
    let count: i32 = read_value(ch)?;
    let count = usize::try_from(count)
        .map_err(|_| SyncError::invalid(format!("negative element count {count}")))?;
    (0..count).map(|_| read_value(ch)).collect()
}
