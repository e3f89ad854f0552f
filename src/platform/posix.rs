// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// POSIX named shared memory and the process-shared mutex that lives in it.
//
// Segment layout: user bytes, padded to 4, then an `AtomicI32` counting the
// handles mapping the segment. The last handle to unmap unlinks the name.

use std::collections::HashMap;
use std::ffi::CString;
use std::io;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;
#[cfg(not(target_os = "macos"))]
use std::time::{SystemTime, UNIX_EPOCH};

use crate::shm_name::make_shm_name;
use crate::{Deadline, Result, SyncError};

const REF_ALIGN: usize = mem::align_of::<AtomicI32>();
const PERMS: libc::mode_t = 0o666;

// How long an opener waits for the creator to size a fresh segment.
const SIZE_WAIT: Duration = Duration::from_secs(5);

/// Mapped bytes needed for `user_size` bytes plus the trailing counter.
pub(crate) fn segment_size(user_size: usize) -> usize {
    user_size.div_ceil(REF_ALIGN) * REF_ALIGN + mem::size_of::<AtomicI32>()
}

/// How a segment is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShmMode {
    Create,
    Open,
    CreateOrOpen,
}

fn c_name(name: &str) -> io::Result<CString> {
    CString::new(make_shm_name(name)).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

// Mapping an object before its creator has run `ftruncate` faults on first
// touch, so openers wait until it is at least `len` bytes.
fn await_size(fd: libc::c_int, len: usize) -> io::Result<()> {
    let deadline = Deadline::after(SIZE_WAIT);
    loop {
        let mut st: libc::stat = unsafe { mem::zeroed() };
        if unsafe { libc::fstat(fd, &mut st) } != 0 {
            return Err(io::Error::last_os_error());
        }
        if st.st_size >= 0 && st.st_size as u64 >= len as u64 {
            return Ok(());
        }
        if deadline.is_elapsed() {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("shm object is {} bytes, expected at least {len}", st.st_size),
            ));
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}

fn shm_open(name: &CString, flags: libc::c_int) -> io::Result<libc::c_int> {
    let fd = unsafe { libc::shm_open(name.as_ptr(), flags, PERMS as libc::c_uint) };
    if fd == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

/// A mapped named shared-memory segment.
pub struct PlatformShm {
    base: *mut u8,
    mapped: usize,
    user_size: usize,
    name: String,
    creator: bool,
}

// Safety: the mapping is process-shared; access to its bytes is
// synchronized by whoever uses them.
unsafe impl Send for PlatformShm {}
unsafe impl Sync for PlatformShm {}

impl PlatformShm {
    pub fn acquire(name: &str, user_size: usize, mode: ShmMode) -> io::Result<Self> {
        if name.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty shm name"));
        }
        if user_size == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "zero-sized shm segment"));
        }
        let cname = c_name(name)?;
        let exclusive = libc::O_RDWR | libc::O_CREAT | libc::O_EXCL;

        // Only the process that created the object sizes it; truncating an
        // existing object can wipe its contents on some systems.
        let (fd, fresh) = match mode {
            ShmMode::Create => (shm_open(&cname, exclusive)?, true),
            ShmMode::Open => (shm_open(&cname, libc::O_RDWR)?, false),
            ShmMode::CreateOrOpen => match shm_open(&cname, exclusive) {
                Ok(fd) => (fd, true),
                Err(e) if e.raw_os_error() == Some(libc::EEXIST) => {
                    (shm_open(&cname, libc::O_RDWR)?, false)
                }
                Err(e) => return Err(e),
            },
        };

        unsafe { libc::fchmod(fd, PERMS) };
        let mapped = segment_size(user_size);
        if fresh && unsafe { libc::ftruncate(fd, mapped as libc::off_t) } != 0 {
            let e = io::Error::last_os_error();
            unsafe {
                libc::close(fd);
                libc::shm_unlink(cname.as_ptr());
            }
            return Err(e);
        }
        if !fresh {
            if let Err(e) = await_size(fd, mapped) {
                unsafe { libc::close(fd) };
                return Err(e);
            }
        }

        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                mapped,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        unsafe { libc::close(fd) };
        if base == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        let mut shm = Self {
            base: base.cast(),
            mapped,
            user_size,
            name: make_shm_name(name),
            creator: false,
        };
        shm.creator = shm.refs().fetch_add(1, Ordering::AcqRel) == 0;
        Ok(shm)
    }

    fn refs(&self) -> &AtomicI32 {
        // Safety: `base` maps `mapped` bytes and the counter sits, aligned,
        // in the last four of them for as long as `self` is alive.
        unsafe { &*(self.base.add(self.mapped - mem::size_of::<AtomicI32>()) as *const AtomicI32) }
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.base
    }

    pub fn mapped_size(&self) -> usize {
        self.mapped
    }

    pub fn user_size(&self) -> usize {
        self.user_size
    }

    /// Name as passed to `shm_open`, with its leading '/'.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this handle was the first to map the segment.
    pub fn is_creator(&self) -> bool {
        self.creator
    }

    pub fn ref_count(&self) -> i32 {
        self.refs().load(Ordering::Acquire)
    }

    pub fn unlink(&self) {
        if let Ok(c) = CString::new(self.name.as_bytes()) {
            unsafe { libc::shm_unlink(c.as_ptr()) };
        }
    }

    pub fn unlink_by_name(name: &str) {
        if let Ok(c) = c_name(name) {
            unsafe { libc::shm_unlink(c.as_ptr()) };
        }
    }
}

impl Drop for PlatformShm {
    fn drop(&mut self) {
        let prev = self.refs().fetch_sub(1, Ordering::AcqRel);
        unsafe { libc::munmap(self.base.cast(), self.mapped) };
        if prev <= 1 {
            self.unlink();
        }
    }
}

// Every handle to a named mutex inside one process shares one mapping:
// some pthread implementations tie a mutex to the address it was
// initialised at.

struct CachedShm {
    shm: PlatformShm,
    users: AtomicUsize,
    // Address of the local handle holding the mutex through a scoped
    // access, or 0.
    scope: AtomicUsize,
}

type ShmCache = Mutex<HashMap<String, Arc<CachedShm>>>;

fn mutex_cache() -> MutexGuard<'static, HashMap<String, Arc<CachedShm>>> {
    static CACHE: OnceLock<ShmCache> = OnceLock::new();
    CACHE
        .get_or_init(ShmCache::default)
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

fn check(eno: libc::c_int) -> io::Result<()> {
    if eno != 0 {
        return Err(io::Error::from_raw_os_error(eno));
    }
    Ok(())
}

#[cfg(not(target_os = "macos"))]
extern "C" {
    fn pthread_mutexattr_setrobust(
        attr: *mut libc::pthread_mutexattr_t,
        robustness: libc::c_int,
    ) -> libc::c_int;
    fn pthread_mutex_consistent(mutex: *mut libc::pthread_mutex_t) -> libc::c_int;
    fn pthread_mutex_timedlock(
        mutex: *mut libc::pthread_mutex_t,
        abstime: *const libc::timespec,
    ) -> libc::c_int;
}

#[cfg(not(target_os = "macos"))]
const PTHREAD_MUTEX_ROBUST: libc::c_int = 1;

/// Initialise a process-shared, robust, error-checking mutex at `mtx`.
///
/// # Safety
/// `mtx` must point to writable memory large enough for a `pthread_mutex_t`
/// that no other thread is using yet.
unsafe fn init_mutex(mtx: *mut libc::pthread_mutex_t) -> io::Result<()> {
    ptr::write_bytes(mtx, 0, 1);
    let mut attr: libc::pthread_mutexattr_t = mem::zeroed();
    check(libc::pthread_mutexattr_init(&mut attr))?;
    let configured = (|| {
        check(libc::pthread_mutexattr_setpshared(
            &mut attr,
            libc::PTHREAD_PROCESS_SHARED,
        ))?;
        check(libc::pthread_mutexattr_settype(
            &mut attr,
            libc::PTHREAD_MUTEX_ERRORCHECK,
        ))?;
        #[cfg(not(target_os = "macos"))]
        check(pthread_mutexattr_setrobust(&mut attr, PTHREAD_MUTEX_ROBUST))?;
        check(libc::pthread_mutex_init(mtx, &attr))
    })();
    libc::pthread_mutexattr_destroy(&mut attr);
    configured
}

/// `pthread_mutex_t` in a named shared-memory segment.
pub struct PlatformMutex {
    cached: Arc<CachedShm>,
    name: String,
}

impl PlatformMutex {
    pub fn open(name: &str) -> io::Result<Self> {
        let mut cache = mutex_cache();
        if let Some(hit) = cache.get(name) {
            hit.users.fetch_add(1, Ordering::Relaxed);
            return Ok(Self {
                cached: Arc::clone(hit),
                name: name.to_string(),
            });
        }
        let shm = PlatformShm::acquire(
            name,
            mem::size_of::<libc::pthread_mutex_t>(),
            ShmMode::CreateOrOpen,
        )?;
        if shm.is_creator() {
            // Safety: the segment was just created and the cache lock keeps
            // every other local opener out until it is initialised.
            unsafe { init_mutex(shm.as_mut_ptr().cast())? };
        }
        let cached = Arc::new(CachedShm {
            shm,
            users: AtomicUsize::new(1),
            scope: AtomicUsize::new(0),
        });
        cache.insert(name.to_string(), Arc::clone(&cached));
        Ok(Self {
            cached,
            name: name.to_string(),
        })
    }

    /// Scoped-holder slot shared by every handle to this mutex in the process.
    pub fn scope(&self) -> &AtomicUsize {
        &self.cached.scope
    }

    fn raw(&self) -> *mut libc::pthread_mutex_t {
        self.cached.shm.as_mut_ptr().cast()
    }

    // A robust mutex whose holder died is handed over with EOWNERDEAD; mark
    // it consistent and treat the acquire as successful.
    fn settle(&self, eno: libc::c_int) -> Result<bool> {
        match eno {
            0 => Ok(true),
            libc::EBUSY => Ok(false),
            #[cfg(not(target_os = "macos"))]
            libc::EOWNERDEAD => {
                tracing::warn!(mutex = %self.name, "previous holder died; recovering mutex");
                match unsafe { pthread_mutex_consistent(self.raw()) } {
                    0 => Ok(true),
                    e => Err(SyncError::from_errno(e)),
                }
            }
            e => Err(SyncError::from_errno(e)),
        }
    }

    pub fn lock(&self) -> Result<()> {
        let eno = unsafe { libc::pthread_mutex_lock(self.raw()) };
        self.settle(eno).map(drop)
    }

    pub fn try_lock(&self) -> Result<bool> {
        let eno = unsafe { libc::pthread_mutex_trylock(self.raw()) };
        self.settle(eno)
    }

    #[cfg(not(target_os = "macos"))]
    pub fn lock_until(&self, deadline: Deadline) -> Result<()> {
        let Some(left) = deadline.remaining() else {
            return Err(SyncError::TimedOut);
        };
        let ts = realtime_after(left);
        loop {
            match unsafe { pthread_mutex_timedlock(self.raw(), &ts) } {
                libc::EINTR => continue,
                libc::ETIMEDOUT => return Err(SyncError::TimedOut),
                eno => return self.settle(eno).map(drop),
            }
        }
    }

    #[cfg(target_os = "macos")]
    pub fn lock_until(&self, deadline: Deadline) -> Result<()> {
        // No timed lock here; poll instead.
        loop {
            if deadline.is_elapsed() {
                return Err(SyncError::TimedOut);
            }
            if self.try_lock()? {
                return Ok(());
            }
            std::thread::sleep(Duration::from_micros(200));
        }
    }

    pub fn unlock(&self) -> Result<()> {
        match unsafe { libc::pthread_mutex_unlock(self.raw()) } {
            0 => Ok(()),
            eno => Err(SyncError::from_errno(eno)),
        }
    }

    /// Drop any local mapping and unlink the segment.
    pub fn clear_storage(name: &str) {
        mutex_cache().remove(name);
        PlatformShm::unlink_by_name(name);
    }
}

impl Drop for PlatformMutex {
    fn drop(&mut self) {
        // The mutex is not destroyed: other processes may still map it.
        let mut cache = mutex_cache();
        let last = self.cached.users.fetch_sub(1, Ordering::AcqRel) <= 1;
        if last && cache.get(&self.name).is_some_and(|c| Arc::ptr_eq(c, &self.cached)) {
            cache.remove(&self.name);
        }
    }
}

/// `CLOCK_REALTIME` reading `left` from now, as `pthread_mutex_timedlock` wants.
#[cfg(not(target_os = "macos"))]
fn realtime_after(left: Duration) -> libc::timespec {
    let at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .saturating_add(left);
    let mut ts: libc::timespec = unsafe { mem::zeroed() };
    ts.tv_sec = at.as_secs().min(libc::time_t::MAX as u64) as libc::time_t;
    ts.tv_nsec = at.subsec_nanos() as _;
    ts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_size_appends_aligned_counter() {
        assert_eq!(segment_size(1), 8);
        assert_eq!(segment_size(4), 8);
        assert_eq!(segment_size(5), 12);
    }

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn realtime_deadline_is_in_the_future() {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap();
        let ts = realtime_after(Duration::from_secs(2));
        assert!(ts.tv_sec as u64 >= now.as_secs() + 1);
        assert!((ts.tv_nsec as u64) < 1_000_000_000);
    }
}
