// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// A guarded value living in named shared memory, so that threads and
// processes opening the same name mutate one value under one mutex.

use std::marker::PhantomData;
use std::mem;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

use crate::region::{AcquireMode, Region};
use crate::scoped_access::ScopedAccess;
use crate::{Deadline, IpcMutex, Result, ShmHandle, ShmOpenMode, SyncError};

/// Plain data that may be placed in shared memory.
///
/// # Safety
/// Every bit pattern must be a valid value and the type must hold no
/// pointers, since other processes map the bytes at other addresses.
pub unsafe trait ShmValue: Copy + Send + 'static {}

macro_rules! shm_value {
    ($($t:ty),*) => { $(unsafe impl ShmValue for $t {})* };
}

shm_value!(i8, i16, i32, i64, u8, u16, u32, u64);

/// How long a late opener waits for the creator to publish the initial value.
const INIT_WAIT: Duration = Duration::from_secs(5);

const READY: u32 = 1;

#[repr(C)]
struct Slot<T> {
    ready: AtomicU32,
    value: T,
}

fn lock_name(name: &str) -> String {
    format!("{name}_LOCK_")
}

/// A `T` in the segment called `name`, guarded by the companion mutex
/// `{name}_LOCK_`.
pub struct ShmGuarded<T: ShmValue> {
    shm: ShmHandle,
    lock: IpcMutex,
    name: String,
    _value: PhantomData<T>,
}

impl<T: ShmValue> ShmGuarded<T> {
    /// Open the shared value, creating it with `init` if this is the first
    /// handle. Later openers wait until the creator has published `init`.
    pub fn open(name: &str, init: T) -> Result<Self> {
        let lock = IpcMutex::open(&lock_name(name))?;
        let shm = {
            // Local openers map the segment one at a time, so the creator
            // publishes `init` before anyone else gets a handle.
            let _access = ScopedAccess::new(&lock)?;
            let shm =
                ShmHandle::acquire(name, mem::size_of::<Slot<T>>(), ShmOpenMode::CreateOrOpen)?;
            if shm.is_creator() {
                let slot: *mut Slot<T> = shm.as_mut_ptr().cast();
                // Safety: the slot is mapped and zeroed, and `ready` is still
                // clear so nobody reads the value yet.
                unsafe {
                    std::ptr::addr_of_mut!((*slot).value).write(init);
                    (*slot).ready.store(READY, Ordering::Release);
                }
            }
            shm
        };
        let this = Self {
            shm,
            lock,
            name: name.to_string(),
            _value: PhantomData,
        };
        if !this.shm.is_creator() {
            this.await_ready()?;
        }
        Ok(this)
    }

    fn slot(&self) -> *mut Slot<T> {
        self.shm.as_mut_ptr().cast()
    }

    fn ready(&self) -> &AtomicU32 {
        // Safety: the segment is page aligned and at least `Slot<T>` long.
        unsafe { &(*self.slot()).ready }
    }

    fn await_ready(&self) -> Result<()> {
        let deadline = Deadline::after(INIT_WAIT);
        while self.ready().load(Ordering::Acquire) != READY {
            if deadline.is_elapsed() {
                return Err(SyncError::TimedOut);
            }
            thread::sleep(Duration::from_millis(1));
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_creator(&self) -> bool {
        self.shm.is_creator()
    }

    /// Run `f` on the value while holding the companion mutex.
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        self.with_access(AcquireMode::Blocking, f)
    }

    /// Copy of the value, taken under the mutex.
    pub fn read(&self) -> Result<T> {
        self.with_lock(|v| *v)
    }

    pub fn write(&self, value: T) -> Result<()> {
        self.with_lock(|v| *v = value)
    }

    /// Remove the segment and its mutex by name.
    pub fn clear_storage(name: &str) {
        ShmHandle::clear_storage(name);
        IpcMutex::clear_storage(&lock_name(name));
    }
}

impl<T: ShmValue> Region for ShmGuarded<T> {
    type Value = T;

    fn with_access<R>(&self, mode: AcquireMode<'_>, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let _access = mode.acquire(&self.lock)?;
        // Safety: the mutex is held for as long as the reference lives.
        let value = unsafe { &mut *std::ptr::addr_of_mut!((*self.slot()).value) };
        Ok(f(value))
    }
}

impl<T: ShmValue> std::fmt::Debug for ShmGuarded<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmGuarded")
            .field("name", &self.name)
            .field("creator", &self.is_creator())
            .finish_non_exhaustive()
    }
}
