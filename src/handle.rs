use std::fmt;
use std::os::windows::io::{AsRawHandle, BorrowedHandle, IntoRawHandle, OwnedHandle};
use std::sync::OnceLock;

use anyhow::{Result, bail};
use windows::Win32::Foundation::{CloseHandle, DUPLICATE_SAME_ACCESS, DuplicateHandle, HANDLE};
use windows::Win32::System::LibraryLoader::{GetModuleHandleW, GetProcAddress};
use windows::Win32::System::Threading::GetCurrentProcess;
use windows::core::{BOOL, PCSTR};

use crate::Error;

type CloseHandleFn = unsafe extern "system" fn(HANDLE) -> BOOL;

/// Resolves `kernel32!CloseHandle` once and hands back the same function pointer forever.
///
/// Holding this directly on each `Handle` (rather than calling through the `windows` crate's
/// statically-linked import at drop time) mirrors `AutoHandle`'s explicit
/// `ctypes.WinDLL("kernel32").CloseHandle` capture: the reference is resolved once, up front,
/// and survives the owning object past any later teardown of module-level state.
fn close_handle_fn() -> CloseHandleFn {
    static RESOLVED: OnceLock<usize> = OnceLock::new();

    let addr = *RESOLVED.get_or_init(|| {
        // SAFETY: "kernel32.dll" is always loaded into every Windows process.
        let kernel32 = unsafe { GetModuleHandleW(windows::core::w!("kernel32.dll")) }
            .expect("kernel32.dll is always mapped");

        // SAFETY: `kernel32` is a valid, loaded module handle and "CloseHandle" is a static export.
        let proc = unsafe { GetProcAddress(kernel32, PCSTR(c"CloseHandle".as_ptr().cast())) }
            .expect("CloseHandle is always exported by kernel32.dll");

        proc as usize
    });

    // SAFETY: `addr` was resolved from `kernel32!CloseHandle`'s own export entry, which has
    // exactly this signature.
    unsafe { std::mem::transmute::<usize, CloseHandleFn>(addr) }
}

/// Owns an OS handle value, releasing it exactly once on drop unless it is a pseudo-handle
/// (e.g. the value returned by `GetCurrentProcess`/`GetCurrentThread`) or a non-owning borrow.
pub struct Handle {
    raw: HANDLE,
    owned: bool,
    close_fn: CloseHandleFn,
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("raw", &self.raw)
            .field("owned", &self.owned)
            .finish()
    }
}

// SAFETY: A `HANDLE` is, by definition, thread safe.
unsafe impl Send for Handle {}

// SAFETY: A `HANDLE` is simply an integer, no dereferencing is done.
unsafe impl Sync for Handle {}

impl Handle {
    fn is_valid_value(raw: HANDLE) -> bool {
        !raw.is_invalid() && !raw.0.is_null()
    }

    /// Wraps a handle this process just acquired and is therefore responsible for closing.
    ///
    /// # Safety
    ///
    /// `raw` must be a handle value returned by a Windows API call that transfers ownership
    /// to the caller (e.g. `OpenProcess`, `CreateRemoteThread`), and must not be a pseudo-handle.
    pub unsafe fn new_owned(raw: HANDLE) -> Result<Self> {
        if !Self::is_valid_value(raw) {
            bail!(Error::last_error())
        }

        Ok(Self {
            raw,
            owned: true,
            close_fn: close_handle_fn(),
        })
    }

    /// Wraps a well-known pseudo-handle (e.g. `GetCurrentProcess()`) that must never be closed.
    ///
    /// # Safety
    ///
    /// `raw` must be a pseudo-handle constant, never an index into the handle table.
    pub unsafe fn new_pseudo_handle(raw: HANDLE) -> Self {
        Self {
            raw,
            owned: false,
            close_fn: close_handle_fn(),
        }
    }

    /// Wraps a handle borrowed from elsewhere. The wrapper does not own it and will not close it.
    ///
    /// # Safety
    ///
    /// `raw` must remain valid for at least as long as the returned `Handle` is used.
    pub unsafe fn new_borrowed(raw: HANDLE) -> Result<Self> {
        if !Self::is_valid_value(raw) {
            bail!(Error::last_error())
        }

        Ok(Self {
            raw,
            owned: false,
            close_fn: close_handle_fn(),
        })
    }

    pub fn raw(&self) -> HANDLE {
        self.raw
    }

    pub fn raw_as_ref(&self) -> &HANDLE {
        &self.raw
    }

    /// Disowns the handle: it will not be closed on drop.
    pub fn leak(&mut self) {
        self.owned = false;
    }

    pub fn try_clone(&self) -> Result<Self> {
        // SAFETY: No preconditions. Always a valid handle.
        let current_process = unsafe { GetCurrentProcess() };
        let mut duplicated = HANDLE::default();

        // SAFETY: `current_process` is valid. No preconditions. Returned handle is closed with its RAII wrapper.
        unsafe {
            DuplicateHandle(
                current_process,
                self.raw,
                current_process,
                &mut duplicated,
                0,
                false,
                DUPLICATE_SAME_ACCESS,
            )?;
        }

        // SAFETY: `DuplicateHandle` transfers ownership of `duplicated` to us.
        unsafe { Self::new_owned(duplicated) }
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        if self.owned && Self::is_valid_value(self.raw) {
            // SAFETY: `close_fn` was resolved at construction time, so it remains callable
            // even if this drop runs during process teardown. `self.raw` is owned and non-pseudo.
            let ok = unsafe { (self.close_fn)(self.raw) };

            if !ok.as_bool() {
                // A failed close during drop must not propagate or crash the host.
                error!(handle = ?self.raw, "CloseHandle failed during Handle drop");
            }
        }
    }
}

impl From<HANDLE> for Handle {
    fn from(value: HANDLE) -> Self {
        // SAFETY: Matches the historical contract of this conversion: the caller hands over
        // a handle it owns.
        unsafe { Self::new_owned(value) }.expect("handle value must be valid")
    }
}

impl TryFrom<&BorrowedHandle<'_>> for Handle {
    type Error = anyhow::Error;

    fn try_from(value: &BorrowedHandle<'_>) -> Result<Self, Self::Error> {
        // SAFETY: `value` is a valid borrowed handle for at least this call's duration.
        let handle = unsafe { Handle::new_borrowed(HANDLE(value.as_raw_handle().cast()))? };

        handle.try_clone()
    }
}

impl TryFrom<BorrowedHandle<'_>> for Handle {
    type Error = anyhow::Error;

    fn try_from(value: BorrowedHandle<'_>) -> Result<Self, Self::Error> {
        Self::try_from(&value)
    }
}

impl From<OwnedHandle> for Handle {
    fn from(handle: OwnedHandle) -> Self {
        Self::from(HANDLE(handle.into_raw_handle().cast()))
    }
}

pub trait HandleWrapper {
    fn handle(&self) -> &Handle;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pseudo_handle_never_closes() {
        // SAFETY: GetCurrentProcess()'s return value is the canonical pseudo-handle.
        let handle = unsafe { Handle::new_pseudo_handle(GetCurrentProcess()) };
        assert!(!handle.owned);
    }
}
