//! System-wide enumeration: every running process, every running thread, and this machine's
//! native pointer width.

use windows::Win32::Foundation::ERROR_NO_MORE_FILES;
use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, TH32CS_SNAPTHREAD, THREADENTRY32, Thread32First, Thread32Next,
};

use crate::handle::Handle;
use crate::memaccessor::Bitness;
use crate::process::ProcessEntry32Iterator;
use crate::{Error, Result};

/// Namespace for machine-wide enumeration. Carries no state; every call opens its own snapshot.
pub struct System;

impl System {
    /// Every running process, as a fresh toolhelp snapshot.
    pub fn processes() -> Result<ProcessEntry32Iterator> {
        ProcessEntry32Iterator::new()
    }

    /// Every running thread on the system, as a fresh toolhelp snapshot.
    pub fn threads() -> Result<ThreadEntry32Iterator> {
        ThreadEntry32Iterator::new()
    }

    /// This controller's own pointer width.
    pub fn bitness() -> Bitness {
        Bitness::current()
    }
}

pub struct ThreadEntry32Iterator {
    snapshot_handle: Handle,
    entry: THREADENTRY32,
    first: bool,
}

impl ThreadEntry32Iterator {
    pub fn new() -> Result<Self> {
        // SAFETY: `CreateToolhelp32Snapshot` is always safe to call and returns a valid handle on success.
        let raw_handle = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPTHREAD, 0) }.map_err(Error::Win32)?;

        // SAFETY: `raw_handle` was just returned by `CreateToolhelp32Snapshot`, which transfers ownership.
        let snapshot_handle = unsafe { Handle::new_owned(raw_handle)? };

        // SAFETY: zeroing a simple POD type.
        let mut entry: THREADENTRY32 = unsafe { core::mem::zeroed() };
        entry.dwSize = std::mem::size_of::<THREADENTRY32>() as u32;

        Ok(Self {
            snapshot_handle,
            entry,
            first: true,
        })
    }
}

impl Iterator for ThreadEntry32Iterator {
    type Item = ThreadEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let result = if self.first {
            // SAFETY: `snapshot_handle` is valid and `entry.dwSize` was set in `new`.
            unsafe { Thread32First(self.snapshot_handle.raw(), &mut self.entry) }
        } else {
            // SAFETY: `snapshot_handle` remains valid for the iterator's lifetime.
            unsafe { Thread32Next(self.snapshot_handle.raw(), &mut self.entry) }
        };

        match result {
            Err(error) if error.code() == ERROR_NO_MORE_FILES.to_hresult() => None,
            Err(error) => {
                error!(%error, "Failed to iterate over threads");
                None
            }
            Ok(()) => {
                self.first = false;
                Some(ThreadEntry(self.entry))
            }
        }
    }
}

pub struct ThreadEntry(THREADENTRY32);

impl ThreadEntry {
    pub fn thread_id(&self) -> u32 {
        self.0.th32ThreadID
    }

    pub fn owner_process_id(&self) -> u32 {
        self.0.th32OwnerProcessID
    }
}
