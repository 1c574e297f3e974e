//! Thread handles: context, suspend/resume, start address, and owning-process resolution.

use windows::Win32::Foundation::{HANDLE, WAIT_EVENT, WAIT_FAILED, WAIT_OBJECT_0};
use windows::Win32::Security::TOKEN_ACCESS_MASK;
use windows::Win32::System::Diagnostics::Debug::{
    CONTEXT, CONTEXT_ALL, GetThreadContext, SetThreadContext, WOW64_CONTEXT, WOW64_CONTEXT_ALL,
    Wow64GetThreadContext, Wow64SetThreadContext,
};
use windows::Win32::System::Threading::{
    GetCurrentThread, GetProcessIdOfThread, GetThreadId, INFINITE, OpenThread, OpenThreadToken, ResumeThread,
    SuspendThread, THREAD_ACCESS_RIGHTS, THREAD_CREATE_THREAD, THREAD_GET_CONTEXT, THREAD_QUERY_INFORMATION,
    THREAD_SET_CONTEXT, THREAD_SET_INFORMATION, THREAD_SUSPEND_RESUME, THREAD_TERMINATE, WaitForSingleObject,
};

use crate::handle::{Handle, HandleWrapper};
use crate::memaccessor::{self, Bitness};
use crate::process::Process;
use crate::system::System;
use crate::token::Token;
use crate::undoc::{NtQueryInformationThread, ThreadQuerySetWin32StartAddress};
use crate::utils::u32size_of;
use crate::{Error, Result};

/// Access mask used by [`Thread::open`].
const FULL_ACCESS: THREAD_ACCESS_RIGHTS = THREAD_ACCESS_RIGHTS(
    THREAD_QUERY_INFORMATION.0
        | THREAD_GET_CONTEXT.0
        | THREAD_SET_CONTEXT.0
        | THREAD_SET_INFORMATION.0
        | THREAD_SUSPEND_RESUME.0
        | THREAD_TERMINATE.0
        | THREAD_CREATE_THREAD.0
        | windows::Win32::Foundation::SYNCHRONIZE.0,
);

#[cfg(target_arch = "x86")]
const CONTEXT_AMD64: u32 = 0x0010_0000;
#[cfg(target_arch = "x86")]
const CONTEXT64_ALL: u32 = CONTEXT_AMD64 | 0x1F;
#[cfg(target_arch = "x86")]
const CONTEXT64_SIZE: usize = 1232;
#[cfg(target_arch = "x86")]
const CONTEXT64_FLAGS_OFFSET: usize = 0x30;

#[derive(Debug)]
pub struct Thread {
    pub handle: Handle,
    tid: u32,
}

impl From<Handle> for Thread {
    fn from(handle: Handle) -> Self {
        // SAFETY: `GetThreadId` has no preconditions beyond a valid handle.
        let tid = unsafe { GetThreadId(handle.raw()) };
        Self { handle, tid }
    }
}

impl Thread {
    pub fn get_by_id(id: u32, desired_access: THREAD_ACCESS_RIGHTS) -> Result<Self> {
        // SAFETY: No preconditions.
        let handle = unsafe { OpenThread(desired_access, false, id) }.map_err(Error::Win32)?;

        // SAFETY: The handle is owned by us, we opened the resource above.
        let handle = unsafe { Handle::new_owned(handle)? };

        Ok(Self { handle, tid: id })
    }

    /// Opens `tid` with every access right this crate's operations need.
    pub fn open(tid: u32) -> Result<Self> {
        Self::get_by_id(tid, FULL_ACCESS)
    }

    /// Wraps an already-open handle known to be live, recovering its tid directly.
    pub fn from_handle(handle: Handle) -> Result<Self> {
        Ok(Self::from(handle))
    }

    /// Wraps a handle of unknown liveness, cross-referencing a fresh thread snapshot: `Live` if
    /// a thread with this tid is still running, `Dead` otherwise.
    pub fn resolve(handle: Handle) -> Result<ThreadResolution> {
        let tid = unsafe { GetThreadId(handle.raw()) };

        let is_live = System::threads()?.any(|entry| entry.thread_id() == tid);

        Ok(if is_live {
            ThreadResolution::Live(Self { handle, tid })
        } else {
            ThreadResolution::Dead(DeadThread { handle, tid })
        })
    }

    pub fn tid(&self) -> u32 {
        self.tid
    }

    pub fn current() -> Self {
        // SAFETY: No preconditions. Returns a pseudohandle, thus not owning it.
        let handle = unsafe { GetCurrentThread() };
        let handle = Handle::new_borrowed(handle).expect("GetCurrentThread always yields a valid pseudo handle");

        Self::from(handle)
    }

    /// The process that owns this thread, cross-referenced by pid against a fresh process
    /// snapshot. `None` if no live process matches (the owner has already exited).
    pub fn owner(&self) -> Result<Option<Process>> {
        // SAFETY: `GetProcessIdOfThread` has no preconditions beyond a valid handle.
        let owner_pid = unsafe { GetProcessIdOfThread(self.handle.raw()) };
        if owner_pid == 0 {
            return Ok(None);
        }

        match Process::open(owner_pid) {
            Ok(process) => Ok(Some(process)),
            Err(Error::Win32(_)) => Ok(None),
            Err(error) => Err(error),
        }
    }

    fn target_bitness(&self) -> Result<Bitness> {
        match self.owner()? {
            Some(process) => process.bitness(),
            None => Err(Error::ProcessExited),
        }
    }

    pub fn join(&self, timeout_ms: Option<u32>) -> Result<()> {
        match self.wait(timeout_ms)? {
            WAIT_OBJECT_0 => Ok(()),
            _ => Err(Error::last_error()),
        }
    }

    pub fn wait(&self, timeout_ms: Option<u32>) -> Result<WAIT_EVENT> {
        // SAFETY: No preconditions.
        let status = unsafe { WaitForSingleObject(self.handle.raw(), timeout_ms.unwrap_or(INFINITE)) };

        match status {
            WAIT_FAILED => Err(Error::last_error()),
            w => Ok(w),
        }
    }

    /// Returns the previous suspend count.
    pub fn suspend(&self) -> Result<u32> {
        // SAFETY: No preconditions.
        let count = unsafe { SuspendThread(self.handle.raw()) };
        if count == u32::MAX {
            Err(Error::last_error())
        } else {
            Ok(count)
        }
    }

    /// Returns the previous suspend count.
    pub fn resume(&self) -> Result<u32> {
        // SAFETY: No preconditions.
        let count = unsafe { ResumeThread(self.handle.raw()) };
        if count == u32::MAX {
            Err(Error::last_error())
        } else {
            Ok(count)
        }
    }

    pub fn exit(&self, exit_code: u32) -> Result<()> {
        // SAFETY: FFI call with no outstanding preconditions.
        unsafe { windows::Win32::System::Threading::TerminateThread(self.handle.raw(), exit_code) }
            .map_err(Error::Win32)?;
        Ok(())
    }

    pub fn token(&self, desired_access: TOKEN_ACCESS_MASK, open_as_self: bool) -> Result<Token> {
        let mut handle = HANDLE::default();

        // SAFETY: Returned handle must be closed, which is done in its RAII wrapper.
        unsafe { OpenThreadToken(self.handle.raw(), desired_access, open_as_self, &mut handle) }
            .map_err(Error::Win32)?;

        // SAFETY: We own the handle.
        let handle = unsafe { Handle::new_owned(handle)? };

        Ok(Token::from(handle))
    }

    /// This thread's Win32 start address (`NtQueryInformationThread(ThreadQuerySetWin32StartAddress)`).
    pub fn start_address(&self) -> Result<u64> {
        if Bitness::current() == Bitness::Bits32 && self.target_bitness()? == Bitness::Bits64 {
            #[cfg(target_arch = "x86")]
            {
                let owner = self.owner()?.ok_or(Error::ProcessExited)?;
                let remote = memaccessor::Remote32In64::new(owner.handle.raw());
                return remote.query_thread_win32_start_address(self.handle.raw());
            }
            #[cfg(not(target_arch = "x86"))]
            return Err(Error::Unsupported(
                "querying a 64-bit thread's start address requires a 32-bit controller process",
            ));
        }

        let mut addr: usize = 0;
        // SAFETY: `addr` is sized for a pointer-width value on this controller's own bitness.
        unsafe {
            NtQueryInformationThread(
                self.handle.raw(),
                ThreadQuerySetWin32StartAddress,
                (&mut addr as *mut usize).cast(),
                u32size_of::<usize>(),
                None,
            )
            .map_err(Error::Win32)?;
        }
        Ok(addr as u64)
    }

    /// Reads this thread's native register context. `ContextFlags` is always set to request
    /// every available register group.
    pub fn context(&self) -> Result<ThreadContext> {
        match (Bitness::current(), self.target_bitness()?) {
            (Bitness::Bits64, Bitness::Bits32) => {
                let mut ctx = WOW64_CONTEXT {
                    ContextFlags: WOW64_CONTEXT_ALL,
                    ..Default::default()
                };
                // SAFETY: `ctx` is a zero-initialized, appropriately-sized WOW64_CONTEXT.
                unsafe { Wow64GetThreadContext(self.handle.raw(), &mut ctx) }.map_err(Error::Win32)?;
                Ok(ThreadContext::Wow64(ctx))
            }
            (Bitness::Bits32, Bitness::Bits64) => self.context_heavens_gate(),
            _ => {
                let mut ctx = CONTEXT {
                    ContextFlags: CONTEXT_ALL,
                    ..Default::default()
                };
                // SAFETY: `ctx` is a zero-initialized, appropriately-sized CONTEXT.
                unsafe { GetThreadContext(self.handle.raw(), &mut ctx) }.map_err(Error::Win32)?;
                Ok(ThreadContext::Native(ctx))
            }
        }
    }

    pub fn set_context(&self, context: &ThreadContext) -> Result<()> {
        let controller = Bitness::current();
        let target = self.target_bitness()?;

        match (controller, target, context) {
            (Bitness::Bits64, Bitness::Bits32, ThreadContext::Wow64(ctx)) => {
                // SAFETY: `ctx` was populated by a prior `Wow64GetThreadContext` call (or built
                // with matching layout/flags by the caller).
                unsafe { Wow64SetThreadContext(self.handle.raw(), ctx) }.map_err(Error::Win32)
            }
            (Bitness::Bits32, Bitness::Bits64, ThreadContext::Raw64(buf)) => self.set_context_heavens_gate(buf),
            (c, t, ThreadContext::Native(ctx)) if c == t => {
                // SAFETY: see `context`.
                unsafe { SetThreadContext(self.handle.raw(), ctx) }.map_err(Error::Win32)
            }
            _ => Err(Error::BitnessMismatch),
        }
    }

    #[cfg(target_arch = "x86")]
    fn context_heavens_gate(&self) -> Result<ThreadContext> {
        let owner = self.owner()?.ok_or(Error::ProcessExited)?;
        let remote = memaccessor::Remote32In64::new(owner.handle.raw());

        let mut buf = vec![0u8; CONTEXT64_SIZE];
        buf[CONTEXT64_FLAGS_OFFSET..CONTEXT64_FLAGS_OFFSET + 4].copy_from_slice(&CONTEXT64_ALL.to_le_bytes());

        remote.get_thread_context(self.handle.raw(), buf.as_ptr() as u64)?;
        Ok(ThreadContext::Raw64(buf))
    }

    #[cfg(not(target_arch = "x86"))]
    fn context_heavens_gate(&self) -> Result<ThreadContext> {
        Err(Error::Unsupported(
            "reading a 64-bit thread's context requires a 32-bit controller process",
        ))
    }

    #[cfg(target_arch = "x86")]
    fn set_context_heavens_gate(&self, buf: &[u8]) -> Result<()> {
        let owner = self.owner()?.ok_or(Error::ProcessExited)?;
        let remote = memaccessor::Remote32In64::new(owner.handle.raw());
        remote.set_thread_context(self.handle.raw(), buf.as_ptr() as u64)
    }

    #[cfg(not(target_arch = "x86"))]
    fn set_context_heavens_gate(&self, _buf: &[u8]) -> Result<()> {
        Err(Error::Unsupported(
            "writing a 64-bit thread's context requires a 32-bit controller process",
        ))
    }
}

impl HandleWrapper for Thread {
    fn handle(&self) -> &Handle {
        &self.handle
    }
}

/// A thread's native register context, shaped per the target's bitness.
pub enum ThreadContext {
    Native(CONTEXT),
    Wow64(WOW64_CONTEXT),
    /// Raw bytes of an AMD64 `CONTEXT`, for a 64-bit target seen from a 32-bit controller (no
    /// such type exists in an x86 build of the `windows` crate).
    Raw64(Vec<u8>),
}

pub enum ThreadResolution {
    Live(Thread),
    Dead(DeadThread),
}

/// A handle whose tid no longer matches any running thread.
#[derive(Debug)]
pub struct DeadThread {
    pub handle: Handle,
    pub tid: u32,
}

impl HandleWrapper for DeadThread {
    fn handle(&self) -> &Handle {
        &self.handle
    }
}

/// Specializes [`Thread`] for the calling thread: waiting on yourself always deadlocks.
pub struct CurrentThread(Thread);

impl CurrentThread {
    pub fn get() -> Self {
        Self(Thread::current())
    }

    pub fn wait(&self, _timeout_ms: Option<u32>) -> Result<WAIT_EVENT> {
        Err(Error::WouldDeadlock)
    }
}

impl std::ops::Deref for CurrentThread {
    type Target = Thread;

    fn deref(&self) -> &Thread {
        &self.0
    }
}
