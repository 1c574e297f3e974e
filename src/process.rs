//! Process handles, cross-bitness memory access, PEB acquisition, and remote thread creation.

use std::ffi::{OsString, c_void};
use std::os::windows::ffi::OsStringExt;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use windows::Win32::Foundation::{ERROR_INVALID_PARAMETER, ERROR_NO_MORE_FILES, HANDLE, HMODULE, MAX_PATH, WAIT_EVENT, WAIT_FAILED};
use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, PROCESSENTRY32W, Process32FirstW, Process32NextW, TH32CS_SNAPPROCESS,
};
use windows::Win32::System::LibraryLoader::{
    FreeLibrary, GET_MODULE_HANDLE_EX_FLAG_FROM_ADDRESS, GetModuleFileNameW, GetModuleHandleExW, GetProcAddress,
};
use windows::Win32::System::Memory::{MEM_COMMIT, MEM_RESERVE, PAGE_EXECUTE_READWRITE, PAGE_READWRITE};
use windows::Win32::System::Threading::{
    CREATE_SUSPENDED, CreateThread, GetCurrentProcess, GetCurrentProcessId, GetExitCodeProcess, INFINITE,
    OpenProcess, OpenProcessToken, PROCESS_ACCESS_RIGHTS, PROCESS_BASIC_INFORMATION, PROCESS_CREATE_THREAD,
    PROCESS_NAME_WIN32, PROCESS_QUERY_INFORMATION, PROCESS_TERMINATE, PROCESS_VM_OPERATION, PROCESS_VM_READ,
    PROCESS_VM_WRITE, QueryFullProcessImageNameW, SYNCHRONIZE, TerminateProcess, THREAD_CREATION_FLAGS,
    WaitForSingleObject,
};
use windows::Win32::Security::TOKEN_ACCESS_MASK;

use crate::handle::{Handle, HandleWrapper};
use crate::memaccessor::{self, Bitness, MemoryAccessor, Region, is_wow64_process};
use crate::peb::Peb;
use crate::peb_stub;
use crate::remote::RemoteStruct;
use crate::thread::Thread;
use crate::token::Token;
use crate::undoc::{
    NtCreateThreadEx, NtQueryInformationProcess, NtWow64QueryInformationProcess64, ProcessBasicInformation,
    ProcessWow64Information,
};
use crate::utils::{AnsiString, WideString, u32size_of};
use crate::{Error, Result};

/// Access mask used by [`Process::open`]: everything this crate's operations need, short of the
/// handful of rights (`PROCESS_SET_INFORMATION`, `PROCESS_SUSPEND_RESUME`) nothing here calls for.
const FULL_ACCESS: PROCESS_ACCESS_RIGHTS = PROCESS_ACCESS_RIGHTS(
    PROCESS_QUERY_INFORMATION.0
        | PROCESS_VM_READ.0
        | PROCESS_VM_WRITE.0
        | PROCESS_VM_OPERATION.0
        | PROCESS_CREATE_THREAD.0
        | PROCESS_TERMINATE.0
        | SYNCHRONIZE.0,
);

/// Descriptor for `PROCESS_BASIC_INFORMATION`: `Reserved1`, `PebBaseAddress`, `Reserved2[2]`,
/// `UniqueProcessId`, `Reserved3` — six pointer-sized fields on every supported width.
pub struct ProcessBasicInformationLayout;

impl RemoteStruct for ProcessBasicInformationLayout {
    fn size_on_target(bitness: Bitness) -> u64 {
        6 * bitness.size_of_pointer() as u64
    }
}

pub struct Process {
    pub handle: Handle,
    pid: u32,
    bitness: OnceLock<Bitness>,
    accessor: OnceLock<Arc<ProcessAccessor>>,
    name: OnceLock<String>,
    ppid: OnceLock<u32>,
}

impl std::fmt::Debug for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process").field("pid", &self.pid).finish_non_exhaustive()
    }
}

impl From<Handle> for Process {
    fn from(handle: Handle) -> Self {
        // SAFETY: `GetProcessId` has no preconditions beyond a valid handle.
        let pid = unsafe { windows::Win32::System::Threading::GetProcessId(handle.raw()) };

        Self {
            handle,
            pid,
            bitness: OnceLock::new(),
            accessor: OnceLock::new(),
            name: OnceLock::new(),
            ppid: OnceLock::new(),
        }
    }
}

impl Process {
    pub fn get_by_pid(pid: u32, desired_access: PROCESS_ACCESS_RIGHTS) -> Result<Self> {
        // SAFETY: FFI call with no outstanding precondition.
        let handle = unsafe { OpenProcess(desired_access, false, pid) }.map_err(Error::Win32)?;

        // SAFETY: The handle is owned by us, we opened the process above.
        let handle = unsafe { Handle::new_owned(handle)? };

        Ok(Self::from_with_pid(handle, pid))
    }

    /// Opens `pid` with every access right this crate's operations need.
    pub fn open(pid: u32) -> Result<Self> {
        Self::get_by_pid(pid, FULL_ACCESS)
    }

    /// Cross-references an already-open handle against a fresh process snapshot.
    pub fn from_handle(handle: Handle) -> Result<Self> {
        Ok(Self::from(handle))
    }

    fn from_with_pid(handle: Handle, pid: u32) -> Self {
        Self {
            handle,
            pid,
            bitness: OnceLock::new(),
            accessor: OnceLock::new(),
            name: OnceLock::new(),
            ppid: OnceLock::new(),
        }
    }

    /// Opens the process named by a toolhelp-sourced entry, pre-populating `name`/`ppid` so
    /// later calls to [`Process::name`]/[`Process::ppid`] skip a second snapshot scan.
    pub fn from_entry(entry: &ProcessEntry, desired_access: PROCESS_ACCESS_RIGHTS) -> Result<Self> {
        let mut process = Self::get_by_pid(entry.process_id(), desired_access)?;
        if let Ok(name) = entry.executable_name() {
            let _ = process.name.set(name);
        }
        let _ = process.ppid.set(entry.parent_process_id());
        Ok(process)
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn current_process() -> Self {
        // SAFETY: `GetCurrentProcess()` has no preconditions and always returns a valid pseudo
        // handle.
        let handle = unsafe { GetCurrentProcess() };

        // SAFETY: The handle returned by `GetCurrentProcess` is a pseudo handle.
        let handle = unsafe { Handle::new_pseudo_handle(handle) };

        // SAFETY: `GetCurrentProcessId` has no preconditions.
        let pid = unsafe { GetCurrentProcessId() };

        let process = Self::from_with_pid(handle, pid);
        let _ = process.bitness.set(Bitness::current());
        let _ = process.accessor.set(Arc::new(ProcessAccessor::Local(Arc::new(memaccessor::Local))));
        process
    }

    /// This process's pointer width, as seen from this controller. Cached after the first call.
    pub fn bitness(&self) -> Result<Bitness> {
        if let Some(&b) = self.bitness.get() {
            return Ok(b);
        }

        let b = if is_wow64_process(self.handle.raw())? {
            Bitness::Bits32
        } else if os_is_64bit()? {
            Bitness::Bits64
        } else {
            Bitness::Bits32
        };

        Ok(*self.bitness.get_or_init(|| b))
    }

    /// Whether this is a 32-bit process running under WoW64 on a 64-bit OS.
    pub fn is_wow64(&self) -> Result<bool> {
        Ok(self.bitness()? == Bitness::Bits32 && os_is_64bit()?)
    }

    fn accessor(&self) -> Result<Arc<ProcessAccessor>> {
        if let Some(accessor) = self.accessor.get() {
            return Ok(Arc::clone(accessor));
        }

        let built = Arc::new(self.build_accessor()?);
        Ok(Arc::clone(self.accessor.get_or_init(|| built)))
    }

    fn build_accessor(&self) -> Result<ProcessAccessor> {
        let target = self.bitness()?;

        Ok(match (Bitness::current(), target) {
            (Bitness::Bits64, Bitness::Bits64) | (Bitness::Bits32, Bitness::Bits32) => {
                if self.pid == std::process::id() {
                    ProcessAccessor::Local(Arc::new(memaccessor::Local))
                } else {
                    ProcessAccessor::Remote(Arc::new(memaccessor::RemoteSameBitness::new(self.handle.raw())))
                }
            }
            (Bitness::Bits64, Bitness::Bits32) => {
                ProcessAccessor::Remote64In32(Arc::new(memaccessor::Remote64In32::new(self.handle.raw())))
            }
            (Bitness::Bits32, Bitness::Bits64) => {
                ProcessAccessor::Remote32In64(Arc::new(memaccessor::Remote32In64::new(self.handle.raw())))
            }
        })
    }

    pub fn read_memory(&self, address: u64, buffer: &mut [u8]) -> Result<()> {
        self.accessor()?.read(address, buffer)
    }

    pub fn write_memory(&self, address: u64, buffer: &[u8]) -> Result<()> {
        self.accessor()?.write(address, buffer)
    }

    pub fn query_memory(&self, address: u64) -> Result<Region> {
        self.accessor()?.query(address)
    }

    pub fn virtual_alloc(&self, size: u64, allocation_type: u32, protect: u32) -> Result<u64> {
        self.accessor()?.alloc(size, allocation_type, protect)
    }

    pub fn virtual_free(&self, address: u64) -> Result<()> {
        self.accessor()?.free(address)
    }

    pub fn read_byte(&self, address: u64) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_memory(address, &mut buf)?;
        Ok(buf[0])
    }

    pub fn read_dword(&self, address: u64) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_memory(address, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn read_qword(&self, address: u64) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_memory(address, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// The pointer-width value at `address`: 4 bytes on a 32-bit target, 8 on a 64-bit one.
    pub fn read_ptr(&self, address: u64) -> Result<u64> {
        match self.bitness()? {
            Bitness::Bits32 => self.read_dword(address).map(u64::from),
            Bitness::Bits64 => self.read_qword(address),
        }
    }

    /// Allocates a remote read-write buffer, freed automatically when the guard drops.
    pub fn scoped_alloc(&self, size: u64) -> Result<ScopedAlloc<'_>> {
        let address = self.virtual_alloc(size, (MEM_COMMIT.0 | MEM_RESERVE.0) as u32, PAGE_READWRITE.0)?;
        Ok(ScopedAlloc {
            process: self,
            address,
            size,
        })
    }

    /// Allocates executable memory, writes `code` into it, and starts a thread there. The
    /// allocation is intentionally leaked: callers who want it reclaimed should use
    /// [`Process::scoped_alloc`] plus a manual write and [`Process::create_thread`] instead.
    pub fn execute(&self, code: &[u8]) -> Result<Thread> {
        let address = self.virtual_alloc(
            code.len() as u64,
            (MEM_COMMIT.0 | MEM_RESERVE.0) as u32,
            PAGE_EXECUTE_READWRITE.0,
        )?;
        self.write_memory(address, code)?;
        self.create_thread(address, 0, false)
    }

    /// Creates a thread starting at `start_address` in this process, passing `parameter`.
    ///
    /// Dispatches on the (controller, target) bitness pair: same-bitness targets (including a
    /// 64-bit controller acting on a WoW64 target, which Windows thunks transparently) go through
    /// `NtCreateThreadEx`; a 64-bit target seen from a 32-bit controller goes through heaven's
    /// gate.
    pub fn create_thread(&self, start_address: u64, parameter: u64, create_suspended: bool) -> Result<Thread> {
        match (Bitness::current(), self.bitness()?) {
            (Bitness::Bits32, Bitness::Bits64) => self.create_thread_heavens_gate(start_address, parameter, create_suspended),
            _ if self.pid == std::process::id() => {
                self.create_thread_current_process(start_address, parameter, create_suspended)
            }
            _ => self.create_thread_same_bitness(start_address, parameter, create_suspended),
        }
    }

    fn create_thread_current_process(&self, start_address: u64, parameter: u64, create_suspended: bool) -> Result<Thread> {
        let flags = if create_suspended {
            CREATE_SUSPENDED
        } else {
            THREAD_CREATION_FLAGS(0)
        };

        // SAFETY: `start_address` is assumed by the caller to point at valid, executable code in
        // this process taking one pointer-sized argument.
        let handle = unsafe {
            CreateThread(
                None,
                0,
                Some(std::mem::transmute::<
                    u64,
                    unsafe extern "system" fn(*mut c_void) -> u32,
                >(start_address)),
                Some(parameter as *const c_void),
                flags,
                None,
            )
        }
        .map_err(Error::Win32)?;

        // SAFETY: The handle is owned by us, we opened the resource above.
        let handle = unsafe { Handle::new_owned(handle)? };
        Thread::from_handle(handle)
    }

    fn create_thread_same_bitness(&self, start_address: u64, parameter: u64, create_suspended: bool) -> Result<Thread> {
        const THREAD_ALL_ACCESS: u32 = 0x1F_FFFF;
        const CREATE_FLAGS_SUSPENDED: u32 = 0x1;

        let mut handle = HANDLE::default();
        // SAFETY: `start_address` is assumed valid and executable in the target; `self.handle`
        // carries at least PROCESS_CREATE_THREAD.
        unsafe {
            NtCreateThreadEx(
                &mut handle,
                THREAD_ALL_ACCESS,
                std::ptr::null(),
                self.handle.raw(),
                start_address as *const c_void,
                parameter as *const c_void,
                if create_suspended { CREATE_FLAGS_SUSPENDED } else { 0 },
                0,
                0,
                0,
                std::ptr::null(),
            )
            .map_err(Error::Win32)?;
        }

        // SAFETY: The handle is owned by us, we opened the resource above.
        let handle = unsafe { Handle::new_owned(handle)? };
        Thread::from_handle(handle)
    }

    #[cfg(target_arch = "x86")]
    fn create_thread_heavens_gate(&self, start_address: u64, parameter: u64, create_suspended: bool) -> Result<Thread> {
        let accessor = self.accessor()?;
        let raw_handle = match accessor.as_ref() {
            ProcessAccessor::Remote32In64(remote) => {
                remote.create_remote_thread(start_address, parameter, create_suspended)?
            }
            _ => unreachable!("bitness dispatch guarantees Remote32In64 on this path"),
        };

        // SAFETY: `raw_handle` was just returned by `NtCreateThreadEx` in the target; its value
        // is a real kernel handle even though it was produced by a 64-bit call from 32-bit code.
        let handle = unsafe { Handle::new_owned(HANDLE(raw_handle as *mut c_void)) }?;
        Thread::from_handle(handle)
    }

    #[cfg(not(target_arch = "x86"))]
    fn create_thread_heavens_gate(&self, _start_address: u64, _parameter: u64, _create_suspended: bool) -> Result<Thread> {
        Err(Error::Unsupported(
            "creating a thread in a 64-bit target requires a 32-bit controller process",
        ))
    }

    /// The PEB base address, resolved per the (controller, target) bitness pair.
    pub fn peb_addr(&self) -> Result<u64> {
        let addr = match (Bitness::current(), self.bitness()?) {
            (Bitness::Bits64, Bitness::Bits64) | (Bitness::Bits32, Bitness::Bits32) => {
                let mut info = PROCESS_BASIC_INFORMATION::default();
                // SAFETY: `info` is sized for `PROCESS_BASIC_INFORMATION` on this call's bitness.
                unsafe {
                    NtQueryInformationProcess(
                        self.handle.raw(),
                        ProcessBasicInformation,
                        (&mut info as *mut PROCESS_BASIC_INFORMATION).cast(),
                        u32size_of::<PROCESS_BASIC_INFORMATION>(),
                        None,
                    )
                    .map_err(Error::Win32)?;
                }
                info.PebBaseAddress as u64
            }
            (Bitness::Bits64, Bitness::Bits32) => {
                let mut peb32: u64 = 0;
                // SAFETY: class 26 against a WoW64 target returns its PEB32 address as a
                // pointer-sized (here 8-byte, zero-extended) value.
                unsafe {
                    NtQueryInformationProcess(
                        self.handle.raw(),
                        ProcessWow64Information,
                        (&mut peb32 as *mut u64).cast(),
                        u32size_of::<u64>(),
                        None,
                    )
                    .map_err(Error::Win32)?;
                }
                peb32
            }
            (Bitness::Bits32, Bitness::Bits64) => {
                let mut info64 = [0u8; 48];
                // SAFETY: `info64` is sized and shaped for a 64-bit `PROCESS_BASIC_INFORMATION`;
                // `PebBaseAddress` sits at offset 8 in that layout.
                unsafe {
                    NtWow64QueryInformationProcess64(
                        self.handle.raw(),
                        ProcessBasicInformation,
                        info64.as_mut_ptr().cast(),
                        info64.len() as u32,
                        None,
                    )
                    .map_err(Error::Win32)?;
                }
                u64::from_le_bytes(info64[8..16].try_into().expect("slice is 8 bytes"))
            }
        };

        if addr == 0 {
            return Err(Error::PebUnavailable);
        }

        Ok(addr)
    }

    /// The PEB, at this process's native bitness.
    pub fn peb(&self) -> Result<Peb<ProcessAccessor>> {
        Peb::new(self.peb_addr()?, self.accessor()?)
    }

    /// The 32-bit PEB of a WoW64 process, as seen from a 64-bit controller. Fails with
    /// [`Error::NotWow64`] for a non-WoW64 (or already-32-bit-native) process.
    pub fn peb_syswow(&self) -> Result<Peb<ProcessAccessor>> {
        if Bitness::current() != Bitness::Bits64 || !self.is_wow64()? {
            return Err(Error::NotWow64);
        }

        let addr = self.peb_addr()?;
        let accessor = Arc::new(ProcessAccessor::Remote64In32(Arc::new(memaccessor::Remote64In32::new(
            self.handle.raw(),
        ))));
        Peb::new(addr, accessor)
    }

    pub fn exe_path(&self) -> Result<PathBuf> {
        let mut path = Vec::with_capacity(MAX_PATH as usize);

        let mut status;
        let mut length;
        loop {
            length = path.capacity() as u32;

            // SAFETY: `path` always has capacity of `length`.
            status = unsafe {
                QueryFullProcessImageNameW(
                    self.handle.raw(),
                    PROCESS_NAME_WIN32,
                    windows::core::PWSTR(path.as_mut_ptr()),
                    &mut length,
                )
            };

            if status.is_ok() || path.capacity() > u16::MAX as usize {
                break;
            }

            path.reserve(path.capacity());
        }

        status.map_err(Error::Win32)?;

        // SAFETY: `QueryFullProcessImageNameW` sets `length` to at most the input capacity.
        unsafe { path.set_len(length as usize) };

        Ok(OsString::from_wide(&path).into())
    }

    /// The executable's base name, from a fresh toolhelp snapshot scan. Cached after first call.
    pub fn name(&self) -> Result<&str> {
        if let Some(name) = self.name.get() {
            return Ok(name.as_str());
        }

        let entry = ProcessEntry32Iterator::new()?
            .find(|entry| entry.process_id() == self.pid)
            .ok_or(Error::ProcessExited)?;

        let name = entry.executable_name()?;
        Ok(self.name.get_or_init(|| name).as_str())
    }

    /// The parent process id, from a fresh toolhelp snapshot scan. Cached after first call.
    pub fn ppid(&self) -> Result<u32> {
        if let Some(&ppid) = self.ppid.get() {
            return Ok(ppid);
        }

        let entry = ProcessEntry32Iterator::new()?
            .find(|entry| entry.process_id() == self.pid)
            .ok_or(Error::ProcessExited)?;

        Ok(*self.ppid.get_or_init(|| entry.parent_process_id()))
    }

    /// Every committed/reserved/free region in this process's address space, from address 0
    /// until the first query failure (end of the address space).
    pub fn memory_regions(&self) -> Result<MemoryRegions> {
        Ok(MemoryRegions {
            accessor: self.accessor()?,
            next: 0,
            done: false,
        })
    }

    pub fn token(&self, desired_access: TOKEN_ACCESS_MASK) -> Result<Token> {
        let mut handle = HANDLE::default();

        // SAFETY: No preconditions. Returned handle will be closed with its RAII wrapper.
        unsafe { OpenProcessToken(self.handle.raw(), desired_access, &mut handle) }.map_err(Error::Win32)?;

        // SAFETY: We own the handle.
        let handle = unsafe { Handle::new_owned(handle)? };

        Ok(Token::from(handle))
    }

    pub fn wait(&self, timeout_ms: Option<u32>) -> Result<WAIT_EVENT> {
        // SAFETY: No preconditions.
        let status = unsafe { WaitForSingleObject(self.handle.raw(), timeout_ms.unwrap_or(INFINITE)) };

        match status {
            WAIT_FAILED => Err(Error::last_error()),
            w => Ok(w),
        }
    }

    pub fn exit_code(&self) -> Result<u32> {
        let mut exit_code = 0u32;

        // SAFETY: No preconditions.
        unsafe { GetExitCodeProcess(self.handle.raw(), &mut exit_code) }.map_err(Error::Win32)?;

        Ok(exit_code)
    }

    /// Terminates the process with the given exit code.
    pub fn terminate(&self, exit_code: u32) -> Result<()> {
        // SAFETY: FFI call with no outstanding preconditions.
        unsafe { TerminateProcess(self.handle.raw(), exit_code) }.map_err(Error::Win32)?;

        Ok(())
    }
}

impl HandleWrapper for Process {
    fn handle(&self) -> &Handle {
        &self.handle
    }
}

/// Specializes [`Process`] for the calling process: the PEB address is obtained once by
/// emitting and calling [`peb_stub::read_own_peb_address`]'s native code stub rather than
/// `NtQueryInformationProcess`, and cached for the life of the process.
pub struct CurrentProcess {
    process: Process,
    peb_addr: OnceLock<u64>,
}

impl CurrentProcess {
    pub fn get() -> Self {
        Self {
            process: Process::current_process(),
            peb_addr: OnceLock::new(),
        }
    }

    pub fn process(&self) -> &Process {
        &self.process
    }

    /// The PEB base address, resolved once via the `peb_stub` code stub and cached thereafter.
    pub fn peb_addr(&self) -> Result<u64> {
        if let Some(&addr) = self.peb_addr.get() {
            return Ok(addr);
        }

        let addr = peb_stub::read_own_peb_address()? as u64;
        Ok(*self.peb_addr.get_or_init(|| addr))
    }

    pub fn peb(&self) -> Result<Peb<ProcessAccessor>> {
        Peb::new(self.peb_addr()?, self.process.accessor()?)
    }
}

impl std::ops::Deref for CurrentProcess {
    type Target = Process;

    fn deref(&self) -> &Process {
        &self.process
    }
}

impl HandleWrapper for CurrentProcess {
    fn handle(&self) -> &Handle {
        &self.process.handle
    }
}

/// Whether the operating system itself (as opposed to this controller process) is 64-bit.
fn os_is_64bit() -> Result<bool> {
    if Bitness::current() == Bitness::Bits64 {
        return Ok(true);
    }

    // SAFETY: `GetCurrentProcess()` always returns a valid pseudo handle.
    is_wow64_process(unsafe { GetCurrentProcess() })
}

/// Dispatches `MemoryAccessor` calls to whichever concrete accessor a `Process` picked for its
/// (controller, target) bitness pair. Exists so `Remote<S, A>`/`Peb<A>` can stay generic over a
/// single `A` rather than needing one `Peb` variant per accessor kind.
#[derive(Clone)]
pub enum ProcessAccessor {
    Local(Arc<memaccessor::Local>),
    Remote(Arc<memaccessor::RemoteSameBitness>),
    Remote64In32(Arc<memaccessor::Remote64In32>),
    Remote32In64(Arc<memaccessor::Remote32In64>),
}

impl MemoryAccessor for ProcessAccessor {
    fn bitness(&self) -> Bitness {
        match self {
            Self::Local(a) => a.bitness(),
            Self::Remote(a) => a.bitness(),
            Self::Remote64In32(a) => a.bitness(),
            Self::Remote32In64(a) => a.bitness(),
        }
    }

    fn read(&self, address: u64, buffer: &mut [u8]) -> Result<()> {
        match self {
            Self::Local(a) => a.read(address, buffer),
            Self::Remote(a) => a.read(address, buffer),
            Self::Remote64In32(a) => a.read(address, buffer),
            Self::Remote32In64(a) => a.read(address, buffer),
        }
    }

    fn write(&self, address: u64, buffer: &[u8]) -> Result<()> {
        match self {
            Self::Local(a) => a.write(address, buffer),
            Self::Remote(a) => a.write(address, buffer),
            Self::Remote64In32(a) => a.write(address, buffer),
            Self::Remote32In64(a) => a.write(address, buffer),
        }
    }

    fn query(&self, address: u64) -> Result<Region> {
        match self {
            Self::Local(a) => a.query(address),
            Self::Remote(a) => a.query(address),
            Self::Remote64In32(a) => a.query(address),
            Self::Remote32In64(a) => a.query(address),
        }
    }

    fn alloc(&self, size: u64, allocation_type: u32, protect: u32) -> Result<u64> {
        match self {
            Self::Local(a) => a.alloc(size, allocation_type, protect),
            Self::Remote(a) => a.alloc(size, allocation_type, protect),
            Self::Remote64In32(a) => a.alloc(size, allocation_type, protect),
            Self::Remote32In64(a) => a.alloc(size, allocation_type, protect),
        }
    }

    fn free(&self, address: u64) -> Result<()> {
        match self {
            Self::Local(a) => a.free(address),
            Self::Remote(a) => a.free(address),
            Self::Remote64In32(a) => a.free(address),
            Self::Remote32In64(a) => a.free(address),
        }
    }

    fn mapped_filename(&self, address: u64) -> Result<String> {
        match self {
            Self::Local(a) => a.mapped_filename(address),
            Self::Remote(a) => a.mapped_filename(address),
            Self::Remote64In32(a) => a.mapped_filename(address),
            Self::Remote32In64(a) => a.mapped_filename(address),
        }
    }
}

/// A remote allocation freed automatically when dropped.
pub struct ScopedAlloc<'a> {
    process: &'a Process,
    pub address: u64,
    pub size: u64,
}

impl Drop for ScopedAlloc<'_> {
    fn drop(&mut self) {
        if let Err(error) = self.process.virtual_free(self.address) {
            error!(%error, address = self.address, "failed to free scoped allocation");
        }
    }
}

/// Iterator over a process's address space, starting at 0 and advancing by each region's size
/// until `query` fails.
pub struct MemoryRegions {
    accessor: Arc<ProcessAccessor>,
    next: u64,
    done: bool,
}

impl Iterator for MemoryRegions {
    type Item = Result<Region>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.accessor.query(self.next) {
            Ok(region) => {
                self.next = region.base_address.saturating_add(region.region_size.max(1));
                Some(Ok(region))
            }
            Err(Error::Win32(ref e)) if e.code() == ERROR_INVALID_PARAMETER.to_hresult() => {
                self.done = true;
                None
            }
            Err(error) => {
                self.done = true;
                Some(Err(error))
            }
        }
    }
}

pub struct Module {
    handle: HMODULE,
}

impl Module {
    pub fn from_name(name: &str) -> windows::core::Result<Self> {
        let name = WideString::from(name);
        let mut handle = HMODULE::default();

        // SAFETY: No preconditions. Name is valid and null terminated.
        unsafe { GetModuleHandleExW(0, name.as_pcwstr(), &mut handle) }?;

        Ok(Self { handle })
    }

    pub fn from_ref<T>(address: &T) -> Result<Self> {
        let mut handle = HMODULE::default();

        // SAFETY: No preconditions.
        // Address can be passed as char pointer because of `GET_MODULE_HANDLE_EX_FLAG_FROM_ADDRESS` flag.
        unsafe {
            GetModuleHandleExW(
                GET_MODULE_HANDLE_EX_FLAG_FROM_ADDRESS,
                windows::core::PCWSTR(address as *const _ as *const u16),
                &mut handle,
            )
        }
        .map_err(Error::Win32)?;

        Ok(Self { handle })
    }

    pub fn current() -> Result<Self> {
        static VAL: u8 = 0;
        Self::from_ref(&VAL)
    }

    pub fn file_name(&self) -> Result<PathBuf> {
        let mut buf = vec![0; MAX_PATH as usize];

        // SAFETY: No preconditions. `buf` is large enough and handle is valid.
        let size = unsafe { GetModuleFileNameW(Some(self.handle), &mut buf) } as usize;
        if size == 0 {
            return Err(Error::last_error());
        }

        buf.truncate(size);

        Ok(OsString::from_wide(&buf).into())
    }

    pub fn resolve_symbol(&self, symbol: &str) -> windows::core::Result<*const c_void> {
        let symbol = AnsiString::from(symbol);

        // SAFETY: No preconditions. Both handle and symbol are valid.
        match unsafe { GetProcAddress(self.handle, symbol.as_pcstr()) } {
            // This cast is intended. See also: https://github.com/rust-lang/rust-clippy/issues/12638
            #[expect(clippy::fn_to_numeric_cast_any)]
            Some(func) => Ok(func as *const c_void),
            None => Err(windows::core::Error::from_win32()),
        }
    }
}

impl Drop for Module {
    fn drop(&mut self) {
        // SAFETY: Only constructors are GetModuleHandleExW without the GET_MODULE_HANDLE_EX_FLAG_UNCHANGED_REFCOUNT flag.
        // This means the reference count is incremented, making the handle valid for at least the lifetime of the object.
        // This also means we must free it.
        let _ = unsafe { FreeLibrary(self.handle) };
    }
}

pub struct ProcessEntry32Iterator {
    snapshot_handle: Handle,
    process_entry: PROCESSENTRY32W,
    first: bool,
}

impl ProcessEntry32Iterator {
    pub fn new() -> Result<Self> {
        // SAFETY: `CreateToolhelp32Snapshot` is always safe to call and returns a valid handle on
        // success.
        let raw_handle = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) }.map_err(Error::Win32)?;

        // SAFETY: `raw_handle` was just returned by `CreateToolhelp32Snapshot`, which transfers ownership.
        let snapshot_handle = unsafe { Handle::new_owned(raw_handle)? };

        // SAFETY: zeroing a simple POD type.
        let mut process_entry: PROCESSENTRY32W = unsafe { core::mem::zeroed() };
        process_entry.dwSize = u32size_of::<PROCESSENTRY32W>();

        Ok(ProcessEntry32Iterator {
            snapshot_handle,
            process_entry,
            first: true,
        })
    }
}

impl Iterator for ProcessEntry32Iterator {
    type Item = ProcessEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let result = if self.first {
            // SAFETY: `snapshot_handle` is valid and `process_entry.dwSize` was set in `new`.
            unsafe { Process32FirstW(self.snapshot_handle.raw(), &mut self.process_entry) }
        } else {
            // SAFETY: `snapshot_handle` remains valid for the iterator's lifetime.
            unsafe { Process32NextW(self.snapshot_handle.raw(), &mut self.process_entry) }
        };

        match result {
            Err(error) if error.code() == ERROR_NO_MORE_FILES.to_hresult() => None,
            Err(error) => {
                error!(%error, "Failed to iterate over processes");
                None
            }
            Ok(()) => {
                self.first = false;
                Some(ProcessEntry(self.process_entry))
            }
        }
    }
}

pub struct ProcessEntry(PROCESSENTRY32W);

impl ProcessEntry {
    pub fn process_id(&self) -> u32 {
        self.0.th32ProcessID
    }

    pub fn parent_process_id(&self) -> u32 {
        self.0.th32ParentProcessID
    }

    pub fn executable_name(&self) -> Result<String> {
        // NOTE: If for some reason szExeFile all 260 bytes filled and there is no null terminator,
        // then the executable name will be truncated.
        let exe_name_length = self
            .0
            .szExeFile
            .iter()
            .position(|&c| c == 0)
            .ok_or(Error::Unsupported("process entry has no null-terminated executable name"))?;

        String::from_utf16(&self.0.szExeFile[..exe_name_length]).map_err(Error::from)
    }
}
