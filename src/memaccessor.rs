//! Bitness-aware memory access: reading, writing, allocating, and mapping-name lookups against
//! either this process or another one, regardless of whether the two processes run the same
//! pointer width.

use std::ffi::c_void;

use windows::Win32::Foundation::HANDLE;
use windows::Win32::System::Diagnostics::Debug::ReadProcessMemory;
use windows::Win32::System::Memory::{
    MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, MEMORY_BASIC_INFORMATION, PAGE_PROTECTION_FLAGS, PAGE_READWRITE,
    VIRTUAL_ALLOCATION_TYPE, VirtualAllocEx, VirtualFreeEx, VirtualQueryEx, WriteProcessMemory,
};
use windows::Win32::System::ProcessStatus::GetMappedFileNameW;
use windows::Win32::System::Threading::{GetCurrentProcess, IsWow64Process};

use crate::undoc::{NtWow64QueryInformationProcess64, NtWow64ReadVirtualMemory64, ProcessWow64Information};
use crate::{Error, Result};

/// The pointer width of a process, as observed from this controller's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bitness {
    Bits32,
    Bits64,
}

impl Bitness {
    pub fn size_of_pointer(self) -> usize {
        match self {
            Bitness::Bits32 => 4,
            Bitness::Bits64 => 8,
        }
    }

    /// This controller's own pointer width.
    pub fn current() -> Bitness {
        if cfg!(target_pointer_width = "64") {
            Bitness::Bits64
        } else {
            Bitness::Bits32
        }
    }
}

/// One region returned by a virtual memory query, normalized across bitness.
#[derive(Debug, Clone, Copy)]
pub struct Region {
    pub base_address: u64,
    pub region_size: u64,
    pub state: u32,
    pub protect: u32,
    pub region_type: u32,
}

/// Reads, writes, allocates, frees, and queries memory in some target, abstracting over whether
/// the target is this process, a same-bitness other process, or a process on the other side of
/// the 32/64 boundary.
///
/// Implementations never assume the caller's own pointer width matches the target's: every
/// address and size travels as `u64` so a 32-bit controller can address a 64-bit target's full
/// range, and vice versa.
pub trait MemoryAccessor {
    fn bitness(&self) -> Bitness;

    fn read(&self, address: u64, buffer: &mut [u8]) -> Result<()>;

    fn write(&self, address: u64, buffer: &[u8]) -> Result<()>;

    fn query(&self, address: u64) -> Result<Region>;

    fn alloc(&self, size: u64, allocation_type: u32, protect: u32) -> Result<u64>;

    fn free(&self, address: u64) -> Result<()>;

    /// The mapped file backing the page at `address`, if any (e.g. a loaded module's path).
    fn mapped_filename(&self, address: u64) -> Result<String>;

    fn read_struct<T: Copy>(&self, address: u64) -> Result<T> {
        let mut value = std::mem::MaybeUninit::<T>::uninit();
        let buffer =
            unsafe { std::slice::from_raw_parts_mut(value.as_mut_ptr().cast::<u8>(), std::mem::size_of::<T>()) };
        self.read(address, buffer)?;
        Ok(unsafe { value.assume_init() })
    }

    fn write_struct<T: Copy>(&self, address: u64, value: &T) -> Result<()> {
        let buffer =
            unsafe { std::slice::from_raw_parts((value as *const T).cast::<u8>(), std::mem::size_of::<T>()) };
        self.write(address, buffer)
    }

    /// Reads a null-terminated ASCII/Latin-1 byte string, chunking reads in page-sized
    /// increments. A chunk that straddles the end of a mapped region is retried at
    /// progressively smaller sizes rather than failing outright, so a terminator sitting just
    /// short of an unmapped page boundary is still found.
    fn read_string(&self, address: u64, max_chars: usize) -> Result<String> {
        const PAGE_BYTES: usize = 4096;

        let mut bytes = Vec::new();

        while bytes.len() < max_chars {
            let want = PAGE_BYTES.min(max_chars - bytes.len());
            let chunk = self.read_with_backoff(address + bytes.len() as u64, want);

            if chunk.is_empty() {
                break;
            }

            if let Some(pos) = chunk.iter().position(|&b| b == 0) {
                bytes.extend_from_slice(&chunk[..pos]);
                return Ok(String::from_utf8_lossy(&bytes).into_owned());
            }

            let got = chunk.len();
            bytes.extend_from_slice(&chunk);
            if got < want {
                break;
            }
        }

        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Reads up to `want` bytes at `address`, halving the request on failure until it succeeds
    /// or no bytes can be read at all. Used by [`Self::read_string`] to tolerate a tail chunk
    /// that runs past the end of a mapped region.
    fn read_with_backoff(&self, address: u64, want: usize) -> Vec<u8> {
        let mut size = want;

        loop {
            let mut buf = vec![0u8; size];
            if self.read(address, &mut buf).is_ok() {
                return buf;
            }

            if size <= 1 {
                return Vec::new();
            }

            size /= 2;
        }
    }

    /// Reads a null-terminated UTF-16 string, chunking reads in whole `u16` pairs so a surrogate
    /// pair is never split across a chunk boundary.
    fn read_wstring(&self, address: u64, max_chars: usize) -> Result<String> {
        const CHUNK_CHARS: usize = 64;

        let mut units = Vec::new();
        let mut offset = 0usize;

        while units.len() < max_chars {
            let want = CHUNK_CHARS.min(max_chars - units.len());
            let mut buf = vec![0u8; want * 2];
            self.read(address + (offset * 2) as u64, &mut buf)?;

            for pair in buf.chunks_exact(2) {
                let unit = u16::from_le_bytes([pair[0], pair[1]]);
                if unit == 0 {
                    return Ok(String::from_utf16_lossy(&units));
                }
                units.push(unit);
            }

            offset += want;
        }

        Ok(String::from_utf16_lossy(&units))
    }
}

/// Accesses this process's own memory directly, with no IPC involved.
pub struct Local;

impl MemoryAccessor for Local {
    fn bitness(&self) -> Bitness {
        Bitness::current()
    }

    fn read(&self, address: u64, buffer: &mut [u8]) -> Result<()> {
        if address == 0 {
            return Err(Error::NullPointer("Local::read"));
        }
        // SAFETY: `address` points at caller-chosen memory in our own address space; a bad
        // address is the caller's bug, matching every other accessor's read contract.
        unsafe {
            std::ptr::copy_nonoverlapping(address as *const u8, buffer.as_mut_ptr(), buffer.len());
        }
        Ok(())
    }

    fn write(&self, address: u64, buffer: &[u8]) -> Result<()> {
        if address == 0 {
            return Err(Error::NullPointer("Local::write"));
        }
        // SAFETY: see `read`.
        unsafe {
            std::ptr::copy_nonoverlapping(buffer.as_ptr(), address as *mut u8, buffer.len());
        }
        Ok(())
    }

    fn query(&self, address: u64) -> Result<Region> {
        // SAFETY: querying our own process with a handle this process owns permanently.
        let process = unsafe { GetCurrentProcess() };
        query_same_process(process, address)
    }

    fn alloc(&self, size: u64, allocation_type: u32, protect: u32) -> Result<u64> {
        let process = unsafe { GetCurrentProcess() };
        alloc_same_process(process, size, allocation_type, protect)
    }

    fn free(&self, address: u64) -> Result<()> {
        let process = unsafe { GetCurrentProcess() };
        free_same_process(process, address)
    }

    fn mapped_filename(&self, address: u64) -> Result<String> {
        let process = unsafe { GetCurrentProcess() };
        mapped_filename_same_process(process, address)
    }
}

fn query_same_process(process: HANDLE, address: u64) -> Result<Region> {
    let mut info = MEMORY_BASIC_INFORMATION::default();

    // SAFETY: `process` is valid and `info` is sized for the call.
    let written =
        unsafe { VirtualQueryEx(process, Some(address as *const c_void), &mut info, std::mem::size_of_val(&info)) };

    if written == 0 {
        return Err(Error::last_error());
    }

    Ok(Region {
        base_address: info.BaseAddress as u64,
        region_size: info.RegionSize as u64,
        state: info.State.0,
        protect: info.Protect.0,
        region_type: info.Type.0,
    })
}

fn alloc_same_process(process: HANDLE, size: u64, allocation_type: u32, protect: u32) -> Result<u64> {
    // SAFETY: `process` is valid; a null result is handled below.
    let ptr = unsafe {
        VirtualAllocEx(
            process,
            None,
            size as usize,
            VIRTUAL_ALLOCATION_TYPE(allocation_type),
            PAGE_PROTECTION_FLAGS(protect),
        )
    };

    if ptr.is_null() {
        return Err(Error::last_error());
    }

    Ok(ptr as u64)
}

fn free_same_process(process: HANDLE, address: u64) -> Result<()> {
    // SAFETY: `process` is valid; releasing an address this accessor previously allocated.
    unsafe { VirtualFreeEx(process, address as *mut c_void, 0, MEM_RELEASE) }
}

fn mapped_filename_same_process(process: HANDLE, address: u64) -> Result<String> {
    let mut buf = vec![0u16; 260];

    loop {
        // SAFETY: `process` is valid, `buf` is sized per its own length.
        let len = unsafe { GetMappedFileNameW(process, address as *const c_void, &mut buf) };

        if len == 0 {
            return Err(Error::last_error());
        }

        if (len as usize) < buf.len() {
            return Ok(String::from_utf16_lossy(&buf[..len as usize]));
        }

        buf.resize(buf.len() * 2, 0);
    }
}

/// Accesses a remote process with the same pointer width as this controller.
pub struct RemoteSameBitness {
    process: HANDLE,
    bitness: Bitness,
}

impl RemoteSameBitness {
    pub fn new(process: HANDLE) -> Self {
        Self {
            process,
            bitness: Bitness::current(),
        }
    }
}

impl MemoryAccessor for RemoteSameBitness {
    fn bitness(&self) -> Bitness {
        self.bitness
    }

    fn read(&self, address: u64, buffer: &mut [u8]) -> Result<()> {
        if address == 0 {
            return Err(Error::NullPointer("RemoteSameBitness::read"));
        }

        let mut read = 0usize;
        // SAFETY: `self.process` grants at least PROCESS_VM_READ; a bad `address` surfaces as
        // a Win32 error, not UB, since ReadProcessMemory validates the target range itself.
        unsafe {
            ReadProcessMemory(
                self.process,
                address as *const c_void,
                buffer.as_mut_ptr().cast(),
                buffer.len(),
                Some(&mut read),
            )?;
        }

        if read != buffer.len() {
            return Err(Error::Partial { got: read });
        }

        Ok(())
    }

    fn write(&self, address: u64, buffer: &[u8]) -> Result<()> {
        if address == 0 {
            return Err(Error::NullPointer("RemoteSameBitness::write"));
        }

        let mut written = 0usize;
        // SAFETY: see `read`.
        unsafe {
            WriteProcessMemory(
                self.process,
                address as *const c_void,
                buffer.as_ptr().cast(),
                buffer.len(),
                Some(&mut written),
            )?;
        }

        if written != buffer.len() {
            return Err(Error::Partial { got: written });
        }

        Ok(())
    }

    fn query(&self, address: u64) -> Result<Region> {
        query_same_process(self.process, address)
    }

    fn alloc(&self, size: u64, allocation_type: u32, protect: u32) -> Result<u64> {
        alloc_same_process(self.process, size, allocation_type, protect)
    }

    fn free(&self, address: u64) -> Result<()> {
        free_same_process(self.process, address)
    }

    fn mapped_filename(&self, address: u64) -> Result<String> {
        mapped_filename_same_process(self.process, address)
    }
}

/// Accesses a 32-bit (WoW64) target from a 64-bit controller.
///
/// Windows thunks `ReadProcessMemory`/`WriteProcessMemory`/`VirtualAllocEx`/`VirtualQueryEx`
/// transparently in this direction, so this is really `RemoteSameBitness` plus bookkeeping that
/// the target's own pointers are 32 bits wide (addresses above 4 GiB are simply impossible in
/// the target, never truncated by this accessor).
pub struct Remote64In32 {
    inner: RemoteSameBitness,
}

impl Remote64In32 {
    pub fn new(process: HANDLE) -> Self {
        Self {
            inner: RemoteSameBitness {
                process,
                bitness: Bitness::Bits32,
            },
        }
    }
}

impl MemoryAccessor for Remote64In32 {
    fn bitness(&self) -> Bitness {
        Bitness::Bits32
    }

    fn read(&self, address: u64, buffer: &mut [u8]) -> Result<()> {
        if address > u32::MAX as u64 {
            return Err(Error::BitnessMismatch);
        }
        self.inner.read(address, buffer)
    }

    fn write(&self, address: u64, buffer: &[u8]) -> Result<()> {
        if address > u32::MAX as u64 {
            return Err(Error::BitnessMismatch);
        }
        self.inner.write(address, buffer)
    }

    fn query(&self, address: u64) -> Result<Region> {
        self.inner.query(address)
    }

    fn alloc(&self, size: u64, allocation_type: u32, protect: u32) -> Result<u64> {
        self.inner.alloc(size, allocation_type, protect)
    }

    fn free(&self, address: u64) -> Result<()> {
        self.inner.free(address)
    }

    fn mapped_filename(&self, address: u64) -> Result<String> {
        self.inner.mapped_filename(address)
    }
}

/// Accesses a 64-bit target from a 32-bit (WoW64) controller: "heaven's gate".
///
/// Only read is backed by a real, documented ntdll export (`NtWow64ReadVirtualMemory64`); every
/// other operation goes through `undoc::wow64`'s manual CPU-mode switch. See that module and
/// `peb_stub::call_x64` for the mechanics.
pub struct Remote32In64 {
    process: HANDLE,
    ntdll64_base: std::sync::OnceLock<u64>,
}

impl Remote32In64 {
    pub fn new(process: HANDLE) -> Self {
        Self {
            process,
            ntdll64_base: std::sync::OnceLock::new(),
        }
    }

    /// Resolves this WoW64 process's own ntdll64 base by walking its 64-bit PEB's loader list.
    /// Cached after the first call since a loaded module's base never moves.
    #[cfg(target_arch = "x86")]
    fn ntdll64_base(&self) -> Result<u64> {
        if let Some(&base) = self.ntdll64_base.get() {
            return Ok(base);
        }

        // The 64-bit PEB address of our own (32-bit) process, obtained via the WoW64 variant of
        // NtQueryInformationProcess so it returns the PEB64, not the PEB32 WoW64Info normally
        // returns for a *target* process.
        let mut peb64: u64 = 0;
        unsafe {
            NtWow64QueryInformationProcess64(
                GetCurrentProcess(),
                ProcessWow64Information,
                (&mut peb64 as *mut u64).cast(),
                std::mem::size_of::<u64>() as u32,
                None,
            )
            .map_err(Error::Win32)?;
        }

        if peb64 == 0 {
            return Err(Error::PebUnavailable);
        }

        // PEB64.Ldr is at offset 0x18; Ldr.InMemoryOrderModuleList is at offset 0x20 within
        // PEB_LDR_DATA64; each LIST_ENTRY64 is 16 bytes, and the module base sits 16 bytes after
        // the in-memory-order link within an LDR_DATA_TABLE_ENTRY64.
        let read64 = |addr: u64, buf: &mut [u8]| -> windows::core::Result<()> {
            unsafe { NtWow64ReadVirtualMemory64(self.process, addr, buf.as_mut_ptr().cast(), buf.len() as u64, None) }
        };

        let mut ldr_buf = [0u8; 8];
        read64(peb64 + 0x18, &mut ldr_buf).map_err(Error::Win32)?;
        let ldr = u64::from_le_bytes(ldr_buf);

        let mut flink_buf = [0u8; 8];
        read64(ldr + 0x20, &mut flink_buf).map_err(Error::Win32)?;
        let mut entry = u64::from_le_bytes(flink_buf);

        for _ in 0..4096 {
            // `entry` is the address of this node's InMemoryOrderLinks (offset 0x10 within
            // LDR_DATA_TABLE_ENTRY64), not the struct base; every other field offset below is
            // relative to `entry`, i.e. (field offset in the struct) - 0x10.
            let mut base_buf = [0u8; 8];
            read64(entry + 0x20, &mut base_buf).map_err(Error::Win32)?;
            let dll_base = u64::from_le_bytes(base_buf);

            if dll_base == 0 {
                return Err(Error::LoaderListCorrupt);
            }

            let mut name_len_buf = [0u8; 2];
            read64(entry + 0x48, &mut name_len_buf).map_err(Error::Win32)?;
            let name_len = u16::from_le_bytes(name_len_buf) as usize;

            let mut name_ptr_buf = [0u8; 8];
            read64(entry + 0x50, &mut name_ptr_buf).map_err(Error::Win32)?;
            let name_ptr = u64::from_le_bytes(name_ptr_buf);

            let mut name_buf = vec![0u8; name_len];
            read64(name_ptr, &mut name_buf).map_err(Error::Win32)?;
            let name = String::from_utf16_lossy(
                &name_buf
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]))
                    .collect::<Vec<_>>(),
            );

            if name.eq_ignore_ascii_case("ntdll.dll") {
                let base = self.ntdll64_base.get_or_init(|| dll_base);
                return Ok(*base);
            }

            let mut next_buf = [0u8; 8];
            read64(entry, &mut next_buf).map_err(Error::Win32)?;
            entry = u64::from_le_bytes(next_buf);
        }

        Err(Error::LoaderListCorrupt)
    }

    #[cfg(target_arch = "x86")]
    fn read64_fn(&self) -> impl Fn(u64, &mut [u8]) -> windows::core::Result<()> + '_ {
        move |addr, buf| unsafe {
            NtWow64ReadVirtualMemory64(self.process, addr, buf.as_mut_ptr().cast(), buf.len() as u64, None)
        }
    }

    /// Creates a thread in the 64-bit target, returning its raw handle value.
    #[cfg(target_arch = "x86")]
    pub fn create_remote_thread(&self, start_address: u64, parameter: u64, create_suspended: bool) -> Result<u64> {
        let base = self.ntdll64_base()?;
        unsafe {
            crate::undoc::wow64::NtCreateThreadEx_32_to_64(
                base,
                self.read64_fn(),
                self.process,
                start_address,
                parameter,
                create_suspended,
            )
        }
    }

    #[cfg(not(target_arch = "x86"))]
    pub fn create_remote_thread(&self, _start_address: u64, _parameter: u64, _create_suspended: bool) -> Result<u64> {
        Err(Error::Unsupported("Remote32In64 requires a 32-bit controller process"))
    }

    /// Reads a 64-bit target thread's native `CONTEXT` into `context_buffer_64`, an address in
    /// this (WoW64) process's own memory sized for a 64-bit `CONTEXT`.
    #[cfg(target_arch = "x86")]
    pub fn get_thread_context(&self, thread: HANDLE, context_buffer_64: u64) -> Result<()> {
        let base = self.ntdll64_base()?;
        unsafe { crate::undoc::wow64::NtGetContextThread_32_to_64(base, self.read64_fn(), thread, context_buffer_64) }
    }

    #[cfg(not(target_arch = "x86"))]
    pub fn get_thread_context(&self, _thread: HANDLE, _context_buffer_64: u64) -> Result<()> {
        Err(Error::Unsupported("Remote32In64 requires a 32-bit controller process"))
    }

    #[cfg(target_arch = "x86")]
    pub fn set_thread_context(&self, thread: HANDLE, context_buffer_64: u64) -> Result<()> {
        let base = self.ntdll64_base()?;
        unsafe { crate::undoc::wow64::NtSetContextThread_32_to_64(base, self.read64_fn(), thread, context_buffer_64) }
    }

    #[cfg(not(target_arch = "x86"))]
    pub fn set_thread_context(&self, _thread: HANDLE, _context_buffer_64: u64) -> Result<()> {
        Err(Error::Unsupported("Remote32In64 requires a 32-bit controller process"))
    }

    /// The target thread's Win32 start address (`ThreadQuerySetWin32StartAddress`, class 9).
    #[cfg(target_arch = "x86")]
    pub fn query_thread_win32_start_address(&self, thread: HANDLE) -> Result<u64> {
        let base = self.ntdll64_base()?;
        let mut addr: u64 = 0;
        unsafe {
            crate::undoc::wow64::NtQueryInformationThread_32_to_64(
                base,
                self.read64_fn(),
                thread,
                9,
                (&mut addr as *mut u64) as u64,
                8,
            )?;
        }
        Ok(addr)
    }

    #[cfg(not(target_arch = "x86"))]
    pub fn query_thread_win32_start_address(&self, _thread: HANDLE) -> Result<u64> {
        Err(Error::Unsupported("Remote32In64 requires a 32-bit controller process"))
    }

    /// Exposes this accessor's target process handle for callers (e.g. `Thread`) that need to
    /// issue raw thunks against it directly.
    pub fn process_handle(&self) -> HANDLE {
        self.process
    }
}

impl RemoteSameBitness {
    pub fn process_handle(&self) -> HANDLE {
        self.process
    }
}

impl MemoryAccessor for Remote32In64 {
    fn bitness(&self) -> Bitness {
        Bitness::Bits64
    }

    #[cfg(target_arch = "x86")]
    fn read(&self, address: u64, buffer: &mut [u8]) -> Result<()> {
        if address == 0 {
            return Err(Error::NullPointer("Remote32In64::read"));
        }

        let mut read: u64 = 0;
        // SAFETY: genuine, documented ntdll export for this exact purpose.
        unsafe {
            NtWow64ReadVirtualMemory64(self.process, address, buffer.as_mut_ptr().cast(), buffer.len() as u64, Some(&mut read))
                .map_err(Error::Win32)?;
        }

        if read != buffer.len() as u64 {
            return Err(Error::Partial { got: read as usize });
        }

        Ok(())
    }

    #[cfg(not(target_arch = "x86"))]
    fn read(&self, _address: u64, _buffer: &mut [u8]) -> Result<()> {
        Err(Error::Unsupported("Remote32In64 requires a 32-bit controller process"))
    }

    #[cfg(target_arch = "x86")]
    fn write(&self, address: u64, buffer: &[u8]) -> Result<()> {
        let base = self.ntdll64_base()?;
        let target = crate::undoc::wow64::resolve64(self.read64_fn(), base, "NtWriteVirtualMemory")?;

        let mut written: u64 = 0;
        unsafe {
            crate::peb_stub::call_x64(
                target,
                &[
                    self.process.0 as u64,
                    address,
                    buffer.as_ptr() as u64,
                    buffer.len() as u64,
                    (&mut written) as *mut u64 as u64,
                ],
            )?;
        }

        Ok(())
    }

    #[cfg(not(target_arch = "x86"))]
    fn write(&self, _address: u64, _buffer: &[u8]) -> Result<()> {
        Err(Error::Unsupported("Remote32In64 requires a 32-bit controller process"))
    }

    #[cfg(target_arch = "x86")]
    fn query(&self, address: u64) -> Result<Region> {
        let base = self.ntdll64_base()?;
        let mut info = [0u8; 48];
        crate::undoc::wow64::NtQueryVirtualMemory_32_to_64(
            base,
            self.read64_fn(),
            self.process,
            address,
            0,
            info.as_mut_ptr() as u64,
            info.len() as u64,
            0,
        )?;

        Ok(Region {
            base_address: u64::from_le_bytes(info[0..8].try_into().unwrap()),
            region_size: u64::from_le_bytes(info[24..32].try_into().unwrap()),
            state: u32::from_le_bytes(info[40..44].try_into().unwrap()),
            protect: u32::from_le_bytes(info[32..36].try_into().unwrap()),
            region_type: u32::from_le_bytes(info[44..48].try_into().unwrap()),
        })
    }

    #[cfg(not(target_arch = "x86"))]
    fn query(&self, _address: u64) -> Result<Region> {
        Err(Error::Unsupported("Remote32In64 requires a 32-bit controller process"))
    }

    #[cfg(target_arch = "x86")]
    fn alloc(&self, size: u64, allocation_type: u32, protect: u32) -> Result<u64> {
        let base = self.ntdll64_base()?;
        let target = crate::undoc::wow64::resolve64(self.read64_fn(), base, "NtAllocateVirtualMemory")?;

        let mut region_base: u64 = 0;
        let mut region_size = size;
        unsafe {
            crate::peb_stub::call_x64(
                target,
                &[
                    self.process.0 as u64,
                    (&mut region_base) as *mut u64 as u64,
                    0,
                    (&mut region_size) as *mut u64 as u64,
                    allocation_type as u64 | MEM_RESERVE.0 as u64 | MEM_COMMIT.0 as u64,
                    protect as u64,
                ],
            )?;
        }

        Ok(region_base)
    }

    #[cfg(not(target_arch = "x86"))]
    fn alloc(&self, _size: u64, _allocation_type: u32, _protect: u32) -> Result<u64> {
        Err(Error::Unsupported("Remote32In64 requires a 32-bit controller process"))
    }

    #[cfg(target_arch = "x86")]
    fn free(&self, address: u64) -> Result<()> {
        let base = self.ntdll64_base()?;
        let target = crate::undoc::wow64::resolve64(self.read64_fn(), base, "NtFreeVirtualMemory")?;

        let mut region_base = address;
        let mut region_size: u64 = 0;
        unsafe {
            crate::peb_stub::call_x64(
                target,
                &[
                    self.process.0 as u64,
                    (&mut region_base) as *mut u64 as u64,
                    (&mut region_size) as *mut u64 as u64,
                    MEM_RELEASE.0 as u64,
                ],
            )?;
        }

        Ok(())
    }

    #[cfg(not(target_arch = "x86"))]
    fn free(&self, _address: u64) -> Result<()> {
        Err(Error::Unsupported("Remote32In64 requires a 32-bit controller process"))
    }

    fn mapped_filename(&self, _address: u64) -> Result<String> {
        // GetMappedFileName has no WoW64/64-bit variant reachable from 32-bit code; out of
        // scope for the heaven's gate path.
        Err(Error::Unsupported("mapped_filename is unavailable across the 32-to-64 boundary"))
    }
}

/// Inspects whether `process` is a 32-bit process running under WoW64 on a 64-bit controller.
pub fn is_wow64_process(process: HANDLE) -> Result<bool> {
    let mut wow64 = windows::Win32::Foundation::BOOL(0);
    // SAFETY: `process` only needs PROCESS_QUERY_INFORMATION (or LIMITED).
    unsafe { IsWow64Process(process, &mut wow64)? };
    Ok(wow64.as_bool())
}
