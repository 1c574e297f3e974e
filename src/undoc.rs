//! Undocumented and semi-documented Windows API functions, resolved lazily via `GetProcAddress`.

// Allowed since the goal is to replicate the Windows API crate so that it's familiar, which itself uses the raw names from the API.
#![allow(
    non_camel_case_types,
    non_snake_case,
    non_upper_case_globals,
    unsafe_op_in_unsafe_fn,
    clippy::too_many_arguments,
    clippy::missing_safety_doc,
    clippy::undocumented_unsafe_blocks
)]

use std::ffi::c_void;
use std::mem;

use windows::Win32::Foundation::{HANDLE, NTSTATUS, UNICODE_STRING};

use crate::process::Module;

#[repr(transparent)]
#[derive(PartialEq, Eq, Copy, Clone, Default)]
pub struct PROCESSINFOCLASS(pub i32);
/// https://learn.microsoft.com/en-us/windows/win32/api/winternl/nf-winternl-ntqueryinformationprocess
pub const ProcessBasicInformation: PROCESSINFOCLASS = PROCESSINFOCLASS(0);
/// Returns the PEB32 address of a WoW64 process, or `STATUS_NOT_FOUND` for a native process.
pub const ProcessWow64Information: PROCESSINFOCLASS = PROCESSINFOCLASS(26);

/// https://learn.microsoft.com/en-us/windows/win32/api/winternl/nf-winternl-ntqueryinformationprocess
pub unsafe fn NtQueryInformationProcess(
    ProcessHandle: HANDLE,
    ProcessInformationClass: PROCESSINFOCLASS,
    ProcessInformation: *mut c_void,
    ProcessInformationLength: u32,
    ReturnLength: Option<*mut u32>,
) -> windows::core::Result<()> {
    let NtQueryInformationProcess = mem::transmute::<
        *const c_void,
        unsafe extern "system" fn(HANDLE, PROCESSINFOCLASS, *mut c_void, u32, *mut u32) -> NTSTATUS,
    >(Module::from_name("ntdll.dll")?.resolve_symbol("NtQueryInformationProcess")?);

    NtQueryInformationProcess(
        ProcessHandle,
        ProcessInformationClass,
        ProcessInformation,
        ProcessInformationLength,
        ReturnLength.unwrap_or(std::ptr::null_mut()),
    )
    .ok()
}

#[repr(transparent)]
#[derive(PartialEq, Eq, Copy, Clone, Default)]
pub struct THREADINFOCLASS(pub i32);

/// https://github.com/winsiderss/systeminformer/blob/master/phnt/include/ntpsapi.h
pub const ThreadQuerySetWin32StartAddress: THREADINFOCLASS = THREADINFOCLASS(9);

/// https://learn.microsoft.com/en-us/windows-hardware/drivers/ddi/ntifs/nf-ntifs-ntqueryinformationthread
pub unsafe fn NtQueryInformationThread(
    ThreadHandle: HANDLE,
    ThreadInformationClass: THREADINFOCLASS,
    ThreadInformation: *mut c_void,
    ThreadInformationLength: u32,
    ReturnLength: Option<*mut u32>,
) -> windows::core::Result<()> {
    let NtQueryInformationThread = mem::transmute::<
        *const c_void,
        unsafe extern "system" fn(HANDLE, THREADINFOCLASS, *mut c_void, u32, *mut u32) -> NTSTATUS,
    >(Module::from_name("ntdll.dll")?.resolve_symbol("NtQueryInformationThread")?);

    NtQueryInformationThread(
        ThreadHandle,
        ThreadInformationClass,
        ThreadInformation,
        ThreadInformationLength,
        ReturnLength.unwrap_or(std::ptr::null_mut()),
    )
    .ok()
}

/// https://microsoft.github.io/windows-docs-rs/doc/windows/Wdk/Foundation/struct.OBJECT_ATTRIBUTES.html
#[repr(C)]
pub struct OBJECT_ATTRIBUTES {
    pub Length: u32,
    pub RootDirectory: HANDLE,
    pub ObjectName: *const UNICODE_STRING,
    pub Attributes: u32,
    pub SecurityDescriptor: *const c_void,
    pub SecurityQualityOfService: *const c_void,
}

impl Default for OBJECT_ATTRIBUTES {
    fn default() -> Self {
        unsafe { mem::zeroed() }
    }
}

/// https://learn.microsoft.com/en-us/windows-hardware/drivers/ddi/ntifs/nf-ntifs-ntcreatethreadex
///
/// Same-bitness only: for a same-process-bitness target (including a 64-bit controller acting
/// on a WoW64 target, which Windows thunks transparently), this is the thread-creation primitive
/// used instead of `CreateRemoteThread`/`CreateThread` so the caller can supply the full
/// attribute list and start in a suspended state.
pub unsafe fn NtCreateThreadEx(
    ThreadHandle: *mut HANDLE,
    DesiredAccess: u32,
    ObjectAttributes: *const OBJECT_ATTRIBUTES,
    ProcessHandle: HANDLE,
    StartRoutine: *const c_void,
    Argument: *const c_void,
    CreateFlags: u32,
    ZeroBits: usize,
    StackSize: usize,
    MaximumStackSize: usize,
    AttributeList: *const c_void,
) -> windows::core::Result<()> {
    let NtCreateThreadEx = mem::transmute::<
        *const c_void,
        unsafe extern "system" fn(
            *mut HANDLE,
            u32,
            *const OBJECT_ATTRIBUTES,
            HANDLE,
            *const c_void,
            *const c_void,
            u32,
            usize,
            usize,
            usize,
            *const c_void,
        ) -> NTSTATUS,
    >(Module::from_name("ntdll.dll")?.resolve_symbol("NtCreateThreadEx")?);

    NtCreateThreadEx(
        ThreadHandle,
        DesiredAccess,
        ObjectAttributes,
        ProcessHandle,
        StartRoutine,
        Argument,
        CreateFlags,
        ZeroBits,
        StackSize,
        MaximumStackSize,
        AttributeList,
    )
    .ok()
}

/// https://learn.microsoft.com/en-us/windows-hardware/drivers/ddi/ntddk/nf-ntddk-ntwow64readvirtualmemory64
///
/// A genuine ntdll export, present so a 32-bit process can read above the 4 GiB boundary of a
/// 64-bit target's address space. The only "heaven's gate" primitive with a real, documented
/// entry point; everything else in [`wow64`] goes through a manual mode switch.
pub unsafe fn NtWow64ReadVirtualMemory64(
    ProcessHandle: HANDLE,
    BaseAddress: u64,
    Buffer: *mut c_void,
    BufferSize: u64,
    NumberOfBytesRead: Option<*mut u64>,
) -> windows::core::Result<()> {
    let NtWow64ReadVirtualMemory64 = mem::transmute::<
        *const c_void,
        unsafe extern "system" fn(HANDLE, u64, *mut c_void, u64, *mut u64) -> NTSTATUS,
    >(Module::from_name("ntdll.dll")?.resolve_symbol("NtWow64ReadVirtualMemory64")?);

    NtWow64ReadVirtualMemory64(
        ProcessHandle,
        BaseAddress,
        Buffer,
        BufferSize,
        NumberOfBytesRead.unwrap_or(std::ptr::null_mut()),
    )
    .ok()
}

/// https://learn.microsoft.com/en-us/windows/win32/api/winternl/nf-winternl-ntqueryinformationprocess,
/// called through the WoW64 variant so a 32-bit caller can retrieve a 64-bit-laid-out
/// `PROCESS_BASIC_INFORMATION` (and, notably, a 64-bit target's PEB address) for a process that
/// is not itself WoW64.
pub unsafe fn NtWow64QueryInformationProcess64(
    ProcessHandle: HANDLE,
    ProcessInformationClass: PROCESSINFOCLASS,
    ProcessInformation: *mut c_void,
    ProcessInformationLength: u32,
    ReturnLength: Option<*mut u32>,
) -> windows::core::Result<()> {
    let NtWow64QueryInformationProcess64 = mem::transmute::<
        *const c_void,
        unsafe extern "system" fn(HANDLE, PROCESSINFOCLASS, *mut c_void, u32, *mut u32) -> NTSTATUS,
    >(Module::from_name("ntdll.dll")?.resolve_symbol("NtWow64QueryInformationProcess64")?);

    NtWow64QueryInformationProcess64(
        ProcessHandle,
        ProcessInformationClass,
        ProcessInformation,
        ProcessInformationLength,
        ReturnLength.unwrap_or(std::ptr::null_mut()),
    )
    .ok()
}

/// Heaven's gate: calling genuinely 64-bit code from a 32-bit (WoW64) process.
///
/// Only `NtWow64ReadVirtualMemory64`/`NtWow64QueryInformationProcess64` above are real,
/// documented ntdll exports callable directly from 32-bit code. Everything else a 32-bit
/// controller needs to do against a 64-bit target (write memory, allocate memory, get/set a
/// thread's native context, create a remote thread) has no WoW64-prefixed export and must be
/// reached by switching the CPU to 64-bit (long) mode mid-function, calling the real ntdll
/// export in ntdll64, and switching back. This module resolves those ntdll64 exports and performs
/// that switch; see [`crate::peb_stub`] for the fixed machine code that does the actual mode
/// transition.
#[cfg(target_arch = "x86")]
pub mod wow64 {
    use windows::Win32::Foundation::HANDLE;

    use crate::Error;
    use crate::peb_stub::call_x64;

    /// Resolves a symbol's RVA from ntdll64's export directory and adds it to `ntdll64_base`.
    ///
    /// `ntdll64_base` and the read primitive are supplied by the caller (typically
    /// `memaccessor::Remote32In64`, which already has a `NtWow64ReadVirtualMemory64`-backed
    /// reader and the 64-bit PEB walk needed to find ntdll64's base in the first place).
    pub unsafe fn resolve64(
        read64: impl Fn(u64, &mut [u8]) -> windows::core::Result<()>,
        ntdll64_base: u64,
        symbol: &str,
    ) -> crate::Result<u64> {
        // PE64 export directory walk: e_lfanew -> OptionalHeader.DataDirectory[0] -> IMAGE_EXPORT_DIRECTORY.
        let mut dos_hdr = [0u8; 0x40];
        read64(ntdll64_base, &mut dos_hdr).map_err(Error::Win32)?;
        let e_lfanew = u32::from_le_bytes(dos_hdr[0x3c..0x40].try_into().unwrap()) as u64;

        let mut export_dir_rva_buf = [0u8; 4];
        read64(ntdll64_base + e_lfanew + 0x88, &mut export_dir_rva_buf).map_err(Error::Win32)?;
        let export_dir_rva = u32::from_le_bytes(export_dir_rva_buf) as u64;

        let mut counts = [0u8; 8];
        read64(ntdll64_base + export_dir_rva + 0x18, &mut counts).map_err(Error::Win32)?;
        let number_of_names = u32::from_le_bytes(counts[4..8].try_into().unwrap());

        let mut rvas = [0u8; 12];
        read64(ntdll64_base + export_dir_rva + 0x20, &mut rvas).map_err(Error::Win32)?;
        let names_rva = u32::from_le_bytes(rvas[4..8].try_into().unwrap()) as u64;
        let ordinals_rva = u32::from_le_bytes(rvas[8..12].try_into().unwrap()) as u64;
        let functions_rva = u32::from_le_bytes(rvas[0..4].try_into().unwrap()) as u64;

        for i in 0..number_of_names {
            let mut name_rva_buf = [0u8; 4];
            read64(ntdll64_base + names_rva + u64::from(i) * 4, &mut name_rva_buf).map_err(Error::Win32)?;
            let name_rva = u32::from_le_bytes(name_rva_buf) as u64;

            let mut name_buf = [0u8; 64];
            read64(ntdll64_base + name_rva, &mut name_buf).map_err(Error::Win32)?;
            let len = name_buf.iter().position(|&b| b == 0).unwrap_or(name_buf.len());

            if &name_buf[..len] == symbol.as_bytes() {
                let mut ordinal_buf = [0u8; 2];
                read64(ntdll64_base + ordinals_rva + u64::from(i) * 2, &mut ordinal_buf).map_err(Error::Win32)?;
                let ordinal = u16::from_le_bytes(ordinal_buf) as u64;

                let mut fn_rva_buf = [0u8; 4];
                read64(ntdll64_base + functions_rva + ordinal * 4, &mut fn_rva_buf).map_err(Error::Win32)?;
                return Ok(ntdll64_base + u32::from_le_bytes(fn_rva_buf) as u64);
            }
        }

        Err(Error::Unsupported("symbol not found in ntdll64 export table"))
    }

    /// Creates a thread in a 64-bit target process from a 32-bit controller.
    pub unsafe fn NtCreateThreadEx_32_to_64(
        ntdll64_base: u64,
        read64: impl Fn(u64, &mut [u8]) -> windows::core::Result<()>,
        process: HANDLE,
        start_routine: u64,
        argument: u64,
        create_suspended: bool,
    ) -> crate::Result<u64> {
        let target = resolve64(read64, ntdll64_base, "NtCreateThreadEx")?;
        let mut thread_handle: u64 = 0;

        unsafe {
            call_x64(
                target,
                &[
                    (&mut thread_handle) as *mut u64 as u64,
                    0x1FFFFF,
                    0,
                    process.0 as u64,
                    start_routine,
                    argument,
                    if create_suspended { 1 } else { 0 },
                ],
            )?;
        }

        Ok(thread_handle)
    }

    /// Reads a 64-bit target thread's native `CONTEXT` via the heaven's gate call path.
    pub unsafe fn NtGetContextThread_32_to_64(
        ntdll64_base: u64,
        read64: impl Fn(u64, &mut [u8]) -> windows::core::Result<()>,
        thread: HANDLE,
        context_buffer_64: u64,
    ) -> crate::Result<()> {
        let target = resolve64(read64, ntdll64_base, "NtGetContextThread")?;
        unsafe { call_x64(target, &[thread.0 as u64, context_buffer_64])?; }
        Ok(())
    }

    /// Writes a 64-bit target thread's native `CONTEXT` via the heaven's gate call path.
    pub unsafe fn NtSetContextThread_32_to_64(
        ntdll64_base: u64,
        read64: impl Fn(u64, &mut [u8]) -> windows::core::Result<()>,
        thread: HANDLE,
        context_buffer_64: u64,
    ) -> crate::Result<()> {
        let target = resolve64(read64, ntdll64_base, "NtSetContextThread")?;
        unsafe { call_x64(target, &[thread.0 as u64, context_buffer_64])?; }
        Ok(())
    }

    /// Queries a region's protection/type/state in a 64-bit target from a 32-bit controller.
    pub unsafe fn NtQueryVirtualMemory_32_to_64(
        ntdll64_base: u64,
        read64: impl Fn(u64, &mut [u8]) -> windows::core::Result<()>,
        process: HANDLE,
        base_address: u64,
        info_class: u32,
        buffer_64: u64,
        buffer_length: u64,
        return_length_64: u64,
    ) -> crate::Result<()> {
        let target = resolve64(read64, ntdll64_base, "NtQueryVirtualMemory")?;
        unsafe {
            call_x64(
                target,
                &[
                    process.0 as u64,
                    base_address,
                    info_class as u64,
                    buffer_64,
                    buffer_length,
                    return_length_64,
                ],
            )?;
        }
        Ok(())
    }

    /// Queries a 64-bit target thread's Win32 start address from a 32-bit controller.
    pub unsafe fn NtQueryInformationThread_32_to_64(
        ntdll64_base: u64,
        read64: impl Fn(u64, &mut [u8]) -> windows::core::Result<()>,
        thread: HANDLE,
        info_class: u32,
        buffer_64: u64,
        buffer_length: u32,
    ) -> crate::Result<()> {
        let target = resolve64(read64, ntdll64_base, "NtQueryInformationThread")?;
        unsafe {
            call_x64(
                target,
                &[thread.0 as u64, info_class as u64, buffer_64, buffer_length as u64, 0],
            )?;
        }
        Ok(())
    }
}
