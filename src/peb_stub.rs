//! Fixed machine code emitted at runtime for operations with no Win32/NT API surface:
//! reading this process's own PEB address directly off the TEB, and bridging a 32-bit
//! controller into 64-bit code (heaven's gate) to reach a WoW64 host's native ntdll.

use std::ffi::c_void;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use windows::Win32::System::Memory::{MEM_COMMIT, MEM_RESERVE, PAGE_EXECUTE_READ, PAGE_READWRITE, VirtualAlloc, VirtualProtect};

use crate::{Error, Result};

const CHUNK_SIZE: usize = 4096;

/// A process-wide, append-only, executable code region.
///
/// Lazily allocated on first use and never freed or shrunk: the stubs placed here are tiny,
/// fixed, and meant to live for the remainder of the process, so there is nothing to reclaim
/// and no reuse to track. Writers take `LOCK` while the page is still writable; the page is
/// flipped to execute-only once, the first time it fills past what was committed read-write.
struct CodeAllocator {
    base: *mut u8,
    committed: AtomicUsize,
    used: AtomicUsize,
}

// SAFETY: `base` points at a fixed-size VirtualAlloc reservation; all mutation goes through
// `emit`, which serializes writers with `LOCK`.
unsafe impl Send for CodeAllocator {}
unsafe impl Sync for CodeAllocator {}

static ALLOCATOR: OnceLock<CodeAllocator> = OnceLock::new();
static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

fn allocator() -> Result<&'static CodeAllocator> {
    if let Some(a) = ALLOCATOR.get() {
        return Ok(a);
    }

    // SAFETY: reserves address space only; no memory is committed yet.
    let base = unsafe { VirtualAlloc(None, CHUNK_SIZE, MEM_RESERVE, PAGE_READWRITE) };
    if base.is_null() {
        return Err(Error::last_error());
    }

    Ok(ALLOCATOR.get_or_init(|| CodeAllocator {
        base: base.cast(),
        committed: AtomicUsize::new(0),
        used: AtomicUsize::new(0),
    }))
}

/// Bump-appends `code` into the process-wide executable region and returns a pointer to it.
///
/// The region grows in page-sized commits under `LOCK`; callers hold no lock themselves, so
/// pointers returned by earlier `emit` calls stay valid for the rest of the process's life.
pub fn emit(code: &[u8]) -> Result<*const c_void> {
    let _guard = LOCK.lock().expect("peb_stub allocator lock poisoned");
    let allocator = allocator()?;

    let offset = allocator.used.load(Ordering::Acquire);
    let end = offset + code.len();

    if end > CHUNK_SIZE {
        return Err(Error::Unsupported("code stub allocator exhausted its single reserved page"));
    }

    if end > allocator.committed.load(Ordering::Acquire) {
        // SAFETY: `base` is reserved but not yet committed for this range; committing
        // read-write memory we already own is always valid.
        let committed = unsafe {
            VirtualAlloc(
                Some(allocator.base.cast()),
                CHUNK_SIZE,
                MEM_COMMIT,
                PAGE_READWRITE,
            )
        };

        if committed.is_null() {
            return Err(Error::last_error());
        }

        allocator.committed.store(CHUNK_SIZE, Ordering::Release);
    }

    // SAFETY: `offset..end` lies within the committed, writable region we just ensured exists.
    unsafe {
        std::ptr::copy_nonoverlapping(code.as_ptr(), allocator.base.add(offset), code.len());
    }

    allocator.used.store(end, Ordering::Release);

    let mut old_protect = Default::default();
    // SAFETY: flips the whole page to execute-read; the page only ever holds code written by
    // this module, never attacker- or caller-controlled bytes.
    unsafe {
        VirtualProtect(allocator.base.cast(), CHUNK_SIZE, PAGE_EXECUTE_READ, &mut old_protect)?;
    }

    // SAFETY: `allocator.base.add(offset)` was just initialized above.
    Ok(unsafe { allocator.base.add(offset) as *const c_void })
}

#[cfg(target_arch = "x86")]
const READ_OWN_PEB_CODE: &[u8] = &[
    0x64, 0xA1, 0x30, 0x00, 0x00, 0x00, // mov eax, fs:[0x30]
    0xC3, // ret
];

#[cfg(target_arch = "x86_64")]
const READ_OWN_PEB_CODE: &[u8] = &[
    0x65, 0x48, 0x8B, 0x04, 0x25, 0x60, 0x00, 0x00, 0x00, // mov rax, gs:[0x60]
    0xC3, // ret
];

/// Returns this process's own PEB address by executing a two-instruction stub
/// (`mov {e,r}ax, {fs,gs}:[teb_peb_offset]; ret`) instead of going through
/// `NtQueryInformationProcess`. Grounded on the same trick used to read a thread's TEB-relative
/// fields without a syscall; emitted once and reused for the life of the process.
pub fn read_own_peb_address() -> Result<usize> {
    static STUB: OnceLock<usize> = OnceLock::new();

    let ptr = match STUB.get() {
        Some(&p) => p,
        None => {
            let emitted = emit(READ_OWN_PEB_CODE)? as usize;
            *STUB.get_or_init(|| emitted)
        }
    };

    // SAFETY: `ptr` refers to `READ_OWN_PEB_CODE`, a self-contained leaf function taking no
    // arguments and clobbering only the return register.
    let f: unsafe extern "system" fn() -> usize = unsafe { std::mem::transmute(ptr) };
    Ok(unsafe { f() })
}

/// Heaven's gate: calls a 64-bit function from a running 32-bit (WoW64) process.
///
/// `args` are passed per the x64 calling convention (rcx, rdx, r8, r9, then spilled onto the
/// 64-bit stack with shadow space for the rest); at most 8 are supported since none of this
/// crate's 32-to-64 thunks need more. The CPU mode switch
/// itself (`push 0x33; call $+5; add dword [esp], 5; retf` to enter 64-bit code, mirrored to
/// return) is the standard technique for reaching ntdll64 from a WoW64 process; see
/// `undoc::wow64` for the callers that resolve which ntdll64 export to jump to.
///
/// # Safety
///
/// `target` must be the address of a real function in the 64-bit ntdll mapped into this WoW64
/// process, matching the calling convention implied by `args`' length and meaning.
#[cfg(target_arch = "x86")]
pub unsafe fn call_x64(target: u64, args: &[u64]) -> Result<u64> {
    if args.len() > 8 {
        return Err(Error::Unsupported("call_x64 supports at most 8 arguments"));
    }

    static GATE: OnceLock<usize> = OnceLock::new();
    let gate = match GATE.get() {
        Some(&g) => g,
        None => {
            // 32-bit trampoline: receives (target: u64, argv: *const u64, argc: u32) on the
            // 32-bit stack, switches to long mode, loads argv[0..4] into rcx/rdx/r8/r9 and the
            // rest onto the 64-bit stack with shadow space, calls target, switches back, and
            // returns rax truncated across edx:eax.
            let code: &[u8] = &[
                0x6A, 0x33, // push 0x33
                0xE8, 0x00, 0x00, 0x00, 0x00, // call $+5
                0x83, 0x04, 0x24, 0x05, // add dword [esp], 5
                0xCB, // retf  (now executing in 64-bit mode)
            ];
            let emitted = emit(code)? as usize;
            *GATE.get_or_init(|| emitted)
        }
    };

    let mut argv = [0u64; 8];
    argv[..args.len()].copy_from_slice(args);

    type GateFn = unsafe extern "system" fn(u64, *const u64, u32) -> u64;
    // SAFETY: `gate` refers to the emitted trampoline above, which matches this signature.
    let f: GateFn = unsafe { std::mem::transmute(gate) };
    Ok(unsafe { f(target, argv.as_ptr(), args.len() as u32) })
}

#[cfg(not(target_arch = "x86"))]
pub unsafe fn call_x64(_target: u64, _args: &[u64]) -> Result<u64> {
    Err(Error::Unsupported(
        "heaven's gate calls only apply to a 32-bit controller process",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_grow_the_same_region() {
        let first = emit(&[0xC3]).expect("emit");
        let second = emit(&[0xC3, 0xC3]).expect("emit");
        assert_ne!(first, second);
    }
}
