//! A view over a process's PEB and the loader's in-memory-order module list.

use std::sync::Arc;

use crate::memaccessor::{Bitness, MemoryAccessor};
use crate::remote::{Remote, RemoteStruct};
use crate::str::WinUnicodeString;
use crate::{Error, Result};

/// Descriptor for the process environment block. Only used to anchor a `Remote<PebLayout, A>`;
/// its exact size is never relied on since a PEB is never indexed as part of an array.
pub struct PebLayout;

impl RemoteStruct for PebLayout {
    fn size_on_target(bitness: Bitness) -> u64 {
        match bitness {
            Bitness::Bits32 => 0x480,
            Bitness::Bits64 => 0x7C8,
        }
    }
}

fn ldr_offset(bitness: Bitness) -> u64 {
    match bitness {
        Bitness::Bits32 => 0x0C,
        Bitness::Bits64 => 0x18,
    }
}

fn process_parameters_offset(bitness: Bitness) -> u64 {
    match bitness {
        Bitness::Bits32 => 0x10,
        Bitness::Bits64 => 0x20,
    }
}

/// Offset of `PEB_LDR_DATA.InMemoryOrderModuleList` (a `LIST_ENTRY` head) within `PEB_LDR_DATA`.
fn in_memory_order_module_list_offset(bitness: Bitness) -> u64 {
    match bitness {
        Bitness::Bits32 => 0x14,
        Bitness::Bits64 => 0x20,
    }
}

/// Module-relative field offsets, expressed relative to the `InMemoryOrderLinks` address (i.e.
/// `entry`) rather than the struct base, since that is the pointer the loader's list hands us.
struct ModuleFieldOffsets {
    dll_base: u64,
    entry_point: u64,
    size_of_image: u64,
    full_name_length: u64,
    base_name_length: u64,
}

fn module_field_offsets(bitness: Bitness) -> ModuleFieldOffsets {
    match bitness {
        Bitness::Bits32 => ModuleFieldOffsets {
            dll_base: 0x10,
            entry_point: 0x14,
            size_of_image: 0x18,
            full_name_length: 0x1C,
            base_name_length: 0x24,
        },
        Bitness::Bits64 => ModuleFieldOffsets {
            dll_base: 0x20,
            entry_point: 0x28,
            size_of_image: 0x30,
            full_name_length: 0x38,
            base_name_length: 0x48,
        },
    }
}

/// Offsets of `RTL_USER_PROCESS_PARAMETERS.ImagePathName`/`.CommandLine`, relative to the
/// structure's own base (i.e. the pointer `PEB.ProcessParameters` holds).
fn process_parameters_field_offsets(bitness: Bitness) -> (u64, u64) {
    match bitness {
        Bitness::Bits32 => (0x38, 0x40),
        Bitness::Bits64 => (0x60, 0x70),
    }
}

/// Descriptor for `LDR_DATA_TABLE_ENTRY`, sized through `BaseDllName` (the last field this crate
/// reads) plus the trailing `Flags`/`LoadCount`/`TlsIndex`/`HashLinks`/`TimeDateStamp` fields and
/// their alignment padding, matching the offsets in [`module_field_offsets`].
pub struct LdrDataTableEntryLayout;

impl RemoteStruct for LdrDataTableEntryLayout {
    fn size_on_target(bitness: Bitness) -> u64 {
        match bitness {
            Bitness::Bits32 => 0x48,
            Bitness::Bits64 => 0x88,
        }
    }
}

const MAX_MODULES: usize = 4096;

/// `RTL_USER_PROCESS_PARAMETERS.ImagePathName`/`.CommandLine`, decoded to owned strings.
#[derive(Debug, Clone)]
pub struct ProcessParameters {
    pub image_path_name: String,
    pub command_line: String,
}

/// A loaded module as seen through the loader's in-memory-order list.
#[derive(Debug, Clone)]
pub struct LoadedModule {
    pub base_address: u64,
    pub entry_point: u64,
    pub size_of_image: u32,
    pub base_name: String,
    pub full_name: String,
}

/// A view over one process's PEB, lazily reading through `accessor`.
pub struct Peb<A: MemoryAccessor> {
    view: Remote<PebLayout, A>,
}

impl<A: MemoryAccessor> Peb<A> {
    pub fn new(address: u64, accessor: Arc<A>) -> Result<Self> {
        Ok(Self {
            view: Remote::new(address, accessor)?,
        })
    }

    pub fn address(&self) -> u64 {
        self.view.address()
    }

    fn bitness(&self) -> Bitness {
        self.view.accessor().bitness()
    }

    /// The pointer to `RTL_USER_PROCESS_PARAMETERS`, unparsed.
    pub fn process_parameters_address(&self) -> Result<u64> {
        self.view.raw_pointer_field(process_parameters_offset(self.bitness()))
    }

    /// `RTL_USER_PROCESS_PARAMETERS.ImagePathName`/`.CommandLine`, read through the
    /// [`WinUnicodeString`] overlay.
    pub fn process_parameters(&self) -> Result<ProcessParameters> {
        let bitness = self.bitness();
        let accessor = self.view.accessor();

        let params = self.process_parameters_address()?;
        if params == 0 {
            return Err(Error::NullPointer("Peb::process_parameters"));
        }

        let (image_path_name_offset, command_line_offset) = process_parameters_field_offsets(bitness);

        let image_path_name =
            WinUnicodeString::read(accessor.as_ref(), params + image_path_name_offset, bitness)?
                .resolve(accessor.as_ref())?;
        let command_line = WinUnicodeString::read(accessor.as_ref(), params + command_line_offset, bitness)?
            .resolve(accessor.as_ref())?;

        Ok(ProcessParameters {
            image_path_name,
            command_line,
        })
    }

    /// Walks `Ldr->InMemoryOrderModuleList`, returning every loaded module.
    ///
    /// Stops cleanly when the list wraps back to its own head (a normal, well-formed loader
    /// list is circular). If the walk has not returned to the head within [`MAX_MODULES`]
    /// entries, the list is treated as corrupt rather than looped forever.
    pub fn modules(&self) -> Result<Vec<LoadedModule>> {
        let bitness = self.bitness();
        let accessor = self.view.accessor();

        let ldr = self.view.raw_pointer_field(ldr_offset(bitness))?;
        if ldr == 0 {
            return Err(Error::LdrUnavailable);
        }

        let head = ldr + in_memory_order_module_list_offset(bitness);
        let mut entry = read_pointer_width(accessor.as_ref(), head, bitness)?;
        let offsets = module_field_offsets(bitness);

        let mut modules = Vec::new();

        for _ in 0..MAX_MODULES {
            if entry == head {
                return Ok(modules);
            }

            let dll_base = read_pointer_width(accessor.as_ref(), entry + offsets.dll_base, bitness)?;
            let entry_point = read_pointer_width(accessor.as_ref(), entry + offsets.entry_point, bitness)?;

            let mut size_buf = [0u8; 4];
            accessor.read(entry + offsets.size_of_image, &mut size_buf)?;
            let size_of_image = u32::from_le_bytes(size_buf);

            let base_name = read_unicode_string(accessor.as_ref(), entry + offsets.base_name_length, bitness)?;
            let full_name = read_unicode_string(accessor.as_ref(), entry + offsets.full_name_length, bitness)?;

            modules.push(LoadedModule {
                base_address: dll_base,
                entry_point,
                size_of_image,
                base_name,
                full_name,
            });

            entry = read_pointer_width(accessor.as_ref(), entry, bitness)?; // Flink
        }

        Err(Error::LoaderListCorrupt)
    }
}

fn read_pointer_width(accessor: &impl MemoryAccessor, address: u64, bitness: Bitness) -> Result<u64> {
    match bitness {
        Bitness::Bits32 => {
            let mut buf = [0u8; 4];
            accessor.read(address, &mut buf)?;
            Ok(u32::from_le_bytes(buf) as u64)
        }
        Bitness::Bits64 => {
            let mut buf = [0u8; 8];
            accessor.read(address, &mut buf)?;
            Ok(u64::from_le_bytes(buf))
        }
    }
}

/// Reads a `LDR_DATA_TABLE_ENTRY` name field, given the address of its `UNICODE_STRING` header
/// (`{Length, MaximumLength, Buffer}`, `Buffer` immediately following `Length`/`MaximumLength`).
fn read_unicode_string(accessor: &impl MemoryAccessor, header_address: u64, bitness: Bitness) -> Result<String> {
    WinUnicodeString::read(accessor, header_address, bitness)?.resolve(accessor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_field_offsets_recover_dll_base_relative_to_in_memory_order_links() {
        // InMemoryOrderLinks sits 2 pointer-widths into LDR_DATA_TABLE_ENTRY; DllBase at
        // absolute offset 0x30 (64-bit) is therefore 0x20 relative to it.
        let offsets = module_field_offsets(Bitness::Bits64);
        assert_eq!(offsets.dll_base, 0x20);

        let offsets = module_field_offsets(Bitness::Bits32);
        assert_eq!(offsets.dll_base, 0x10);
    }
}
