//! Generic lazy view over a native struct living in a `MemoryAccessor`'s target.
//!
//! `Remote<S, A>` is parameterized over the accessor `A`, not a const-generic pointer width:
//! the same `Remote<S, A>` type works against a 32-bit or 64-bit target, choosing pointer size
//! at runtime from `A::bitness()`. Overlay types (reading a field as something other than its
//! natural Win32 type, e.g. a `UNICODE_STRING` read as `WinUnicodeString`) fall out of this for
//! free: the caller simply names a different type parameter at the call site.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::memaccessor::{Bitness, MemoryAccessor};
use crate::{Error, Result};

/// A struct descriptor that knows its own size on both pointer widths.
///
/// Implemented by the plain Win32 struct types this crate walks remotely (`PROCESS_BASIC_INFORMATION`,
/// `LDR_DATA_TABLE_ENTRY`, `LIST_ENTRY`, ...). `size_on_target` is the ground truth used to step
/// arrays of `S` and to check that `Remote<S, A>`'s view stays within one target-correct instance.
pub trait RemoteStruct: Sized {
    fn size_on_target(bitness: Bitness) -> u64;
}

/// A lazy view over an `S`-shaped struct at `address` in `accessor`'s target. Fields are read on
/// demand; constructing a `Remote` performs no I/O beyond the null-address check.
pub struct Remote<S, A: MemoryAccessor> {
    address: u64,
    accessor: Arc<A>,
    _marker: PhantomData<S>,
}

impl<S, A: MemoryAccessor> Clone for Remote<S, A> {
    fn clone(&self) -> Self {
        Self {
            address: self.address,
            accessor: Arc::clone(&self.accessor),
            _marker: PhantomData,
        }
    }
}

impl<S: RemoteStruct, A: MemoryAccessor> Remote<S, A> {
    pub fn new(address: u64, accessor: Arc<A>) -> Result<Self> {
        if address == 0 {
            return Err(Error::NullPointer("Remote::new"));
        }

        Ok(Self {
            address,
            accessor,
            _marker: PhantomData,
        })
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn accessor(&self) -> &Arc<A> {
        &self.accessor
    }

    /// The size, in bytes, this struct occupies in the accessor's target, i.e.
    /// `S::size_on_target(self.accessor.bitness())`. Used to step through arrays of `S`.
    pub fn size_on_target(&self) -> u64 {
        S::size_on_target(self.accessor.bitness())
    }

    /// The `index`th element of an `S` array starting at this view's address.
    pub fn index(&self, index: u64) -> Result<Self> {
        Self::new(self.address + index * self.size_on_target(), Arc::clone(&self.accessor))
    }

    /// Reads a `T`-typed scalar or nested-struct field at `offset` bytes into the struct. `T` is
    /// chosen by the caller, which is also how overlay types are injected: calling
    /// `field::<WinUnicodeString>(offset)` instead of `field::<UNICODE_STRING>(offset)` reads the
    /// same bytes through a different lens.
    pub fn field<T: Copy>(&self, offset: u64) -> Result<T> {
        self.accessor.read_struct(self.address + offset)
    }

    pub fn write_field<T: Copy>(&self, offset: u64, value: &T) -> Result<()> {
        self.accessor.write_struct(self.address + offset, value)
    }

    /// Reads the pointer-width value at `offset`, sign-extension-free and respecting the
    /// accessor's bitness (4 bytes on a 32-bit target, 8 on a 64-bit one).
    pub fn raw_pointer_field(&self, offset: u64) -> Result<u64> {
        match self.accessor.bitness() {
            Bitness::Bits32 => {
                let mut buf = [0u8; 4];
                self.accessor.read(self.address + offset, &mut buf)?;
                Ok(u32::from_le_bytes(buf) as u64)
            }
            Bitness::Bits64 => {
                let mut buf = [0u8; 8];
                self.accessor.read(self.address + offset, &mut buf)?;
                Ok(u64::from_le_bytes(buf))
            }
        }
    }

    /// Treats the field at `offset` as a pointer to a `U`-shaped struct, without dereferencing it.
    pub fn pointer_field<U>(&self, offset: u64) -> Result<RemotePointer<U, A>> {
        let raw = self.raw_pointer_field(offset)?;
        Ok(RemotePointer::new(raw, Arc::clone(&self.accessor)))
    }
}

/// A lazily-dereferenced pointer to a `T`-shaped struct in `accessor`'s target. Holding one does
/// no I/O; dereferencing it does.
pub struct RemotePointer<T, A: MemoryAccessor> {
    raw: u64,
    accessor: Arc<A>,
    _marker: PhantomData<T>,
}

impl<T, A: MemoryAccessor> Clone for RemotePointer<T, A> {
    fn clone(&self) -> Self {
        Self {
            raw: self.raw,
            accessor: Arc::clone(&self.accessor),
            _marker: PhantomData,
        }
    }
}

impl<T, A: MemoryAccessor> RemotePointer<T, A> {
    pub fn new(raw: u64, accessor: Arc<A>) -> Self {
        Self {
            raw,
            accessor,
            _marker: PhantomData,
        }
    }

    pub fn is_null(&self) -> bool {
        self.raw == 0
    }

    pub fn raw(&self) -> u64 {
        self.raw
    }
}

impl<T: RemoteStruct, A: MemoryAccessor> RemotePointer<T, A> {
    /// Dereferences into a lazy `Remote<T, A>` view.
    pub fn deref_view(&self) -> Result<Remote<T, A>> {
        Remote::new(self.raw, Arc::clone(&self.accessor))
    }
}

impl<T: Copy, A: MemoryAccessor> RemotePointer<T, A> {
    /// Reads the pointee by value.
    pub fn read(&self) -> Result<T> {
        if self.is_null() {
            return Err(Error::NullPointer("RemotePointer::read"));
        }
        self.accessor.read_struct(self.raw)
    }
}

/// Descriptor for `LIST_ENTRY`: a `Flink`/`Blink` pair, i.e. two pointer-sized fields.
pub struct ListEntryLayout;

impl RemoteStruct for ListEntryLayout {
    fn size_on_target(bitness: Bitness) -> u64 {
        2 * bitness.size_of_pointer() as u64
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::peb::{LdrDataTableEntryLayout, PebLayout};
    use crate::process::ProcessBasicInformationLayout;
    use crate::str::LsaUnicodeStringLayout;

    struct Dummy;

    impl RemoteStruct for Dummy {
        fn size_on_target(bitness: Bitness) -> u64 {
            match bitness {
                Bitness::Bits32 => 8,
                Bitness::Bits64 => 16,
            }
        }
    }

    #[test]
    fn size_on_target_matches_descriptor() {
        assert_eq!(Dummy::size_on_target(Bitness::Bits32), 8);
        assert_eq!(Dummy::size_on_target(Bitness::Bits64), 16);
    }

    // Testable Property #2 / §4.3: sizeof(Remote<S, W>) == sizeof_on_target(S, W) for every
    // representative structure this crate walks remotely.

    #[rstest]
    #[case(Bitness::Bits32, 0x480)]
    #[case(Bitness::Bits64, 0x7C8)]
    fn peb_matches_abi_size(#[case] bitness: Bitness, #[case] expected: u64) {
        assert_eq!(PebLayout::size_on_target(bitness), expected);
    }

    #[rstest]
    #[case(Bitness::Bits32, 0x18)]
    #[case(Bitness::Bits64, 0x30)]
    fn process_basic_information_matches_abi_size(#[case] bitness: Bitness, #[case] expected: u64) {
        assert_eq!(ProcessBasicInformationLayout::size_on_target(bitness), expected);
    }

    #[rstest]
    #[case(Bitness::Bits32, 0x48)]
    #[case(Bitness::Bits64, 0x88)]
    fn ldr_data_table_entry_matches_abi_size(#[case] bitness: Bitness, #[case] expected: u64) {
        assert_eq!(LdrDataTableEntryLayout::size_on_target(bitness), expected);
    }

    #[rstest]
    #[case(Bitness::Bits32, 8)]
    #[case(Bitness::Bits64, 16)]
    fn list_entry_matches_abi_size(#[case] bitness: Bitness, #[case] expected: u64) {
        assert_eq!(ListEntryLayout::size_on_target(bitness), expected);
    }

    #[rstest]
    #[case(Bitness::Bits32, 8)]
    #[case(Bitness::Bits64, 16)]
    fn lsa_unicode_string_matches_abi_size(#[case] bitness: Bitness, #[case] expected: u64) {
        assert_eq!(LsaUnicodeStringLayout::size_on_target(bitness), expected);
    }
}
