use std::ffi::OsStr;
use std::os::windows::ffi::OsStrExt;
use std::path::PathBuf;
use std::str::FromStr;
use std::{ffi::OsString, slice};

use windows::Win32::Foundation::E_POINTER;
use windows::Win32::Security::UNICODE_STRING;
use windows::core::{PCSTR, PCWSTR, PSTR, PWSTR};

use crate::Error;

pub trait SafeWindowsString {
    fn to_string_safe(&self) -> anyhow::Result<String>;
    fn to_os_string_safe(&self) -> anyhow::Result<OsString>;
    fn to_path_safe(&self) -> anyhow::Result<PathBuf>;
}

// FIXME: All of this is unsound.
// `to_string()` do not only requires the pointer to be non-null.
// It requires the pointer to be valid for reads up until and including the next `\0`.
macro_rules! impl_safe_win_string {
    ($t:ty) => {
        impl SafeWindowsString for $t {
            fn to_string_safe(&self) -> anyhow::Result<String> {
                if self.is_null() {
                    anyhow::bail!(Error::from_hresult(E_POINTER))
                } else {
                    // SAFETY: pointer is non null as requested by `to_string()`'s safety requirements.
                    unsafe { Ok(self.to_string()?) }
                }
            }

            fn to_os_string_safe(&self) -> anyhow::Result<OsString> {
                self.to_string_safe().map(|s| s.into())
            }

            fn to_path_safe(&self) -> anyhow::Result<PathBuf> {
                self.to_os_string_safe().map(|x| x.into())
            }
        }
    };
}

impl_safe_win_string!(PWSTR);
impl_safe_win_string!(PSTR);
impl_safe_win_string!(PCWSTR);
impl_safe_win_string!(PCSTR);

#[derive(Default)]
pub struct AnsiString(pub Option<Vec<u8>>);

impl AnsiString {
    pub fn as_pcstr(&self) -> PCSTR {
        self.0
            .as_ref()
            .map(|x| PCSTR::from_raw(x.as_ptr()))
            .unwrap_or_else(PCSTR::null)
    }

    pub fn as_pstr(&mut self) -> PSTR {
        self.0
            .as_mut()
            .map(|x| PSTR::from_raw(x.as_mut_ptr()))
            .unwrap_or_else(PSTR::null)
    }
}

impl<T: ?Sized + AsRef<OsStr>> From<&T> for AnsiString {
    fn from(value: &T) -> Self {
        let mut buf = value.as_ref().as_encoded_bytes().to_vec();
        buf.push(0);
        Self(Some(buf))
    }
}

impl FromStr for AnsiString {
    type Err = core::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut buf = s.as_bytes().to_vec();
        buf.push(0);
        Ok(Self(Some(buf)))
    }
}

impl From<String> for AnsiString {
    fn from(value: String) -> Self {
        Self::from(&value)
    }
}

// FIXME: Wrapping the inner buffer with an Option is resulting in an error prone API.
// E.g.: it's not obvious that we must check the return value of `as_pcwstr` for null.
#[derive(Default, Debug)]
pub struct WideString(pub Option<Vec<u16>>);

impl WideString {
    pub fn as_pcwstr(&self) -> PCWSTR {
        self.0
            .as_ref()
            .map(|x| PCWSTR::from_raw(x.as_ptr()))
            .unwrap_or_else(PCWSTR::null)
    }

    pub fn as_pwstr(&mut self) -> PWSTR {
        self.0
            .as_mut()
            .map(|x| PWSTR::from_raw(x.as_mut_ptr()))
            .unwrap_or_else(PWSTR::null)
    }

    pub fn as_unicode_string(&self) -> anyhow::Result<UNICODE_STRING> {
        Ok(UNICODE_STRING {
            Length: self
                .0
                .as_ref()
                .and_then(|x| x.split_last())
                .map(|x| size_of_val(x.1))
                .unwrap_or(0)
                .try_into()?,
            MaximumLength: self
                .0
                .as_ref()
                .map(|x| size_of_val(x.as_slice()))
                .unwrap_or(0)
                .try_into()?,
            Buffer: PWSTR(self.as_pcwstr().0.cast_mut()),
        })
    }
}

impl<T: ?Sized + AsRef<OsStr>> From<&T> for WideString {
    fn from(value: &T) -> Self {
        let mut buf = value.as_ref().encode_wide().collect::<Vec<_>>();
        buf.push(0);
        Self(Some(buf))
    }
}

impl FromStr for WideString {
    type Err = core::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut buf = s.encode_utf16().collect::<Vec<_>>();
        buf.push(0);
        Ok(Self(Some(buf)))
    }
}

impl From<String> for WideString {
    fn from(value: String) -> Self {
        Self::from(&value)
    }
}

/// Creates a slice from a pointer. Returns an empty slice on NULL.
///
/// # Safety
///
/// - data must point to len consecutive properly initialized values of type T.
/// - The memory referenced by the returned slice must not be mutated for the duration of lifetime 'a, except inside an UnsafeCell.
pub(crate) unsafe fn slice_from_ptr<'a, T>(data: *const T, len: usize) -> &'a [T] {
    if data.is_null() || len == 0 {
        &[]
    } else {
        // SAFETY: `data` is non NULL and `len` is not 0.
        unsafe { slice::from_raw_parts(data, len) }
    }
}

pub fn nul_slice_wide_str(slice: &[u16]) -> &[u16] {
    let last_idx = slice
        .iter()
        .enumerate()
        .filter(|(_, x)| **x == 0)
        .map(|(i, _)| i)
        .next()
        .unwrap_or(slice.len());

    &slice[..last_idx]
}

/// Like [`std::mem::size_of`], but returns a u32 instead.
///
/// Typically fine since we rarely work with structs whose size in memory is bigger than u32::MAX.
#[expect(clippy::cast_possible_truncation)]
pub(crate) const fn u32size_of<T>() -> u32 {
    size_of::<T>() as u32
}
