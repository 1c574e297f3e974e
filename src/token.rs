//! A process or thread's security token: integrity level and elevation status.

use std::ffi::c_void;
use std::mem::MaybeUninit;

use windows::Win32::Foundation::HANDLE;
use windows::Win32::Security::{
    GetSidSubAuthority, GetSidSubAuthorityCount, GetTokenInformation, TOKEN_INFORMATION_CLASS,
    TOKEN_MANDATORY_LABEL, TokenElevation, TokenIntegrityLevel,
};

use crate::handle::{Handle, HandleWrapper};
use crate::utils::u32size_of;
use crate::{Error, Result};

#[derive(Debug)]
pub struct Token {
    handle: Handle,
}

impl From<Handle> for Token {
    fn from(handle: Handle) -> Self {
        Self { handle }
    }
}

impl Token {
    pub fn current_process_token() -> Self {
        Self {
            handle: Handle::new_borrowed(HANDLE(-4isize as *mut c_void)).expect("always valid"),
        }
    }

    /// Runs the OS's two-call "give me the size, then give me the data" pattern: a zero-size
    /// probe to learn `required_size`, expected to fail, followed by the real call.
    fn information_var_size(&self, info_class: TOKEN_INFORMATION_CLASS) -> Result<Vec<u8>> {
        let mut required_size = 0u32;

        // SAFETY: No preconditions. The probe call is expected to fail; only `required_size` matters.
        let _ = unsafe { GetTokenInformation(self.handle.raw(), info_class, None, 0, &mut required_size) };

        let mut buf = vec![0u8; required_size as usize];

        // SAFETY: `buf` is sized to `required_size`, as reported by the probe above.
        unsafe {
            GetTokenInformation(
                self.handle.raw(),
                info_class,
                Some(buf.as_mut_ptr().cast()),
                required_size,
                &mut required_size,
            )
        }
        .map_err(Error::Win32)?;

        Ok(buf)
    }

    fn information_raw<T: Copy>(&self, info_class: TOKEN_INFORMATION_CLASS) -> Result<T> {
        let mut info = MaybeUninit::<T>::uninit();
        let mut return_length = 0u32;

        // SAFETY: `info` is sized for `T`; `GetTokenInformation` writes exactly that many bytes
        // into it on success.
        unsafe {
            GetTokenInformation(
                self.handle.raw(),
                info_class,
                Some(info.as_mut_ptr().cast()),
                u32size_of::<T>(),
                &mut return_length,
            )
        }
        .map_err(Error::Win32)?;

        // SAFETY: `GetTokenInformation` succeeded, so `info` was fully initialized.
        Ok(unsafe { info.assume_init() })
    }

    pub fn is_elevated(&self) -> Result<bool> {
        Ok(self.information_raw::<i32>(TokenElevation)? != 0)
    }

    /// The last sub-authority of `TOKEN_MANDATORY_LABEL.Label.Sid` (e.g. `0x2000` = Low,
    /// `0x2000`..`0x3000` = Medium, `0x3000`..`0x4000` = High, `0x4000`+ = System).
    pub fn integrity_level(&self) -> Result<u32> {
        let buf = self.information_var_size(TokenIntegrityLevel)?;

        // SAFETY: `buf` holds a `TOKEN_MANDATORY_LABEL` per the successful call above; it is
        // always at least that large since `Label.Sid` is embedded inline-adjacent data the OS
        // accounted for in `required_size`.
        let label = unsafe { &*buf.as_ptr().cast::<TOKEN_MANDATORY_LABEL>() };
        let sid = label.Label.Sid;

        // SAFETY: `sid` was populated by the OS and is therefore a well-formed SID.
        let sub_authority_count = unsafe { *GetSidSubAuthorityCount(sid) };
        if sub_authority_count == 0 {
            return Err(Error::Unsupported("integrity SID has no sub-authorities"));
        }

        // SAFETY: `sub_authority_count - 1` indexes the last sub-authority, which always exists
        // since we just checked the count is nonzero.
        let last = unsafe { *GetSidSubAuthority(sid, u32::from(sub_authority_count) - 1) };
        Ok(last)
    }
}

impl HandleWrapper for Token {
    fn handle(&self) -> &Handle {
        &self.handle
    }
}
