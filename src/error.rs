use std::string::{FromUtf16Error, FromUtf8Error};

use thiserror::Error;
use windows::Win32::Foundation::{E_POINTER, NTSTATUS, WIN32_ERROR};
use windows::core::HRESULT;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error(transparent)]
    Win32(#[from] windows::core::Error),
    #[error("{where_}: NTSTATUS 0x{code:08X}")]
    NtStatus { code: i32, where_: &'static str },
    #[error("operation unsupported on this OS: {0}")]
    Unsupported(&'static str),
    #[error("context or pointer of the wrong bitness was supplied")]
    BitnessMismatch,
    #[error("operation requires a WoW64 process")]
    NotWow64,
    #[error("PEB address unavailable for this process")]
    PebUnavailable,
    #[error("PEB->Ldr is null")]
    LdrUnavailable,
    #[error("loader module list exceeded the traversal cap, likely corrupt")]
    LoaderListCorrupt,
    #[error("null pointer: {0}")]
    NullPointer(&'static str),
    #[error("short read/write: got {got} bytes")]
    Partial { got: usize },
    #[error("operation would deadlock the calling thread")]
    WouldDeadlock,
    #[error("process has already exited")]
    ProcessExited,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn code(&self) -> i32 {
        match self {
            Error::Win32(err) => err.code().0,
            Error::NtStatus { code, .. } => *code,
            Error::NullPointer(_) => E_POINTER.0,
            Error::Unsupported(_)
            | Error::BitnessMismatch
            | Error::NotWow64
            | Error::PebUnavailable
            | Error::LdrUnavailable
            | Error::LoaderListCorrupt
            | Error::WouldDeadlock
            | Error::ProcessExited
            | Error::Partial { .. } => E_POINTER.0,
        }
    }

    pub fn last_error() -> Self {
        Self::Win32(windows::core::Error::from_win32())
    }

    pub fn from_hresult(hresult: HRESULT) -> Self {
        Self::Win32(windows::core::Error::from_hresult(hresult))
    }

    pub fn from_win32(win32_error: WIN32_ERROR) -> Self {
        Self::from_hresult(HRESULT::from_win32(win32_error.0))
    }

    /// Builds an `NtStatus` error from a raw `NTSTATUS`, naming the failing call.
    pub fn from_ntstatus(status: NTSTATUS, where_: &'static str) -> Self {
        Self::NtStatus {
            code: status.0,
            where_,
        }
    }
}

impl From<HRESULT> for Error {
    fn from(err: HRESULT) -> Self {
        Self::from_hresult(err)
    }
}

impl From<FromUtf8Error> for Error {
    fn from(err: FromUtf8Error) -> Self {
        Self::Win32(windows::core::Error::from(err))
    }
}

impl From<FromUtf16Error> for Error {
    fn from(err: FromUtf16Error) -> Self {
        Self::Win32(windows::core::Error::from(err))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Win32(windows::core::Error::from(err))
    }
}
