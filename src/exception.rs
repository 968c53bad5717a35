//! The in-flight exception and how it is reported when nobody catches it.

use core::ffi::{self, CStr};
use core::fmt;
use std::io;

use crate::types::TypeDescriptor;

/// Where an exception was thrown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: &'static CStr,
    pub function: Option<&'static CStr>,
    pub line: u32,
}

/// Opaque exception data. Owned by the thrower until a catch site claims
/// it through a matching type check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Payload(pub *mut ffi::c_void);

impl Payload {
    pub const fn null() -> Self {
        Payload(core::ptr::null_mut())
    }

    pub fn as_ptr(self) -> *mut ffi::c_void {
        self.0
    }
}

/// The most recently thrown exception.
#[derive(Debug, Clone)]
pub struct ExceptionState<T> {
    pub location: Option<SourceLocation>,
    pub type_descriptor: T,
    pub payload: Payload,
}

impl<T: TypeDescriptor> ExceptionState<T> {
    /// Writes the one-line report, without the trailing newline:
    ///
    /// `Exception in file "<file>", at line <line>, in function "<fn>", of type <type>.`
    pub fn write_report(&self, w: &mut impl io::Write) -> io::Result<()> {
        write!(w, "{self}")
    }
}

impl<T: TypeDescriptor> fmt::Display for ExceptionState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => {
                write!(
                    f,
                    "Exception in file \"{}\", at line {}",
                    location.file.to_string_lossy(),
                    location.line
                )?;
                if let Some(function) = location.function {
                    write!(f, ", in function \"{}\"", function.to_string_lossy())?;
                }
            }
            // Stored through `_yrt_exc_store` without a throw site.
            None => write!(f, "Exception at an unknown location")?,
        }
        write!(f, ", of type {}.", self.type_descriptor)
    }
}
