//! Exception propagation and crash diagnostics for code produced by the
//! ahead-of-time compiler.
//!
//! Generated code registers catch frames, throws and rethrows through the
//! [`throw`] engine (exposed over the C ABI in [`abi`]), and optionally
//! installs the [`crash`] handler at process start through [`entry`].
//!
//! Everything in here assumes a single thread of control. The catch-frame
//! stack and the in-flight exception are process-wide and unsynchronized.

#[macro_use]
extern crate tracing;

use core::ffi;

mod stdext;
#[cfg(test)]
mod test_util;

pub mod abi;
pub mod context;
pub mod crash;
pub mod entry;
pub mod exception;
mod identify;
pub mod throw;
pub mod types;

pub use context::{Capture, JmpBuf, SavedContext};
pub use exception::{ExceptionState, Payload, SourceLocation};
pub use throw::Runtime;
pub use types::{TypeDescriptor, TypeInfo};

/// A raw code address, as captured from the call stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Addr(*const ());

impl Addr {
    pub fn new(addr: usize) -> Self {
        Addr(core::ptr::with_exposed_provenance(addr))
    }

    fn voidptr(self) -> *const ffi::c_void {
        self.0.cast()
    }

    pub fn addr(&self) -> usize {
        self.0.addr()
    }
}
