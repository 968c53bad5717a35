//! Resumable execution contexts.
//!
//! A catch frame keeps one of these around so that a throw can transfer
//! control back to the point where the frame was registered. On the C ABI
//! side the context is a glibc `jmp_buf` filled in by the generated code's
//! own `setjmp`, and resuming it is a `longjmp`. The runtime itself never
//! calls `setjmp`: the capture has to happen in the frame that is resumed.

use core::ffi;

/// A captured execution state that can be jumped back to.
///
/// `resume` must not return. Implementations must not hold anything with
/// drop glue across the transfer, the frames in between are discarded
/// without running destructors.
pub trait SavedContext {
    fn resume(self) -> !;
}

/// What the caller of [`Runtime::push_frame`](crate::Runtime::push_frame)
/// hands in: either a freshly captured context, or the news that control
/// came back to the capture point through a throw.
#[derive(Debug)]
pub enum Capture<C> {
    Fresh(C),
    Resumed,
}

impl<C> Capture<C> {
    /// Maps the `setjmp` convention (zero on the direct return) onto a capture.
    pub fn from_setjmp(returned: ffi::c_int, ctx: impl FnOnce() -> C) -> Self {
        if returned == 0 {
            Capture::Fresh(ctx())
        } else {
            Capture::Resumed
        }
    }
}

// glibc `struct __jmp_buf_tag[1]`: the register block, `__mask_was_saved`
// and the saved signal mask. The size has to be exact, the copy reads
// straight out of the caller's buffer.
#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
const JMP_BUF_WORDS: usize = 25;
#[cfg(all(target_os = "linux", target_arch = "aarch64"))]
const JMP_BUF_WORDS: usize = 39;

#[cfg(not(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64"))))]
compile_error!("the jmp_buf layout is only known for glibc on x86_64 and aarch64");

/// Byte-exact copy of a glibc `jmp_buf`.
///
/// Copying is fine on glibc: the saved registers are mangled with a
/// process-wide guard, not with the buffer's address.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct JmpBuf {
    words: [u64; JMP_BUF_WORDS],
}

extern "C" {
    fn longjmp(env: *mut JmpBuf, val: ffi::c_int) -> !;
}

impl JmpBuf {
    pub const fn zeroed() -> Self {
        JmpBuf {
            words: [0; JMP_BUF_WORDS],
        }
    }

    /// # Safety
    ///
    /// `src` must point to a `jmp_buf` initialized by `setjmp`.
    pub unsafe fn read_from(src: *const JmpBuf) -> Self {
        src.read_unaligned()
    }

    /// # Safety
    ///
    /// `dst` must be valid for writing a `jmp_buf`.
    pub unsafe fn write_to(&self, dst: *mut JmpBuf) {
        dst.write_unaligned(*self)
    }
}

impl core::fmt::Debug for JmpBuf {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JmpBuf").finish_non_exhaustive()
    }
}

impl SavedContext for JmpBuf {
    fn resume(mut self) -> ! {
        // SAFETY: the buffer was filled by `setjmp` in a frame that is still
        // live, which the push/pop discipline of the catch-frame stack
        // guarantees. A nonzero value tells the capture point it was resumed.
        unsafe { longjmp(&mut self, 1) }
    }
}
