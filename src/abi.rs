//! The symbols generated code links against.
//!
//! A protected region compiles to roughly
//!
//! ```c
//! jmp_buf buf;
//! if (_yrt_exc_push(&buf, setjmp(buf))) {
//!     /* body */
//!     _yrt_exc_pop(NULL);
//! } else if ((data = _yrt_exc_check_type(info)) != NULL) {
//!     /* handler */
//! } else {
//!     _yrt_exc_rethrow();
//! }
//! ```
//!
//! All of them work on one process-wide [`Runtime`] and must only ever be
//! called from one thread.

use core::cell::UnsafeCell;
use core::ffi::{self, CStr};
use std::io::Write;

use crate::context::{Capture, JmpBuf};
use crate::entry::{self, YMain};
use crate::exception::{Payload, SourceLocation};
use crate::stdext;
use crate::throw::Runtime;
use crate::types::{self, TypeEquals, TypeInfo};

type GlobalRuntime = Runtime<JmpBuf, TypeInfo>;

struct RuntimeCell(UnsafeCell<GlobalRuntime>);

// SAFETY: not actually shareable. The exported functions are documented as
// single-threaded, and that contract is what makes this sound.
unsafe impl Sync for RuntimeCell {}

static RUNTIME: RuntimeCell = RuntimeCell(UnsafeCell::new(Runtime::new()));

/// # Safety
///
/// Single thread only, and the reference must not outlive the exported
/// function that took it.
unsafe fn runtime() -> &'static mut GlobalRuntime {
    &mut *RUNTIME.0.get()
}

unsafe fn static_cstr(ptr: *const ffi::c_char) -> Option<&'static CStr> {
    (!ptr.is_null()).then(|| CStr::from_ptr(ptr))
}

/// Registers a catch frame for the buffer `setjmp` just filled. Returns 1 to
/// run the protected body, 0 when `returned` says the jump came from a throw.
///
/// # Safety
///
/// `j` must point to a buffer initialized by `setjmp` in the caller's frame.
#[no_mangle]
pub unsafe extern "C" fn _yrt_exc_push(j: *const JmpBuf, returned: ffi::c_int) -> ffi::c_int {
    let capture = Capture::from_setjmp(returned, || JmpBuf::read_from(j));
    runtime().push_frame(capture) as ffi::c_int
}

/// Leaves the innermost protected region, copying its buffer into `j`
/// unless `j` is null.
///
/// # Safety
///
/// `j` is null or valid for writing a `jmp_buf`.
#[no_mangle]
pub unsafe extern "C" fn _yrt_exc_pop(j: *mut JmpBuf) {
    let context = runtime().pop_frame();
    if !j.is_null() {
        context.write_to(j);
    }
}

/// # Safety
///
/// `file` and `function` (which may be null) must be static C strings and
/// `info` must describe a live type.
#[no_mangle]
pub unsafe extern "C" fn _yrt_exc_throw(
    file: *const ffi::c_char,
    function: *const ffi::c_char,
    line: ffi::c_uint,
    info: TypeInfo,
    data: *mut ffi::c_void,
) -> ! {
    let location = SourceLocation {
        file: static_cstr(file).unwrap_or(c"??"),
        function: static_cstr(function),
        line,
    };
    runtime().throw(location, info, Payload(data))
}

/// # Safety
///
/// Only from inside a handler, with an exception in flight.
#[no_mangle]
pub unsafe extern "C" fn _yrt_exc_rethrow() -> ! {
    runtime().rethrow()
}

/// # Safety
///
/// Single thread only.
#[no_mangle]
pub unsafe extern "C" fn _yrt_exc_store(info: TypeInfo, data: *mut ffi::c_void) {
    runtime().store(info, Payload(data));
}

/// The in-flight payload if its type is `info`, null otherwise.
///
/// # Safety
///
/// Single thread only.
#[no_mangle]
pub unsafe extern "C" fn _yrt_exc_check_type(info: TypeInfo) -> *mut ffi::c_void {
    runtime()
        .check_type(&info)
        .map_or(core::ptr::null_mut(), Payload::as_ptr)
}

/// Writes the report line for the in-flight exception to `fd`, without the
/// `Unhandled exception` header of the abort path.
///
/// Takes a file descriptor, not a `FILE *`: callers holding a stream pass
/// `fileno(stream)` after flushing it.
///
/// # Safety
///
/// Single thread only.
#[no_mangle]
pub unsafe extern "C" fn _yrt_exc_print(fd: ffi::c_int) {
    let _ = runtime().write_exception_report(&mut stdext::LibCWriter(fd));
}

#[no_mangle]
pub extern "C" fn _yrt_exc_set_type_equals(equals: Option<TypeEquals>) {
    types::set_type_equals(equals);
}

/// Reports a failed assertion. Does not terminate.
///
/// # Safety
///
/// `ptr` must point to `len` readable bytes.
#[no_mangle]
pub unsafe extern "C" fn _y_error(len: ffi::c_ulong, ptr: *const ffi::c_char) {
    let message = if ptr.is_null() {
        &[][..]
    } else {
        core::slice::from_raw_parts(ptr.cast::<u8>(), len as usize)
    };
    let mut stderr = stdext::STDERR;
    let _ = stderr
        .write_all(b"Assert failure : ")
        .and_then(|()| stderr.write_all(message))
        .and_then(|()| stderr.write_all(b"\n"));
}

/// # Safety
///
/// `argv` must hold `argc` valid C strings.
#[no_mangle]
pub unsafe extern "C" fn _yrt_run_main(
    argc: ffi::c_int,
    argv: *const *const ffi::c_char,
    main: YMain,
) -> ffi::c_int {
    entry::run_main(argc, argv, main)
}

/// # Safety
///
/// `argv` must hold `argc` valid C strings.
#[no_mangle]
pub unsafe extern "C" fn _yrt_run_main_debug(
    argc: ffi::c_int,
    argv: *const *const ffi::c_char,
    main: YMain,
) -> ffi::c_int {
    entry::run_main_debug(argc, argv, main)
}
