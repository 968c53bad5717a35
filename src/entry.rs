//! Process entry: turns `argc`/`argv` into the language's own argument
//! vector and calls the generated `main`.

use core::ffi::{self, CStr};

use crate::crash;
use crate::types::YSlice;

/// A string as generated code sees it: byte length and data, no terminator.
pub type YString = YSlice<u8>;

/// The generated program's entry point.
pub type YMain = extern "C" fn(YSlice<YString>) -> ffi::c_int;

/// Builds one [`YString`] per command-line argument. The strings borrow
/// from `argv`.
///
/// # Safety
///
/// `argv` must hold `argc` valid C strings that outlive the returned vector.
#[instrument(level = "trace", skip(argv))]
pub unsafe fn marshal_args(argc: ffi::c_int, argv: *const *const ffi::c_char) -> Vec<YString> {
    if argv.is_null() {
        return Vec::new();
    }
    (0..argc.max(0) as usize)
        .map(|i| YString::from_slice(CStr::from_ptr(*argv.add(i)).to_bytes()))
        .collect()
}

/// Calls `main` with the marshaled arguments and hands back its exit code.
///
/// # Safety
///
/// See [`marshal_args`].
pub unsafe fn run_main(argc: ffi::c_int, argv: *const *const ffi::c_char, main: YMain) -> ffi::c_int {
    let args = marshal_args(argc, argv);
    let code = main(YSlice::from_slice(&args));
    trace!(code, "generated main returned");
    code
}

/// [`run_main`], with the fault handler installed first.
///
/// # Safety
///
/// See [`marshal_args`].
pub unsafe fn run_main_debug(
    argc: ffi::c_int,
    argv: *const *const ffi::c_char,
    main: YMain,
) -> ffi::c_int {
    if let Err(err) = crash::install() {
        warn!(%err, "running without crash diagnostics");
    }
    run_main(argc, argv, main)
}
