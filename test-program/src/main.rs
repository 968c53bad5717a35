use std::ffi::{c_char, c_int, CString};
use std::os::unix::ffi::OsStringExt;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use yrt::entry::YString;
use yrt::types::YSlice;
use yrt::TypeInfo;

/// Stands in for a compiled program's `main`.
///
/// `crash` sends the dump signal, `throw` throws with no handler around,
/// `assert` reports a failed assertion. Anything else just lists the
/// arguments.
extern "C" fn y_main(args: YSlice<YString>) -> c_int {
    let args = unsafe { args.as_slice() };
    for (index, arg) in args.iter().enumerate() {
        let arg = unsafe { arg.as_slice() };
        tracing::info!(index, arg = %String::from_utf8_lossy(arg), "argument");
    }

    match args.get(1).map(|arg| unsafe { arg.as_slice() }) {
        Some(b"crash") => {
            unsafe { libc::raise(libc::SIGUSR1) };
            1
        }
        Some(b"throw") => {
            let name: Vec<u32> = "test_program::DemoError".chars().map(u32::from).collect();
            let info = TypeInfo {
                hash: 0xdead,
                name: YSlice::from_slice(name.leak()),
            };
            unsafe {
                yrt::abi::_yrt_exc_throw(
                    c"test-program/src/main.rs".as_ptr(),
                    c"y_main".as_ptr(),
                    line!(),
                    info,
                    std::ptr::null_mut(),
                )
            }
        }
        Some(b"assert") => {
            let message = b"1 + 1 == 3";
            unsafe { yrt::abi::_y_error(message.len() as _, message.as_ptr().cast()) };
            2
        }
        _ => 0,
    }
}

fn main() {
    let registry = tracing_subscriber::Registry::default().with(
        EnvFilter::builder()
            .with_default_directive(tracing::Level::INFO.into())
            .from_env()
            .unwrap(),
    );

    let tree_layer = tracing_tree::HierarchicalLayer::new(2)
        .with_targets(true)
        .with_bracketed_fields(true);

    registry.with(tree_layer).init();

    let args: Vec<CString> = std::env::args_os()
        .map(|arg| CString::new(arg.into_vec()).unwrap())
        .collect();
    let argv: Vec<*const c_char> = args.iter().map(|arg| arg.as_ptr()).collect();

    let code = unsafe { yrt::abi::_yrt_run_main_debug(argv.len() as c_int, argv.as_ptr(), y_main) };
    std::process::exit(code);
}
