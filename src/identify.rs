use std::ffi::CStr;
use std::io::Write;

use crate::Addr;

/// Builds a `backtrace_symbols`-shaped line for `addr` from `dladdr`, for
/// when the symbolizer itself could not allocate:
/// `path(symbol) [0xaddr]`, `path [0xaddr]` or `?? [0xaddr]`.
pub fn symbol_line(addr: Addr) -> Vec<u8> {
    let mut line = Vec::new();

    unsafe {
        let mut info: libc::Dl_info = std::mem::zeroed();

        if libc::dladdr(addr.voidptr(), &mut info) != 0 && !info.dli_fname.is_null() {
            line.extend_from_slice(CStr::from_ptr(info.dli_fname).to_bytes());
            if !info.dli_sname.is_null() {
                line.push(b'(');
                line.extend_from_slice(CStr::from_ptr(info.dli_sname).to_bytes());
                line.push(b')');
            }
        } else {
            line.extend_from_slice(b"??");
        }
    }

    // Writing into a Vec does not fail.
    let _ = write!(line, " [{:#x}]", addr.addr());
    line
}
