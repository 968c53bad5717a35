use std::io;

/// Unbuffered writer straight onto a file descriptor. Only uses `write(2)`,
/// so it is usable from inside a signal handler.
#[derive(Debug, Clone, Copy)]
pub struct LibCWriter(pub libc::c_int);

pub const STDOUT: LibCWriter = LibCWriter(libc::STDOUT_FILENO);
pub const STDERR: LibCWriter = LibCWriter(libc::STDERR_FILENO);

impl LibCWriter {
    fn write_all_bytes(&self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            let r = unsafe { libc::write(self.0, buf.as_ptr().cast(), buf.len()) };
            if r < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            if r == 0 {
                return Ok(());
            }
            buf = &buf[(r as usize)..];
        }
        Ok(())
    }
}

impl io::Write for LibCWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_all_bytes(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub(crate) fn abort() -> ! {
    // SAFETY: We abort.
    unsafe { libc::abort() };
}

/// Raises `SIGABRT` so an installed crash handler gets to print a trace,
/// and aborts for real if the signal came back.
pub(crate) fn raise_abort() -> ! {
    unsafe { libc::raise(libc::SIGABRT) };
    abort()
}

pub(crate) fn exit(code: libc::c_int) -> ! {
    // SAFETY: Terminates the process, nothing to uphold.
    unsafe { libc::exit(code) }
}

pub(crate) fn exit_immediately(code: libc::c_int) -> ! {
    // SAFETY: _exit is async-signal-safe and never returns.
    unsafe { libc::_exit(code) }
}
