//! Last-resort diagnostics for fatal faults.
//!
//! On `SIGSEGV`, `SIGABRT` or `SIGUSR1` the handler captures the call stack,
//! symbolizes it with glibc's `backtrace_symbols`, asks an external resolver
//! (`addr2line` by default) for function and source line of every frame,
//! prints the result to stdout and exits with status 1. There is no way
//! back from a fault.
//!
//! Resolution happens out of process because the debug info is not
//! necessarily mapped. The handler allocates and spawns a process, which is
//! not async-signal-safe; it is a best effort on the way out.

#[cfg(test)]
mod tests;

use core::ffi::{self, CStr};
use core::sync::atomic::{AtomicBool, Ordering};
use std::borrow::Cow;
use std::ffi::{OsStr, OsString};
use std::io::{self, Write};
use std::os::unix::ffi::OsStrExt;
use std::process::{Command, Stdio};
use std::sync::OnceLock;

use crate::stdext;
use crate::Addr;

/// Upper bound on captured return addresses.
pub const MAX_FRAMES: usize = 16;
/// The handler itself and the signal trampoline.
pub const SKIPPED_FRAMES: usize = 2;
/// Signals routed to the fault handler. `SIGUSR1` requests a dump from outside.
pub const FAULT_SIGNALS: [ffi::c_int; 3] = [libc::SIGSEGV, libc::SIGABRT, libc::SIGUSR1];

const RESOLVER_ENV: &str = "YRT_ADDR2LINE";
const DEFAULT_RESOLVER: &str = "addr2line";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to install the fault handler for signal {signal}")]
    Install {
        signal: ffi::c_int,
        #[source]
        source: io::Error,
    },
    #[error("Failed to run command {command}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct CrashConfig {
    /// Program invoked as `<resolver> <address> -f -e <module>`.
    pub resolver: OsString,
    /// Return addresses to capture, at most [`MAX_FRAMES`].
    pub max_frames: usize,
    /// Innermost frames left out of the report.
    pub skipped_frames: usize,
}

impl Default for CrashConfig {
    fn default() -> Self {
        CrashConfig {
            resolver: DEFAULT_RESOLVER.into(),
            max_frames: MAX_FRAMES,
            skipped_frames: SKIPPED_FRAMES,
        }
    }
}

impl CrashConfig {
    /// Defaults, with the resolver program taken from `YRT_ADDR2LINE` if set.
    pub fn from_env() -> Self {
        let mut config = CrashConfig::default();
        if let Some(resolver) = std::env::var_os(RESOLVER_ENV) {
            config.resolver = resolver;
        }
        config
    }
}

/// One captured frame: its return address and the line the in-process
/// symbolizer produced for it.
#[derive(Debug, Clone)]
pub struct Frame<'a> {
    pub addr: Addr,
    pub symbol: Cow<'a, [u8]>,
}

impl Frame<'_> {
    /// The object file the frame belongs to.
    ///
    /// Assumes the glibc `backtrace_symbols` shape, `path(symbol+off) [addr]`
    /// or `path [addr]`: everything before the first `(` or space is the
    /// path. Other formats may come out wrong.
    pub fn module_path(&self) -> &[u8] {
        let end = self
            .symbol
            .iter()
            .position(|&b| b == b'(' || b == b' ')
            .unwrap_or(self.symbol.len());
        &self.symbol[..end]
    }
}

/// What a resolver found out about an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub function: String,
    /// `file:line`
    pub location: String,
}

impl Resolved {
    /// Reads the first two lines of `addr2line -f` output. Missing lines
    /// become `??`, as addr2line itself prints for unknown addresses.
    pub fn from_output(output: &[u8]) -> Self {
        let text = String::from_utf8_lossy(output);
        let mut lines = text.lines();
        let function = lines.next().unwrap_or("??").to_owned();
        let location = lines.next().unwrap_or("??:0").to_owned();
        Resolved { function, location }
    }
}

/// Maps a code address to function name and source location.
pub trait Resolver {
    fn resolve(&mut self, addr: Addr, module: &OsStr) -> Result<Resolved, Error>;
}

/// Resolves through an `addr2line` subprocess.
#[derive(Debug, Clone)]
pub struct Addr2Line {
    program: OsString,
}

impl Addr2Line {
    pub fn new(program: impl Into<OsString>) -> Self {
        Addr2Line {
            program: program.into(),
        }
    }
}

impl Resolver for Addr2Line {
    fn resolve(&mut self, addr: Addr, module: &OsStr) -> Result<Resolved, Error> {
        let address = format!("{:#x}", addr.addr());
        let output = Command::new(&self.program)
            .arg(&address)
            .args(["-f", "-e"])
            .arg(module)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .map_err(|source| Error::Spawn {
                command: format!(
                    "{} {address} -f -e {}",
                    self.program.to_string_lossy(),
                    module.to_string_lossy()
                ),
                source,
            })?;

        Ok(Resolved::from_output(&output.stdout))
    }
}

/// Prints the crash report for `frames`, innermost first.
///
/// ```text
/// Got signal 11
/// [bt] Execution path:
/// [bt] #1 in function : main
///         /src/main.c:12
/// ```
pub fn write_report(
    signal: ffi::c_int,
    frames: &[Frame<'_>],
    skipped: usize,
    resolver: &mut impl Resolver,
    out: &mut impl Write,
) -> Result<(), Error> {
    writeln!(out, "Got signal {signal}")?;
    writeln!(out, "[bt] Execution path:")?;

    for (index, frame) in frames.iter().enumerate().skip(skipped) {
        write!(out, "[bt] #{} ", index - skipped + 1)?;
        let module = OsStr::from_bytes(frame.module_path());
        let resolved = resolver.resolve(frame.addr, module)?;
        writeln!(out, "in function : {}", resolved.function)?;
        writeln!(out, "\t{}", resolved.location)?;
    }

    Ok(())
}

extern "C" {
    fn backtrace(buffer: *mut *mut ffi::c_void, size: ffi::c_int) -> ffi::c_int;
    fn backtrace_symbols(
        buffer: *const *mut ffi::c_void,
        size: ffi::c_int,
    ) -> *mut *mut ffi::c_char;
}

/// The `malloc`ed array `backtrace_symbols` hands back.
struct Symbols {
    lines: *mut *mut ffi::c_char,
    len: usize,
}

impl Symbols {
    fn new(trace: &[*mut ffi::c_void]) -> Self {
        // SAFETY: `trace` came out of `backtrace`.
        let lines = unsafe { backtrace_symbols(trace.as_ptr(), trace.len() as ffi::c_int) };
        Symbols {
            lines,
            len: trace.len(),
        }
    }

    fn get(&self, index: usize) -> Option<&CStr> {
        if self.lines.is_null() || index >= self.len {
            return None;
        }
        // SAFETY: backtrace_symbols returns one string per input address.
        unsafe {
            let line = *self.lines.add(index);
            (!line.is_null()).then(|| CStr::from_ptr(line))
        }
    }
}

impl Drop for Symbols {
    fn drop(&mut self) {
        // SAFETY: a single allocation holding pointers and strings.
        unsafe { libc::free(self.lines.cast()) }
    }
}

/// Writes the report for a captured trace, innermost return address first.
pub fn report_trace(
    signal: ffi::c_int,
    trace: &[*mut ffi::c_void],
    config: &CrashConfig,
    out: &mut impl Write,
) -> Result<(), Error> {
    let symbols = Symbols::new(trace);
    let frames: Vec<Frame<'_>> = trace
        .iter()
        .enumerate()
        .map(|(index, &ip)| {
            let addr = Addr::new(ip.addr());
            let symbol = match symbols.get(index) {
                Some(line) => Cow::Borrowed(line.to_bytes()),
                None => Cow::Owned(crate::identify::symbol_line(addr)),
            };
            Frame { addr, symbol }
        })
        .collect();

    let mut resolver = Addr2Line::new(config.resolver.clone());
    write_report(signal, &frames, config.skipped_frames, &mut resolver, out)
}

static CONFIG: OnceLock<CrashConfig> = OnceLock::new();
static IN_HANDLER: AtomicBool = AtomicBool::new(false);

extern "C" fn on_fault(signal: ffi::c_int) {
    // A fault while reporting a fault.
    if IN_HANDLER.swap(true, Ordering::SeqCst) {
        stdext::exit_immediately(1);
    }

    let default_config;
    let config = match CONFIG.get() {
        Some(config) => config,
        None => {
            default_config = CrashConfig::default();
            &default_config
        }
    };

    // Captured in this frame, so the two innermost entries are the handler
    // and the signal trampoline.
    let mut trace = [core::ptr::null_mut(); MAX_FRAMES];
    let wanted = config.max_frames.min(MAX_FRAMES);
    // SAFETY: `trace` holds at least `wanted` entries.
    let depth = unsafe { backtrace(trace.as_mut_ptr(), wanted as ffi::c_int) };
    let trace = &trace[..depth.max(0) as usize];

    let mut out = stdext::STDOUT;
    if let Err(err) = report_trace(signal, trace, config, &mut out) {
        let _ = writeln!(out, "{err}");
    }

    stdext::exit(1)
}

/// Installs the fault handler with [`CrashConfig::from_env`].
pub fn install() -> Result<(), Error> {
    install_with(CrashConfig::from_env())
}

/// Installs the fault handler for [`FAULT_SIGNALS`]. Can be called more than
/// once; the configuration passed first stays in effect.
#[instrument(skip(config))]
pub fn install_with(config: CrashConfig) -> Result<(), Error> {
    let config = CONFIG.get_or_init(|| config);
    debug!(resolver = ?config.resolver, max_frames = config.max_frames, "installing fault handler");

    for signal in FAULT_SIGNALS {
        // SAFETY: `action` is fully initialized and `on_fault` matches the
        // plain `sa_handler` signature.
        let ret = unsafe {
            let mut action: libc::sigaction = core::mem::zeroed();
            action.sa_sigaction = on_fault as extern "C" fn(ffi::c_int) as libc::sighandler_t;
            libc::sigemptyset(&mut action.sa_mask);
            action.sa_flags = libc::SA_RESTART;
            libc::sigaction(signal, &action, core::ptr::null_mut())
        };
        if ret != 0 {
            return Err(Error::Install {
                signal,
                source: io::Error::last_os_error(),
            });
        }
    }

    Ok(())
}
