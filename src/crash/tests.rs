use std::borrow::Cow;
use std::ffi::{OsStr, OsString};
use std::io;

use super::*;
use crate::Addr;
use crate::test_util::{in_child, run_in_child};

#[derive(Default)]
struct FixedResolver {
    calls: Vec<(usize, OsString)>,
}

impl Resolver for FixedResolver {
    fn resolve(&mut self, addr: Addr, module: &OsStr) -> Result<Resolved, Error> {
        self.calls.push((addr.addr(), module.to_owned()));
        Ok(Resolved {
            function: format!("fn_{:x}", addr.addr()),
            location: format!("src/lib.yr:{}", self.calls.len()),
        })
    }
}

struct MissingResolver;

impl Resolver for MissingResolver {
    fn resolve(&mut self, _: Addr, module: &OsStr) -> Result<Resolved, Error> {
        Err(Error::Spawn {
            command: format!("addr2line 0x0 -f -e {}", module.to_string_lossy()),
            source: io::ErrorKind::NotFound.into(),
        })
    }
}

fn frame(addr: usize, symbol: &'static str) -> Frame<'static> {
    Frame {
        addr: Addr::new(addr),
        symbol: Cow::Borrowed(symbol.as_bytes()),
    }
}

fn synthetic_stack() -> Vec<Frame<'static>> {
    vec![
        frame(0x1000, "./prog(on_fault+0x10) [0x1000]"),
        frame(0x2000, "/lib/x86_64-linux-gnu/libc.so.6(+0x3c050) [0x2000]"),
        frame(0x3000, "./prog(main+0x1d) [0x3000]"),
    ]
}

#[test]
fn module_path_stops_at_paren_or_space() {
    assert_eq!(frame(0, "./prog(main+0x1d) [0x4005ed]").module_path(), b"./prog");
    assert_eq!(
        frame(0, "/usr/lib/libc.so.6 [0x7f00]").module_path(),
        b"/usr/lib/libc.so.6"
    );
    assert_eq!(frame(0, "/opt/a.out").module_path(), b"/opt/a.out");
    assert_eq!(frame(0, "(+0x10) [0x1]").module_path(), b"");
}

#[test]
fn report_skips_handler_frames() {
    let mut resolver = FixedResolver::default();
    let mut out = Vec::new();

    write_report(11, &synthetic_stack(), SKIPPED_FRAMES, &mut resolver, &mut out).unwrap();

    assert_eq!(
        String::from_utf8(out).unwrap(),
        "Got signal 11\n\
         [bt] Execution path:\n\
         [bt] #1 in function : fn_3000\n\
         \tsrc/lib.yr:1\n"
    );
    assert_eq!(resolver.calls, [(0x3000, OsString::from("./prog"))]);
}

#[test]
fn report_numbers_frames_in_trace_order() {
    let mut stack = synthetic_stack();
    stack.push(frame(0x4000, "./prog(__libc_start_main+0x80) [0x4000]"));
    stack.push(frame(0x5000, "./prog(_start+0x2a) [0x5000]"));

    let mut resolver = FixedResolver::default();
    let mut out = Vec::new();
    write_report(6, &stack, SKIPPED_FRAMES, &mut resolver, &mut out).unwrap();

    let out = String::from_utf8(out).unwrap();
    let numbered: Vec<&str> = out.lines().filter(|line| line.starts_with("[bt] #")).collect();
    assert_eq!(
        numbered,
        [
            "[bt] #1 in function : fn_3000",
            "[bt] #2 in function : fn_4000",
            "[bt] #3 in function : fn_5000",
        ]
    );
    let addrs: Vec<usize> = resolver.calls.iter().map(|(addr, _)| *addr).collect();
    assert_eq!(addrs, [0x3000, 0x4000, 0x5000]);
}

#[test]
fn short_stack_prints_only_the_header() {
    let mut resolver = FixedResolver::default();
    let mut out = Vec::new();
    write_report(10, &synthetic_stack()[..2], SKIPPED_FRAMES, &mut resolver, &mut out).unwrap();

    assert_eq!(
        String::from_utf8(out).unwrap(),
        "Got signal 10\n[bt] Execution path:\n"
    );
    assert!(resolver.calls.is_empty());
}

#[test]
fn resolver_failure_stops_the_report() {
    let mut out = Vec::new();
    let err = write_report(11, &synthetic_stack(), SKIPPED_FRAMES, &mut MissingResolver, &mut out)
        .unwrap_err();

    assert_eq!(err.to_string(), "Failed to run command addr2line 0x0 -f -e ./prog");
    assert!(String::from_utf8(out).unwrap().ends_with("[bt] #1 "));
}

#[test]
fn resolver_output_takes_two_lines() {
    assert_eq!(
        Resolved::from_output(b"main\n/src/main.c:12\nextra\n"),
        Resolved {
            function: "main".into(),
            location: "/src/main.c:12".into(),
        }
    );
    assert_eq!(
        Resolved::from_output(b""),
        Resolved {
            function: "??".into(),
            location: "??:0".into(),
        }
    );
}

#[test]
fn missing_resolver_program_is_a_spawn_error() {
    let mut resolver = Addr2Line::new("/nonexistent/yrt-addr2line");
    let err = resolver
        .resolve(Addr::new(0x1234), OsStr::new("./prog"))
        .unwrap_err();

    assert!(matches!(err, Error::Spawn { .. }));
    assert_eq!(
        err.to_string(),
        "Failed to run command /nonexistent/yrt-addr2line 0x1234 -f -e ./prog"
    );
}

#[test]
fn config_defaults() {
    let config = CrashConfig::default();
    assert_eq!(config.resolver, "addr2line");
    assert_eq!(config.max_frames, 16);
    assert_eq!(config.skipped_frames, 2);
}

const DUMP_CHILD: &str = "YRT_TEST_DUMP_SIGNAL";

#[test]
fn dump_signal_prints_trace_and_exits() {
    if in_child(DUMP_CHILD) {
        // `echo` stands in for addr2line: it prints its arguments back.
        install_with(CrashConfig {
            resolver: "echo".into(),
            ..CrashConfig::default()
        })
        .unwrap();
        unsafe { libc::raise(libc::SIGUSR1) };
        unreachable!("the fault handler exits");
    }

    let output = run_in_child("crash::tests::dump_signal_prints_trace_and_exits", DUMP_CHILD);
    assert_eq!(output.status.code(), Some(1));

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains(&format!("Got signal {}\n[bt] Execution path:\n", libc::SIGUSR1)),
        "{stdout}"
    );
    assert!(stdout.contains("[bt] #1 in function : 0x"), "{stdout}");
    assert!(stdout.contains(" -f -e "), "{stdout}");
}

const TRAMPOLINE_CHILD: &str = "YRT_TEST_TRAMPOLINE_SKIPPED";

/// The addresses printed on the `[bt] #n in function : ` lines. With `echo`
/// as the resolver that line starts with the frame's address.
fn reported_addresses(stdout: &str) -> Vec<usize> {
    stdout
        .lines()
        .filter_map(|line| line.split_once(" in function : 0x"))
        .filter(|(head, _)| head.starts_with("[bt] #"))
        .filter_map(|(_, rest)| {
            let hex = rest.split(' ').next()?;
            usize::from_str_radix(hex, 16).ok()
        })
        .collect()
}

// glibc only installs its own `sa_restorer` on x86_64.
#[cfg(target_arch = "x86_64")]
#[test]
fn signal_trampoline_is_not_reported() {
    if in_child(TRAMPOLINE_CHILD) {
        install_with(CrashConfig {
            resolver: "echo".into(),
            ..CrashConfig::default()
        })
        .unwrap();
        let restorer = unsafe {
            let mut old: libc::sigaction = core::mem::zeroed();
            libc::sigaction(libc::SIGUSR1, core::ptr::null(), &mut old);
            old.sa_restorer.map_or(0, |f| f as usize)
        };
        let mut out = stdext::STDOUT;
        writeln!(out, "trampoline {restorer:#x}").unwrap();
        unsafe { libc::raise(libc::SIGUSR1) };
        unreachable!("the fault handler exits");
    }

    let output = run_in_child("crash::tests::signal_trampoline_is_not_reported", TRAMPOLINE_CHILD);
    assert_eq!(output.status.code(), Some(1));

    let stdout = String::from_utf8_lossy(&output.stdout);
    let trampoline = stdout
        .lines()
        .find_map(|line| line.strip_prefix("trampoline 0x"))
        .and_then(|hex| usize::from_str_radix(hex, 16).ok())
        .unwrap();
    assert_ne!(trampoline, 0, "{stdout}");

    let addresses = reported_addresses(&stdout);
    assert!(!addresses.is_empty(), "{stdout}");
    assert!(!addresses.contains(&trampoline), "trampoline {trampoline:#x} reported:\n{stdout}");
}

const NO_RESOLVER_CHILD: &str = "YRT_TEST_NO_RESOLVER";

#[test]
fn missing_resolver_still_exits() {
    if in_child(NO_RESOLVER_CHILD) {
        install_with(CrashConfig {
            resolver: "/nonexistent/yrt-addr2line".into(),
            ..CrashConfig::default()
        })
        .unwrap();
        unsafe { libc::raise(libc::SIGSEGV) };
        unreachable!("the fault handler exits");
    }

    let output = run_in_child("crash::tests::missing_resolver_still_exits", NO_RESOLVER_CHILD);
    assert_eq!(output.status.code(), Some(1));

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(&format!("Got signal {}", libc::SIGSEGV)), "{stdout}");
    assert!(stdout.contains("Failed to run command /nonexistent/yrt-addr2line"), "{stdout}");
}
