//! Helpers for tests whose subject terminates the process.

use std::process::{Command, Output};

/// Whether this process is the re-executed child of [`run_in_child`].
pub(crate) fn in_child(marker: &str) -> bool {
    std::env::var_os(marker).is_some()
}

/// Re-runs exactly the test `test` in a fresh copy of the test binary, with
/// `marker` set in its environment, and collects what it printed.
pub(crate) fn run_in_child(test: &str, marker: &str) -> Output {
    let exe = std::env::current_exe().unwrap();
    Command::new(exe)
        .args([test, "--exact", "--nocapture", "--test-threads=1"])
        .env(marker, "1")
        .output()
        .unwrap()
}
