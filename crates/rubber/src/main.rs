//! Supervisor event listener that keeps a pool of programs running at the
//! number of host CPUs plus an offset.
//!
//! Supervisor drives the listener over stdin and stdout; the binary delegates
//! to [`rubber::run`].

use std::io;
use std::process::ExitCode;

fn main() -> ExitCode {
    let stdin = io::stdin().lock();
    let mut stdout = io::stdout().lock();
    let mut stderr = io::stderr().lock();
    rubber::run(std::env::args_os(), stdin, &mut stdout, &mut stderr)
}
