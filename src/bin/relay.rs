/// Relay CLI
///
/// Prints the effective configuration and runs the worker pool benchmark.
/// The event loop blocks the calling thread, so `main` stays synchronous.

use relay_core::cli;

fn main() {
    if let Err(e) = cli::run_cli() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
