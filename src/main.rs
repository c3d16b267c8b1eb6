//! The `zibai` binary: parses the CLI (spec §6), resolves the `app`
//! positional and `--before-*` hook strings, and runs the server.
//!
//! Resolving a `module:attr` identifier into a callable is explicitly out
//! of this crate's scope (spec §1, §9) — a real resolver needs a plugin
//! format or an embedded interpreter, neither of which this spec asks for.
//! This binary ships the minimal stand-in that keeps it runnable out of
//! the box: the single built-in identifier `zibai:hello` selects
//! [`zibai::hello_app`]; anything else is reported as a configuration
//! error pointing at [`zibai::run_with_app`] for real deployments, which
//! link their `Application` in at compile time instead of resolving it
//! from a string.

use clap::Parser;
use zibai::cli::Cli;

fn main() {
    zibai::logging::init_default_subscriber();

    let cli = Cli::parse();

    let config = match cli.to_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("zibai: {err}");
            std::process::exit(1);
        }
    };

    for (flag, value) in [
        ("--before-serve", &cli.before_serve),
        ("--before-graceful-exit", &cli.before_graceful_exit),
        ("--before-died", &cli.before_died),
    ] {
        if value.is_some() {
            eprintln!(
                "zibai: {flag} requires a host-provided hook resolver; \
                 link your hooks via zibai::run_with_app and a zibai::config::HookSet impl instead"
            );
            std::process::exit(1);
        }
    }

    if cli.app != "zibai:hello" {
        eprintln!(
            "zibai: no resolver is bundled for app identifier {:?}; \
             this binary only runs the built-in zibai:hello demo. \
             Real deployments depend on the zibai library and call \
             zibai::run_with_app with their own Application.",
            cli.app
        );
        std::process::exit(1);
    }

    let exit_code = match zibai::run_with_app(config, zibai::hello_app) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("zibai: {err}");
            1
        }
    };
    std::process::exit(exit_code);
}
