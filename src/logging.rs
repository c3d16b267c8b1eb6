//! The four named log sinks (spec §6 "Log record schema", §9 "Global
//! logging sinks"): `process`, `debug`, `access`, `error`.
//!
//! Each is a `tracing` target (`zibai::process`, `zibai::debug`,
//! `zibai::access`, `zibai::error`) rather than a bespoke sink
//! abstraction — sink *configuration* (format, destination, rotation) is
//! explicitly the host's concern per spec §1, so this crate never installs
//! a global subscriber of its own. What it does provide is an optional
//! convenience initializer for hosts that just want a sane default,
//! mirroring how `busride-rs` leaves subscriber setup to the binary while
//! using `tracing` pervasively in the library.

/// Target name for lifecycle events: start/stop/fork/reap (spec §6).
pub const PROCESS: &str = "zibai::process";
/// Target name for low-level detail not worth surfacing at access/error
/// level: socket aborts, protocol errors mid-body (spec §4.2, §7).
pub const DEBUG: &str = "zibai::debug";
/// Target name for successful exchanges (status < 500), one record each
/// (spec §4.2 step 7).
pub const ACCESS: &str = "zibai::access";
/// Target name for failed exchanges and application exceptions (spec §4.2
/// step 7, §7).
pub const ERROR: &str = "zibai::error";

/// Installs a default `tracing-subscriber` `fmt` layer with an `EnvFilter`
/// driven by `RUST_LOG` (falling back to `info` for the four zibai
/// targets). Entirely optional — hosts that want to format or route the
/// four targets differently should install their own subscriber instead of
/// calling this.
pub fn init_default_subscriber() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("zibai::process=info,zibai::access=info,zibai::error=info,zibai::debug=warn")
    });

    let _ = fmt().with_env_filter(filter).try_init();
}
