//! Thin logging init, mirroring how the rest of this codebase's crates
//! wire up `env_logger` for library-local logging (a full
//! `log4rs`/`tracing-subscriber` setup is CLI configuration and belongs
//! to a caller, not this crate). Everywhere else in this crate logs
//! through the `log` facade, never `println!`.

use log::LevelFilter;

/// Installs a process-wide `env_logger` at `level`, honoring `RUST_LOG`
/// if it is set. Safe to call more than once; later calls are no-ops.
pub fn init_logging(level: LevelFilter) {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(level)
        .is_test(cfg!(test))
        .try_init();
}
