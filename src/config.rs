//! Build-time switches. Both are selected through cargo features and are always on for the
//! crate's own unit tests.

/// Precondition and soft-ceiling assertions on the reference counters (`debug-checks`).
pub const DEBUG_CHECKS: bool = cfg!(any(test, feature = "debug-checks"));

/// Counter accessors and the live control block counter (`introspection`).
pub const INTROSPECTION: bool = cfg!(any(test, feature = "introspection"));

/// Reference count at which [`DEBUG_CHECKS`] reports a likely reference leak.
pub const SOFT_LIMIT: u32 = 1_000_000;

/// The switches this build was compiled with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    pub debug_checks: bool,
    pub introspection: bool,
}

impl Config {
    pub const fn get() -> Config {
        Config {
            debug_checks: DEBUG_CHECKS,
            introspection: INTROSPECTION,
        }
    }
}

/// Asserts `$cond` when [`DEBUG_CHECKS`] is enabled, logging the message before panicking.
/// Compiles to nothing otherwise.
macro_rules! check {
    ($cond:expr, $($msg:tt)+) => {
        if $crate::config::DEBUG_CHECKS && !$cond {
            log::error!($($msg)+);
            panic!($($msg)+);
        }
    };
}

pub(crate) use check;
