//! Utilities for logging messages from the library.

use once_cell::sync::Lazy;

#[doc(hidden)]
#[macro_export]
macro_rules! dbxi_log {
    (
        $session:expr,
        $($arg:tt)+
    ) => {
        if $session.log_enabled() {
            eprintln!("{}", format_args!($($arg)+));
        }
    };
}

pub fn log_enabled() -> bool {
    static ENABLED: Lazy<bool> = Lazy::new(|| ::std::env::var_os("DBXI_LOG").is_some());

    *ENABLED
}
