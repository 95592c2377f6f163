use cfg_if::cfg_if;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

static INIT: AtomicBool = AtomicBool::new(false);

/// Initializes the logger with debug mode, logging all messages including
/// trace output from the interpreter dispatch loop.
pub fn init_logger_debug() {
    if !INIT.swap(true, Ordering::SeqCst) {
        init(true);
    }
}

/// Initializes the logger with default mode, only logging errors and above.
pub fn init_logger() {
    if !INIT.swap(true, Ordering::SeqCst) {
        init(false);
    }
}

cfg_if! {
    if #[cfg(feature = "flexi_logger")] {
        fn init(debug: bool) {
            let spec = if debug {
                "perl_core=trace"
            } else {
                "perl_core=error"
            };
            if let Ok(logger) = flexi_logger::Logger::try_with_env_or_str(spec) {
                let _ = logger.start();
            }
        }
    } else {
        fn init(debug: bool) {
            let _ = debug;
            println!("No logger enabled. Logs will not be recorded.");
        }
    }
}
