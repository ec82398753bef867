
/// Logs a structured line with timestamp, level, component, pid, tid, and message.
/// Usage:
/// ```rust
/// use log::Level;
/// memdrv::memdrv_log!(Level::Info, "service", "Service started");
/// memdrv::memdrv_log!(Level::Error, "channel", "Open failed: {}", 5);
/// ```
/// Logs like:
/// [2025-04-25T16:32:10+02:00][DEBUG][service][pid=4568][tid=ThreadId(1)] Your message here
#[macro_export]
macro_rules! memdrv_log {
    ($level:expr, $component:literal, $fmt:literal $(, $($arg:tt)+)?) => {
        log::log!(
            $level,
            concat!(
                "[", "{}", "]",          // timestamp
                "[", "{}", "]",          // level via Display
                "[", $component, "]",    // component
                "[pid=", "{}", "]",      // pid
                "[tid=", "{:?}", "] ",   // tid
                $fmt                     // message
            ),
            chrono::Local::now().to_rfc3339(),
            $level,
            std::process::id(),
            std::thread::current().id()
            $(, $($arg)+)?
        );
    };
}

/// In-memory logger shared by unit tests that assert on log output.
///
/// Installed once for the whole unit-test binary; lines are never cleared,
/// so each test looks for its own unique payload.
#[cfg(test)]
pub(crate) mod capture {
    use log::{Level, LevelFilter, Log, Metadata, Record};
    use std::sync::Mutex;

    struct MemoryLogger {
        buffer: Mutex<String>,
    }

    static LOGGER: MemoryLogger = MemoryLogger { buffer: Mutex::new(String::new()) };

    impl Log for MemoryLogger {
        fn enabled(&self, metadata: &Metadata) -> bool {
            metadata.level() <= Level::Debug
        }
        fn log(&self, record: &Record) {
            if self.enabled(record.metadata()) {
                let mut buf = self.buffer.lock().unwrap();
                buf.push_str(&format!("{}\n", record.args()));
            }
        }
        fn flush(&self) {}
    }

    pub fn install() {
        // Only the first call wins; later ones see the same logger.
        let _ = log::set_logger(&LOGGER);
        log::set_max_level(LevelFilter::Debug);
    }

    /// First captured line containing `needle`.
    pub fn line_with(needle: &str) -> Option<String> {
        let buf = LOGGER.buffer.lock().unwrap();
        buf.lines().find(|l| l.contains(needle)).map(str::to_owned)
    }
}
