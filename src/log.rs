use std::io::Write;
use std::sync::Once;

static INIT: Once = Once::new();

/// Install the env_logger backend once per process. Safe to call from every
/// test module; later calls are no-ops.
pub fn init_log() {
    INIT.call_once(|| {
        let mut builder = env_logger::Builder::from_default_env();
        builder
            .format_timestamp_micros()
            .format(|buf, record| {
                writeln!(
                    buf,
                    "[{} {}] [{}:{}] {}",
                    record.level(),
                    record.target(),
                    record.file().unwrap_or("?"),
                    record.line().unwrap_or(0),
                    record.args()
                )
            })
            .init();
    });
}
