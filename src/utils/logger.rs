use env_logger::{Builder, Target};
use log::LevelFilter;
use std::io::Write;

/// Stdout logger with a timestamp and source location prefix.
/// `RUST_LOG` still overrides the default `Info` level.
pub fn setup_logging() {
    let mut builder = Builder::new();

    builder
        .target(Target::Stdout)
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] [{}:{}] {}",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        });

    let _ = builder.try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_logging_twice() {
        setup_logging();
        setup_logging();
        log::info!("logger still usable");
    }
}
