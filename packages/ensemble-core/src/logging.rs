//! Logger setup for shells without a logger of their own.

use log::LevelFilter;

/// Installs an `env_logger` at `level` with millisecond timestamps.
///
/// Returns false if a logger was already installed, in which case the
/// existing one is left in place.
pub fn init(level: LevelFilter) -> bool {
    let installed = env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp_millis()
        .try_init()
        .is_ok();

    if installed {
        log::info!("Ensemble core v{}", env!("CARGO_PKG_VERSION"));
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_a_no_op() {
        init(LevelFilter::Debug);
        assert!(!init(LevelFilter::Info));
    }
}
