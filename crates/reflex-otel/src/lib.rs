use once_cell::sync::OnceCell;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::{
    fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

/// Target used by the HTTP access-log middleware.
pub const ACCESS_TARGET: &str = "http.access";

static ACCESS_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

#[derive(Debug, Clone, PartialEq, Eq)]
enum Rotation {
    Minutely,
    Hourly,
    Daily,
}

impl Rotation {
    fn from_env_value(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "hourly" => Rotation::Hourly,
            "minutely" => Rotation::Minutely,
            _ => Rotation::Daily,
        }
    }
}

/// Install the global tracing subscriber.
///
/// Console output honours `RUST_LOG` (default `info`). With
/// `REFLEX_ACCESS_LOG_ROLL=1` the `http.access` target is additionally written
/// to a rolling file under `REFLEX_ACCESS_LOG_DIR` (or `REFLEX_LOGS_DIR`, or
/// `logs`). Calling `init` more than once is harmless.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    install_console(filter);
}

fn install_console(filter: EnvFilter) {
    let fmt_layer = fmt::layer();
    let registry = tracing_subscriber::registry().with(fmt_layer.with_filter(filter));
    if std::env::var("REFLEX_ACCESS_LOG_ROLL").ok().as_deref() == Some("1") {
        let dir = std::env::var("REFLEX_ACCESS_LOG_DIR")
            .ok()
            .or_else(|| std::env::var("REFLEX_LOGS_DIR").ok())
            .unwrap_or_else(|| "logs".to_string());
        let prefix =
            std::env::var("REFLEX_ACCESS_LOG_PREFIX").unwrap_or_else(|_| "http-access".into());
        let rotation = Rotation::from_env_value(
            &std::env::var("REFLEX_ACCESS_LOG_ROTATION").unwrap_or_else(|_| "daily".into()),
        );
        if std::fs::create_dir_all(&dir).is_err() {
            tracing::warn!(directory = %dir, "failed to create access log directory");
        }
        let writer = match rotation {
            Rotation::Hourly => tracing_appender::rolling::hourly(&dir, &prefix),
            Rotation::Minutely => tracing_appender::rolling::minutely(&dir, &prefix),
            Rotation::Daily => tracing_appender::rolling::daily(&dir, &prefix),
        };
        let (nb, guard) = tracing_appender::non_blocking(writer);
        let _ = ACCESS_GUARD.set(guard);
        let targets = Targets::new().with_target(ACCESS_TARGET, tracing::Level::INFO);
        let access_layer = fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(nb)
            .with_filter(targets);
        let _ = registry.with(access_layer).try_init();
    } else {
        let _ = registry.try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_defaults_to_daily() {
        assert_eq!(Rotation::from_env_value("HOURLY"), Rotation::Hourly);
        assert_eq!(Rotation::from_env_value("minutely"), Rotation::Minutely);
        assert_eq!(Rotation::from_env_value("weekly"), Rotation::Daily);
    }

    #[test]
    fn init_twice_is_harmless() {
        init();
        init();
        tracing::info!("tracing initialised");
    }
}
