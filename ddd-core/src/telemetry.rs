//! 日志初始化（telemetry）
//!
//! 按 `LoggingConfig` 安装全局 `tracing` 订阅者：`pretty` 或 `json` 格式，
//! 过滤规则优先取 `RUST_LOG`，否则使用配置中的 `level`。
//!
use crate::config::{LogFormat, LoggingConfig};
use crate::error::{DomainError, DomainResult};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;

fn env_filter(config: &LoggingConfig) -> DomainResult<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| {
            DomainError::configuration(format!("invalid log level `{}`: {e}", config.level))
        }),
    }
}

/// 安装全局订阅者；已安装过时返回 `Configuration` 错误
pub fn init_tracing(config: &LoggingConfig) -> DomainResult<()> {
    let filter = env_filter(config)?;

    let layer = match config.format {
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(filter)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .with_filter(filter)
            .boxed(),
    };

    let subscriber = tracing_subscriber::registry().with(layer);
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| DomainError::configuration(format!("tracing already initialised: {e}")))?;

    tracing::debug!(format = ?config.format, level = %config.level, "tracing initialised");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_level_is_a_configuration_error() {
        // SAFETY: 测试进程内只有本用例读取 RUST_LOG
        unsafe { std::env::remove_var("RUST_LOG") };
        let config = LoggingConfig {
            level: "ddd_core=verbose".to_string(),
            format: LogFormat::Json,
        };
        assert!(matches!(
            env_filter(&config),
            Err(DomainError::Configuration { .. })
        ));
    }
}
