//! CLI 日志系统初始化
//!
//! 基于 `tracing-subscriber` 实现分阶段日志控制。
//! 设置了 `RUST_LOG` 时以它为准。

use std::io;

use clap::ValueEnum;
use smalls_api::Phase;
use tracing_subscriber::{
    filter::Targets, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
    Registry,
};

use crate::config::LogConfig;

/// 日志输出格式
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// 彩色格式化（开发使用）
    Pretty,
    /// 紧凑格式
    Compact,
    /// JSON 格式（工具集成）
    Json,
}

/// 按阶段构造过滤器
pub fn targets(log_config: &LogConfig) -> Targets {
    Phase::ALL
        .iter()
        .fold(Targets::new().with_default(log_config.global), |t, phase| {
            t.with_target(phase.target(), log_config.level_for(*phase))
        })
        .with_target("smalls::cli", log_config.global)
}

/// 使用指定格式和日志配置初始化日志系统；日志写到 stderr
pub fn init(log_config: &LogConfig, format: LogFormat) {
    let layer = create_format_layer(format, io::stderr);
    let result = match std::env::var("RUST_LOG") {
        Ok(directives) if !directives.is_empty() => tracing_subscriber::registry()
            .with(layer.with_filter(EnvFilter::new(directives)))
            .try_init(),
        _ => tracing_subscriber::registry()
            .with(layer.with_filter(targets(log_config)))
            .try_init(),
    };
    if let Err(e) = result {
        eprintln!("warning: logging already initialized: {}", e);
    }
}

/// Create formatter layer based on format
fn create_format_layer<W, F>(
    format: LogFormat,
    make_writer: F,
) -> Box<dyn Layer<Registry> + Send + Sync>
where
    W: io::Write + Send + Sync + 'static,
    F: Fn() -> W + Send + Sync + 'static,
{
    match format {
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_target(true)
            .with_writer(make_writer)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(false)
            .without_time()
            .with_writer(make_writer)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_writer(make_writer)
            .boxed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::level_filters::LevelFilter;
    use tracing::Level;

    #[test]
    fn test_targets_follow_phase_levels() {
        let cfg = LogConfig::default().with_phase(Phase::Gc, Some(LevelFilter::DEBUG));
        let targets = targets(&cfg);
        assert!(targets.would_enable("smalls::gc", &Level::DEBUG));
        assert!(!targets.would_enable("smalls::vm", &Level::DEBUG));
        assert!(targets.would_enable("smalls::vm", &Level::WARN));
    }
}
