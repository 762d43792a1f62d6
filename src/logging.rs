use tracing_subscriber::{filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// 初始化默认的 `tracing` 订阅者，向标准输出写出人类可读的日志。
///
/// 日志级别通过 `RUST_LOG` 环境变量控制，未设置时默认为 `info`。
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init()
}

/// 初始化以 JSON 行格式写日志的 `tracing` 订阅者，便于日志采集系统解析。
pub fn init_json_logging() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            fmt::layer()
                .json()
                .flatten_event(true)
                .with_current_span(false)
                .with_span_list(false),
        )
        .init()
}
