use tracing_subscriber::{fmt, EnvFilter};

/// 初始化 tracing 日志系统（控制台输出，级别由 RUST_LOG 控制，默认 info）
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // 重复初始化时保留已有的订阅者
    if fmt().with_env_filter(filter).try_init().is_ok() {
        tracing::info!("日志系统初始化完成");
    }
}
