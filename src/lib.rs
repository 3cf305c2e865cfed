//! RTP前向纠错：Reed-Solomon编码器和滑动窗口解码器

/// 错误类型
pub mod error;

/// FEC块参数配置
pub mod config;

/// RTP包与缓冲区工厂
pub mod packet;

/// FEC（前向纠错）模块
pub mod fec;

/// RTP流描述
pub mod caps;

/// 发送端与接收端
pub mod sender;
pub mod receiver;

/// C接口
pub mod capi;

/// 重新导出常用类型
pub use config::FecConfig;
pub use error::FecError;
pub use fec::{DecoderStats, EncoderPush, FecDecoder, FecEncoder, WindowEvent};
pub use packet::RtpPacket;
pub use receiver::FecReceiver;
pub use sender::{FecSender, SenderOutput};

/// 库版本信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 日志系统
pub mod logging;
