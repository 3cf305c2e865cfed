//! 错误类型
//!
//! 只有缓冲区分配失败和配置错误会以 `Err` 返回给调用方；
//! 畸形的FEC包、重复包、窗口外的包都属于正常的网络现象，
//! 通过 [`WindowEvent::Dropped`](crate::fec::WindowEvent::Dropped) 报告。

use thiserror::Error;

/// FEC编解码错误类型
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FecError {
    #[error("无效的FEC配置: {0}")]
    InvalidConfig(String),

    #[error("缓冲区分配失败: 请求{requested}字节 (上限{limit}字节)")]
    Allocation { requested: usize, limit: usize },

    #[error("媒体包过大: {length}字节 (最大{max}字节)")]
    PacketTooLarge { length: usize, max: usize },

    #[error("无效的RTP包: {0}")]
    InvalidPacket(String),

    #[error("纠删码引擎错误: {0}")]
    Codec(String),

    #[error("随机数生成失败")]
    Random,
}
