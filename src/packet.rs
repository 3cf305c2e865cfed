//! RTP包与缓冲区工厂
//!
//! `RtpPacket` 只解析窗口管理需要的几个字段（序列号、SSRC、时间戳、负载类型、头长度），
//! 不做完整的RTP校验。包数据通过 `Arc<[u8]>` 共享，克隆只增加引用计数。
//!
//! RTP固定头格式 (RFC 3550):
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|X|  CC   |M|     PT      |       sequence number         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           timestamp                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                             SSRC                              |
//! +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
//! ```

use crate::error::FecError;
use std::fmt;
use std::sync::Arc;

/// RTP固定头长度
pub const RTP_HEADER_LEN: usize = 12;

/// RTP版本号
pub const RTP_VERSION: u8 = 2;

/// 默认的单个缓冲区上限（最大RTP包 + FEC头余量）
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 64 * 1024 + 128;

/// 引用计数的RTP包
#[derive(Clone, PartialEq, Eq)]
pub struct RtpPacket {
    data: Arc<[u8]>,
}

impl RtpPacket {
    /// 从原始字节创建RTP包
    ///
    /// 只检查长度是否能容纳RTP头（含CSRC列表和扩展头）。
    pub fn from_bytes(data: impl Into<Arc<[u8]>>) -> Result<Self, FecError> {
        let data = data.into();
        if data.len() < RTP_HEADER_LEN {
            return Err(FecError::InvalidPacket(format!(
                "长度{}字节，不足RTP头{}字节",
                data.len(),
                RTP_HEADER_LEN
            )));
        }

        let packet = Self { data };
        let header_len = packet.declared_header_len();
        if header_len > packet.data.len() {
            return Err(FecError::InvalidPacket(format!(
                "RTP头声明{}字节，实际包长{}字节",
                header_len,
                packet.data.len()
            )));
        }

        Ok(packet)
    }

    /// 恢复出的包不做头部校验：内容由纠删码引擎重建，长度等于符号长度
    pub(crate) fn from_recovered(data: Vec<u8>) -> Self {
        Self { data: data.into() }
    }

    pub fn sequence_number(&self) -> u16 {
        u16::from_be_bytes([self.byte(2), self.byte(3)])
    }

    pub fn timestamp(&self) -> u32 {
        u32::from_be_bytes([self.byte(4), self.byte(5), self.byte(6), self.byte(7)])
    }

    pub fn ssrc(&self) -> u32 {
        u32::from_be_bytes([self.byte(8), self.byte(9), self.byte(10), self.byte(11)])
    }

    pub fn payload_type(&self) -> u8 {
        self.byte(1) & 0x7f
    }

    pub fn marker(&self) -> bool {
        self.byte(1) & 0x80 != 0
    }

    pub fn version(&self) -> u8 {
        self.byte(0) >> 6
    }

    /// RTP头长度（固定头 + CSRC + 扩展头），不超过包长
    pub fn header_len(&self) -> usize {
        self.declared_header_len().min(self.data.len())
    }

    /// RTP头之后的所有字节
    pub fn payload(&self) -> &[u8] {
        &self.data[self.header_len()..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 当前共享该包数据的引用数
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.data)
    }

    fn byte(&self, index: usize) -> u8 {
        self.data.get(index).copied().unwrap_or(0)
    }

    fn declared_header_len(&self) -> usize {
        let csrc_count = (self.byte(0) & 0x0f) as usize;
        let mut len = RTP_HEADER_LEN + csrc_count * 4;

        // 扩展头: 2字节profile + 2字节长度(以32位字为单位) + 扩展数据
        if self.byte(0) & 0x10 != 0 {
            let ext_words = u16::from_be_bytes([self.byte(len + 2), self.byte(len + 3)]) as usize;
            len += 4 + ext_words * 4;
        }

        len
    }
}

impl fmt::Debug for RtpPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RtpPacket")
            .field("seq", &self.sequence_number())
            .field("ssrc", &self.ssrc())
            .field("ts", &self.timestamp())
            .field("pt", &self.payload_type())
            .field("len", &self.data.len())
            .finish()
    }
}

/// 构造RTP固定头需要的字段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeaderFields {
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub marker: bool,
}

/// 写入12字节RTP固定头（无CSRC、无扩展），返回写入的字节数
///
/// `buf` 长度不足时返回错误而不是panic。
pub fn write_rtp_header(buf: &mut [u8], fields: &RtpHeaderFields) -> Result<usize, FecError> {
    if buf.len() < RTP_HEADER_LEN {
        return Err(FecError::InvalidPacket(format!(
            "缓冲区{}字节，不足RTP头{}字节",
            buf.len(),
            RTP_HEADER_LEN
        )));
    }

    buf[0] = RTP_VERSION << 6;
    buf[1] = (fields.payload_type & 0x7f) | if fields.marker { 0x80 } else { 0 };
    buf[2..4].copy_from_slice(&fields.sequence_number.to_be_bytes());
    buf[4..8].copy_from_slice(&fields.timestamp.to_be_bytes());
    buf[8..12].copy_from_slice(&fields.ssrc.to_be_bytes());

    Ok(RTP_HEADER_LEN)
}

/// 缓冲区工厂：为FEC包和恢复出的媒体包分配存储
///
/// 返回的缓冲区必须已清零且长度恰好为 `size`。分配失败是唯一的致命错误。
pub trait BufferFactory: Send + Sync {
    fn allocate(&self, size: usize) -> Result<Vec<u8>, FecError>;
}

/// 基于堆内存的默认缓冲区工厂
#[derive(Debug, Clone, Copy)]
pub struct HeapBufferFactory {
    max_size: usize,
}

impl HeapBufferFactory {
    pub fn new(max_size: usize) -> Self {
        Self { max_size }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

impl Default for HeapBufferFactory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BUFFER_SIZE)
    }
}

impl BufferFactory for HeapBufferFactory {
    fn allocate(&self, size: usize) -> Result<Vec<u8>, FecError> {
        let error = FecError::Allocation {
            requested: size,
            limit: self.max_size,
        };

        if size > self.max_size {
            return Err(error);
        }

        let mut buf = Vec::new();
        buf.try_reserve_exact(size).map_err(|_| error)?;
        buf.resize(size, 0);
        Ok(buf)
    }
}
