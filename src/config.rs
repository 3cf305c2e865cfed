//! FEC块参数配置

use crate::error::FecError;
use ring::rand::{SecureRandom, SystemRandom};

/// 默认每块媒体包数 N
pub const DEFAULT_NUM_MEDIA_PACKETS: usize = 9;

/// 默认每块FEC包数 K
pub const DEFAULT_NUM_FEC_PACKETS: usize = 3;

/// FEC包默认负载类型
pub const DEFAULT_PAYLOAD_TYPE: u8 = 99;

/// FEC头中的mask字段只有24位
pub const MAX_NUM_MEDIA_PACKETS: usize = 24;

/// GF(2^8) Reed-Solomon 最多 256 个符号
pub const MAX_TOTAL_SYMBOLS: usize = 256;

/// FEC编解码配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FecConfig {
    /// 每块媒体包数 N
    pub num_media_packets: usize,
    /// 每块FEC包数 K
    pub num_fec_packets: usize,
    /// FEC包的RTP负载类型（7位）
    pub payload_type: u8,
    /// FEC包序列号起始值，`None` 表示随机选取
    pub seqnum_offset: Option<u16>,
}

impl Default for FecConfig {
    fn default() -> Self {
        Self {
            num_media_packets: DEFAULT_NUM_MEDIA_PACKETS,
            num_fec_packets: DEFAULT_NUM_FEC_PACKETS,
            payload_type: DEFAULT_PAYLOAD_TYPE,
            seqnum_offset: None,
        }
    }
}

impl FecConfig {
    pub fn with_block(mut self, num_media_packets: usize, num_fec_packets: usize) -> Self {
        self.num_media_packets = num_media_packets;
        self.num_fec_packets = num_fec_packets;
        self
    }

    pub fn with_payload_type(mut self, payload_type: u8) -> Self {
        self.payload_type = payload_type;
        self
    }

    pub fn with_seqnum_offset(mut self, seqnum_offset: u16) -> Self {
        self.seqnum_offset = Some(seqnum_offset);
        self
    }

    /// 校验所有参数
    pub fn validate(&self) -> Result<(), FecError> {
        validate_block(self.num_media_packets, self.num_fec_packets)?;
        validate_payload_type(self.payload_type)
    }

    /// 取得FEC序列号起始值（未配置时从系统随机源生成）
    pub fn resolve_seqnum_offset(&self) -> Result<u16, FecError> {
        match self.seqnum_offset {
            Some(offset) => Ok(offset),
            None => random_seqnum_offset(),
        }
    }
}

/// 校验块参数 (N, K)
pub fn validate_block(num_media_packets: usize, num_fec_packets: usize) -> Result<(), FecError> {
    if num_media_packets == 0 || num_media_packets > MAX_NUM_MEDIA_PACKETS {
        return Err(FecError::InvalidConfig(format!(
            "媒体包数必须在1到{}之间: {}",
            MAX_NUM_MEDIA_PACKETS, num_media_packets
        )));
    }

    if num_fec_packets == 0 {
        return Err(FecError::InvalidConfig("FEC包数必须大于0".to_string()));
    }

    if num_media_packets + num_fec_packets > MAX_TOTAL_SYMBOLS {
        return Err(FecError::InvalidConfig(format!(
            "媒体包数+FEC包数不能超过{}: {}+{}",
            MAX_TOTAL_SYMBOLS, num_media_packets, num_fec_packets
        )));
    }

    Ok(())
}

pub fn validate_payload_type(payload_type: u8) -> Result<(), FecError> {
    if payload_type > 127 {
        return Err(FecError::InvalidConfig(format!(
            "负载类型必须是7位: {}",
            payload_type
        )));
    }
    Ok(())
}

fn random_seqnum_offset() -> Result<u16, FecError> {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; 2];
    rng.fill(&mut bytes).map_err(|_| FecError::Random)?;
    Ok(u16::from_be_bytes(bytes))
}
