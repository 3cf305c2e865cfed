//! FEC头编解码
//!
//! FEC头紧跟在FEC包的RTP头之后，共13字节，其后是修复符号：
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |      SN base                  |        length recovery        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |E| PT recovery |                 mask                          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                          TS recovery                          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |   FEC index   |          repair symbol ...                    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use crate::packet::RtpPacket;
use thiserror::Error;

/// FEC头长度（12字节头 + 1字节FEC索引）
pub const FEC_HEADER_LEN: usize = 13;

/// mask字段的有效位
pub const MASK_BITS: u32 = 0x00ff_ffff;

/// FEC头解析错误
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HeaderError {
    #[error("FEC包过短: {length}字节，至少需要{needed}字节")]
    Truncated { length: usize, needed: usize },

    #[error("length recovery为0")]
    EmptySymbol,

    #[error("修复符号长度{actual}字节与length recovery {declared}字节不符")]
    SymbolLengthMismatch { declared: usize, actual: usize },
}

/// FEC头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FecHeader {
    /// 受保护块的第一个序列号
    pub sn_base: u16,
    /// 受保护媒体包的最大长度，即修复符号长度
    pub length_recovery: u16,
    /// 受保护媒体包的负载类型（低7位）
    pub pt_recovery: u8,
    /// 受保护位置的位图（24位）
    pub mask: u32,
    /// 受保护块的时间戳
    pub ts_recovery: u32,
    /// 修复符号在块内的索引
    pub fec_index: u8,
}

impl FecHeader {
    /// 写入13字节FEC头
    pub fn write_to(&self, buf: &mut [u8; FEC_HEADER_LEN]) {
        buf[0..2].copy_from_slice(&self.sn_base.to_be_bytes());
        buf[2..4].copy_from_slice(&self.length_recovery.to_be_bytes());
        buf[4] = self.pt_recovery & 0x7f;
        buf[5..8].copy_from_slice(&(self.mask & MASK_BITS).to_be_bytes()[1..]);
        buf[8..12].copy_from_slice(&self.ts_recovery.to_be_bytes());
        buf[12] = self.fec_index;
    }

    pub fn to_bytes(&self) -> [u8; FEC_HEADER_LEN] {
        let mut buf = [0u8; FEC_HEADER_LEN];
        self.write_to(&mut buf);
        buf
    }

    /// 从字节解析FEC头（不含修复符号）
    pub fn parse(buf: &[u8]) -> Result<Self, HeaderError> {
        if buf.len() < FEC_HEADER_LEN {
            return Err(HeaderError::Truncated {
                length: buf.len(),
                needed: FEC_HEADER_LEN,
            });
        }

        Ok(Self {
            sn_base: u16::from_be_bytes([buf[0], buf[1]]),
            length_recovery: u16::from_be_bytes([buf[2], buf[3]]),
            pt_recovery: buf[4] & 0x7f,
            mask: u32::from_be_bytes([0, buf[5], buf[6], buf[7]]),
            ts_recovery: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
            fec_index: buf[12],
        })
    }

    /// 块内 `num_media_packets` 个位置全部受保护时的mask
    pub fn full_mask(num_media_packets: usize) -> u32 {
        ((1u64 << num_media_packets) - 1) as u32 & MASK_BITS
    }
}

/// 已解析的FEC包：原始RTP包 + FEC头 + 修复符号位置
#[derive(Debug, Clone)]
pub struct RepairPacket {
    packet: RtpPacket,
    header: FecHeader,
    symbol_offset: usize,
}

impl RepairPacket {
    /// 解析FEC包，校验修复符号长度与length recovery一致
    pub fn parse(packet: &RtpPacket) -> Result<Self, HeaderError> {
        let offset = packet.header_len();
        let body = &packet.as_bytes()[offset..];
        if body.len() < FEC_HEADER_LEN {
            return Err(HeaderError::Truncated {
                length: packet.len(),
                needed: offset + FEC_HEADER_LEN,
            });
        }

        let header = FecHeader::parse(body)?;
        let declared = header.length_recovery as usize;
        if declared == 0 {
            return Err(HeaderError::EmptySymbol);
        }

        let actual = body.len() - FEC_HEADER_LEN;
        if actual != declared {
            return Err(HeaderError::SymbolLengthMismatch { declared, actual });
        }

        Ok(Self {
            packet: packet.clone(),
            header,
            symbol_offset: offset + FEC_HEADER_LEN,
        })
    }

    pub fn header(&self) -> &FecHeader {
        &self.header
    }

    pub fn sequence_number(&self) -> u16 {
        self.packet.sequence_number()
    }

    pub fn symbol(&self) -> &[u8] {
        &self.packet.as_bytes()[self.symbol_offset..]
    }

    pub fn packet(&self) -> &RtpPacket {
        &self.packet
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{write_rtp_header, RtpHeaderFields, RTP_HEADER_LEN};

    fn sample_header() -> FecHeader {
        FecHeader {
            sn_base: 0xfffe,
            length_recovery: 172,
            pt_recovery: 96,
            mask: FecHeader::full_mask(9),
            ts_recovery: 0xdead_beef,
            fec_index: 2,
        }
    }

    #[test]
    fn test_wire_layout() {
        let bytes = sample_header().to_bytes();
        assert_eq!(
            bytes,
            [0xff, 0xfe, 0x00, 0xac, 0x60, 0x00, 0x01, 0xff, 0xde, 0xad, 0xbe, 0xef, 0x02]
        );
        assert_eq!(FecHeader::parse(&bytes).unwrap(), sample_header());
    }

    #[test]
    fn test_write_masks_reserved_bits() {
        let mut header = sample_header();
        header.pt_recovery = 0xff;
        header.mask = 0xff00_0001;

        let parsed = FecHeader::parse(&header.to_bytes()).unwrap();
        assert_eq!(parsed.pt_recovery, 0x7f);
        assert_eq!(parsed.mask, 1);
    }

    #[test]
    fn test_full_mask() {
        assert_eq!(FecHeader::full_mask(1), 0b1);
        assert_eq!(FecHeader::full_mask(9), 0x1ff);
        assert_eq!(FecHeader::full_mask(24), 0x00ff_ffff);
    }

    #[test]
    fn test_truncated() {
        assert_eq!(
            FecHeader::parse(&[0u8; 12]),
            Err(HeaderError::Truncated {
                length: 12,
                needed: 13
            })
        );
    }

    fn repair_packet_bytes(header: &FecHeader, symbol_len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; RTP_HEADER_LEN + FEC_HEADER_LEN + symbol_len];
        let fields = RtpHeaderFields {
            payload_type: 99,
            sequence_number: 7,
            timestamp: header.ts_recovery,
            ssrc: 1,
            marker: false,
        };
        write_rtp_header(&mut buf, &fields).unwrap();
        buf[RTP_HEADER_LEN..RTP_HEADER_LEN + FEC_HEADER_LEN].copy_from_slice(&header.to_bytes());
        buf
    }

    #[test]
    fn test_parse_repair_packet() {
        let header = FecHeader {
            length_recovery: 5,
            ..sample_header()
        };
        let mut bytes = repair_packet_bytes(&header, 5);
        bytes[RTP_HEADER_LEN + FEC_HEADER_LEN..].copy_from_slice(b"hello");

        let packet = RtpPacket::from_bytes(bytes).unwrap();
        let repair = RepairPacket::parse(&packet).unwrap();
        assert_eq!(repair.header(), &header);
        assert_eq!(repair.symbol(), b"hello");
        assert_eq!(repair.sequence_number(), 7);
    }

    #[test]
    fn test_reject_inconsistent_symbol_length() {
        let header = FecHeader {
            length_recovery: 8,
            ..sample_header()
        };
        let packet = RtpPacket::from_bytes(repair_packet_bytes(&header, 5)).unwrap();
        assert_eq!(
            RepairPacket::parse(&packet).unwrap_err(),
            HeaderError::SymbolLengthMismatch {
                declared: 8,
                actual: 5
            }
        );

        let header = FecHeader {
            length_recovery: 0,
            ..sample_header()
        };
        let packet = RtpPacket::from_bytes(repair_packet_bytes(&header, 0)).unwrap();
        assert_eq!(RepairPacket::parse(&packet).unwrap_err(), HeaderError::EmptySymbol);
    }
}
