use crate::config::{validate_block, validate_payload_type, FecConfig};
use crate::error::FecError;
use crate::fec::codec::{CodecParams, ErasureCodec, ReedSolomonCodec};
use crate::fec::header::{FecHeader, FEC_HEADER_LEN};
use crate::packet::{
    write_rtp_header, BufferFactory, HeapBufferFactory, RtpHeaderFields, RtpPacket, RTP_HEADER_LEN,
};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, trace};

/// 推入媒体包的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderPush {
    /// 上一块的FEC包还未取走，本包被拒绝
    Busy,
    /// 已缓存，块尚未填满
    Buffered { filled: usize, capacity: usize },
    /// 块已填满并生成了FEC包
    BlockEncoded { fec_packets: usize },
}

/// 编码器统计信息
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EncoderStats {
    pub blocks_encoded: usize,
    pub fec_packets_produced: usize,
    pub media_packets_rejected: usize,
}

/// FEC编码器：每收集N个媒体包，生成K个FEC包
pub struct FecEncoder {
    codec: Arc<dyn ErasureCodec>,
    factory: Arc<dyn BufferFactory>,

    num_media_packets: usize,
    num_fec_packets: usize,
    payload_type: u8,
    /// 当前块锁定的负载类型（块的第一个包到达时确定）
    block_payload_type: u8,
    next_seqnum: u16,

    /// 当前块的媒体包
    media_packets: Vec<RtpPacket>,
    max_packet_size: usize,

    /// 等待取走的FEC包
    fec_packets: VecDeque<RtpPacket>,

    stats: EncoderStats,
}

impl FecEncoder {
    /// 创建新的FEC编码器（默认Reed-Solomon引擎和堆缓冲区）
    pub fn new(config: &FecConfig) -> Result<Self, FecError> {
        Self::with_collaborators(
            config,
            Arc::new(ReedSolomonCodec),
            Arc::new(HeapBufferFactory::default()),
        )
    }

    /// 使用指定的纠删码引擎和缓冲区工厂创建编码器
    pub fn with_collaborators(
        config: &FecConfig,
        codec: Arc<dyn ErasureCodec>,
        factory: Arc<dyn BufferFactory>,
    ) -> Result<Self, FecError> {
        config.validate()?;
        let seqnum_offset = config.resolve_seqnum_offset()?;

        debug!(
            "创建FEC编码器: N={}, K={}, PT={}, 序列号起始{}",
            config.num_media_packets, config.num_fec_packets, config.payload_type, seqnum_offset
        );

        Ok(Self {
            codec,
            factory,
            num_media_packets: config.num_media_packets,
            num_fec_packets: config.num_fec_packets,
            payload_type: config.payload_type,
            block_payload_type: config.payload_type,
            next_seqnum: seqnum_offset,
            media_packets: Vec::with_capacity(config.num_media_packets),
            max_packet_size: 0,
            fec_packets: VecDeque::with_capacity(config.num_fec_packets),
            stats: EncoderStats::default(),
        })
    }

    /// 推入一个媒体包
    ///
    /// 上一块的FEC包未取完时返回 [`EncoderPush::Busy`]，调用方应先 `pop_fec_packet`。
    pub fn push_media_packet(&mut self, packet: &RtpPacket) -> Result<EncoderPush, FecError> {
        if self.has_fec_packets() {
            debug!("FEC队列中仍有{}个包，拒绝媒体包 {}", self.fec_packets.len(), packet.sequence_number());
            self.stats.media_packets_rejected += 1;
            return Ok(EncoderPush::Busy);
        }

        if packet.len() > u16::MAX as usize {
            return Err(FecError::PacketTooLarge {
                length: packet.len(),
                max: u16::MAX as usize,
            });
        }

        if self.media_packets.is_empty() {
            self.block_payload_type = self.payload_type;
        }

        self.media_packets.push(packet.clone());
        self.max_packet_size = self.max_packet_size.max(packet.len());
        debug!(
            "媒体包 {} 入队，当前块 {}/{}",
            packet.sequence_number(),
            self.media_packets.len(),
            self.num_media_packets
        );

        if !self.is_media_packet_list_full() {
            return Ok(EncoderPush::Buffered {
                filled: self.media_packets.len(),
                capacity: self.num_media_packets,
            });
        }

        let result = self.encode_block();
        self.clear_block();
        result?;

        Ok(EncoderPush::BlockEncoded {
            fec_packets: self.fec_packets.len(),
        })
    }

    /// 按生成顺序取出FEC包
    pub fn pop_fec_packet(&mut self) -> Option<RtpPacket> {
        self.fec_packets.pop_front()
    }

    pub fn peek_fec_packet(&self) -> Option<&RtpPacket> {
        self.fec_packets.front()
    }

    pub fn has_fec_packets(&self) -> bool {
        !self.fec_packets.is_empty()
    }

    pub fn is_media_packet_list_full(&self) -> bool {
        self.media_packets.len() >= self.num_media_packets
    }

    /// 当前块已缓存的媒体包数
    pub fn buffered_media_packets(&self) -> usize {
        self.media_packets.len()
    }

    pub fn num_media_packets(&self) -> usize {
        self.num_media_packets
    }

    /// 修改N会丢弃当前块和未取走的FEC包
    pub fn set_num_media_packets(&mut self, num_media_packets: usize) -> Result<(), FecError> {
        validate_block(num_media_packets, self.num_fec_packets)?;
        self.reset();
        self.num_media_packets = num_media_packets;
        Ok(())
    }

    pub fn num_fec_packets(&self) -> usize {
        self.num_fec_packets
    }

    /// 修改K会丢弃当前块和未取走的FEC包
    pub fn set_num_fec_packets(&mut self, num_fec_packets: usize) -> Result<(), FecError> {
        validate_block(self.num_media_packets, num_fec_packets)?;
        self.reset();
        self.num_fec_packets = num_fec_packets;
        Ok(())
    }

    pub fn payload_type(&self) -> u8 {
        self.payload_type
    }

    /// 新的负载类型从下一块开始生效
    pub fn set_payload_type(&mut self, payload_type: u8) -> Result<(), FecError> {
        validate_payload_type(payload_type)?;
        self.payload_type = payload_type;
        Ok(())
    }

    pub fn stats(&self) -> &EncoderStats {
        &self.stats
    }

    /// 丢弃当前块和所有未取走的FEC包
    pub fn reset(&mut self) {
        self.clear_block();
        self.fec_packets.clear();
    }

    fn clear_block(&mut self) {
        self.media_packets.clear();
        self.max_packet_size = 0;
    }

    /// 对当前块做RS编码，生成K个FEC包
    fn encode_block(&mut self) -> Result<(), FecError> {
        debug_assert_eq!(self.media_packets.len(), self.num_media_packets);

        let Some(first) = self.media_packets.first() else {
            return Ok(());
        };

        let symbol_len = self.max_packet_size;
        let mask = FecHeader::full_mask(self.num_media_packets);
        let ssrc = first.ssrc();
        let timestamp = first.timestamp();
        let sn_base = first.sequence_number();
        let pt_recovery = first.payload_type();

        debug!(
            "FEC块: SSRC {}, 时间戳 {}, snbase {}, 符号长度 {}",
            ssrc, timestamp, sn_base, symbol_len
        );

        // RTP头 + FEC头之后是修复符号
        let symbol_offset = RTP_HEADER_LEN + FEC_HEADER_LEN;
        let mut buffers = Vec::with_capacity(self.num_fec_packets);
        let mut seqnum = self.next_seqnum;

        for fec_index in 0..self.num_fec_packets {
            let mut buf = self.factory.allocate(symbol_offset + symbol_len)?;

            let fields = RtpHeaderFields {
                payload_type: self.block_payload_type,
                sequence_number: seqnum,
                timestamp,
                ssrc,
                marker: false,
            };
            write_rtp_header(&mut buf, &fields)?;
            seqnum = seqnum.wrapping_add(1);

            let header = FecHeader {
                sn_base,
                length_recovery: symbol_len as u16,
                pt_recovery,
                mask,
                ts_recovery: timestamp,
                fec_index: fec_index as u8,
            };
            let mut header_bytes = [0u8; FEC_HEADER_LEN];
            header.write_to(&mut header_bytes);
            buf[RTP_HEADER_LEN..symbol_offset].copy_from_slice(&header_bytes);
            trace!("FEC头 #{}: {}", fec_index, hex::encode(header_bytes));

            buffers.push(buf);
        }

        {
            let sources: Vec<&[u8]> = self.media_packets.iter().map(|p| p.as_bytes()).collect();
            let mut repair: Vec<&mut [u8]> = buffers
                .iter_mut()
                .map(|buf| &mut buf[symbol_offset..])
                .collect();

            let params = CodecParams {
                source_symbols: self.num_media_packets,
                repair_symbols: self.num_fec_packets,
                symbol_len,
            };
            self.codec.encode(&params, &sources, &mut repair)?;
        }

        for buf in buffers {
            self.fec_packets.push_back(RtpPacket::from_bytes(buf)?);
        }
        self.next_seqnum = seqnum;

        self.stats.blocks_encoded += 1;
        self.stats.fec_packets_produced += self.num_fec_packets;

        info!(
            "FEC块 snbase {}: {}个媒体包 -> {}个FEC包 (符号长度{}字节)",
            sn_base, self.num_media_packets, self.num_fec_packets, symbol_len
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fec::header::RepairPacket;
    use crate::packet::tests::media_packet;

    fn encoder(n: usize, k: usize) -> FecEncoder {
        let config = FecConfig::default()
            .with_block(n, k)
            .with_seqnum_offset(500);
        FecEncoder::new(&config).unwrap()
    }

    #[test]
    fn test_fec_encoder_basic() {
        let mut encoder = encoder(4, 2);

        for seq in 100..103 {
            let result = encoder.push_media_packet(&media_packet(seq, 40)).unwrap();
            assert!(matches!(result, EncoderPush::Buffered { capacity: 4, .. }));
        }
        assert!(!encoder.has_fec_packets());

        let result = encoder.push_media_packet(&media_packet(103, 40)).unwrap();
        assert_eq!(result, EncoderPush::BlockEncoded { fec_packets: 2 });
        assert_eq!(encoder.buffered_media_packets(), 0);

        for expected_index in 0..2u8 {
            let packet = encoder.pop_fec_packet().unwrap();
            let repair = RepairPacket::parse(&packet).unwrap();
            let header = repair.header();

            assert_eq!(packet.sequence_number(), 500 + expected_index as u16);
            assert_eq!(packet.payload_type(), 99);
            assert_eq!(packet.ssrc(), 0x1234_5678);
            assert_eq!(packet.timestamp(), media_packet(100, 0).timestamp());
            assert_eq!(header.sn_base, 100);
            assert_eq!(header.fec_index, expected_index);
            assert_eq!(header.mask, 0b1111);
            assert_eq!(header.pt_recovery, 96);
            assert_eq!(header.length_recovery as usize, RTP_HEADER_LEN + 40);
            assert_eq!(repair.symbol().len(), RTP_HEADER_LEN + 40);
        }
        assert!(encoder.pop_fec_packet().is_none());
    }

    #[test]
    fn test_busy_until_drained() {
        let mut encoder = encoder(2, 1);
        encoder.push_media_packet(&media_packet(1, 10)).unwrap();
        encoder.push_media_packet(&media_packet(2, 10)).unwrap();
        assert!(encoder.has_fec_packets());

        let result = encoder.push_media_packet(&media_packet(3, 10)).unwrap();
        assert_eq!(result, EncoderPush::Busy);
        assert_eq!(encoder.buffered_media_packets(), 0);
        assert_eq!(encoder.stats().media_packets_rejected, 1);

        encoder.pop_fec_packet().unwrap();
        let result = encoder.push_media_packet(&media_packet(3, 10)).unwrap();
        assert_eq!(result, EncoderPush::Buffered { filled: 1, capacity: 2 });
    }

    #[test]
    fn test_mixed_sizes_padded_to_max() {
        let mut encoder = encoder(3, 1);
        encoder.push_media_packet(&media_packet(1, 10)).unwrap();
        encoder.push_media_packet(&media_packet(2, 50)).unwrap();
        encoder.push_media_packet(&media_packet(3, 20)).unwrap();

        let packet = encoder.pop_fec_packet().unwrap();
        let repair = RepairPacket::parse(&packet).unwrap();
        assert_eq!(repair.header().length_recovery as usize, RTP_HEADER_LEN + 50);
    }

    #[test]
    fn test_seqnum_continues_across_blocks_and_wraps() {
        let config = FecConfig::default().with_block(1, 2).with_seqnum_offset(65535);
        let mut encoder = FecEncoder::new(&config).unwrap();

        encoder.push_media_packet(&media_packet(10, 4)).unwrap();
        let seqs: Vec<u16> = std::iter::from_fn(|| encoder.pop_fec_packet())
            .map(|p| p.sequence_number())
            .collect();
        assert_eq!(seqs, vec![65535, 0]);

        encoder.push_media_packet(&media_packet(11, 4)).unwrap();
        assert_eq!(encoder.pop_fec_packet().unwrap().sequence_number(), 1);
    }

    #[test]
    fn test_setters_reset_block() {
        let mut encoder = encoder(4, 2);
        encoder.push_media_packet(&media_packet(1, 10)).unwrap();
        encoder.push_media_packet(&media_packet(2, 10)).unwrap();

        encoder.set_num_media_packets(3).unwrap();
        assert_eq!(encoder.buffered_media_packets(), 0);
        assert_eq!(encoder.num_media_packets(), 3);

        encoder.push_media_packet(&media_packet(5, 10)).unwrap();
        encoder.set_num_fec_packets(1).unwrap();
        assert_eq!(encoder.buffered_media_packets(), 0);

        assert!(encoder.set_num_media_packets(0).is_err());
        assert!(encoder.set_num_fec_packets(0).is_err());
        assert_eq!(encoder.num_media_packets(), 3);
        assert_eq!(encoder.num_fec_packets(), 1);
    }

    #[test]
    fn test_payload_type_latched_per_block() {
        let mut encoder = encoder(2, 1);
        encoder.push_media_packet(&media_packet(1, 10)).unwrap();
        encoder.set_payload_type(100).unwrap();
        encoder.push_media_packet(&media_packet(2, 10)).unwrap();
        assert_eq!(encoder.pop_fec_packet().unwrap().payload_type(), 99);

        encoder.push_media_packet(&media_packet(3, 10)).unwrap();
        encoder.push_media_packet(&media_packet(4, 10)).unwrap();
        assert_eq!(encoder.pop_fec_packet().unwrap().payload_type(), 100);

        assert!(encoder.set_payload_type(200).is_err());
    }

    #[test]
    fn test_releases_media_references() {
        let mut encoder = encoder(2, 1);
        let first = media_packet(1, 10);
        encoder.push_media_packet(&first).unwrap();
        assert_eq!(first.ref_count(), 2);

        encoder.push_media_packet(&media_packet(2, 10)).unwrap();
        assert_eq!(first.ref_count(), 1);
    }

    #[test]
    fn test_allocation_failure_drops_block() {
        let config = FecConfig::default().with_block(2, 1).with_seqnum_offset(0);
        let mut encoder = FecEncoder::with_collaborators(
            &config,
            Arc::new(ReedSolomonCodec),
            Arc::new(HeapBufferFactory::new(16)),
        )
        .unwrap();

        encoder.push_media_packet(&media_packet(1, 10)).unwrap();
        let err = encoder.push_media_packet(&media_packet(2, 10)).unwrap_err();
        assert!(matches!(err, FecError::Allocation { .. }));
        assert_eq!(encoder.buffered_media_packets(), 0);
        assert!(!encoder.has_fec_packets());
    }
}
