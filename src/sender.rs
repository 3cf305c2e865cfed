//! 发送端：媒体包原样转发，同时把编码器生成的FEC包交给FEC流

use crate::caps::StreamCaps;
use crate::config::FecConfig;
use crate::error::FecError;
use crate::fec::{EncoderPush, FecEncoder};
use crate::packet::RtpPacket;
use tracing::{debug, warn};

/// 一次 `handle_media_packet` 的输出
#[derive(Debug, Clone)]
pub struct SenderOutput {
    /// 原样转发的媒体包
    pub media: RtpPacket,
    /// 本次生成的FEC包（块未填满时为空）
    pub repair: Vec<RtpPacket>,
}

/// FEC发送端（单生产者，不加锁）
pub struct FecSender {
    encoder: FecEncoder,
    repair_caps: Option<StreamCaps>,
}

impl FecSender {
    pub fn new(config: &FecConfig) -> Result<Self, FecError> {
        Ok(Self::from_encoder(FecEncoder::new(config)?))
    }

    pub fn from_encoder(encoder: FecEncoder) -> Self {
        Self {
            encoder,
            repair_caps: None,
        }
    }

    /// 处理一个媒体包：推入编码器，取走所有FEC包，再转发媒体包
    pub fn handle_media_packet(&mut self, packet: RtpPacket) -> Result<SenderOutput, FecError> {
        debug!("收到媒体包 {}", packet.sequence_number());

        if self.encoder.push_media_packet(&packet)? == EncoderPush::Busy {
            // 每次都会取空FEC队列，只有调用方直接操作编码器时才会走到这里
            warn!("编码器忙，媒体包 {} 不受保护", packet.sequence_number());
        }

        let mut repair = Vec::new();
        while let Some(fec_packet) = self.encoder.pop_fec_packet() {
            debug!("发送FEC包 {}", fec_packet.sequence_number());
            repair.push(fec_packet);
        }

        Ok(SenderOutput {
            media: packet,
            repair,
        })
    }

    /// 媒体流描述变化时调用，返回FEC流描述
    pub fn set_media_caps(&mut self, media_caps: &StreamCaps) -> Result<StreamCaps, FecError> {
        let caps = self.repair_caps(media_caps)?;
        debug!("FEC流描述: {}", caps);
        self.repair_caps = Some(caps.clone());
        Ok(caps)
    }

    /// 由媒体流描述计算FEC流描述（使用当前配置的负载类型）
    pub fn repair_caps(&self, media_caps: &StreamCaps) -> Result<StreamCaps, FecError> {
        media_caps.repair_stream(self.encoder.payload_type())
    }

    pub fn current_repair_caps(&self) -> Option<&StreamCaps> {
        self.repair_caps.as_ref()
    }

    pub fn encoder(&self) -> &FecEncoder {
        &self.encoder
    }

    pub fn encoder_mut(&mut self) -> &mut FecEncoder {
        &mut self.encoder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fec::RepairPacket;
    use crate::packet::tests::media_packet;

    #[test]
    fn test_sender_emits_repair_after_block() {
        let config = FecConfig::default().with_block(3, 2).with_seqnum_offset(10);
        let mut sender = FecSender::new(&config).unwrap();

        for seq in 0..2u16 {
            let output = sender.handle_media_packet(media_packet(seq, 40)).unwrap();
            assert_eq!(output.media.sequence_number(), seq);
            assert!(output.repair.is_empty());
        }

        let output = sender.handle_media_packet(media_packet(2, 40)).unwrap();
        assert_eq!(output.repair.len(), 2);
        let seqs: Vec<u16> = output.repair.iter().map(|p| p.sequence_number()).collect();
        assert_eq!(seqs, vec![10, 11]);

        let header = *RepairPacket::parse(&output.repair[1]).unwrap().header();
        assert_eq!(header.sn_base, 0);
        assert_eq!(header.fec_index, 1);
        assert!(!sender.encoder().has_fec_packets());
    }

    #[test]
    fn test_sender_repair_caps_use_payload_type() {
        let config = FecConfig::default().with_payload_type(110);
        let mut sender = FecSender::new(&config).unwrap();

        let caps = sender.set_media_caps(&StreamCaps::new("video", 90000)).unwrap();
        assert_eq!(caps.payload_type, Some(110));
        assert_eq!(sender.current_repair_caps(), Some(&caps));

        sender.encoder_mut().set_payload_type(100).unwrap();
        let caps = sender.repair_caps(&StreamCaps::new("video", 90000)).unwrap();
        assert_eq!(caps.payload_type, Some(100));

        assert!(sender.set_media_caps(&StreamCaps::default()).is_err());
    }
}
