//! 接收端：媒体流和FEC流由不同的线程推入，共享同一个解码器
//!
//! 每个调用在整个推入和恢复过程中持有同一把互斥锁。

use crate::error::FecError;
use crate::fec::{DecoderStats, FecDecoder, WindowEvent};
use crate::packet::RtpPacket;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// FEC接收端（可克隆，每个生产者持有一份）
#[derive(Clone)]
pub struct FecReceiver {
    inner: Arc<Mutex<FecDecoder>>,
}

impl FecReceiver {
    pub fn new(num_media_packets: usize, num_fec_packets: usize) -> Result<Self, FecError> {
        Ok(Self::from_decoder(FecDecoder::new(
            num_media_packets,
            num_fec_packets,
        )?))
    }

    pub fn from_decoder(decoder: FecDecoder) -> Self {
        Self {
            inner: Arc::new(Mutex::new(decoder)),
        }
    }

    /// 处理媒体包：返回原媒体包，后面跟着本次恢复出的包
    ///
    /// 媒体包即使被解码器丢弃（重复、窗口外）也会原样返回。
    pub fn handle_media_packet(&self, packet: RtpPacket) -> Result<Vec<RtpPacket>, FecError> {
        let mut decoder = self.lock();
        let event = decoder.push_media_packet(&packet)?;
        debug!("媒体包 {}: {:?}", packet.sequence_number(), event);

        let mut output = vec![packet];
        Self::drain_recovered(&mut decoder, &mut output);
        Ok(output)
    }

    /// 处理FEC包：返回本次恢复出的包
    pub fn handle_fec_packet(&self, packet: &RtpPacket) -> Result<Vec<RtpPacket>, FecError> {
        let mut decoder = self.lock();
        let event = decoder.push_fec_packet(packet)?;
        debug!("FEC包 {}: {:?}", packet.sequence_number(), event);

        let mut output = Vec::new();
        if !matches!(event, WindowEvent::Dropped(_)) {
            Self::drain_recovered(&mut decoder, &mut output);
        }
        Ok(output)
    }

    pub fn reset(&self) {
        self.lock().reset();
    }

    pub fn stats(&self) -> DecoderStats {
        self.lock().stats().clone()
    }

    /// 在锁内对解码器执行操作（修改参数、查询状态）
    pub fn with_decoder<R>(&self, f: impl FnOnce(&mut FecDecoder) -> R) -> R {
        f(&mut self.lock())
    }

    fn drain_recovered(decoder: &mut FecDecoder, output: &mut Vec<RtpPacket>) {
        while let Some(recovered) = decoder.pop_recovered_packet() {
            debug!("输出恢复的媒体包 {}", recovered.sequence_number());
            output.push(recovered);
        }
    }

    // 持锁线程panic后解码器状态仍然一致，继续使用
    fn lock(&self) -> MutexGuard<'_, FecDecoder> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
