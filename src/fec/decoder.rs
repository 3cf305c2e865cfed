//! FEC接收端解码器
//!
//! 解码器维护一个序列号窗口 `[snbase, snbase+N)`：
//! - 未绑定：还没有FEC包确定窗口，媒体包直接缓存（最多N个）；
//! - 已打开：FEC包确定了snbase，媒体包和FEC包在窗口内累积；
//! - 已解决：媒体包全部到齐或已尝试恢复，窗口清空，snbase进入黑名单，回到未绑定。
//!
//! 恢复出的媒体包进入独立的FIFO队列，窗口清理不会清空它，只有调用方的 pop/flush 会。

use crate::config::validate_block;
use crate::error::FecError;
use crate::fec::codec::{CodecParams, DecodeStatus, ErasureCodec, RecoverySink, ReedSolomonCodec};
use crate::fec::header::{FecHeader, RepairPacket};
use crate::fec::seqnum::{window_position, WindowPosition};
use crate::packet::{BufferFactory, HeapBufferFactory, RtpPacket};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

// ============ 数据结构定义 ============

/// 包被丢弃的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// 相同序列号的包已在缓存中
    Duplicate,
    /// 媒体包落在当前窗口之前
    OutsideWindow,
    /// FEC包属于已经解决的窗口
    StaleWindow,
    /// FEC包格式错误或与窗口参数不一致
    Malformed,
}

/// 推入一个包之后窗口的变化
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowEvent {
    /// 已缓存，窗口仍在等待更多的包
    Buffered,
    /// 包被丢弃，状态未改变
    Dropped(DropReason),
    /// 媒体包全部到齐，无需恢复
    Completed,
    /// 恢复成功
    Recovered { packets: usize },
    /// 独立符号不足，只恢复了一部分
    PartiallyRecovered { packets: usize, missing: usize },
    /// 窗口内的媒体包与FEC头不一致，放弃恢复
    Abandoned,
}

/// 统计信息
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DecoderStats {
    pub media_packets_received: usize,
    pub fec_packets_received: usize,
    pub duplicate_packets: usize,
    pub out_of_window_packets: usize,
    pub malformed_packets: usize,
    pub stale_fec_packets: usize,
    pub media_packets_evicted: usize,
    pub windows_completed: usize,
    pub windows_superseded: usize,
    pub windows_abandoned: usize,
    pub successful_recoveries: usize,
    pub partial_recoveries: usize,
    pub packets_recovered: usize,
}

/// 已打开的窗口（参数来自打开它的FEC包）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OpenWindow {
    snbase: u16,
    symbol_len: usize,
    protected_mask: u32,
}

/// 恢复回调的上下文：引擎每重建一个源符号，就从缓冲区工厂申请一块存储
struct RecoveryContext<'a> {
    factory: &'a dyn BufferFactory,
    buffers: Vec<(usize, Vec<u8>)>,
}

impl RecoverySink for RecoveryContext<'_> {
    fn symbol_buffer(&mut self, esi: usize, len: usize) -> Result<&mut [u8], FecError> {
        let buf = self.factory.allocate(len)?;
        self.buffers.push((esi, buf));
        let last = self.buffers.len() - 1;
        Ok(self.buffers[last].1.as_mut_slice())
    }
}

/// FEC解码器
pub struct FecDecoder {
    codec: Arc<dyn ErasureCodec>,
    factory: Arc<dyn BufferFactory>,

    num_media_packets: usize,
    num_fec_packets: usize,

    /// 当前窗口，`None` 表示未绑定
    window: Option<OpenWindow>,
    /// 最近一次解决的窗口
    blacklisted_snbase: Option<u16>,

    /// 按到达顺序缓存的媒体包
    media_packets: VecDeque<RtpPacket>,
    media_packet_set: HashSet<u16>,

    /// 当前窗口的FEC包
    fec_packets: Vec<RepairPacket>,
    fec_packet_set: HashSet<u16>,

    received_media_packet_mask: u32,
    max_packet_size: usize,

    /// 等待调用方取走的恢复包
    recovered_packets: VecDeque<RtpPacket>,

    stats: DecoderStats,
}

// ============ FecDecoder 实现 ============

impl FecDecoder {
    /// 创建新的FEC解码器（默认Reed-Solomon引擎和堆缓冲区）
    pub fn new(num_media_packets: usize, num_fec_packets: usize) -> Result<Self, FecError> {
        Self::with_collaborators(
            num_media_packets,
            num_fec_packets,
            Arc::new(ReedSolomonCodec),
            Arc::new(HeapBufferFactory::default()),
        )
    }

    /// 使用指定的纠删码引擎和缓冲区工厂创建解码器
    pub fn with_collaborators(
        num_media_packets: usize,
        num_fec_packets: usize,
        codec: Arc<dyn ErasureCodec>,
        factory: Arc<dyn BufferFactory>,
    ) -> Result<Self, FecError> {
        validate_block(num_media_packets, num_fec_packets)?;

        Ok(Self {
            codec,
            factory,
            num_media_packets,
            num_fec_packets,
            window: None,
            blacklisted_snbase: None,
            media_packets: VecDeque::with_capacity(num_media_packets + 1),
            media_packet_set: HashSet::new(),
            fec_packets: Vec::with_capacity(num_fec_packets),
            fec_packet_set: HashSet::new(),
            received_media_packet_mask: 0,
            max_packet_size: 0,
            recovered_packets: VecDeque::new(),
            stats: DecoderStats::default(),
        })
    }

    /// 推入一个媒体包
    pub fn push_media_packet(&mut self, packet: &RtpPacket) -> Result<WindowEvent, FecError> {
        let seqnum = packet.sequence_number();
        self.stats.media_packets_received += 1;

        if self.media_packet_set.contains(&seqnum) {
            debug!("媒体包 {} 已在队列中，丢弃重复包", seqnum);
            self.stats.duplicate_packets += 1;
            return Ok(WindowEvent::Dropped(DropReason::Duplicate));
        }

        let event = match self.window {
            None => {
                debug!("媒体包 {} 入队，尚无snbase", seqnum);
                self.buffer_media_packet(packet);
                WindowEvent::Buffered
            }
            Some(window) => {
                match window_position(seqnum, window.snbase, self.num_media_packets) {
                    WindowPosition::Inside(position) => {
                        debug!("媒体包 {} 入队，窗口位置 {}，snbase {}", seqnum, position, window.snbase);
                        self.buffer_media_packet(packet);
                        self.received_media_packet_mask |= 1 << position;
                        self.max_packet_size = self.max_packet_size.max(packet.len());
                        self.check_window()?
                    }
                    WindowPosition::Ahead => {
                        debug!(
                            "媒体包 {} 超出窗口 [{}, +{})，清除{}个FEC包并解除snbase",
                            seqnum,
                            window.snbase,
                            self.num_media_packets,
                            self.fec_packets.len()
                        );
                        self.supersede_window(window.snbase);
                        self.buffer_media_packet(packet);
                        WindowEvent::Buffered
                    }
                    WindowPosition::Behind => {
                        debug!(
                            "媒体包 {} 落在窗口 [{}, +{}) 之前，丢弃",
                            seqnum, window.snbase, self.num_media_packets
                        );
                        self.stats.out_of_window_packets += 1;
                        return Ok(WindowEvent::Dropped(DropReason::OutsideWindow));
                    }
                }
            }
        };

        self.evict_excess_media_packets();
        Ok(event)
    }

    /// 推入一个FEC包
    pub fn push_fec_packet(&mut self, packet: &RtpPacket) -> Result<WindowEvent, FecError> {
        self.stats.fec_packets_received += 1;

        let repair = match RepairPacket::parse(packet) {
            Ok(repair) => repair,
            Err(e) => {
                debug!("FEC包 {} 格式错误: {}", packet.sequence_number(), e);
                return Ok(self.reject_malformed());
            }
        };

        let header = *repair.header();
        let seqnum = repair.sequence_number();
        trace!("FEC包 {} 头: {}", seqnum, hex::encode(header.to_bytes()));
        debug!(
            "收到FEC包 {}，snbase {}，索引 {}",
            seqnum, header.sn_base, header.fec_index
        );

        if header.fec_index as usize >= self.num_fec_packets {
            debug!("FEC索引 {} 超出K={}", header.fec_index, self.num_fec_packets);
            return Ok(self.reject_malformed());
        }

        let full_mask = FecHeader::full_mask(self.num_media_packets);
        if header.mask == 0 || header.mask & !full_mask != 0 {
            debug!("FEC mask {:#08x} 与N={}不符", header.mask, self.num_media_packets);
            return Ok(self.reject_malformed());
        }

        if self.blacklisted_snbase == Some(header.sn_base) {
            debug!("snbase {} 的数据已经处理过，忽略FEC包", header.sn_base);
            self.stats.stale_fec_packets += 1;
            return Ok(WindowEvent::Dropped(DropReason::StaleWindow));
        }

        if self.fec_packet_set.contains(&seqnum) {
            debug!("FEC包 {} 已在队列中，丢弃重复包", seqnum);
            self.stats.duplicate_packets += 1;
            return Ok(WindowEvent::Dropped(DropReason::Duplicate));
        }

        match self.window {
            Some(window) if window.snbase == header.sn_base => {
                if window.symbol_len != header.length_recovery as usize
                    || window.protected_mask != header.mask
                {
                    debug!("FEC包 {} 的参数与窗口 {} 不一致", seqnum, window.snbase);
                    return Ok(self.reject_malformed());
                }
                if self
                    .fec_packets
                    .iter()
                    .any(|r| r.header().fec_index == header.fec_index)
                {
                    debug!("窗口 {} 已有FEC索引 {}，丢弃", window.snbase, header.fec_index);
                    self.stats.duplicate_packets += 1;
                    return Ok(WindowEvent::Dropped(DropReason::Duplicate));
                }
            }
            previous => {
                debug!(
                    "snbase 从 {:?} 变为 {}，清除FEC队列（{}个FEC包，{}个媒体包）",
                    previous.map(|w| w.snbase),
                    header.sn_base,
                    self.fec_packets.len(),
                    self.media_packets.len()
                );
                self.fec_packets.clear();
                self.fec_packet_set.clear();
                self.window = Some(OpenWindow {
                    snbase: header.sn_base,
                    symbol_len: header.length_recovery as usize,
                    protected_mask: header.mask,
                });
            }
        }

        self.fec_packet_set.insert(seqnum);
        self.fec_packets.push(repair);

        self.rescan_media_packets();
        self.check_window()
    }

    // ============ 恢复队列 ============

    pub fn has_recovered_packets(&self) -> bool {
        !self.recovered_packets.is_empty()
    }

    /// 按恢复顺序取出一个包
    pub fn pop_recovered_packet(&mut self) -> Option<RtpPacket> {
        self.recovered_packets.pop_front()
    }

    pub fn peek_recovered_packet(&self) -> Option<&RtpPacket> {
        self.recovered_packets.front()
    }

    pub fn recovered_packet_count(&self) -> usize {
        self.recovered_packets.len()
    }

    /// 丢弃所有尚未取走的恢复包
    pub fn flush_recovered_packets(&mut self) {
        self.recovered_packets.clear();
    }

    // ============ 参数与状态 ============

    pub fn num_media_packets(&self) -> usize {
        self.num_media_packets
    }

    /// 修改N会重置解码器
    pub fn set_num_media_packets(&mut self, num_media_packets: usize) -> Result<(), FecError> {
        validate_block(num_media_packets, self.num_fec_packets)?;
        self.reset();
        self.num_media_packets = num_media_packets;
        Ok(())
    }

    pub fn num_fec_packets(&self) -> usize {
        self.num_fec_packets
    }

    /// 修改K会重置解码器
    pub fn set_num_fec_packets(&mut self, num_fec_packets: usize) -> Result<(), FecError> {
        validate_block(self.num_media_packets, num_fec_packets)?;
        self.reset();
        self.num_fec_packets = num_fec_packets;
        Ok(())
    }

    /// 清空窗口、黑名单和恢复队列
    pub fn reset(&mut self) {
        self.clear_window_state();
        self.window = None;
        self.blacklisted_snbase = None;
        self.flush_recovered_packets();
    }

    /// 当前窗口的snbase，未绑定时为 `None`
    pub fn window_base(&self) -> Option<u16> {
        self.window.map(|w| w.snbase)
    }

    pub fn blacklisted_base(&self) -> Option<u16> {
        self.blacklisted_snbase
    }

    pub fn received_mask(&self) -> u32 {
        self.received_media_packet_mask
    }

    pub fn num_received_media_packets(&self) -> usize {
        self.media_packets.len()
    }

    pub fn num_received_fec_packets(&self) -> usize {
        self.fec_packets.len()
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    pub fn stats(&self) -> &DecoderStats {
        &self.stats
    }

    // ============ 窗口管理 ============

    fn buffer_media_packet(&mut self, packet: &RtpPacket) {
        self.media_packets.push_back(packet.clone());
        self.media_packet_set.insert(packet.sequence_number());
    }

    fn reject_malformed(&mut self) -> WindowEvent {
        self.stats.malformed_packets += 1;
        WindowEvent::Dropped(DropReason::Malformed)
    }

    /// 媒体包数超过N时，按到达顺序淘汰最旧的包
    fn evict_excess_media_packets(&mut self) {
        if self.media_packets.len() <= self.num_media_packets {
            return;
        }

        debug!(
            "队列中媒体包过多，删除最旧的{}个",
            self.media_packets.len() - self.num_media_packets
        );

        while self.media_packets.len() > self.num_media_packets {
            let Some(oldest) = self.media_packets.pop_front() else {
                break;
            };
            let seqnum = oldest.sequence_number();
            self.media_packet_set.remove(&seqnum);
            if let Some(window) = self.window {
                if let WindowPosition::Inside(position) =
                    window_position(seqnum, window.snbase, self.num_media_packets)
                {
                    self.received_media_packet_mask &= !(1 << position);
                }
            }
            self.stats.media_packets_evicted += 1;
        }
    }

    /// 新的流量已经越过窗口：放弃当前窗口，回到未绑定状态
    fn supersede_window(&mut self, snbase: u16) {
        self.window = None;
        self.blacklisted_snbase = Some(snbase);
        self.fec_packets.clear();
        self.fec_packet_set.clear();
        self.received_media_packet_mask = 0;
        self.max_packet_size = 0;
        self.stats.windows_superseded += 1;
    }

    /// 按当前窗口重新检查缓存的媒体包，淘汰窗口外的包并重建位图
    fn rescan_media_packets(&mut self) {
        let Some(window) = self.window else {
            return;
        };
        let num_media_packets = self.num_media_packets;

        let media_packet_set = &mut self.media_packet_set;
        let mut mask = 0u32;
        let mut max_packet_size = 0usize;
        let mut evicted = 0usize;

        self.media_packets.retain(|packet| {
            let seqnum = packet.sequence_number();
            match window_position(seqnum, window.snbase, num_media_packets) {
                WindowPosition::Inside(position) => {
                    mask |= 1 << position;
                    max_packet_size = max_packet_size.max(packet.len());
                    true
                }
                _ => {
                    debug!(
                        "媒体包 {} 不在窗口 [{}, +{}) 内，清除",
                        seqnum, window.snbase, num_media_packets
                    );
                    media_packet_set.remove(&seqnum);
                    evicted += 1;
                    false
                }
            }
        });

        self.received_media_packet_mask = mask;
        self.max_packet_size = max_packet_size;
        self.stats.media_packets_evicted += evicted;
    }

    /// 窗口完成检查：全部到齐则直接解决，符号足够则恢复后解决
    fn check_window(&mut self) -> Result<WindowEvent, FecError> {
        let Some(window) = self.window else {
            return Ok(WindowEvent::Buffered);
        };

        let protected = window.protected_mask;
        if self.received_media_packet_mask & protected == protected {
            debug!("{}个媒体包全部收到，无需恢复", self.num_media_packets);
            self.stats.windows_completed += 1;
            self.resolve_window();
            return Ok(WindowEvent::Completed);
        }

        if self.can_recover_packets(protected) {
            debug!(
                "恢复 {} 个媒体包",
                protected.count_ones() - (self.received_media_packet_mask & protected).count_ones()
            );
            let result = self.recover_packets(window);
            self.resolve_window();
            return result;
        }

        Ok(WindowEvent::Buffered)
    }

    /// 已知符号数（收到的受保护媒体包 + 未受保护位置 + FEC包）达到N即可尝试恢复
    fn can_recover_packets(&self, protected: u32) -> bool {
        let received = (self.received_media_packet_mask & protected).count_ones() as usize;
        let unprotected = self.num_media_packets - protected.count_ones() as usize;

        !self.media_packets.is_empty()
            && received + unprotected + self.fec_packets.len() >= self.num_media_packets
    }

    fn recover_packets(&mut self, window: OpenWindow) -> Result<WindowEvent, FecError> {
        let num_media_packets = self.num_media_packets;
        let protected = window.protected_mask;

        if self.max_packet_size > window.symbol_len {
            warn!(
                "窗口 {} 中有 {} 字节的媒体包，超过length recovery {}，放弃恢复",
                window.snbase, self.max_packet_size, window.symbol_len
            );
            self.stats.windows_abandoned += 1;
            return Ok(WindowEvent::Abandoned);
        }

        // 未受保护的位置按全0符号参与解码
        let zero_symbol = vec![0u8; window.symbol_len];
        let mut symbols: Vec<Option<&[u8]>> = vec![None; num_media_packets + self.num_fec_packets];

        for (position, symbol) in symbols.iter_mut().enumerate().take(num_media_packets) {
            if protected & (1 << position) == 0 {
                *symbol = Some(zero_symbol.as_slice());
            }
        }

        for packet in &self.media_packets {
            if let WindowPosition::Inside(position) =
                window_position(packet.sequence_number(), window.snbase, num_media_packets)
            {
                if protected & (1 << position) != 0 {
                    symbols[position] = Some(packet.as_bytes());
                }
            }
        }

        for repair in &self.fec_packets {
            symbols[num_media_packets + repair.header().fec_index as usize] = Some(repair.symbol());
        }

        let params = CodecParams {
            source_symbols: num_media_packets,
            repair_symbols: self.num_fec_packets,
            symbol_len: window.symbol_len,
        };
        let mut context = RecoveryContext {
            factory: self.factory.as_ref(),
            buffers: Vec::new(),
        };
        let status = self.codec.decode(&params, &symbols, &mut context)?;

        let mut recovered = 0;
        for (esi, buf) in context.buffers {
            if esi < num_media_packets && protected & (1 << esi) != 0 {
                self.recovered_packets.push_back(RtpPacket::from_recovered(buf));
                recovered += 1;
            }
        }
        self.stats.packets_recovered += recovered;

        match status {
            DecodeStatus::Complete => {
                info!("窗口 {}: 成功恢复 {} 个媒体包", window.snbase, recovered);
                self.stats.successful_recoveries += 1;
                Ok(WindowEvent::Recovered { packets: recovered })
            }
            DecodeStatus::Incomplete { missing } => {
                warn!(
                    "窗口 {}: 解码未完成，恢复 {} 个，{} 个无法恢复",
                    window.snbase,
                    recovered,
                    missing.len()
                );
                self.stats.partial_recoveries += 1;
                Ok(WindowEvent::PartiallyRecovered {
                    packets: recovered,
                    missing: missing.len(),
                })
            }
        }
    }

    /// 解决当前窗口：snbase进入黑名单，释放所有缓存的包（恢复队列保留）
    fn resolve_window(&mut self) {
        if let Some(window) = self.window.take() {
            self.blacklisted_snbase = Some(window.snbase);
        }
        self.clear_window_state();
    }

    fn clear_window_state(&mut self) {
        self.received_media_packet_mask = 0;
        self.max_packet_size = 0;
        self.media_packets.clear();
        self.media_packet_set.clear();
        self.fec_packets.clear();
        self.fec_packet_set.clear();
    }
}
