use std::collections::BTreeMap;
use std::hash::Hasher;

use rtp_fec::caps::StreamCaps;
use rtp_fec::logging::init;
use rtp_fec::packet::{write_rtp_header, RtpHeaderFields, RtpPacket, RTP_HEADER_LEN};
use rtp_fec::{FecConfig, FecError, FecReceiver, FecSender};
use tracing::{debug, info, warn};
use twox_hash::XxHash64;

const MEDIA_PAYLOAD_TYPE: u8 = 96;
const MEDIA_SSRC: u32 = 0x5eed_0001;
const PAYLOAD_LEN: usize = 160;
const SAMPLES_PER_PACKET: u32 = 3000;

/// 合成的媒体包：负载内容由序号决定
fn synthetic_packet(index: usize) -> Result<RtpPacket, FecError> {
    let mut buf = vec![0u8; RTP_HEADER_LEN + PAYLOAD_LEN];
    let fields = RtpHeaderFields {
        payload_type: MEDIA_PAYLOAD_TYPE,
        sequence_number: index as u16,
        timestamp: (index as u32).wrapping_mul(SAMPLES_PER_PACKET),
        ssrc: MEDIA_SSRC,
        marker: index % 30 == 0,
    };
    let offset = write_rtp_header(&mut buf, &fields)?;
    for (i, byte) in buf[offset..].iter_mut().enumerate() {
        *byte = (index.wrapping_mul(31) ^ i.wrapping_mul(7)) as u8;
    }
    RtpPacket::from_bytes(buf)
}

fn stream_digest<'a>(packets: impl Iterator<Item = &'a RtpPacket>) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    for packet in packets {
        hasher.write(packet.as_bytes());
    }
    hasher.finish()
}

fn parse_arg(args: &[String], index: usize, name: &str, default: usize) -> Result<usize, FecError> {
    match args.get(index) {
        Some(value) => value
            .parse()
            .map_err(|_| FecError::InvalidConfig(format!("{}不是有效的数字: {}", name, value))),
        None => Ok(default),
    }
}

fn main() -> Result<(), FecError> {
    // 日志系统初始化
    init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() > 5 {
        println!("用法: {} [N] [K] [包数] [每隔几个丢一个]", args[0]);
        return Ok(());
    }

    let num_media_packets = parse_arg(&args, 1, "N", 9)?;
    let num_fec_packets = parse_arg(&args, 2, "K", 3)?;
    let total_packets = parse_arg(&args, 3, "包数", 900)?.min(u16::MAX as usize + 1);
    let drop_every = parse_arg(&args, 4, "丢包间隔", 10)?;

    let config = FecConfig::default().with_block(num_media_packets, num_fec_packets);
    let mut sender = FecSender::new(&config)?;
    let receiver = FecReceiver::new(num_media_packets, num_fec_packets)?;

    let repair_caps = sender.set_media_caps(&StreamCaps::new("video", 90000))?;
    info!("FEC流: {}", repair_caps);

    let mut original = Vec::with_capacity(total_packets);
    let mut delivered: BTreeMap<u16, RtpPacket> = BTreeMap::new();
    let mut dropped = 0usize;
    let mut repair_sent = 0usize;

    for index in 0..total_packets {
        let packet = synthetic_packet(index)?;
        original.push(packet.clone());

        let output = sender.handle_media_packet(packet)?;

        if drop_every > 0 && index % drop_every == drop_every - 1 {
            debug!("丢弃媒体包 {}", output.media.sequence_number());
            dropped += 1;
        } else {
            for packet in receiver.handle_media_packet(output.media)? {
                delivered.insert(packet.sequence_number(), packet);
            }
        }

        for fec_packet in &output.repair {
            repair_sent += 1;
            for packet in receiver.handle_fec_packet(fec_packet)? {
                delivered.insert(packet.sequence_number(), packet);
            }
        }
    }

    let stats = receiver.stats();
    let lost = total_packets - delivered.len();
    let original_digest = stream_digest(original.iter());
    let delivered_digest = stream_digest(delivered.values());

    println!("N={} K={} 媒体包 {} FEC包 {}", num_media_packets, num_fec_packets, total_packets, repair_sent);
    println!("丢弃 {}，恢复 {}，仍丢失 {}", dropped, stats.packets_recovered, lost);
    println!("原始流   xxh64 {}", hex::encode(original_digest.to_be_bytes()));
    println!("重建流   xxh64 {}", hex::encode(delivered_digest.to_be_bytes()));

    if lost == 0 && original_digest == delivered_digest {
        info!("重建流与原始流一致");
    } else {
        warn!("重建流不完整: {} 个包未恢复", lost);
    }

    Ok(())
}
