//! C ABI for the FEC encoder and decoder.
//!
//! Handles are opaque; packets are passed as byte buffers and copied on the way
//! in. Output packets are copied into caller-allocated buffers.

use std::os::raw::c_uchar;
use std::ptr;

use crate::config::FecConfig;
use crate::error::FecError;
use crate::fec::{EncoderPush, FecDecoder, FecEncoder};
use crate::packet::RtpPacket;

/// Success / nothing to report.
pub const RTP_FEC_OK: i32 = 0;
/// A null pointer was passed.
pub const RTP_FEC_ERR_NULL: i32 = -1;
/// The output buffer is too small; the packet stays queued.
pub const RTP_FEC_ERR_BUFFER_TOO_SMALL: i32 = -2;
/// Invalid N, K or payload type.
pub const RTP_FEC_ERR_INVALID_CONFIG: i32 = -3;
/// The input is not an RTP packet.
pub const RTP_FEC_ERR_INVALID_PACKET: i32 = -4;
/// Buffer allocation or erasure coding failed.
pub const RTP_FEC_ERR_INTERNAL: i32 = -5;

fn error_code(error: &FecError) -> i32 {
    match error {
        FecError::InvalidConfig(_) => RTP_FEC_ERR_INVALID_CONFIG,
        FecError::InvalidPacket(_) | FecError::PacketTooLarge { .. } => RTP_FEC_ERR_INVALID_PACKET,
        FecError::Allocation { .. } | FecError::Codec(_) | FecError::Random => RTP_FEC_ERR_INTERNAL,
    }
}

fn packet_from_raw(data: *const c_uchar, len: usize) -> Result<RtpPacket, FecError> {
    let slice = unsafe { std::slice::from_raw_parts(data, len) };
    RtpPacket::from_bytes(slice.to_vec())
}

/// Copy `packet` into the caller buffer. Returns 1 on success.
fn copy_out(packet: &RtpPacket, out_buf: *mut c_uchar, out_max_len: usize, out_written: *mut usize) -> i32 {
    if packet.len() > out_max_len {
        return RTP_FEC_ERR_BUFFER_TOO_SMALL;
    }
    unsafe {
        ptr::copy_nonoverlapping(packet.as_bytes().as_ptr(), out_buf, packet.len());
        *out_written = packet.len();
    }
    1
}

// ============ Encoder ============

/// Opaque handle for FecEncoder
pub struct RtpFecEncoderHandle(FecEncoder);

/// Create an encoder.
/// seqnum_offset: first FEC sequence number, or negative for a random one.
/// Returns null on invalid parameters.
#[unsafe(no_mangle)]
pub extern "C" fn rtp_fec_encoder_create(
    num_media_packets: usize,
    num_fec_packets: usize,
    payload_type: u8,
    seqnum_offset: i32,
) -> *mut RtpFecEncoderHandle {
    let mut config = FecConfig::default()
        .with_block(num_media_packets, num_fec_packets)
        .with_payload_type(payload_type);
    if (0..=u16::MAX as i32).contains(&seqnum_offset) {
        config = config.with_seqnum_offset(seqnum_offset as u16);
    }

    match FecEncoder::new(&config) {
        Ok(encoder) => Box::into_raw(Box::new(RtpFecEncoderHandle(encoder))),
        Err(_) => ptr::null_mut(),
    }
}

/// Destroy an encoder handle.
#[unsafe(no_mangle)]
pub extern "C" fn rtp_fec_encoder_destroy(handle: *mut RtpFecEncoderHandle) {
    if !handle.is_null() {
        unsafe { drop(Box::from_raw(handle)); }
    }
}

/// Push a media packet.
/// Returns 0 if buffered, 1 if a block was encoded (FEC packets ready),
/// 2 if the encoder is busy (pop FEC packets first), negative on error.
#[unsafe(no_mangle)]
pub extern "C" fn rtp_fec_encoder_push(handle: *mut RtpFecEncoderHandle, data: *const c_uchar, len: usize) -> i32 {
    if handle.is_null() || data.is_null() {
        return RTP_FEC_ERR_NULL;
    }
    let encoder = unsafe { &mut (*handle).0 };

    let result = packet_from_raw(data, len).and_then(|packet| encoder.push_media_packet(&packet));
    match result {
        Ok(EncoderPush::Buffered { .. }) => 0,
        Ok(EncoderPush::BlockEncoded { .. }) => 1,
        Ok(EncoderPush::Busy) => 2,
        Err(e) => error_code(&e),
    }
}

/// Pop the next FEC packet.
/// Returns 1 if a packet was written, 0 if none is queued, negative on error.
#[unsafe(no_mangle)]
pub extern "C" fn rtp_fec_encoder_pop(
    handle: *mut RtpFecEncoderHandle,
    out_buf: *mut c_uchar,
    out_max_len: usize,
    out_written: *mut usize,
) -> i32 {
    if handle.is_null() || out_buf.is_null() || out_written.is_null() {
        return RTP_FEC_ERR_NULL;
    }
    let encoder = unsafe { &mut (*handle).0 };

    let Some(packet) = encoder.peek_fec_packet() else {
        return RTP_FEC_OK;
    };
    let status = copy_out(packet, out_buf, out_max_len, out_written);
    if status == 1 {
        encoder.pop_fec_packet();
    }
    status
}

/// Discard the current block and all queued FEC packets.
#[unsafe(no_mangle)]
pub extern "C" fn rtp_fec_encoder_reset(handle: *mut RtpFecEncoderHandle) {
    if !handle.is_null() {
        unsafe { (*handle).0.reset(); }
    }
}

// ============ Decoder ============

/// Opaque handle for FecDecoder
pub struct RtpFecDecoderHandle(FecDecoder);

/// Create a decoder. Returns null on invalid parameters.
#[unsafe(no_mangle)]
pub extern "C" fn rtp_fec_decoder_create(num_media_packets: usize, num_fec_packets: usize) -> *mut RtpFecDecoderHandle {
    match FecDecoder::new(num_media_packets, num_fec_packets) {
        Ok(decoder) => Box::into_raw(Box::new(RtpFecDecoderHandle(decoder))),
        Err(_) => ptr::null_mut(),
    }
}

/// Destroy a decoder handle.
#[unsafe(no_mangle)]
pub extern "C" fn rtp_fec_decoder_destroy(handle: *mut RtpFecDecoderHandle) {
    if !handle.is_null() {
        unsafe { drop(Box::from_raw(handle)); }
    }
}

/// Push a media packet.
/// Returns the number of recovered packets waiting to be popped, negative on error.
#[unsafe(no_mangle)]
pub extern "C" fn rtp_fec_decoder_push_media(handle: *mut RtpFecDecoderHandle, data: *const c_uchar, len: usize) -> i32 {
    if handle.is_null() || data.is_null() {
        return RTP_FEC_ERR_NULL;
    }
    let decoder = unsafe { &mut (*handle).0 };

    match packet_from_raw(data, len).and_then(|packet| decoder.push_media_packet(&packet)) {
        Ok(_) => decoder.recovered_packet_count().min(i32::MAX as usize) as i32,
        Err(e) => error_code(&e),
    }
}

/// Push a FEC packet.
/// Returns the number of recovered packets waiting to be popped, negative on error.
#[unsafe(no_mangle)]
pub extern "C" fn rtp_fec_decoder_push_fec(handle: *mut RtpFecDecoderHandle, data: *const c_uchar, len: usize) -> i32 {
    if handle.is_null() || data.is_null() {
        return RTP_FEC_ERR_NULL;
    }
    let decoder = unsafe { &mut (*handle).0 };

    match packet_from_raw(data, len).and_then(|packet| decoder.push_fec_packet(&packet)) {
        Ok(_) => decoder.recovered_packet_count().min(i32::MAX as usize) as i32,
        Err(e) => error_code(&e),
    }
}

/// Pop the next recovered packet.
/// Returns 1 if a packet was written, 0 if none is queued, negative on error.
#[unsafe(no_mangle)]
pub extern "C" fn rtp_fec_decoder_pop(
    handle: *mut RtpFecDecoderHandle,
    out_buf: *mut c_uchar,
    out_max_len: usize,
    out_written: *mut usize,
) -> i32 {
    if handle.is_null() || out_buf.is_null() || out_written.is_null() {
        return RTP_FEC_ERR_NULL;
    }
    let decoder = unsafe { &mut (*handle).0 };

    let Some(packet) = decoder.peek_recovered_packet() else {
        return RTP_FEC_OK;
    };
    let status = copy_out(packet, out_buf, out_max_len, out_written);
    if status == 1 {
        decoder.pop_recovered_packet();
    }
    status
}

/// Drop all recovered packets that have not been popped.
#[unsafe(no_mangle)]
pub extern "C" fn rtp_fec_decoder_flush(handle: *mut RtpFecDecoderHandle) {
    if !handle.is_null() {
        unsafe { (*handle).0.flush_recovered_packets(); }
    }
}

/// Reset the decoder window, blacklist and recovered queue.
#[unsafe(no_mangle)]
pub extern "C" fn rtp_fec_decoder_reset(handle: *mut RtpFecDecoderHandle) {
    if !handle.is_null() {
        unsafe { (*handle).0.reset(); }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::tests::media_packet;

    #[test]
    fn test_capi_round_trip() {
        let encoder = rtp_fec_encoder_create(3, 1, 99, 500);
        let decoder = rtp_fec_decoder_create(3, 1);
        assert!(!encoder.is_null() && !decoder.is_null());

        let media: Vec<RtpPacket> = (0..3u16).map(|s| media_packet(s, 32)).collect();
        let mut statuses = Vec::new();
        for packet in &media {
            let bytes = packet.as_bytes();
            statuses.push(rtp_fec_encoder_push(encoder, bytes.as_ptr(), bytes.len()));
        }
        assert_eq!(statuses, vec![0, 0, 1]);

        let mut buf = [0u8; 256];
        let mut written = 0usize;
        assert_eq!(rtp_fec_encoder_pop(encoder, buf.as_mut_ptr(), 4, &mut written), RTP_FEC_ERR_BUFFER_TOO_SMALL);
        assert_eq!(rtp_fec_encoder_pop(encoder, buf.as_mut_ptr(), buf.len(), &mut written), 1);
        let fec = buf[..written].to_vec();
        assert_eq!(rtp_fec_encoder_pop(encoder, buf.as_mut_ptr(), buf.len(), &mut written), 0);

        for packet in &media[1..] {
            let bytes = packet.as_bytes();
            assert_eq!(rtp_fec_decoder_push_media(decoder, bytes.as_ptr(), bytes.len()), 0);
        }
        assert_eq!(rtp_fec_decoder_push_fec(decoder, fec.as_ptr(), fec.len()), 1);
        assert_eq!(rtp_fec_decoder_pop(decoder, buf.as_mut_ptr(), buf.len(), &mut written), 1);
        assert_eq!(&buf[..written], media[0].as_bytes());

        rtp_fec_encoder_destroy(encoder);
        rtp_fec_decoder_destroy(decoder);
    }

    #[test]
    fn test_capi_invalid_arguments() {
        assert!(rtp_fec_encoder_create(0, 1, 99, -1).is_null());
        assert!(rtp_fec_encoder_create(4, 1, 200, -1).is_null());
        assert!(rtp_fec_decoder_create(25, 1).is_null());

        let decoder = rtp_fec_decoder_create(4, 1);
        let short = [0x80u8; 4];
        assert_eq!(rtp_fec_decoder_push_media(decoder, short.as_ptr(), short.len()), RTP_FEC_ERR_INVALID_PACKET);
        assert_eq!(rtp_fec_decoder_push_media(ptr::null_mut(), short.as_ptr(), 4), RTP_FEC_ERR_NULL);
        rtp_fec_decoder_flush(decoder);
        rtp_fec_decoder_reset(decoder);
        rtp_fec_decoder_destroy(decoder);
    }
}
