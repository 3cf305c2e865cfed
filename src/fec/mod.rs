//! FEC（前向纠错）模块

pub mod codec;
mod decoder;
mod encoder;
pub mod header;
pub mod seqnum;

// 重新导出
pub use codec::{CodecParams, DecodeStatus, ErasureCodec, RecoverySink, ReedSolomonCodec};
pub use decoder::{DecoderStats, DropReason, FecDecoder, WindowEvent};
pub use encoder::{EncoderPush, EncoderStats, FecEncoder};
pub use header::{FecHeader, HeaderError, RepairPacket, FEC_HEADER_LEN};
