//! RTP流描述
//!
//! FEC流的描述由媒体流派生：沿用媒体类型和时钟频率，负载类型取编码器配置，
//! 编码名固定为 `parityfec`。

use crate::error::FecError;
use std::fmt;

/// FEC流的编码名
pub const PARITY_FEC_ENCODING_NAME: &str = "parityfec";

/// RTP流的媒体描述
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamCaps {
    pub media: Option<String>,
    pub clock_rate: Option<u32>,
    pub payload_type: Option<u8>,
    pub encoding_name: Option<String>,
}

impl StreamCaps {
    pub fn new(media: &str, clock_rate: u32) -> Self {
        Self {
            media: Some(media.to_string()),
            clock_rate: Some(clock_rate),
            ..Default::default()
        }
    }

    pub fn with_payload_type(mut self, payload_type: u8) -> Self {
        self.payload_type = Some(payload_type);
        self
    }

    pub fn with_encoding_name(mut self, encoding_name: &str) -> Self {
        self.encoding_name = Some(encoding_name.to_string());
        self
    }

    /// 由媒体流描述生成FEC流描述
    pub fn repair_stream(&self, payload_type: u8) -> Result<StreamCaps, FecError> {
        let media = self
            .media
            .as_deref()
            .filter(|m| !m.is_empty())
            .ok_or_else(|| FecError::InvalidConfig("媒体流描述缺少media".to_string()))?;

        let clock_rate = self
            .clock_rate
            .filter(|&rate| rate >= 1)
            .ok_or_else(|| FecError::InvalidConfig("媒体流描述缺少clock-rate".to_string()))?;

        Ok(StreamCaps {
            media: Some(media.to_string()),
            clock_rate: Some(clock_rate),
            payload_type: Some(payload_type),
            encoding_name: Some(PARITY_FEC_ENCODING_NAME.to_string()),
        })
    }
}

impl fmt::Display for StreamCaps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "application/x-rtp")?;
        if let Some(media) = &self.media {
            write!(f, ", media={}", media)?;
        }
        if let Some(payload_type) = self.payload_type {
            write!(f, ", payload={}", payload_type)?;
        }
        if let Some(clock_rate) = self.clock_rate {
            write!(f, ", clock-rate={}", clock_rate)?;
        }
        if let Some(encoding_name) = &self.encoding_name {
            write!(f, ", encoding-name={}", encoding_name)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repair_stream_mirrors_media() {
        let caps = StreamCaps::new("video", 90000)
            .with_payload_type(96)
            .with_encoding_name("H264");

        let repair = caps.repair_stream(99).unwrap();
        assert_eq!(repair.media.as_deref(), Some("video"));
        assert_eq!(repair.clock_rate, Some(90000));
        assert_eq!(repair.payload_type, Some(99));
        assert_eq!(repair.encoding_name.as_deref(), Some("parityfec"));
        assert_eq!(
            repair.to_string(),
            "application/x-rtp, media=video, payload=99, clock-rate=90000, encoding-name=parityfec"
        );
    }

    #[test]
    fn test_repair_stream_requires_media_and_clock_rate() {
        let no_media = StreamCaps {
            clock_rate: Some(8000),
            ..Default::default()
        };
        assert!(matches!(no_media.repair_stream(99), Err(FecError::InvalidConfig(_))));

        let no_rate = StreamCaps {
            media: Some("audio".to_string()),
            ..Default::default()
        };
        assert!(no_rate.repair_stream(99).is_err());

        assert!(StreamCaps::new("audio", 0).repair_stream(99).is_err());
    }
}
