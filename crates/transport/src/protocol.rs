//! Media-stream wire messages

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use voxcall_core::{AudioFormat, AudioFrame};

use crate::TransportError;

/// Messages sent by the carrier
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum InboundEvent {
    Connected {
        #[serde(default)]
        protocol: Option<String>,
    },
    Start {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        start: StartMetadata,
    },
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: InboundMedia,
    },
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        mark: MarkLabel,
    },
    Stop {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMetadata {
    pub call_sid: String,
    #[serde(default)]
    pub media_format: Option<MediaFormat>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFormat {
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u16,
}

impl MediaFormat {
    /// Only 8kHz mono µ-law is carried
    pub fn is_telephony(&self) -> bool {
        self.encoding == "audio/x-mulaw" && self.sample_rate == 8000 && self.channels == 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InboundMedia {
    #[serde(default)]
    pub track: Option<String>,
    /// Base64 µ-law audio
    pub payload: String,
}

/// Carrier echo of a mark; the session never sends any
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MarkLabel {
    pub name: String,
}

impl InboundEvent {
    pub fn parse(text: &str) -> Result<Self, TransportError> {
        serde_json::from_str(text).map_err(|e| TransportError::InvalidMessage(e.to_string()))
    }
}

impl InboundMedia {
    /// Decode the payload into a telephony frame
    pub fn decode(&self, sequence: u64) -> Result<AudioFrame, TransportError> {
        let payload = BASE64
            .decode(self.payload.as_bytes())
            .map_err(|e| TransportError::InvalidPayload(e.to_string()))?;
        if payload.is_empty() {
            return Err(TransportError::InvalidPayload("empty media payload".into()));
        }
        Ok(AudioFrame::new(payload, AudioFormat::telephony(), sequence))
    }
}

/// Messages sent to the carrier
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundEvent {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: OutboundMedia,
    },
    /// Drop audio the carrier has buffered but not yet played
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundMedia {
    pub payload: String,
}

impl OutboundEvent {
    pub fn media(stream_sid: impl Into<String>, frame: &AudioFrame) -> Self {
        OutboundEvent::Media {
            stream_sid: stream_sid.into(),
            media: OutboundMedia {
                payload: BASE64.encode(&frame.payload),
            },
        }
    }

    pub fn clear(stream_sid: impl Into<String>) -> Self {
        OutboundEvent::Clear {
            stream_sid: stream_sid.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, TransportError> {
        serde_json::to_string(self).map_err(|e| TransportError::InvalidMessage(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start() {
        let text = r#"{"event":"start","sequenceNumber":"1","start":{"accountSid":"AC1","streamSid":"MZ1","callSid":"CA1","tracks":["inbound"],"mediaFormat":{"encoding":"audio/x-mulaw","sampleRate":8000,"channels":1}},"streamSid":"MZ1"}"#;
        match InboundEvent::parse(text).unwrap() {
            InboundEvent::Start { stream_sid, start } => {
                assert_eq!(stream_sid, "MZ1");
                assert_eq!(start.call_sid, "CA1");
                assert!(start.media_format.unwrap().is_telephony());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_decode_media() {
        let text = r#"{"event":"media","sequenceNumber":"3","media":{"track":"inbound","chunk":"1","timestamp":"5","payload":"//7/"},"streamSid":"MZ1"}"#;
        let InboundEvent::Media { media, .. } = InboundEvent::parse(text).unwrap() else {
            panic!("not media");
        };
        let frame = media.decode(7).unwrap();
        assert_eq!(frame.payload, vec![0xFF, 0xFE, 0xFF]);
        assert_eq!(frame.sequence, 7);
        assert_eq!(frame.format, AudioFormat::telephony());
    }

    #[test]
    fn test_rejects_bad_payload() {
        let media = InboundMedia {
            track: None,
            payload: "***".into(),
        };
        assert!(matches!(media.decode(0), Err(TransportError::InvalidPayload(_))));
        assert!(InboundEvent::parse(r#"{"event":"dance"}"#).is_err());
    }

    #[test]
    fn test_mark_and_stop() {
        let mark = InboundEvent::parse(
            r#"{"event":"mark","sequenceNumber":"4","streamSid":"MZ1","mark":{"name":"chunk-2"}}"#,
        )
        .unwrap();
        assert_eq!(
            mark,
            InboundEvent::Mark {
                stream_sid: "MZ1".into(),
                mark: MarkLabel {
                    name: "chunk-2".into()
                }
            }
        );
        let stop = InboundEvent::parse(
            r#"{"event":"stop","sequenceNumber":"5","stop":{"callSid":"CA1"},"streamSid":"MZ1"}"#,
        )
        .unwrap();
        assert!(matches!(stop, InboundEvent::Stop { .. }));
    }

    #[test]
    fn test_outbound_json() {
        let frame = AudioFrame::new(vec![0xFF, 0xFE, 0xFF], AudioFormat::telephony(), 0);
        assert_eq!(
            OutboundEvent::media("MZ1", &frame).to_json().unwrap(),
            r#"{"event":"media","streamSid":"MZ1","media":{"payload":"//7/"}}"#
        );
        assert_eq!(
            OutboundEvent::clear("MZ1").to_json().unwrap(),
            r#"{"event":"clear","streamSid":"MZ1"}"#
        );
    }
}
