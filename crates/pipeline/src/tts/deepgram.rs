//! Deepgram Aura synthesis over streaming HTTP
//!
//! One POST per chunk; the response body is raw audio in the requested
//! encoding and is forwarded piece by piece as it arrives.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use url::Url;
use voxcall_config::SynthesizerConfig;
use voxcall_core::{AudioByteStream, AudioFormat, Result, SampleRate, SynthesizeStream};

use crate::PipelineError;

#[derive(Debug, Serialize)]
struct SpeakRequest<'a> {
    text: &'a str,
}

/// Deepgram streaming synthesizer
#[derive(Debug, Clone)]
pub struct DeepgramSynthesizer {
    client: reqwest::Client,
    config: SynthesizerConfig,
    format: AudioFormat,
}

impl DeepgramSynthesizer {
    /// Create a synthesizer sharing `client`'s connection pool
    pub fn new(client: reqwest::Client, config: SynthesizerConfig) -> std::result::Result<Self, PipelineError> {
        let sample_rate = SampleRate::from_hz(config.sample_rate).ok_or_else(|| {
            PipelineError::Config(format!("Unsupported sample rate: {}", config.sample_rate))
        })?;
        Ok(Self {
            client,
            format: AudioFormat {
                encoding: config.encoding,
                sample_rate,
            },
            config,
        })
    }

    /// Speak URL for the configured voice and output format.
    ///
    /// Raw output (`container=none`) so every byte is audio.
    pub fn build_url(&self) -> std::result::Result<Url, PipelineError> {
        let mut url = Url::parse(&self.config.url)
            .map_err(|e| PipelineError::Config(format!("Invalid synthesizer URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("model", &self.config.voice)
            .append_pair("encoding", self.format.encoding.as_str())
            .append_pair("sample_rate", &self.format.sample_rate.as_u32().to_string())
            .append_pair("container", "none");
        Ok(url)
    }
}

#[async_trait]
impl SynthesizeStream for DeepgramSynthesizer {
    async fn synthesize(&self, text: &str, cancel: CancellationToken) -> Result<AudioByteStream> {
        let url = self.build_url()?;

        let response = self
            .client
            .post(url)
            .header(reqwest::header::AUTHORIZATION, format!("Token {}", self.config.api_key))
            .json(&SpeakRequest { text })
            .send()
            .await
            .map_err(|e| PipelineError::TtsConnect(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(PipelineError::TtsConnect(format!("API error ({status}): {body}")).into());
        }

        let mut body = response.bytes_stream();
        let audio = async_stream::stream! {
            loop {
                let item = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    item = body.next() => item,
                };
                match item {
                    Some(Ok(bytes)) => yield Ok(bytes.to_vec()),
                    Some(Err(e)) => {
                        yield Err(PipelineError::TtsStream(e.to_string()).into());
                        break;
                    }
                    None => break,
                }
            }
        };
        Ok(Box::pin(audio))
    }

    fn output_format(&self) -> AudioFormat {
        self.format
    }

    fn provider_name(&self) -> &str {
        "deepgram"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxcall_core::AudioEncoding;

    #[test]
    fn test_speak_url() {
        let synth = DeepgramSynthesizer::new(reqwest::Client::new(), SynthesizerConfig::default()).unwrap();
        let url = synth.build_url().unwrap();
        let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();

        assert!(query.contains(&("model".into(), "aura-2-thalia-en".into())));
        assert!(query.contains(&("encoding".into(), "mulaw".into())));
        assert!(query.contains(&("sample_rate".into(), "8000".into())));
        assert_eq!(synth.output_format(), AudioFormat::telephony());
    }

    #[test]
    fn test_rejects_unknown_rate() {
        let config = SynthesizerConfig {
            sample_rate: 11025,
            encoding: AudioEncoding::Pcm16,
            ..SynthesizerConfig::default()
        };
        assert!(DeepgramSynthesizer::new(reqwest::Client::new(), config).is_err());
    }

    #[test]
    fn test_request_body() {
        let body = serde_json::to_string(&SpeakRequest { text: "Hello there." }).unwrap();
        assert_eq!(body, r#"{"text":"Hello there."}"#);
    }
}
