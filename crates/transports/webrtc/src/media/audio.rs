//! Opus encoding for outgoing audio packets

use crate::{Error, Result};

/// Largest Opus packet we allocate for
const MAX_PACKET_SIZE: usize = 4000;

/// Opus encoder settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpusSettings {
    /// Sample rate in Hz (48000, 24000 or 16000)
    pub sample_rate: u32,
    /// 1 = mono, 2 = stereo
    pub channels: u16,
    /// Target bitrate in bits per second
    pub bitrate: u32,
}

impl Default for OpusSettings {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
            bitrate: 64000,
        }
    }
}

impl OpusSettings {
    /// Reject settings libopus would refuse
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.sample_rate, 48000 | 24000 | 16000) {
            return Err(Error::InvalidConfig(format!(
                "Opus sample rate must be 48000, 24000, or 16000 Hz, got {}",
                self.sample_rate
            )));
        }
        if self.channels != 1 && self.channels != 2 {
            return Err(Error::InvalidConfig(format!(
                "Opus supports 1 (mono) or 2 (stereo) channels, got {}",
                self.channels
            )));
        }
        Ok(())
    }
}

/// Opus encoder for one outgoing audio track
pub struct OpusEncoder {
    settings: OpusSettings,
    encoder: opus::Encoder,
}

// SAFETY: each encoder owns its libopus state and is only used behind a
// Mutex by the track that owns it.
unsafe impl Send for OpusEncoder {}

impl OpusEncoder {
    /// Create an encoder
    pub fn new(settings: OpusSettings) -> Result<Self> {
        settings.validate()?;

        let channels = if settings.channels == 1 {
            opus::Channels::Mono
        } else {
            opus::Channels::Stereo
        };

        let mut encoder = opus::Encoder::new(settings.sample_rate, channels, opus::Application::Voip)
            .map_err(|e| Error::Encoding(format!("Failed to create Opus encoder: {:?}", e)))?;

        encoder
            .set_bitrate(opus::Bitrate::Bits(settings.bitrate as i32))
            .map_err(|e| Error::Encoding(format!("Failed to set bitrate: {:?}", e)))?;

        Ok(Self { settings, encoder })
    }

    /// Settings this encoder was built with
    pub fn settings(&self) -> &OpusSettings {
        &self.settings
    }

    /// Encode one packet of interleaved samples
    ///
    /// `samples` must hold exactly one Opus frame (2.5 to 60 ms) for the
    /// configured channel count.
    pub fn encode(&mut self, samples: &[f32]) -> Result<Vec<u8>> {
        let mut output = vec![0u8; MAX_PACKET_SIZE];
        let len = self
            .encoder
            .encode_float(samples, &mut output)
            .map_err(|e| Error::Encoding(format!("Opus encoding failed: {}", e)))?;
        output.truncate(len);
        Ok(output)
    }
}

impl std::fmt::Debug for OpusEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpusEncoder")
            .field("settings", &self.settings)
            .finish()
    }
}
