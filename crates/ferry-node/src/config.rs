use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use ferry_transport::reassembly::ReassemblyConfig;
use ferry_transport::segment::SegmenterConfig;
use ferry_transport::sender::SenderConfig;
use ferry_transport::wire::{HEADER_SIZE, MAX_DATAGRAM_SIZE};
use serde::Deserialize;

pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FerryConfigInput {
    pub version: u32,
    pub sender: SenderConfigInput,
    pub server: ServerConfigInput,
    pub reassembly: ReassemblyConfigInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SenderConfigInput {
    pub retransmit_interval_ms: Option<u64>,
    pub poll_timeout_ms: Option<u64>,
    pub streams: Option<u32>,
    pub segments_per_stream: Option<u32>,
    pub min_segment_size: Option<usize>,
    pub max_segment_size: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfigInput {
    pub poll_timeout_ms: Option<u64>,
    pub bind_timeout_ms: Option<u64>,
    pub recv_buffer_size: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReassemblyConfigInput {
    pub session_expiry_ms: Option<u64>,
}

/// Client-side settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderSettings {
    pub retransmit_interval: Duration,
    /// Bounded wait for one inbound datagram per loop turn.
    pub poll_timeout: Duration,
    pub streams: u32,
    pub segments_per_stream: u32,
    pub segmenter: SegmenterConfig,
}

impl Default for SenderSettings {
    fn default() -> Self {
        Self {
            retransmit_interval: SenderConfig::default().retransmit_interval,
            poll_timeout: Duration::from_millis(1000),
            streams: 3,
            segments_per_stream: 20,
            segmenter: SegmenterConfig::default(),
        }
    }
}

impl SenderSettings {
    pub fn sender_config(&self) -> SenderConfig {
        SenderConfig {
            retransmit_interval: self.retransmit_interval,
        }
    }
}

/// Server-side settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub poll_timeout: Duration,
    pub bind_timeout: Duration,
    pub recv_buffer_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(10),
            bind_timeout: Duration::from_millis(1000),
            recv_buffer_size: MAX_DATAGRAM_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FerryConfig {
    pub version: u32,
    pub sender: SenderSettings,
    pub server: ServerSettings,
    pub reassembly: ReassemblyConfig,
}

impl Default for FerryConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            sender: SenderSettings::default(),
            server: ServerSettings::default(),
            reassembly: ReassemblyConfig::default(),
        }
    }
}

fn millis_or(value: Option<u64>, default: Duration) -> Duration {
    value.map(Duration::from_millis).unwrap_or(default)
}

impl FerryConfigInput {
    pub fn resolve(self) -> Result<FerryConfig> {
        let version = if self.version == 0 {
            CONFIG_VERSION
        } else {
            self.version
        };
        if version != CONFIG_VERSION {
            bail!("unsupported config version {version}");
        }

        let sd = SenderSettings::default();
        let min_segment_size = self
            .sender
            .min_segment_size
            .unwrap_or(sd.segmenter.min_segment_size)
            .max(1);
        let max_segment_size = self
            .sender
            .max_segment_size
            .unwrap_or(sd.segmenter.max_segment_size)
            .max(min_segment_size);
        let sender = SenderSettings {
            retransmit_interval: millis_or(self.sender.retransmit_interval_ms, sd.retransmit_interval),
            poll_timeout: millis_or(self.sender.poll_timeout_ms, sd.poll_timeout),
            streams: self.sender.streams.unwrap_or(sd.streams),
            segments_per_stream: self.sender.segments_per_stream.unwrap_or(sd.segments_per_stream),
            segmenter: SegmenterConfig {
                min_segment_size,
                max_segment_size,
            },
        };

        let vd = ServerSettings::default();
        let server = ServerSettings {
            poll_timeout: millis_or(self.server.poll_timeout_ms, vd.poll_timeout),
            bind_timeout: millis_or(self.server.bind_timeout_ms, vd.bind_timeout),
            recv_buffer_size: self
                .server
                .recv_buffer_size
                .unwrap_or(vd.recv_buffer_size)
                .max(HEADER_SIZE),
        };

        let reassembly = ReassemblyConfig {
            session_expiry: millis_or(
                self.reassembly.session_expiry_ms,
                ReassemblyConfig::default().session_expiry,
            ),
        };

        Ok(FerryConfig {
            version,
            sender,
            server,
            reassembly,
        })
    }
}

impl FerryConfig {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        if input.trim().is_empty() {
            return Ok(FerryConfig::default());
        }
        let parsed: FerryConfigInput = toml::from_str(input).context("invalid config TOML")?;
        parsed.resolve()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("in config {}", path.display()))
    }
}
