//! Device-control collaborator.
//!
//! Cameras expose their configuration over HTTP. The core never talks
//! HTTP itself; it goes through [`DeviceControl`], one instance per
//! device address, built by a [`DeviceControlFactory`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SspError;

/// HTTP status that marks a successful request.
pub const STATUS_OK: u16 = 200;

/// Reply envelope returned by every device-control request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlReply<T> {
    pub status_code: u16,
    /// Camera-side result code; zero on success.
    pub code: i32,
    pub value: T,
}

impl<T> ControlReply<T> {
    pub fn ok(value: T) -> Self {
        Self {
            status_code: STATUS_OK,
            code: 0,
            value,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status_code == STATUS_OK && self.code == 0
    }

    /// Unwrap the value or turn the reply into a [`SspError::DeviceControl`]
    /// carrying `context`.
    pub fn into_result(self, context: impl Into<String>) -> Result<T, SspError> {
        if self.is_success() {
            return Ok(self.value);
        }
        let context = context.into();
        Err(SspError::DeviceControl(format!(
            "{context} (status {}, code {})",
            self.status_code, self.code
        )))
    }
}

// ── Payloads ─────────────────────────────────────────────────────

/// Camera configuration keys used by the stream setup sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    MovieResolution,
    ProjectFps,
    SendStream,
    Led,
}

impl ConfigKey {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MovieResolution => "resolution",
            Self::ProjectFps => "project_fps",
            Self::SendStream => "send_stream",
            Self::Led => "led",
        }
    }
}

impl std::fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configuration value together with the choices the camera offers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigValue {
    #[serde(rename = "value")]
    pub current: String,
    #[serde(rename = "opts")]
    pub choices: Vec<String>,
}

/// Identity document returned by the camera.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeviceInfo {
    pub model: String,
    pub camera_name: String,
    pub nick_name: String,
}

impl DeviceInfo {
    pub fn from_json(text: &str) -> Result<Self, SspError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Settings of one encoder stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StreamInfo {
    pub stream_index: String,
    /// "idle" when nothing is pulling the stream.
    pub status: String,
    pub encoder_type: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// kbit/s.
    pub bitrate: u64,
    pub gop: u32,
}

impl StreamInfo {
    pub fn is_idle(&self) -> bool {
        self.status.eq_ignore_ascii_case("idle")
    }

    /// 1 for the secondary stream (`stream1`), 0 otherwise.
    pub fn stream_number(&self) -> u32 {
        if self.stream_index.eq_ignore_ascii_case("stream1") {
            1
        } else {
            0
        }
    }
}

/// Attributes written to an idle stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamAttr {
    pub index: String,
    pub width: u32,
    pub height: u32,
    /// bit/s.
    pub bitrate: u64,
    pub gop: u32,
    pub fps: u32,
    pub encoder: String,
}

// ── Trait ────────────────────────────────────────────────────────

pub type ControlResult<T> = Result<ControlReply<T>, SspError>;

/// Requests against one camera. An `Err` means the request could not be
/// made at all; a reply with a non-success status means the camera
/// refused it.
#[async_trait]
pub trait DeviceControl: Send + Sync {
    /// Raw JSON identity document, see [`DeviceInfo`].
    async fn get_info(&self) -> ControlResult<String>;
    async fn get_config(&self, key: ConfigKey) -> ControlResult<ConfigValue>;
    async fn set_config(&self, key: ConfigKey, value: &str) -> ControlResult<()>;
    async fn get_stream_info(&self, index: &str) -> ControlResult<StreamInfo>;
    async fn set_send_stream(&self, index: &str) -> ControlResult<()>;
    async fn set_stream_attr(&self, attr: &StreamAttr) -> ControlResult<()>;
    async fn set_stream_bitrate(&self, index: &str, bitrate: u64) -> ControlResult<()>;

    async fn set_led(&self, on: bool) -> ControlResult<()> {
        self.set_config(ConfigKey::Led, if on { "On" } else { "Off" })
            .await
    }
}

/// Builds the control client for a device address.
pub type DeviceControlFactory =
    Arc<dyn Fn(&str) -> Result<Box<dyn DeviceControl>, SspError> + Send + Sync>;
