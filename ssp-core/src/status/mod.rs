//! Cached camera state and the stream configuration sequence.
//!
//! A [`DeviceStatus`] is shared by every source pointed at the same
//! camera (see [`DeviceStatusRegistry`]). Requests against the camera are
//! serialized per device; cached values can be read at any time.

mod registry;

pub use registry::DeviceStatusRegistry;

use std::sync::{Mutex, MutexGuard};

use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::control::{ConfigKey, DeviceControl, DeviceInfo, StreamAttr, StreamInfo};
use crate::error::SspError;

/// Model code of the E2C body, which cannot exceed 30 fps above 1080p.
pub const MODEL_E2C: &str = "E2C";
/// Model code of IP-managed cameras that only accept bitrate changes.
pub const MODEL_IPMAN: &str = "IPMAN";

/// GOP length written with every stream attribute change.
const STREAM_GOP: u32 = 10;

/// Desired stream shape for a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    /// 0 for the primary (H.265) stream, 1 for the secondary (H.264).
    pub stream_index: u32,
    /// `"<width>*<height>"`.
    pub resolution: String,
    pub low_noise: bool,
    /// Frame rate as shown to the user, e.g. `"30"` or `"59.94"`.
    pub framerate: String,
    /// bit/s.
    pub bitrate: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CameraState {
    pub model: String,
    pub name: String,
    pub nick_name: String,
    pub resolutions: Vec<String>,
    pub current_resolution: String,
    pub framerates: Vec<String>,
    pub current_framerate: String,
    pub current_stream: Option<StreamInfo>,
    /// Stream selected for sending, as the camera names it.
    pub current_index: String,
}

pub struct DeviceStatus {
    address: String,
    control: Box<dyn DeviceControl>,
    ops: AsyncMutex<()>,
    state: Mutex<CameraState>,
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack
        .to_ascii_lowercase()
        .contains(&needle.to_ascii_lowercase())
}

/// `30` and `60` map to the NTSC project rates the camera expects.
fn project_fps(fps: &str) -> &str {
    match fps {
        "30" => "29.97",
        "60" => "59.94",
        other => other,
    }
}

fn parse_resolution(resolution: &str) -> Option<(u32, u32)> {
    let (w, h) = resolution.split_once('*')?;
    Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
}

impl DeviceStatus {
    pub fn new(address: impl Into<String>, control: Box<dyn DeviceControl>) -> Self {
        Self {
            address: address.into(),
            control,
            ops: AsyncMutex::new(()),
            state: Mutex::new(CameraState::default()),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    fn state(&self) -> MutexGuard<'_, CameraState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> CameraState {
        self.state().clone()
    }

    /// Empty until the first successful refresh.
    pub fn model(&self) -> String {
        self.state().model.clone()
    }

    pub fn current_stream(&self) -> Option<StreamInfo> {
        self.state().current_stream.clone()
    }

    // ── Refresh ──────────────────────────────────────────────────

    /// Reload identity, resolution, frame rate and the current stream.
    ///
    /// Fails if the identity request fails. Resolution and frame rate
    /// are best effort.
    pub async fn refresh_all(&self) -> Result<(), SspError> {
        let _ops = self.ops.lock().await;
        self.state().model.clear();

        self.fetch_info().await?;
        if let Err(e) = self.fetch_resolution().await {
            warn!(address = %self.address, "could not read resolution: {e}");
        }
        if let Err(e) = self.fetch_framerate().await {
            warn!(address = %self.address, "could not read frame rate: {e}");
        }
        self.fetch_current_stream().await
    }

    /// Reload only the stream currently selected for sending.
    pub async fn refresh_current_stream(&self) -> Result<(), SspError> {
        let _ops = self.ops.lock().await;
        self.fetch_current_stream().await
    }

    async fn fetch_info(&self) -> Result<(), SspError> {
        let text = self.control.get_info().await?.into_result("get info")?;
        let info = DeviceInfo::from_json(&text)?;
        info!(address = %self.address, model = %info.model, name = %info.camera_name, "camera info");

        let mut state = self.state();
        state.model = info.model;
        state.name = info.camera_name;
        state.nick_name = info.nick_name;
        Ok(())
    }

    async fn fetch_resolution(&self) -> Result<(), SspError> {
        let value = self
            .control
            .get_config(ConfigKey::MovieResolution)
            .await?
            .into_result("get movie resolution")?;
        let mut state = self.state();
        if !value.choices.is_empty() {
            state.resolutions = value.choices;
        }
        state.current_resolution = value.current;
        Ok(())
    }

    async fn fetch_framerate(&self) -> Result<(), SspError> {
        let value = self
            .control
            .get_config(ConfigKey::ProjectFps)
            .await?
            .into_result("get project fps")?;
        let mut state = self.state();
        if !value.choices.is_empty() {
            state.framerates = value.choices;
        }
        state.current_framerate = value.current;
        Ok(())
    }

    async fn fetch_current_stream(&self) -> Result<(), SspError> {
        let index = self
            .control
            .get_config(ConfigKey::SendStream)
            .await?
            .into_result("get send stream")?
            .current;
        let info = self
            .control
            .get_stream_info(&index)
            .await?
            .into_result("get stream info")?;
        info!(
            address = %self.address,
            stream = %info.stream_index,
            fps = info.fps,
            width = info.width,
            height = info.height,
            "current stream"
        );

        let mut state = self.state();
        state.current_index = index;
        state.current_stream = Some(info);
        Ok(())
    }

    // ── Stream setup ─────────────────────────────────────────────

    /// Bring the camera in line with `request`.
    ///
    /// On success returns a short reason (`"Success"`, `"same no need
    /// change"`, `"in streaming"`); on failure a [`SspError::DeviceControl`]
    /// describing the step that was refused.
    pub async fn set_stream(&self, request: &StreamRequest) -> Result<String, SspError> {
        let _ops = self.ops.lock().await;
        info!(
            address = %self.address,
            index = request.stream_index,
            resolution = %request.resolution,
            fps = %request.framerate,
            bitrate = request.bitrate,
            "setting stream"
        );

        let model = self.model();
        let fps: f64 = request.framerate.trim().parse().unwrap_or(0.0);
        let mut lower_resolution = false;
        if contains_ignore_case(&model, MODEL_E2C) && fps > 30.0 {
            if request.resolution != "1920*1080" {
                return Err(SspError::DeviceControl(
                    "Cannot go higher than 30fps for >1920x1080 resolution on E2C".into(),
                ));
            }
            lower_resolution = true;
        }

        if contains_ignore_case(&model, MODEL_IPMAN) {
            let index = format!("stream{}", request.stream_index + 1);
            self.control
                .set_stream_bitrate(&index, request.bitrate)
                .await?
                .into_result(format!("Could not set bitrate to {}", request.bitrate))?;
            return Ok("Success".into());
        }

        let Some((width, height)) = parse_resolution(&request.resolution) else {
            return Err(SspError::DeviceControl(format!(
                "Unknown resolution: {}",
                request.resolution
            )));
        };
        let suffix = if request.low_noise { " (Low Noise)" } else { "" };
        let movie_resolution = if lower_resolution {
            "1920x1080".to_string()
        } else {
            match request.resolution.as_str() {
                "3840*2160" | "1920*1080" => format!("4K{suffix}"),
                "4096*2160" => format!("C4K{suffix}"),
                other => {
                    return Err(SspError::DeviceControl(format!("Unknown resolution: {other}")));
                }
            }
        };
        let index = format!("Stream{}", request.stream_index);

        self.apply_resolution(&movie_resolution).await?;
        self.apply_framerate(&request.framerate).await?;
        self.apply_send_stream(&index).await?;
        self.apply_stream_attr(&index, width, height, fps, request.bitrate)
            .await
    }

    async fn apply_resolution(&self, resolution: &str) -> Result<(), SspError> {
        let current = self.state().current_resolution.clone();
        if current == resolution {
            return Ok(());
        }
        info!(address = %self.address, from = %current, to = %resolution, "movie resolution");
        self.control
            .set_config(ConfigKey::MovieResolution, resolution)
            .await?
            .into_result(format!("Failed to set movie resolution to {resolution}"))?;
        self.state().current_resolution = resolution.to_string();
        Ok(())
    }

    async fn apply_framerate(&self, fps: &str) -> Result<(), SspError> {
        let target = project_fps(fps);
        let current = self.state().current_framerate.clone();
        if current == target {
            return Ok(());
        }
        info!(address = %self.address, from = %current, to = %target, "project fps");
        self.control
            .set_config(ConfigKey::ProjectFps, target)
            .await?
            .into_result(format!("Failed to set fps to {fps}"))?;
        self.state().current_framerate = target.to_string();
        Ok(())
    }

    async fn apply_send_stream(&self, index: &str) -> Result<(), SspError> {
        let current = self.state().current_index.clone();
        if current.eq_ignore_ascii_case(index) {
            return Ok(());
        }
        info!(address = %self.address, from = %current, to = %index, "send stream");
        self.control
            .set_send_stream(index)
            .await?
            .into_result(format!("Could not switch send stream to {index}"))?;
        self.state().current_index = index.to_string();
        Ok(())
    }

    async fn apply_stream_attr(
        &self,
        index: &str,
        width: u32,
        height: u32,
        fps: f64,
        bitrate: u64,
    ) -> Result<String, SspError> {
        let index = index.to_ascii_lowercase();
        let info = self
            .control
            .get_stream_info(&index)
            .await?
            .into_result("Could not get stream info")?;
        self.state().current_stream = Some(info.clone());

        let fps = (fps + 0.1) as u32;
        if info.width == width
            && info.height == height
            && info.fps == fps
            && info.bitrate * 1000 == bitrate
            && info.gop == STREAM_GOP
        {
            return Ok("same no need change".into());
        }
        if !info.is_idle() {
            info!(address = %self.address, status = %info.status, "stream busy, attributes unchanged");
            return Ok("in streaming".into());
        }

        info!(
            address = %self.address,
            from = %format!("{}x{} {} {}", info.width, info.height, info.fps, info.bitrate * 1000),
            to = %format!("{width}x{height} {fps} {bitrate}"),
            "stream attributes"
        );
        let attr = StreamAttr {
            index,
            width,
            height,
            bitrate,
            gop: STREAM_GOP,
            fps,
            encoder: info.encoder_type,
        };
        self.control
            .set_stream_attr(&attr)
            .await?
            .into_result("Could not set stream attr")?;
        Ok("Success".into())
    }

    /// Switch the tally LED. Failures are logged.
    pub async fn set_led(&self, on: bool) {
        let _ops = self.ops.lock().await;
        let result = match self.control.set_led(on).await {
            Ok(reply) => reply.into_result("set led"),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(address = %self.address, on, "could not switch tally: {e}");
        }
    }
}

impl std::fmt::Debug for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceStatus")
            .field("address", &self.address)
            .field("state", &*self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockControl;

    fn request(resolution: &str, fps: &str) -> StreamRequest {
        StreamRequest {
            stream_index: 1,
            resolution: resolution.into(),
            low_noise: false,
            framerate: fps.into(),
            bitrate: 20_000_000,
        }
    }

    async fn refreshed(control: MockControl) -> DeviceStatus {
        let status = DeviceStatus::new("10.0.0.5", Box::new(control));
        status.refresh_all().await.unwrap();
        status
    }

    #[tokio::test]
    async fn refresh_loads_everything() {
        let status = refreshed(MockControl::new("P2")).await;
        let state = status.snapshot();
        assert_eq!(state.model, "P2");
        assert_eq!(state.current_resolution, "4K");
        assert_eq!(state.current_framerate, "29.97");
        assert_eq!(state.current_index, "stream1");
        assert_eq!(state.current_stream.unwrap().width, 1920);
    }

    #[tokio::test]
    async fn refresh_aborts_without_info() {
        let control = MockControl::new("P2");
        control.refuse("get_info");
        let log = control.log();
        let status = DeviceStatus::new("10.0.0.5", Box::new(control));
        assert!(status.refresh_all().await.is_err());
        assert!(status.model().is_empty());
        assert_eq!(*log.lock().unwrap(), ["get_info"]);
    }

    #[tokio::test]
    async fn refresh_tolerates_missing_resolution() {
        let control = MockControl::new("P2");
        control.refuse("get_config:resolution");
        let status = DeviceStatus::new("10.0.0.5", Box::new(control));
        status.refresh_all().await.unwrap();
        assert!(status.current_stream().is_some());
    }

    #[tokio::test]
    async fn unchanged_stream_needs_no_writes() {
        let control = MockControl::new("P2");
        let log = control.log();
        let status = refreshed(control).await;
        log.lock().unwrap().clear();

        let reason = status.set_stream(&request("1920*1080", "30")).await.unwrap();
        assert_eq!(reason, "same no need change");
        assert_eq!(*log.lock().unwrap(), ["get_stream_info:stream1"]);
    }

    #[tokio::test]
    async fn idle_stream_gets_new_attributes() {
        let control = MockControl::new("P2");
        let log = control.log();
        let status = refreshed(control).await;
        log.lock().unwrap().clear();

        let mut req = request("4096*2160", "60");
        req.low_noise = true;
        req.stream_index = 0;
        let reason = status.set_stream(&req).await.unwrap();
        assert_eq!(reason, "Success");
        assert_eq!(
            *log.lock().unwrap(),
            [
                "set_config:resolution=C4K (Low Noise)",
                "set_config:project_fps=59.94",
                "set_send_stream:Stream0",
                "get_stream_info:stream0",
                "set_stream_attr:stream0 4096x2160@60 20000000 gop10",
            ]
        );
        let state = status.snapshot();
        assert_eq!(state.current_resolution, "C4K (Low Noise)");
        assert_eq!(state.current_framerate, "59.94");
    }

    #[tokio::test]
    async fn busy_stream_is_left_alone() {
        let control = MockControl::new("P2");
        control.set_stream_status("streaming");
        let status = refreshed(control).await;
        let reason = status.set_stream(&request("3840*2160", "25")).await.unwrap();
        assert_eq!(reason, "in streaming");
    }

    #[tokio::test]
    async fn e2c_limits_high_framerates() {
        let status = refreshed(MockControl::new("Z CAM E2C")).await;
        let err = status.set_stream(&request("3840*2160", "60")).await.unwrap_err();
        assert!(matches!(err, SspError::DeviceControl(msg) if msg.contains("30fps")));
    }

    #[tokio::test]
    async fn e2c_lowers_resolution_for_1080p60() {
        let control = MockControl::new("e2c");
        let log = control.log();
        let status = refreshed(control).await;
        log.lock().unwrap().clear();

        status.set_stream(&request("1920*1080", "60")).await.unwrap();
        assert_eq!(log.lock().unwrap()[0], "set_config:resolution=1920x1080");
    }

    #[tokio::test]
    async fn ipman_sets_bitrate_only() {
        let control = MockControl::new("IPMAN-S");
        let log = control.log();
        let status = refreshed(control).await;
        log.lock().unwrap().clear();

        let reason = status.set_stream(&request("bogus", "30")).await.unwrap();
        assert_eq!(reason, "Success");
        assert_eq!(*log.lock().unwrap(), ["set_stream_bitrate:stream2=20000000"]);
    }

    #[tokio::test]
    async fn unknown_resolution_is_rejected() {
        let status = refreshed(MockControl::new("P2")).await;
        let err = status.set_stream(&request("1280*720", "30")).await.unwrap_err();
        assert!(matches!(err, SspError::DeviceControl(msg) if msg.starts_with("Unknown resolution")));
    }

    #[tokio::test]
    async fn refused_step_reports_reason() {
        let control = MockControl::new("P2");
        control.refuse("set_config:project_fps");
        let status = refreshed(control).await;
        let err = status.set_stream(&request("1920*1080", "60")).await.unwrap_err();
        assert!(matches!(err, SspError::DeviceControl(msg) if msg.starts_with("Failed to set fps to 60")));
    }

    #[tokio::test]
    async fn led_goes_through_config() {
        let control = MockControl::new("P2");
        let log = control.log();
        let status = DeviceStatus::new("10.0.0.5", Box::new(control));
        status.set_led(true).await;
        status.set_led(false).await;
        assert_eq!(*log.lock().unwrap(), ["set_config:led=On", "set_config:led=Off"]);
    }
}
