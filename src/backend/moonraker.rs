//! Moonraker (Klipper) API adapter.
//!
//! Moonraker needs no credentials. Job status is read through its OctoPrint
//! compatibility layer so both backends share one job model; everything else
//! goes through Moonraker's own endpoints and G-code scripts.
pub(crate) mod wire;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use smol_str::SmolStr;
use tracing::info;

use super::octoprint::wire::JobResponse;
use super::{soft, Endpoint};
use crate::model::{
    newest_first, ActionTag, Axes, Axis, CapabilitySet, HeaterTarget, JobStatus, NamedCommand,
    PowerAction, PowerMethod, RecentFile, TemperatureReading,
};
use crate::transport::{Error, Transport};
use wire::{
    DeviceList, Directory, Envelope, GcodeMoveStatus, PauseResumeStatus, PrinterInfo, Query,
    TemperatureStatus, WebcamList,
};

const TEMPERATURES: &str =
    "printer/objects/query?extruder=temperature,target&heater_bed=temperature,target";
const POSITIONING: &str = "printer/objects/query?gcode_move=absolute_coordinates";
const PAUSE_STATE: &str = "printer/objects/query?pause_resume=is_paused";

pub struct MoonrakerAdapter<T> {
    host: String,
    webcam_index: usize,
    endpoint: Endpoint<T>,
}

impl<T: Transport> MoonrakerAdapter<T> {
    pub fn new(host: &str, webcam_index: usize, transport: Arc<T>) -> Self {
        Self {
            host: host.to_string(),
            webcam_index,
            endpoint: Endpoint::new(host, "/", None, transport),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    async fn result<R: DeserializeOwned>(&self, path: &str) -> Result<R, Error> {
        let envelope: Envelope<R> = self.endpoint.get_json(path).await?;
        Ok(envelope.result)
    }

    /// Offers `Turn on <device>` and `Turn off <device>` for every power
    /// device. The first device is the one switched by turn on/off.
    pub async fn discover_capabilities(&self) -> CapabilitySet {
        let devices = self.power_devices().await;
        info!(host = %self.host, ?devices, "discovered power devices");

        let Some(first) = devices.first() else {
            return CapabilitySet::none();
        };
        let power = PowerMethod::DevicePowerPlugin(first.clone());
        let commands = devices
            .iter()
            .flat_map(|device| {
                [PowerAction::On, PowerAction::Off].map(|action| {
                    NamedCommand::new(
                        format!("Turn {} {device}", action.as_str()),
                        ActionTag::DevicePower {
                            device: device.clone(),
                            action,
                        },
                    )
                })
            })
            .collect();
        CapabilitySet { power, commands }
    }

    async fn power_devices(&self) -> Vec<SmolStr> {
        soft(
            self.result::<DeviceList>("machine/device_power/devices")
                .await,
            "power devices",
        )
        .map(|list| {
            list.devices
                .into_iter()
                .filter_map(|device| device.device)
                .collect()
        })
        .unwrap_or_default()
    }

    pub async fn set_device_power(&self, device: &str, action: PowerAction) -> bool {
        let path = format!(
            "machine/device_power/device?device={}&action={}",
            urlencoding::encode(device),
            action.as_str()
        );
        self.endpoint.post(&path, "").await
    }

    pub async fn job_status(&self) -> JobStatus {
        soft(self.endpoint.get_json::<JobResponse>("api/job").await, "job status")
            .map_or_else(JobStatus::unknown, JobStatus::from)
    }

    pub async fn temperature(&self) -> TemperatureReading {
        soft(
            self.result::<Query<TemperatureStatus>>(TEMPERATURES).await,
            "temperatures",
        )
        .map_or_else(TemperatureReading::unavailable, |query| {
            TemperatureReading::from(query.status)
        })
    }

    pub async fn display_name(&self) -> String {
        soft(self.result::<PrinterInfo>("printer/info").await, "printer info")
            .and_then(|info| info.hostname)
            .unwrap_or_else(|| self.host.clone())
    }

    pub async fn recent_files(&self, count: usize) -> Vec<RecentFile> {
        let files = soft(
            self.result::<Directory>("server/files/directory").await,
            "file list",
        )
        .map(Directory::into_files)
        .unwrap_or_default();
        newest_first(files, count)
    }

    async fn gcode(&self, script: &str) -> bool {
        let path = format!("printer/gcode/script?script={}", urlencoding::encode(script));
        self.endpoint.post(&path, "").await
    }

    /// Unreadable positioning mode counts as absolute, Klipper's default.
    async fn positioning_is_absolute(&self) -> bool {
        soft(
            self.result::<Query<GcodeMoveStatus>>(POSITIONING).await,
            "positioning mode",
        )
        .and_then(|query| query.status.gcode_move)
        .and_then(|gcode_move| gcode_move.absolute_coordinates)
        .unwrap_or(true)
    }

    async fn is_paused(&self) -> bool {
        soft(
            self.result::<Query<PauseResumeStatus>>(PAUSE_STATE).await,
            "pause state",
        )
        .and_then(|query| query.status.pause_resume)
        .and_then(|pause_resume| pause_resume.is_paused)
        .unwrap_or(false)
    }

    /// One `G28` per axis, X before Y before Z. Stops at the first failure.
    pub async fn home(&self, axes: Axes) -> bool {
        for axis in axes.iter() {
            if !self.gcode(&format!("G28 {}", axis.letter())).await {
                return false;
            }
        }
        true
    }

    /// Brackets the move with a positioning mode switch when the printer is
    /// in the other mode. The mode is restored even if the move failed.
    pub async fn jog(&self, axis: Axis, distance: f64, speed: u32, relative: bool) -> bool {
        let absolute = self.positioning_is_absolute().await;
        let bracket = match (absolute, relative) {
            (true, true) => Some(("G91", "G90")),
            (false, false) => Some(("G90", "G91")),
            _ => None,
        };

        if let Some((enter, _)) = bracket {
            if !self.gcode(enter).await {
                return false;
            }
        }
        let moved = self
            .gcode(&format!("G0 {}{} F{speed}", axis.letter(), millimetres(distance)))
            .await;
        if let Some((_, leave)) = bracket {
            self.gcode(leave).await;
        }
        moved
    }

    pub async fn pause_or_resume(&self) -> bool {
        let path = if self.is_paused().await {
            "printer/print/resume"
        } else {
            "printer/print/pause"
        };
        self.endpoint.post(path, "").await
    }

    pub async fn cancel_job(&self) -> bool {
        self.endpoint.post("printer/print/cancel", "").await
    }

    pub async fn set_temperature(&self, target: HeaterTarget, celsius: u32) -> bool {
        let command = match target {
            HeaterTarget::Tool => "M104",
            HeaterTarget::Bed => "M140",
        };
        self.gcode(&format!("{command} S{celsius}")).await
    }

    pub async fn print_file(&self, path: &str) -> bool {
        let path = format!("printer/print/start?filename={}", urlencoding::encode(path));
        self.endpoint.post(&path, "").await
    }

    /// Snapshot URL of the configured webcam. `None` when the list cannot be
    /// read or the index is out of range.
    pub async fn webcam_url(&self) -> Option<String> {
        let list = soft(self.result::<WebcamList>("server/webcams/list").await, "webcams")?;
        let url = list
            .webcams
            .into_iter()
            .nth(self.webcam_index)?
            .snapshot_url?;
        if url.starts_with('/') {
            Some(format!("http://{}{url}", self.host))
        } else {
            Some(url)
        }
    }
}

/// Micrometre precision without trailing zeros: `10`, `2.5`, `0.3`.
fn millimetres(distance: f64) -> String {
    let fixed = format!("{distance:.3}");
    let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
    match trimmed {
        "-0" => "0".to_string(),
        _ => trimmed.to_string(),
    }
}
