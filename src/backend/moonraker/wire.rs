//! Moonraker response bodies. Every answer is wrapped in `{"result": ...}`.
use serde::Deserialize;
use smallvec::SmallVec;
use smol_str::SmolStr;

use crate::model::{HeaterReading, RecentFile, TemperatureReading};

#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<R> {
    pub result: R,
}

/// `machine/device_power/devices`
#[derive(Debug, Deserialize)]
pub(crate) struct DeviceList {
    #[serde(default)]
    pub devices: Vec<PowerDevice>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PowerDevice {
    pub device: Option<SmolStr>,
}

/// `printer/objects/query?...`
#[derive(Debug, Deserialize)]
pub(crate) struct Query<S> {
    pub status: S,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TemperatureStatus {
    pub extruder: Option<Sensor>,
    pub heater_bed: Option<Sensor>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Sensor {
    pub temperature: Option<f64>,
    pub target: Option<f64>,
}

impl Sensor {
    fn reading(&self) -> Option<HeaterReading> {
        self.temperature.map(|actual| HeaterReading {
            actual,
            target: self.target,
        })
    }
}

impl From<TemperatureStatus> for TemperatureReading {
    fn from(status: TemperatureStatus) -> Self {
        TemperatureReading {
            state: None,
            bed: status.heater_bed.as_ref().and_then(Sensor::reading),
            tools: status
                .extruder
                .as_ref()
                .and_then(Sensor::reading)
                .into_iter()
                .collect::<SmallVec<_>>(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct GcodeMoveStatus {
    pub gcode_move: Option<GcodeMove>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GcodeMove {
    pub absolute_coordinates: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PauseResumeStatus {
    pub pause_resume: Option<PauseResume>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PauseResume {
    pub is_paused: Option<bool>,
}

/// `printer/info`
#[derive(Debug, Deserialize)]
pub(crate) struct PrinterInfo {
    pub hostname: Option<String>,
}

/// `server/files/directory`
#[derive(Debug, Deserialize)]
pub(crate) struct Directory {
    #[serde(default)]
    pub files: Vec<FileEntry>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FileEntry {
    pub filename: String,
    pub modified: Option<f64>,
}

impl Directory {
    /// Files with a modification time, in listing order. The filename is
    /// also the path `printer/print/start` expects.
    pub fn into_files(self) -> Vec<RecentFile> {
        self.files
            .into_iter()
            .filter_map(|entry| {
                let date = entry.modified?;
                Some(RecentFile {
                    path: entry.filename.clone(),
                    name: entry.filename,
                    date,
                })
            })
            .collect()
    }
}

/// `server/webcams/list`
#[derive(Debug, Deserialize)]
pub(crate) struct WebcamList {
    #[serde(default)]
    pub webcams: Vec<Webcam>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Webcam {
    pub snapshot_url: Option<String>,
}
