//! OctoPrint response bodies.
//!
//! Only the fields the adapter reads are modelled; everything else in the
//! payload is ignored.
use std::collections::BTreeMap;

use serde::Deserialize;
use smallvec::SmallVec;
use smol_str::SmolStr;

use crate::model::{HeaterReading, JobStatus, JobTiming, Progress, RecentFile, TemperatureReading};

/// `GET /api/plugin/psucontrol`
#[derive(Debug, Deserialize)]
pub(crate) struct PsuState {
    #[serde(rename = "isPSUOn")]
    pub is_psu_on: bool,
}

/// One entry of `GET /api/system/commands/custom`.
#[derive(Debug, Deserialize)]
pub(crate) struct CustomCommand {
    pub action: Option<SmolStr>,
}

/// `GET /api/job`. Moonraker serves the same shape from its OctoPrint
/// compatibility layer.
#[derive(Debug, Deserialize)]
pub(crate) struct JobResponse {
    pub state: Option<SmolStr>,
    pub progress: Option<JobProgress>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct JobProgress {
    pub completion: Option<f64>,
    #[serde(rename = "printTime")]
    pub print_time: Option<f64>,
    #[serde(rename = "printTimeLeft")]
    pub print_time_left: Option<f64>,
}

impl From<JobResponse> for JobStatus {
    fn from(response: JobResponse) -> Self {
        let progress = match response.progress {
            Some(JobProgress {
                completion: Some(completion),
                print_time: Some(elapsed_seconds),
                print_time_left: Some(remaining_seconds),
            }) => Progress::Running(JobTiming {
                completion,
                elapsed_seconds,
                remaining_seconds,
            }),
            Some(_) => Progress::Idle,
            None => Progress::Unavailable,
        };
        JobStatus {
            state: response
                .state
                .unwrap_or_else(|| SmolStr::new_static("Unknown")),
            progress,
        }
    }
}

/// `GET /api/printer`
#[derive(Debug, Deserialize)]
pub(crate) struct PrinterResponse {
    pub state: Option<PrinterState>,
    #[serde(default)]
    pub temperature: BTreeMap<String, Heater>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PrinterState {
    pub text: Option<SmolStr>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Heater {
    pub actual: Option<f64>,
    pub target: Option<f64>,
}

impl Heater {
    fn reading(&self) -> Option<HeaterReading> {
        self.actual.map(|actual| HeaterReading {
            actual,
            target: self.target,
        })
    }
}

impl From<PrinterResponse> for TemperatureReading {
    fn from(response: PrinterResponse) -> Self {
        let mut numbered: SmallVec<[(u32, HeaterReading); 2]> = response
            .temperature
            .iter()
            .filter_map(|(name, heater)| {
                let index = name.strip_prefix("tool")?.parse().ok()?;
                Some((index, heater.reading()?))
            })
            .collect();
        // tool2 before tool10
        numbered.sort_by_key(|(index, _)| *index);
        let tools = numbered.into_iter().map(|(_, reading)| reading).collect();
        TemperatureReading {
            state: response.state.and_then(|state| state.text),
            bed: response.temperature.get("bed").and_then(Heater::reading),
            tools,
        }
    }
}

/// `GET /api/printerprofiles`
#[derive(Debug, Deserialize)]
pub(crate) struct ProfilesResponse {
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Profile {
    pub name: Option<String>,
    #[serde(default)]
    pub default: bool,
}

impl ProfilesResponse {
    /// Name of the default profile, else of the first one listed.
    pub fn name(self) -> Option<String> {
        let mut profiles: Vec<Profile> = self.profiles.into_values().collect();
        let index = profiles
            .iter()
            .position(|profile| profile.default)
            .unwrap_or(0);
        if index < profiles.len() {
            profiles.swap_remove(index).name
        } else {
            None
        }
    }
}

/// `GET /api/files?recursive=true`
#[derive(Debug, Deserialize)]
pub(crate) struct FilesResponse {
    #[serde(default)]
    pub files: Vec<FileEntry>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FileEntry {
    pub name: String,
    pub path: Option<String>,
    pub origin: Option<String>,
    pub date: Option<f64>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub children: Vec<FileEntry>,
}

impl FilesResponse {
    /// Every dated file, folders flattened, in listing order.
    pub fn into_files(self) -> Vec<RecentFile> {
        let mut files = Vec::new();
        collect(self.files, &mut files);
        files
    }
}

fn collect(entries: Vec<FileEntry>, out: &mut Vec<RecentFile>) {
    for entry in entries {
        if entry.kind.as_deref() == Some("folder") {
            collect(entry.children, out);
            continue;
        }
        let Some(date) = entry.date else { continue };
        let origin = entry.origin.as_deref().unwrap_or("local");
        let path = entry.path.as_deref().unwrap_or(&entry.name);
        out.push(RecentFile {
            path: format!("{origin}/{path}"),
            name: entry.name,
            date,
        });
    }
}
