//! OctoPrint REST API adapter.
//!
//! Every request carries the `X-Api-Key` header and is rooted at `/api/`.
pub(crate) mod wire;

use std::sync::Arc;

use serde_json::{json, Map, Value};
use smol_str::SmolStr;
use tracing::{debug, info};

use super::{encode_path, soft, Endpoint};
use crate::model::{
    newest_first, ActionTag, Axes, Axis, CapabilitySet, HeaterTarget, JobStatus, NamedCommand,
    PowerMethod, RecentFile, TemperatureReading,
};
use crate::transport::Transport;
use wire::{
    CustomCommand, FilesResponse, JobResponse, PrinterResponse, ProfilesResponse, PsuState,
};

const PSU_CONTROL: &str = "plugin/psucontrol";
const CUSTOM_COMMANDS: &str = "system/commands/custom";
const PRINTHEAD: &str = "printer/printhead";

/// Port of the mjpg-streamer instance OctoPi ships with.
const WEBCAM_PORT: u16 = 8080;

pub struct OctoPrintAdapter<T> {
    host: String,
    endpoint: Endpoint<T>,
}

impl<T: Transport> OctoPrintAdapter<T> {
    pub fn new(host: &str, api_key: impl Into<SmolStr>, transport: Arc<T>) -> Self {
        Self {
            host: host.to_string(),
            endpoint: Endpoint::new(host, "/api/", Some(api_key.into()), transport),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// PSU Control wins over custom system commands when both are present.
    /// Custom commands are offered either way, the PSU switches are appended
    /// after them.
    pub async fn discover_capabilities(&self) -> CapabilitySet {
        let psu = self.has_psu_control().await;
        let custom = self.custom_commands().await;

        let power = if psu {
            PowerMethod::PsuControlPlugin
        } else if !custom.is_empty() {
            PowerMethod::CustomSystemCommand
        } else {
            PowerMethod::None
        };
        info!(host = %self.host, ?power, "discovered power method");
        if power == PowerMethod::None {
            return CapabilitySet::none();
        }

        let mut commands: Vec<NamedCommand> = custom
            .into_iter()
            .map(|name| NamedCommand::new(name.clone(), ActionTag::CustomCommand(name)))
            .collect();
        if psu {
            commands.push(NamedCommand::new("Turn On PSU", ActionTag::PsuOn));
            commands.push(NamedCommand::new("Turn Off PSU", ActionTag::PsuOff));
        }
        CapabilitySet { power, commands }
    }

    async fn has_psu_control(&self) -> bool {
        match self.endpoint.get_json::<PsuState>(PSU_CONTROL).await {
            Ok(state) => {
                debug!(host = %self.host, on = state.is_psu_on, "psucontrol plugin found");
                true
            }
            Err(error) => {
                debug!(host = %self.host, %error, "no psucontrol plugin");
                false
            }
        }
    }

    async fn custom_commands(&self) -> Vec<SmolStr> {
        let commands = self
            .endpoint
            .get_json::<Vec<CustomCommand>>(CUSTOM_COMMANDS)
            .await;
        soft(commands, "custom commands")
            .unwrap_or_default()
            .into_iter()
            .filter_map(|command| command.action)
            .collect()
    }

    pub async fn job_status(&self) -> JobStatus {
        soft(self.endpoint.get_json::<JobResponse>("job").await, "job status")
            .map_or_else(JobStatus::unknown, JobStatus::from)
    }

    pub async fn temperature(&self) -> TemperatureReading {
        soft(
            self.endpoint.get_json::<PrinterResponse>("printer").await,
            "temperatures",
        )
        .map_or_else(TemperatureReading::unavailable, TemperatureReading::from)
    }

    pub async fn display_name(&self) -> String {
        soft(
            self.endpoint
                .get_json::<ProfilesResponse>("printerprofiles")
                .await,
            "printer profiles",
        )
        .and_then(ProfilesResponse::name)
        .unwrap_or_else(|| self.host.clone())
    }

    pub async fn recent_files(&self, count: usize) -> Vec<RecentFile> {
        let files = soft(
            self.endpoint
                .get_json::<FilesResponse>("files?recursive=true")
                .await,
            "file list",
        )
        .map(FilesResponse::into_files)
        .unwrap_or_default();
        newest_first(files, count)
    }

    pub async fn set_power(&self, on: bool) -> bool {
        let command = if on { "turnPSUOn" } else { "turnPSUOff" };
        self.post(PSU_CONTROL, json!({ "command": command })).await
    }

    pub async fn run_custom_command(&self, name: &str) -> bool {
        let path = format!("{CUSTOM_COMMANDS}/{}", urlencoding::encode(name));
        self.endpoint.post(&path, "").await
    }

    /// Homes one axis per request, always X before Y before Z. Stops at the
    /// first failure.
    pub async fn home(&self, axes: Axes) -> bool {
        for axis in axes.iter() {
            let body = json!({ "command": "home", "axes": [axis.name()] });
            if !self.post(PRINTHEAD, body).await {
                return false;
            }
        }
        true
    }

    /// OctoPrint switches to absolute positioning and back by itself when
    /// the jog carries `absolute`, so this is always a single request.
    pub async fn jog(&self, axis: Axis, distance: f64, speed: u32, relative: bool) -> bool {
        let mut body = Map::new();
        body.insert("command".into(), "jog".into());
        body.insert(axis.name().into(), distance.into());
        body.insert("speed".into(), speed.into());
        if !relative {
            body.insert("absolute".into(), true.into());
        }
        self.post(PRINTHEAD, Value::Object(body)).await
    }

    pub async fn pause_or_resume(&self) -> bool {
        self.post("job", json!({ "command": "pause", "action": "toggle" }))
            .await
    }

    pub async fn cancel_job(&self) -> bool {
        self.post("job", json!({ "command": "cancel" })).await
    }

    pub async fn set_temperature(&self, target: HeaterTarget, celsius: u32) -> bool {
        match target {
            HeaterTarget::Tool => {
                let body = json!({ "command": "target", "targets": { "tool0": celsius } });
                self.post("printer/tool", body).await
            }
            HeaterTarget::Bed => {
                let body = json!({ "command": "target", "target": celsius });
                self.post("printer/bed", body).await
            }
        }
    }

    /// `path` is `<origin>/<path>` as returned by [`Self::recent_files`].
    pub async fn print_file(&self, path: &str) -> bool {
        let path = format!("files/{}", encode_path(path));
        self.post(&path, json!({ "command": "select", "print": true }))
            .await
    }

    pub async fn webcam_url(&self) -> Option<String> {
        let hostname = without_port(&self.host);
        Some(format!("http://{hostname}:{WEBCAM_PORT}/?action=snapshot"))
    }

    async fn post(&self, path: &str, body: Value) -> bool {
        self.endpoint.post(path, &body.to_string()).await
    }
}

/// `octopi:5000` and `[::1]:5000` lose their port; `[::1]` and bare IPv6
/// addresses are kept whole.
fn without_port(host: &str) -> &str {
    match host.rsplit_once(':') {
        Some((name, port))
            if !port.contains(']') && (!name.contains(':') || name.starts_with('[')) =>
        {
            name
        }
        _ => host,
    }
}
