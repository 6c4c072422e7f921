//! Printer backends.
//!
//! [`Backend`] is a closed set of adapters, one per supported controller
//! software. Each adapter translates the uniform operations into its own
//! REST calls and parses the answers into [`crate::model`] types.
//!
//! Every adapter method is fail-soft: transport and parse errors are logged
//! and replaced with a documented default, so nothing above this module ever
//! handles protocol errors.
pub mod moonraker;
pub mod octoprint;

use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use smol_str::SmolStr;
use tracing::warn;

use crate::config::{BackendKind, Credential, Device};
use crate::model::{
    ActionTag, Axes, Axis, CapabilitySet, HeaterTarget, JobStatus, RecentFile, TemperatureReading,
};
use crate::transport::{Error, Method, Request, Transport};

pub use moonraker::MoonrakerAdapter;
pub use octoprint::OctoPrintAdapter;

/// Base URL plus credentials for one backend.
pub(crate) struct Endpoint<T> {
    base_url: String,
    api_key: Option<SmolStr>,
    transport: Arc<T>,
}

impl<T: Transport> Endpoint<T> {
    /// `root` is appended to `http://<host>` and must end with `/`.
    pub(crate) fn new(host: &str, root: &str, api_key: Option<SmolStr>, transport: Arc<T>) -> Self {
        Self {
            base_url: format!("http://{host}{root}"),
            api_key,
            transport,
        }
    }

    fn request(&self, method: Method, path: &str, body: &str) -> Request {
        let url = format!("{}{path}", self.base_url);
        let request = match method {
            Method::Get => Request::get(url),
            Method::Post => Request::post(url, body),
        };
        match &self.api_key {
            Some(key) => request.header("X-Api-Key", key.as_str()),
            None => request,
        }
    }

    async fn send(&self, request: Request) -> Result<Bytes, Error> {
        self.transport.send(request).await
    }

    /// GET `path` and parse the body as JSON.
    pub(crate) async fn get_json<R: DeserializeOwned>(&self, path: &str) -> Result<R, Error> {
        let request = self.request(Method::Get, path, "");
        let url = request.url.clone();
        let body = self.send(request).await?;
        serde_json::from_slice(&body).map_err(|e| Error::MalformedResponse {
            url,
            reason: e.to_string(),
        })
    }

    /// POST `body` to `path`. Failures are logged and reported as `false`.
    pub(crate) async fn post(&self, path: &str, body: &str) -> bool {
        let request = self.request(Method::Post, path, body);
        match self.send(request).await {
            Ok(_) => true,
            Err(error) => {
                warn!(%error, "command failed");
                false
            }
        }
    }
}

/// Logs a failed read and converts it to `None`.
pub(crate) fn soft<V>(result: Result<V, Error>, what: &str) -> Option<V> {
    match result {
        Ok(value) => Some(value),
        Err(error) => {
            warn!(%error, "could not read {what}");
            None
        }
    }
}

/// Escapes every segment of a slash separated path.
pub(crate) fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// One adapter per supported backend, chosen from the device's
/// [`BackendKind`] when the device is loaded.
pub enum Backend<T> {
    OctoPrint(OctoPrintAdapter<T>),
    Moonraker(MoonrakerAdapter<T>),
}

macro_rules! each_backend {
    ($self:ident, $adapter:ident => $body:expr) => {
        match $self {
            Backend::OctoPrint($adapter) => $body,
            Backend::Moonraker($adapter) => $body,
        }
    };
}

impl<T: Transport> Backend<T> {
    pub fn new(device: &Device, transport: Arc<T>) -> Self {
        match device.backend {
            BackendKind::OctoPrint => {
                let key = match &device.credential {
                    Credential::ApiKey(key) => key.clone(),
                    Credential::None => SmolStr::default(),
                };
                Backend::OctoPrint(OctoPrintAdapter::new(&device.host, key, transport))
            }
            BackendKind::Moonraker => Backend::Moonraker(MoonrakerAdapter::new(
                &device.host,
                device.webcam_index,
                transport,
            )),
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::OctoPrint(_) => BackendKind::OctoPrint,
            Backend::Moonraker(_) => BackendKind::Moonraker,
        }
    }

    pub fn host(&self) -> &str {
        each_backend!(self, adapter => adapter.host())
    }

    pub async fn discover_capabilities(&self) -> CapabilitySet {
        each_backend!(self, adapter => adapter.discover_capabilities().await)
    }

    pub async fn job_status(&self) -> JobStatus {
        each_backend!(self, adapter => adapter.job_status().await)
    }

    pub async fn temperature(&self) -> TemperatureReading {
        each_backend!(self, adapter => adapter.temperature().await)
    }

    pub async fn display_name(&self) -> String {
        each_backend!(self, adapter => adapter.display_name().await)
    }

    pub async fn recent_files(&self, count: usize) -> Vec<RecentFile> {
        each_backend!(self, adapter => adapter.recent_files(count).await)
    }

    pub async fn home(&self, axes: Axes) -> bool {
        each_backend!(self, adapter => adapter.home(axes).await)
    }

    pub async fn jog(&self, axis: Axis, distance: f64, speed: u32, relative: bool) -> bool {
        each_backend!(self, adapter => adapter.jog(axis, distance, speed, relative).await)
    }

    pub async fn pause_or_resume(&self) -> bool {
        each_backend!(self, adapter => adapter.pause_or_resume().await)
    }

    pub async fn cancel_job(&self) -> bool {
        each_backend!(self, adapter => adapter.cancel_job().await)
    }

    pub async fn set_temperature(&self, target: HeaterTarget, celsius: u32) -> bool {
        each_backend!(self, adapter => adapter.set_temperature(target, celsius).await)
    }

    pub async fn print_file(&self, path: &str) -> bool {
        each_backend!(self, adapter => adapter.print_file(path).await)
    }

    pub async fn webcam_url(&self) -> Option<String> {
        each_backend!(self, adapter => adapter.webcam_url().await)
    }

    pub fn web_ui_url(&self) -> String {
        format!("http://{}", self.host())
    }

    /// Runs the action behind a discovered command. Tags belonging to the
    /// other backend are refused.
    pub async fn run_action(&self, tag: &ActionTag) -> bool {
        match (self, tag) {
            (Backend::OctoPrint(adapter), ActionTag::PsuOn) => adapter.set_power(true).await,
            (Backend::OctoPrint(adapter), ActionTag::PsuOff) => adapter.set_power(false).await,
            (Backend::OctoPrint(adapter), ActionTag::CustomCommand(name)) => {
                adapter.run_custom_command(name).await
            }
            (Backend::Moonraker(adapter), ActionTag::DevicePower { device, action }) => {
                adapter.set_device_power(device, *action).await
            }
            (backend, tag) => {
                warn!(host = backend.host(), ?tag, "action not supported by this backend");
                false
            }
        }
    }
}
