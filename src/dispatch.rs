//! The uniform action surface for one printer.
//!
//! [`PrinterClient`] ties a [`Device`], its [`Backend`] and the discovered
//! [`CapabilitySet`] together and runs every user-facing operation through
//! the [`SafetyGate`] where required.
use std::fmt;
use std::process::Command;
use std::sync::Arc;

use tracing::{info, warn};

use crate::backend::Backend;
use crate::config::Device;
use crate::discovery::discover;
use crate::model::{
    clock, ActionTag, Axes, Axis, CapabilitySet, HeaterTarget, PowerAction, PowerMethod, Progress,
    RecentFile,
};
use crate::safety::{ConfirmationOracle, SafetyGate};
use crate::transport::Transport;

pub const STATUS_TITLE: &str = "OctoTray Status";

/// What happened to a requested operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The command was accepted by the backend.
    Sent,
    /// The user declined at the safety prompt; nothing was sent.
    Declined,
    /// The command was sent but the backend did not accept it.
    Failed,
    /// The device offers no way to do this.
    Unsupported,
}

impl Outcome {
    pub fn is_success(self) -> bool {
        self == Outcome::Sent
    }

    fn from_sent(sent: bool) -> Self {
        if sent {
            Outcome::Sent
        } else {
            Outcome::Failed
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Outcome::Sent => "sent",
            Outcome::Declined => "declined",
            Outcome::Failed => "failed",
            Outcome::Unsupported => "not supported",
        })
    }
}

/// Text of the status dialog. `warning` is set when the job could not be
/// read at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub title: &'static str,
    pub text: String,
    pub warning: bool,
}

/// Opens a URL for the user.
pub trait BrowserOpener {
    fn open(&self, url: &str) -> std::io::Result<()>;
}

/// Hands the URL to the platform's default handler.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl BrowserOpener for SystemBrowser {
    fn open(&self, url: &str) -> std::io::Result<()> {
        let mut command = if cfg!(target_os = "windows") {
            let mut command = Command::new("cmd");
            command.args(["/C", "start", "", url]);
            command
        } else if cfg!(target_os = "macos") {
            let mut command = Command::new("open");
            command.arg(url);
            command
        } else {
            let mut command = Command::new("xdg-open");
            command.arg(url);
            command
        };
        command.spawn().map(drop)
    }
}

pub struct PrinterClient<T, O: ?Sized> {
    device: Device,
    backend: Backend<T>,
    capabilities: CapabilitySet,
    oracle: Arc<O>,
}

impl<T: Transport, O: ConfirmationOracle + ?Sized> PrinterClient<T, O> {
    /// Builds the backend for `device` and runs capability discovery.
    pub async fn connect(device: Device, transport: Arc<T>, oracle: Arc<O>) -> Self {
        let backend = Backend::new(&device, transport);
        let capabilities = discover(&backend).await;
        Self {
            device,
            backend,
            capabilities,
            oracle,
        }
    }

    /// Skips discovery, e.g. when the capabilities are already known.
    pub fn with_capabilities(
        device: Device,
        transport: Arc<T>,
        oracle: Arc<O>,
        capabilities: CapabilitySet,
    ) -> Self {
        Self {
            backend: Backend::new(&device, transport),
            device,
            capabilities,
            oracle,
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn backend(&self) -> &Backend<T> {
        &self.backend
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    pub fn host(&self) -> &str {
        &self.device.host
    }

    fn gate(&self) -> SafetyGate<'_, T, O> {
        SafetyGate::new(&self.backend, &*self.oracle)
    }

    /// The action that switches the power `on` or off, if the device has one.
    fn power_action(&self, on: bool) -> Option<ActionTag> {
        match &self.capabilities.power {
            PowerMethod::None => None,
            PowerMethod::PsuControlPlugin => {
                Some(if on { ActionTag::PsuOn } else { ActionTag::PsuOff })
            }
            PowerMethod::CustomSystemCommand => {
                let needle = if on { "on" } else { "off" };
                self.capabilities
                    .commands
                    .iter()
                    .find(|command| {
                        matches!(command.tag, ActionTag::CustomCommand(_))
                            && command.name.to_lowercase().contains(needle)
                    })
                    .map(|command| command.tag.clone())
            }
            PowerMethod::DevicePowerPlugin(device) => Some(ActionTag::DevicePower {
                device: device.clone(),
                action: if on { PowerAction::On } else { PowerAction::Off },
            }),
        }
    }

    async fn run(&self, tag: &ActionTag) -> Outcome {
        let outcome = Outcome::from_sent(self.backend.run_action(tag).await);
        info!(host = self.host(), ?tag, %outcome, "action");
        outcome
    }

    pub async fn turn_on(&self) -> Outcome {
        match self.power_action(true) {
            Some(tag) => self.run(&tag).await,
            None => Outcome::Unsupported,
        }
    }

    pub async fn turn_off(&self) -> Outcome {
        let Some(tag) = self.power_action(false) else {
            return Outcome::Unsupported;
        };
        if !self.gate().guarded_check("turn it off").await {
            return Outcome::Declined;
        }
        self.run(&tag).await
    }

    /// Runs a discovered command by display name. Names mentioning "off"
    /// get the full safety check.
    pub async fn run_named_command(&self, name: &str) -> Outcome {
        let Some(command) = self.capabilities.command(name) else {
            warn!(host = self.host(), name, "no such command");
            return Outcome::Unsupported;
        };
        if command.is_risky() {
            let action = format!("run '{}'", command.name);
            if !self.gate().guarded_check(&action).await {
                return Outcome::Declined;
            }
        }
        self.run(&command.tag).await
    }

    pub async fn home(&self, axes: Axes) -> Outcome {
        if axes.is_empty() {
            return Outcome::Unsupported;
        }
        if !self.gate().state_check("home it").await {
            return Outcome::Declined;
        }
        Outcome::from_sent(self.backend.home(axes).await)
    }

    /// Moves `axis` by `distance` mm at the configured jog speed.
    pub async fn jog(&self, axis: Axis, distance: f64, relative: bool) -> Outcome {
        if !self.gate().state_check("move it").await {
            return Outcome::Declined;
        }
        Outcome::from_sent(
            self.backend
                .jog(axis, distance, self.device.jog_speed, relative)
                .await,
        )
    }

    pub async fn pause_resume(&self) -> Outcome {
        if !self.gate().state_check("pause/resume").await {
            return Outcome::Declined;
        }
        Outcome::from_sent(self.backend.pause_or_resume().await)
    }

    pub async fn cancel_job(&self) -> Outcome {
        if !self.gate().state_check("cancel").await {
            return Outcome::Declined;
        }
        Outcome::from_sent(self.backend.cancel_job().await)
    }

    /// Sets the hotend and the bed to 0 °C.
    pub async fn cooldown(&self) -> Outcome {
        if !self.gate().guarded_check("cool it down").await {
            return Outcome::Declined;
        }
        let tool = self.backend.set_temperature(HeaterTarget::Tool, 0).await;
        let bed = self.backend.set_temperature(HeaterTarget::Bed, 0).await;
        Outcome::from_sent(tool && bed)
    }

    pub async fn preheat_tool(&self) -> Outcome {
        self.preheat(HeaterTarget::Tool, self.device.tool_preheat).await
    }

    pub async fn preheat_bed(&self) -> Outcome {
        self.preheat(HeaterTarget::Bed, self.device.bed_preheat).await
    }

    async fn preheat(&self, target: HeaterTarget, celsius: Option<u32>) -> Outcome {
        match celsius {
            Some(celsius) => {
                Outcome::from_sent(self.backend.set_temperature(target, celsius).await)
            }
            None => Outcome::Unsupported,
        }
    }

    pub async fn print_file(&self, path: &str) -> Outcome {
        Outcome::from_sent(self.backend.print_file(path).await)
    }

    pub async fn recent_files(&self, count: usize) -> Vec<RecentFile> {
        self.backend.recent_files(count).await
    }

    pub async fn webcam_url(&self) -> Option<String> {
        self.backend.webcam_url().await
    }

    pub fn web_ui_url(&self) -> String {
        self.backend.web_ui_url()
    }

    pub fn open_web_ui(&self, opener: &impl BrowserOpener) -> Outcome {
        match opener.open(&self.web_ui_url()) {
            Ok(()) => Outcome::Sent,
            Err(error) => {
                warn!(host = self.host(), %error, "could not open browser");
                Outcome::Failed
            }
        }
    }

    pub async fn status_summary(&self) -> StatusReport {
        let mut text = self.backend.display_name().await;
        let status = self.backend.job_status().await;
        let warning = match status.progress {
            Progress::Running(timing) => {
                text.push_str(&format!(
                    "\n{:.1}% Completion\nPrinting since {}\n{} left",
                    timing.completion,
                    clock(timing.elapsed_seconds),
                    clock(timing.remaining_seconds),
                ));
                false
            }
            Progress::Idle => {
                text.push_str("\nNo job is currently running");
                false
            }
            Progress::Unavailable => {
                text.push_str("\nCould not read printer status!");
                true
            }
        };

        let temperature = self.backend.temperature().await;
        if !temperature.is_empty() {
            text.push('\n');
            text.push_str(&temperature.to_string());
        }

        StatusReport {
            title: STATUS_TITLE,
            text,
            warning,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::model::NamedCommand;
    use crate::safety::AutoAnswer;
    use crate::testing::{MockOracle, MockTransport};
    use crate::transport::Method;

    async fn octoprint(
        transport: &Arc<MockTransport>,
        oracle: &Arc<MockOracle>,
    ) -> PrinterClient<MockTransport, MockOracle> {
        PrinterClient::connect(
            Device::octoprint("octopi", "KEY").with_preheat(Some(215), None),
            transport.clone(),
            oracle.clone(),
        )
        .await
    }

    async fn moonraker(
        transport: &Arc<MockTransport>,
        oracle: &Arc<MockOracle>,
    ) -> PrinterClient<MockTransport, MockOracle> {
        PrinterClient::connect(Device::moonraker("voron"), transport.clone(), oracle.clone()).await
    }

    fn printing(transport: &MockTransport) {
        transport.on_get(
            "/api/job",
            json!({
                "state": "Printing",
                "progress": { "completion": 42.123, "printTime": 3725, "printTimeLeft": 60 }
            }),
        );
    }

    #[tokio::test]
    async fn cancel_while_printing_asks_first() {
        let transport = Arc::new(MockTransport::new());
        printing(&transport);

        let declining = Arc::new(MockOracle::answering(false));
        let client = octoprint(&transport, &declining).await;
        assert_eq!(client.cancel_job().await, Outcome::Declined);
        assert!(transport.posts("/api/job").is_empty());

        let accepting = Arc::new(MockOracle::answering(true));
        let client = octoprint(&transport, &accepting).await;
        assert_eq!(client.cancel_job().await, Outcome::Sent);
        let posts = transport.posts("/api/job");
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].json(), json!({ "command": "cancel" }));
    }

    #[tokio::test]
    async fn turn_off_moonraker_device() {
        let transport = Arc::new(MockTransport::new());
        transport.on_get(
            "/machine/device_power/devices",
            json!({ "result": { "devices": [{ "device": "psu1" }, { "device": "psu2" }] } }),
        );
        let oracle = Arc::new(MockOracle::answering(false));
        let client = moonraker(&transport, &oracle).await;
        assert_eq!(client.capabilities().commands.len(), 4);

        assert_eq!(client.run_named_command("Turn off psu1").await, Outcome::Sent);
        assert_eq!(
            transport.count(
                Method::Post,
                "/machine/device_power/device?device=psu1&action=off"
            ),
            1
        );
        assert_eq!(oracle.asked(), 0);
    }

    #[tokio::test]
    async fn moonraker_power_switches_the_first_device() {
        let transport = Arc::new(MockTransport::new());
        transport.on_get(
            "/machine/device_power/devices",
            json!({ "result": { "devices": [{ "device": "psu1" }, { "device": "psu2" }] } }),
        );
        transport.on_get(
            "/api/job",
            json!({ "state": "Printing", "progress": { "completion": 5.0, "printTime": 60, "printTimeLeft": 600 } }),
        );
        transport.on_get(
            "/printer/objects/query?extruder=temperature,target&heater_bed=temperature,target",
            json!({ "result": { "status": { "extruder": { "temperature": 215.0, "target": 215.0 } } } }),
        );
        let oracle = Arc::new(MockOracle::answering(false));
        let client = moonraker(&transport, &oracle).await;

        assert_eq!(client.turn_on().await, Outcome::Sent);
        assert_eq!(client.turn_off().await, Outcome::Declined);

        assert_eq!(
            transport.count(
                Method::Post,
                "/machine/device_power/device?device=psu1&action=on"
            ),
            1
        );
        assert_eq!(
            transport.count(
                Method::Post,
                "/machine/device_power/device?device=psu1&action=off"
            ),
            0
        );
        assert!(transport
            .requests()
            .iter()
            .all(|request| !request.path().contains("psu2")));
        assert_eq!(oracle.asked(), 1);
    }

    #[tokio::test]
    async fn power_on_is_never_gated() {
        let transport = Arc::new(MockTransport::new());
        transport.on_get("/api/plugin/psucontrol", json!({ "isPSUOn": false }));
        printing(&transport);
        let oracle = Arc::new(MockOracle::answering(false));
        let client = octoprint(&transport, &oracle).await;

        assert_eq!(client.turn_on().await, Outcome::Sent);
        assert_eq!(oracle.asked(), 0);
        assert_eq!(transport.count(Method::Get, "/api/job"), 0);
        assert_eq!(
            transport.posts("/api/plugin/psucontrol")[0].json(),
            json!({ "command": "turnPSUOn" })
        );
    }

    #[tokio::test]
    async fn power_off_declined_while_printing() {
        let transport = Arc::new(MockTransport::new());
        transport.on_get("/api/plugin/psucontrol", json!({ "isPSUOn": true }));
        printing(&transport);
        let oracle = Arc::new(MockOracle::answering(false));
        let client = octoprint(&transport, &oracle).await;

        assert_eq!(client.turn_off().await, Outcome::Declined);
        assert!(transport.posts("/api/plugin/psucontrol").is_empty());
        assert_eq!(transport.count(Method::Get, "/api/printer"), 0);
    }

    #[tokio::test]
    async fn custom_command_power_picks_matching_names() {
        let transport = Arc::new(MockTransport::new());
        let oracle = Arc::new(MockOracle::answering(true));
        let caps = CapabilitySet {
            power: PowerMethod::CustomSystemCommand,
            commands: vec![
                NamedCommand::new("Reboot", ActionTag::CustomCommand("reboot".into())),
                NamedCommand::new("Printer on", ActionTag::CustomCommand("printer_on".into())),
                NamedCommand::new("Printer off", ActionTag::CustomCommand("printer_off".into())),
            ],
        };
        let client = PrinterClient::with_capabilities(
            Device::octoprint("octopi", "KEY"),
            transport.clone(),
            oracle.clone(),
            caps,
        );

        assert_eq!(client.turn_on().await, Outcome::Sent);
        assert_eq!(client.turn_off().await, Outcome::Sent);
        assert_eq!(
            transport.count(Method::Post, "/api/system/commands/custom/printer_on"),
            1
        );
        assert_eq!(
            transport.count(Method::Post, "/api/system/commands/custom/printer_off"),
            1
        );
    }

    #[tokio::test]
    async fn no_power_method() {
        let transport = Arc::new(MockTransport::new());
        let oracle = Arc::new(MockOracle::answering(true));
        let client = moonraker(&transport, &oracle).await;

        assert_eq!(client.turn_on().await, Outcome::Unsupported);
        assert_eq!(client.turn_off().await, Outcome::Unsupported);
        assert_eq!(client.run_named_command("Turn on psu").await, Outcome::Unsupported);
        assert_eq!(oracle.asked(), 0);
    }

    #[tokio::test]
    async fn preheat_needs_a_target() {
        let transport = Arc::new(MockTransport::new());
        let oracle = Arc::new(MockOracle::answering(false));
        let client = octoprint(&transport, &oracle).await;

        assert_eq!(client.preheat_tool().await, Outcome::Sent);
        assert_eq!(client.preheat_bed().await, Outcome::Unsupported);
        assert_eq!(
            transport.posts("/api/printer/tool")[0].json(),
            json!({ "command": "target", "targets": { "tool0": 215 } })
        );
        assert!(transport.posts("/api/printer/bed").is_empty());
    }

    #[tokio::test]
    async fn cooldown_sets_both_heaters_to_zero() {
        let transport = Arc::new(MockTransport::new());
        transport.on_get("/api/job", json!({ "state": "Operational", "progress": {} }));
        transport.on_get(
            "/api/printer",
            json!({ "temperature": { "tool0": { "actual": 180.0, "target": 0.0 } } }),
        );
        let oracle = Arc::new(MockOracle::answering(true));
        let client = octoprint(&transport, &oracle).await;

        assert_eq!(client.cooldown().await, Outcome::Sent);
        assert_eq!(
            oracle.prompts(),
            ["The printer seems to still be hot! Do you really want to cool it down?"]
        );
        assert_eq!(transport.posts("/api/printer/tool").len(), 1);
        assert_eq!(
            transport.posts("/api/printer/bed")[0].json(),
            json!({ "command": "target", "target": 0 })
        );
    }

    #[tokio::test]
    async fn jog_uses_configured_speed() {
        let transport = Arc::new(MockTransport::new());
        let oracle = Arc::new(MockOracle::answering(false));
        let client = PrinterClient::connect(
            Device::octoprint("octopi", "KEY").with_jog(1500, 10),
            transport.clone(),
            oracle.clone(),
        )
        .await;

        assert_eq!(client.jog(Axis::Z, -10.0, true).await, Outcome::Sent);
        let posts = transport.posts("/api/printer/printhead");
        assert_eq!(posts.len(), 1);
        assert_eq!(
            posts[0].json(),
            json!({ "command": "jog", "z": -10.0, "speed": 1500 })
        );
    }

    #[tokio::test]
    async fn home_nothing_sends_nothing() {
        let transport = Arc::new(MockTransport::new());
        let oracle = Arc::new(MockOracle::answering(true));
        let client = octoprint(&transport, &oracle).await;
        let before = transport.requests().len();

        assert_eq!(client.home(Axes::default()).await, Outcome::Unsupported);
        assert_eq!(transport.requests().len(), before);
    }

    #[tokio::test]
    async fn failed_command_is_reported() {
        let transport = Arc::new(MockTransport::new());
        transport.reject(Method::Post, "/api/job", 409);
        let oracle = Arc::new(MockOracle::answering(true));
        let client = octoprint(&transport, &oracle).await;

        assert_eq!(client.pause_resume().await, Outcome::Failed);
    }

    #[tokio::test]
    async fn status_of_running_job() {
        let transport = Arc::new(MockTransport::new());
        printing(&transport);
        transport.on_get(
            "/api/printerprofiles",
            json!({ "profiles": { "_default": { "name": "Prusa MK3", "default": true } } }),
        );
        transport.on_get(
            "/api/printer",
            json!({
                "state": { "text": "Printing" },
                "temperature": {
                    "bed": { "actual": 60.0, "target": 60.0 },
                    "tool0": { "actual": 210.04, "target": 210.0 }
                }
            }),
        );
        let oracle = Arc::new(MockOracle::answering(true));
        let client = octoprint(&transport, &oracle).await;

        let report = client.status_summary().await;
        assert_eq!(report.title, "OctoTray Status");
        assert!(!report.warning);
        assert_eq!(
            report.text,
            "Prusa MK3\n42.1% Completion\nPrinting since 01:02:05\n00:01:00 left\n\
             Printing - B60.0/60.0 T210.0/210.0"
        );
    }

    #[tokio::test]
    async fn status_of_unreachable_printer_warns() {
        let transport = Arc::new(MockTransport::new());
        transport.time_out(Method::Get, "/api/job");
        let oracle = Arc::new(MockOracle::answering(true));
        let client = octoprint(&transport, &oracle).await;

        let report = client.status_summary().await;
        assert!(report.warning);
        assert_eq!(report.text, "octopi\nCould not read printer status!");
    }

    #[tokio::test]
    async fn status_of_idle_printer() {
        let transport = Arc::new(MockTransport::new());
        transport.on_get("/api/job", json!({ "state": "Operational", "progress": {} }));
        let oracle = Arc::new(AutoAnswer(true));
        let client = PrinterClient::connect(
            Device::octoprint("octopi", "KEY"),
            transport.clone(),
            oracle,
        )
        .await;

        let report = client.status_summary().await;
        assert!(!report.warning);
        assert_eq!(report.text, "octopi\nNo job is currently running");
    }

    #[derive(Default)]
    struct RecordingBrowser(Mutex<Vec<String>>);

    impl BrowserOpener for RecordingBrowser {
        fn open(&self, url: &str) -> std::io::Result<()> {
            self.0.lock().unwrap().push(url.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn web_ui_opens_host() {
        let transport = Arc::new(MockTransport::new());
        let oracle = Arc::new(MockOracle::answering(true));
        let client = moonraker(&transport, &oracle).await;
        let browser = RecordingBrowser::default();

        assert_eq!(client.open_web_ui(&browser), Outcome::Sent);
        assert_eq!(*browser.0.lock().unwrap(), ["http://voron"]);
    }
}
