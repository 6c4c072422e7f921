//! Backend-independent view of a printer.
//!
//! Both adapters parse their wire formats into these types, so the safety
//! gate and the dispatcher never see protocol details.
use std::fmt::{self, Write};
use std::str::FromStr;

use chrono::NaiveTime;
use smallvec::SmallVec;
use smol_str::SmolStr;

/// Job states in which moving, heating or powering the printer is risky.
pub const RISK_STATES: [&str; 3] = ["printing", "pausing", "paused"];

/// Hotend temperature (°C) above which the printer counts as hot.
pub const SAFE_HANDLING_LIMIT: f64 = 50.0;

/// How a device switches its power, as found by capability discovery.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PowerMethod {
    #[default]
    None,
    /// OctoPrint PSU Control plugin.
    PsuControlPlugin,
    /// OctoPrint custom system commands.
    CustomSystemCommand,
    /// Moonraker power device; holds the first configured device.
    DevicePowerPlugin(SmolStr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    On,
    Off,
    Toggle,
}

impl PowerAction {
    pub fn as_str(self) -> &'static str {
        match self {
            PowerAction::On => "on",
            PowerAction::Off => "off",
            PowerAction::Toggle => "toggle",
        }
    }
}

/// What a named command does when invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionTag {
    DevicePower { device: SmolStr, action: PowerAction },
    CustomCommand(SmolStr),
    PsuOn,
    PsuOff,
}

impl ActionTag {
    pub fn is_power(&self) -> bool {
        matches!(
            self,
            ActionTag::DevicePower { .. } | ActionTag::PsuOn | ActionTag::PsuOff
        )
    }
}

/// A command offered to the user, e.g. `"Turn off psu1"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedCommand {
    pub name: SmolStr,
    pub tag: ActionTag,
}

impl NamedCommand {
    pub fn new(name: impl Into<SmolStr>, tag: ActionTag) -> Self {
        Self {
            name: name.into(),
            tag,
        }
    }

    /// Commands whose name mentions "off" get the full safety check.
    pub fn is_risky(&self) -> bool {
        self.name.to_lowercase().contains("off")
    }
}

/// Result of capability discovery for one device.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CapabilitySet {
    pub power: PowerMethod,
    pub commands: Vec<NamedCommand>,
}

impl CapabilitySet {
    /// Nothing can be controlled.
    pub fn none() -> Self {
        Self::default()
    }

    /// Looks up a command by its display name, ignoring case.
    pub fn command(&self, name: &str) -> Option<&NamedCommand> {
        self.commands
            .iter()
            .find(|command| command.name.eq_ignore_ascii_case(name))
    }
}

/// Timing of a running job. Either all three values are known or none are.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JobTiming {
    pub completion: f64,
    pub elapsed_seconds: f64,
    pub remaining_seconds: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Progress {
    /// The status could not be read at all.
    Unavailable,
    /// The backend answered but reports no job timing.
    Idle,
    Running(JobTiming),
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobStatus {
    pub state: SmolStr,
    pub progress: Progress,
}

impl JobStatus {
    /// Fail-soft value returned when the job cannot be read.
    pub fn unknown() -> Self {
        Self {
            state: SmolStr::new_static("Unknown"),
            progress: Progress::Unavailable,
        }
    }

    pub fn is_running_or_pausing(&self) -> bool {
        let state = self.state.to_lowercase();
        RISK_STATES.contains(&state.as_str())
    }

    pub fn timing(&self) -> Option<&JobTiming> {
        match &self.progress {
            Progress::Running(timing) => Some(timing),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeaterReading {
    pub actual: f64,
    pub target: Option<f64>,
}

/// Temperatures as reported by the backend. Anything the backend did not
/// report, or could not be read, is absent.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TemperatureReading {
    /// Printer state reported alongside the temperatures, if any.
    pub state: Option<SmolStr>,
    pub bed: Option<HeaterReading>,
    pub tools: SmallVec<[HeaterReading; 2]>,
}

impl TemperatureReading {
    /// Fail-soft value returned when temperatures cannot be read.
    ///
    /// Note that it counts as safe to handle: an unreadable printer does not
    /// block cooldown or power off.
    pub fn unavailable() -> Self {
        Self::default()
    }

    /// True iff every reported hotend is at or below
    /// [`SAFE_HANDLING_LIMIT`]. The bed is not considered.
    pub fn is_safe_to_handle(&self) -> bool {
        self.tools
            .iter()
            .all(|tool| tool.actual <= SAFE_HANDLING_LIMIT)
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_none() && self.bed.is_none() && self.tools.is_empty()
    }

    pub fn tool_actual(&self) -> Option<f64> {
        self.tools.first().map(|tool| tool.actual)
    }

    pub fn tool_target(&self) -> Option<f64> {
        self.tools.first().and_then(|tool| tool.target)
    }

    pub fn bed_actual(&self) -> Option<f64> {
        self.bed.map(|bed| bed.actual)
    }

    pub fn bed_target(&self) -> Option<f64> {
        self.bed.and_then(|bed| bed.target)
    }
}

/// `Operational - B60.0/60.0 T210.3/210.0`
impl fmt::Display for TemperatureReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut heaters = String::new();
        let labelled = self
            .bed
            .iter()
            .map(|bed| ('B', bed))
            .chain(self.tools.iter().map(|tool| ('T', tool)));
        for (label, heater) in labelled {
            write!(heaters, "{label}{:.1}", heater.actual)?;
            if let Some(target) = heater.target {
                write!(heaters, "/{target:.1}")?;
            }
            heaters.push(' ');
        }
        let heaters = heaters.trim_end();

        match (&self.state, heaters.is_empty()) {
            (Some(state), false) => write!(f, "{state} - {heaters}"),
            (Some(state), true) => f.write_str(state),
            (None, _) => f.write_str(heaters),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    pub fn letter(self) -> char {
        match self {
            Axis::X => 'X',
            Axis::Y => 'Y',
            Axis::Z => 'Z',
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Axis::X => "x",
            Axis::Y => "y",
            Axis::Z => "z",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown axis {0:?}, expected x, y or z")]
pub struct ParseAxisError(pub char);

impl FromStr for Axis {
    type Err = ParseAxisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Axis::try_from(c),
            (Some(c), Some(_)) => Err(ParseAxisError(c)),
            (None, _) => Err(ParseAxisError(' ')),
        }
    }
}

impl TryFrom<char> for Axis {
    type Error = ParseAxisError;

    fn try_from(c: char) -> Result<Self, Self::Error> {
        match c.to_ascii_lowercase() {
            'x' => Ok(Axis::X),
            'y' => Ok(Axis::Y),
            'z' => Ok(Axis::Z),
            _ => Err(ParseAxisError(c)),
        }
    }
}

/// A subset of axes. Iteration is always X, Y, Z no matter how the set was
/// built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Axes {
    x: bool,
    y: bool,
    z: bool,
}

impl Axes {
    pub fn all() -> Self {
        Self {
            x: true,
            y: true,
            z: true,
        }
    }

    pub fn with(mut self, axis: Axis) -> Self {
        match axis {
            Axis::X => self.x = true,
            Axis::Y => self.y = true,
            Axis::Z => self.z = true,
        }
        self
    }

    pub fn contains(&self, axis: Axis) -> bool {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.x || self.y || self.z)
    }

    pub fn iter(&self) -> impl Iterator<Item = Axis> + '_ {
        Axis::ALL.into_iter().filter(|axis| self.contains(*axis))
    }
}

impl FromIterator<Axis> for Axes {
    fn from_iter<I: IntoIterator<Item = Axis>>(iter: I) -> Self {
        iter.into_iter().fold(Axes::default(), Axes::with)
    }
}

/// Parses strings such as `"xyz"`, `"zx"` or `"Y"`.
impl FromStr for Axes {
    type Err = ParseAxisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.chars().map(Axis::try_from).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaterTarget {
    Tool,
    Bed,
}

/// A printable file, as listed by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct RecentFile {
    pub name: String,
    /// Backend-specific path handed back to `print_file`.
    pub path: String,
    /// Modification time in seconds since the Unix epoch.
    pub date: f64,
}

/// Sorts newest first and keeps `count` entries. Equal dates keep their
/// listing order.
pub(crate) fn newest_first(mut files: Vec<RecentFile>, count: usize) -> Vec<RecentFile> {
    files.sort_by(|a, b| b.date.total_cmp(&a.date));
    files.truncate(count);
    files
}

/// Formats a duration in seconds as `HH:MM:SS`, wrapping at 24 hours.
pub fn clock(seconds: f64) -> String {
    let seconds = seconds.max(0.0) as u32 % 86_400;
    NaiveTime::from_num_seconds_from_midnight_opt(seconds, 0)
        .map(|time| time.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "00:00:00".to_string())
}
