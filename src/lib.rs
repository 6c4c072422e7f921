pub mod backend;
pub mod camera;
pub mod config;
mod discovery;
pub mod dispatch;
pub mod model;
pub mod poll;
pub mod safety;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;

pub use backend::Backend;
pub use camera::SnapshotFeed;
pub use config::{
    BackendKind, ConfigError, ConfigStore, Credential, Device, InMemoryConfigStore,
    TomlConfigStore,
};
pub use discovery::discover;
pub use dispatch::{BrowserOpener, Outcome, PrinterClient, StatusReport, SystemBrowser};
pub use model::{Axes, Axis, CapabilitySet, JobStatus, RecentFile, TemperatureReading};
pub use poll::Poller;
pub use safety::{AutoAnswer, ConfirmationOracle, SafetyGate};
pub use session::{Session, SessionSignal};
pub use transport::{HttpTransport, Transport};
