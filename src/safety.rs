//! Confirmation before risky commands.
//!
//! The gate reads the live printer state right before the command it
//! guards, and asks the user through a [`ConfirmationOracle`] when the
//! printer is busy or hot. Nothing is cached between checks.
use tracing::info;

use crate::backend::Backend;
use crate::transport::Transport;

pub const WARNING_TITLE: &str = "OctoTray Warning";

/// Asks the user a question. Implemented by whatever front end is in use.
pub trait ConfirmationOracle: Send + Sync {
    /// Returns `true` when the user agreed. For plain messages
    /// (`yes_no == false`) the answer carries no meaning.
    fn ask(&self, title: &str, primary: &str, secondary: Option<&str>, yes_no: bool) -> bool;
}

/// Answers every question the same way without asking anyone, e.g. for a
/// `--yes` command line flag.
#[derive(Debug, Clone, Copy)]
pub struct AutoAnswer(pub bool);

impl ConfirmationOracle for AutoAnswer {
    fn ask(&self, _title: &str, _primary: &str, _secondary: Option<&str>, _yes_no: bool) -> bool {
        self.0
    }
}

pub struct SafetyGate<'a, T, O: ?Sized> {
    backend: &'a Backend<T>,
    oracle: &'a O,
}

impl<'a, T: Transport, O: ConfirmationOracle + ?Sized> SafetyGate<'a, T, O> {
    pub fn new(backend: &'a Backend<T>, oracle: &'a O) -> Self {
        Self { backend, oracle }
    }

    fn confirm(&self, warning: &str, action: &str) -> bool {
        let question = format!("Do you really want to {action}?");
        let proceed = self
            .oracle
            .ask(WARNING_TITLE, warning, Some(&question), true);
        if !proceed {
            info!(host = self.backend.host(), action, "declined by user");
        }
        proceed
    }

    /// Asks before `action` while a job is running, pausing or paused.
    pub async fn state_check(&self, action: &str) -> bool {
        let status = self.backend.job_status().await;
        if status.is_running_or_pausing() {
            self.confirm("The printer seems to be running currently!", action)
        } else {
            true
        }
    }

    /// Asks before `action` while a hotend is above the handling limit.
    /// An unreadable temperature does not ask.
    pub async fn temperature_check(&self, action: &str) -> bool {
        let reading = self.backend.temperature().await;
        if reading.is_safe_to_handle() {
            true
        } else {
            self.confirm("The printer seems to still be hot!", action)
        }
    }

    /// State check, then temperature check. The temperature is not read at
    /// all when the state check already refused.
    pub async fn guarded_check(&self, action: &str) -> bool {
        self.state_check(action).await && self.temperature_check(action).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::config::Device;
    use crate::testing::{MockOracle, MockTransport};
    use crate::transport::Method;

    fn octoprint(transport: &Arc<MockTransport>) -> Backend<MockTransport> {
        Backend::new(&Device::octoprint("octopi", "KEY"), transport.clone())
    }

    fn printing(transport: &MockTransport) {
        transport.on_get("/api/job", json!({ "state": "Printing", "progress": {} }));
    }

    fn hot(transport: &MockTransport) {
        transport.on_get(
            "/api/printer",
            json!({ "temperature": { "tool0": { "actual": 205.0, "target": 205.0 } } }),
        );
    }

    #[tokio::test]
    async fn idle_printer_needs_no_confirmation() {
        let transport = Arc::new(MockTransport::new());
        transport.on_get("/api/job", json!({ "state": "Operational" }));
        let backend = octoprint(&transport);
        let oracle = MockOracle::answering(false);

        assert!(SafetyGate::new(&backend, &oracle).state_check("home it").await);
        assert_eq!(oracle.asked(), 0);
    }

    #[tokio::test]
    async fn running_printer_asks() {
        let transport = Arc::new(MockTransport::new());
        printing(&transport);
        let backend = octoprint(&transport);

        let oracle = MockOracle::answering(false);
        assert!(!SafetyGate::new(&backend, &oracle).state_check("move it").await);
        assert_eq!(
            oracle.prompts(),
            ["The printer seems to be running currently! Do you really want to move it?"]
        );

        let oracle = MockOracle::answering(true);
        assert!(SafetyGate::new(&backend, &oracle).state_check("move it").await);
    }

    #[tokio::test]
    async fn hot_printer_asks() {
        let transport = Arc::new(MockTransport::new());
        hot(&transport);
        let backend = octoprint(&transport);
        let oracle = MockOracle::answering(false);

        assert!(
            !SafetyGate::new(&backend, &oracle)
                .temperature_check("cool it down")
                .await
        );
        assert_eq!(
            oracle.prompts(),
            ["The printer seems to still be hot! Do you really want to cool it down?"]
        );
    }

    #[tokio::test]
    async fn unreadable_temperature_fails_open() {
        let transport = Arc::new(MockTransport::new());
        transport.time_out(Method::Get, "/api/printer");
        let backend = octoprint(&transport);
        let oracle = MockOracle::answering(false);

        assert!(
            SafetyGate::new(&backend, &oracle)
                .temperature_check("turn it off")
                .await
        );
        assert_eq!(oracle.asked(), 0);
    }

    #[tokio::test]
    async fn blocked_state_skips_temperature() {
        let transport = Arc::new(MockTransport::new());
        printing(&transport);
        hot(&transport);
        let backend = octoprint(&transport);
        let oracle = MockOracle::answering(false);

        assert!(
            !SafetyGate::new(&backend, &oracle)
                .guarded_check("turn it off")
                .await
        );
        assert_eq!(oracle.asked(), 1);
        assert_eq!(transport.count(Method::Get, "/api/printer"), 0);
    }

    #[tokio::test]
    async fn guarded_check_asks_twice_when_busy_and_hot() {
        let transport = Arc::new(MockTransport::new());
        printing(&transport);
        hot(&transport);
        let backend = octoprint(&transport);
        let oracle = MockOracle::answering(true);

        assert!(
            SafetyGate::new(&backend, &oracle)
                .guarded_check("turn it off")
                .await
        );
        assert_eq!(oracle.asked(), 2);
        assert_eq!(transport.count(Method::Get, "/api/printer"), 1);
    }

    #[tokio::test]
    async fn every_check_reads_fresh_state() {
        let transport = Arc::new(MockTransport::new());
        transport.on_get("/api/job", json!({ "state": "Operational" }));
        let backend = octoprint(&transport);
        let oracle = AutoAnswer(true);
        let gate = SafetyGate::new(&backend, &oracle);

        gate.state_check("home it").await;
        gate.state_check("home it").await;
        assert_eq!(transport.count(Method::Get, "/api/job"), 2);
    }
}
