//! The set of live printers and the restart loop around it.
//!
//! A [`Session`] is built from the [`ConfigStore`] in one go: every device is
//! connected and probed concurrently. Restarting tears the whole set down
//! and builds a fresh one, which is how configuration changes take effect.
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::mpsc;
use tracing::info;

use crate::config::{ConfigError, ConfigStore};
use crate::dispatch::PrinterClient;
use crate::poll::Poller;
use crate::safety::ConfirmationOracle;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSignal {
    /// Reload the configuration and rediscover every device.
    Restart,
    Quit,
}

pub struct Session<T, O: ?Sized> {
    clients: Vec<PrinterClient<T, O>>,
}

impl<T: Transport, O: ConfirmationOracle + ?Sized> Session<T, O> {
    pub async fn start(
        store: &dyn ConfigStore,
        transport: Arc<T>,
        oracle: Arc<O>,
    ) -> Result<Self, ConfigError> {
        let devices = store.load_devices()?;
        let clients = join_all(
            devices
                .into_iter()
                .map(|device| PrinterClient::connect(device, transport.clone(), oracle.clone())),
        )
        .await;
        info!(printers = clients.len(), "session started");
        Ok(Self { clients })
    }

    pub fn clients(&self) -> &[PrinterClient<T, O>] {
        &self.clients
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn client(&self, host: &str) -> Option<&PrinterClient<T, O>> {
        self.clients.iter().find(|client| client.host() == host)
    }
}

impl<T: Transport, O: ConfirmationOracle + ?Sized + 'static> Session<T, O> {
    /// One poller per printer, logging its status whenever it changes.
    pub fn watch_status(self: &Arc<Self>, period: Duration) -> Vec<Poller> {
        (0..self.clients.len())
            .map(|index| {
                let session = self.clone();
                let last = Arc::new(Mutex::new(None::<String>));
                Poller::spawn(period, move || {
                    let session = session.clone();
                    let last = last.clone();
                    async move {
                        let client = &session.clients[index];
                        let report = client.status_summary().await;
                        let mut last = last.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                        if last.as_deref() != Some(report.text.as_str()) {
                            info!(host = client.host(), warning = report.warning, "{}", report.text);
                            *last = Some(report.text);
                        }
                    }
                })
            })
            .collect()
    }
}

/// Runs sessions until [`SessionSignal::Quit`] arrives or the signal
/// channel closes.
///
/// `on_start` is called with every fresh session and returns the background
/// tasks belonging to it; they are stopped before the next session starts.
/// Returns how many sessions were started.
pub async fn run<T, O, F>(
    store: &dyn ConfigStore,
    transport: Arc<T>,
    oracle: Arc<O>,
    mut signals: mpsc::Receiver<SessionSignal>,
    mut on_start: F,
) -> Result<usize, ConfigError>
where
    T: Transport,
    O: ConfirmationOracle + ?Sized,
    F: FnMut(Arc<Session<T, O>>) -> Vec<Poller>,
{
    let mut started = 0;
    loop {
        let session = Arc::new(Session::start(store, transport.clone(), oracle.clone()).await?);
        started += 1;
        let pollers = on_start(session);

        let signal = signals.recv().await.unwrap_or(SessionSignal::Quit);
        for poller in pollers {
            poller.join().await;
        }
        match signal {
            SessionSignal::Restart => info!("restarting session"),
            SessionSignal::Quit => return Ok(started),
        }
    }
}
