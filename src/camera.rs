//! Webcam snapshots.
//!
//! Neither backend streams video itself; both expose a JPEG snapshot URL.
//! [`SnapshotFeed`] polls that URL and hands every frame to a broadcast
//! channel, which the binary turns into an MJPEG stream.
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::poll::Poller;
use crate::transport::{Request, Transport};

pub const DEFAULT_REFRESH: Duration = Duration::from_millis(1000);

pub struct SnapshotFeed<T> {
    transport: Arc<T>,
    url: String,
}

impl<T: Transport> SnapshotFeed<T> {
    pub fn new(transport: Arc<T>, url: impl Into<String>) -> Self {
        Self {
            transport,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// One snapshot, or `None` when it could not be fetched.
    pub async fn fetch(&self) -> Option<Bytes> {
        match self.transport.send(Request::get(self.url.clone())).await {
            Ok(frame) if frame.is_empty() => {
                warn!(url = %self.url, "empty snapshot");
                None
            }
            Ok(frame) => {
                debug!(url = %self.url, len = frame.len(), "snapshot");
                Some(frame)
            }
            Err(error) => {
                warn!(%error, "could not fetch snapshot");
                None
            }
        }
    }

    /// Fetches a snapshot every `period` and broadcasts it. Failed fetches
    /// are skipped. Frames sent while nobody listens are dropped.
    pub fn spawn(self, period: Duration, frames: broadcast::Sender<Bytes>) -> Poller {
        let feed = Arc::new(self);
        Poller::spawn(period, move || {
            let feed = feed.clone();
            let frames = frames.clone();
            async move {
                if let Some(frame) = feed.fetch().await {
                    let _ = frames.send(frame);
                }
            }
        })
    }
}
