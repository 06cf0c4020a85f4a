use log::{debug, info, warn};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Destination for fired tracker URLs. Sends are fire-and-forget.
pub trait TrackerSink: Send + Sync {
    fn send(&self, url: String);
}

/// Queues tracker requests for a background tokio task.
pub struct HttpTrackerQueue {
    tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl HttpTrackerQueue {
    /// Start the delivery task. Must be called from within a tokio runtime.
    pub fn spawn(timeout: Duration) -> crate::error::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let worker = tokio::spawn(async move {
            while let Some(url) = rx.recv().await {
                match client.get(&url).send().await {
                    Ok(response) if response.status().is_success() => {
                        debug!("Tracker delivered: {}", url);
                    }
                    Ok(response) => {
                        debug!("Tracker {} answered HTTP {}", url, response.status());
                    }
                    Err(e) => debug!("Tracker {} failed: {}", url, e),
                }
            }
            debug!("Tracker queue closed");
        });
        Ok(Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Stop accepting trackers and wait for the queued ones to be attempted.
    pub async fn close(&self) {
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }
        let worker = self.worker.lock().ok().and_then(|mut worker| worker.take());
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!("Tracker delivery task failed: {}", e);
            }
        }
    }
}

impl TrackerSink for HttpTrackerQueue {
    fn send(&self, url: String) {
        let sent = match self.tx.lock() {
            Ok(tx) => match tx.as_ref() {
                Some(tx) => tx.send(url).map_err(|e| e.0),
                None => Err(url),
            },
            Err(_) => Err(url),
        };
        if let Err(url) = sent {
            warn!("Dropping tracker, delivery queue is closed: {}", url);
        }
    }
}

/// Logs trackers instead of requesting them
#[derive(Debug, Default)]
pub struct LoggingSink;

impl TrackerSink for LoggingSink {
    fn send(&self, url: String) {
        info!("tracker: {}", url);
    }
}

/// Keeps every sent URL in memory
#[derive(Debug, Default)]
pub struct RecordingSink {
    urls: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().map(|urls| urls.clone()).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut urls) = self.urls.lock() {
            urls.clear();
        }
    }
}

impl TrackerSink for RecordingSink {
    fn send(&self, url: String) {
        if let Ok(mut urls) = self.urls.lock() {
            urls.push(url);
        }
    }
}
