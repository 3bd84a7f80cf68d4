//! Edge-triggered reachability tracking.
//!
//! The monitor keeps a single `connected` flag and fires its reconnect callback only on an
//! offline to online transition. Repeated `true` signals, the initial state and going
//! offline never fire it.

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

pub type ReconnectCallback = Box<dyn Fn() + Send + Sync>;

pub struct ConnectivityMonitor {
    connected: watch::Sender<bool>,
    on_reconnect: Option<ReconnectCallback>,
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectivityMonitor {
    /// A monitor that assumes the network is up until told otherwise.
    #[must_use]
    pub fn new() -> Self {
        let (connected, _) = watch::channel(true);
        Self {
            connected,
            on_reconnect: None,
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Follow the `connected` flag, e.g. to show an offline indicator.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    /// Register the reconnect callback, replacing any previous one.
    pub fn on_reconnect(&mut self, callback: impl Fn() + Send + Sync + 'static) {
        self.on_reconnect = Some(Box::new(callback));
    }

    /// Record a reachability signal. Returns `true` when the reconnect callback fired.
    pub fn observe(&mut self, reachable: bool) -> bool {
        let was = self.connected.send_replace(reachable);
        if was == reachable {
            return false;
        }
        if !reachable {
            info!("network went offline");
            return false;
        }
        info!("network back online");
        match self.on_reconnect {
            Some(ref callback) => {
                callback();
                true
            }
            None => {
                debug!("no reconnect callback registered");
                false
            }
        }
    }

    /// Feed every signal from `signals` into the monitor until the sender side is dropped.
    pub async fn run(mut self, mut signals: mpsc::Receiver<bool>) {
        while let Some(reachable) = signals.recv().await {
            self.observe(reachable);
        }
        debug!("connectivity signal source closed");
    }
}
