use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// True if a TCP connection to `host:port` opens within `timeout`.
pub async fn probe(host: &str, port: u16, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}

/// Report reachability of the remote every `interval` until the receiver is dropped.
/// Every sample is sent; the monitor handles edge detection.
pub fn spawn_probe(
    host: String,
    port: u16,
    interval: Duration,
    tx: mpsc::Sender<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        let mut last = None;
        loop {
            ticker.tick().await;
            let reachable = probe(&host, port, interval.min(Duration::from_secs(5))).await;
            if last != Some(reachable) {
                info!(host = %host, port, reachable, "remote reachability changed");
                last = Some(reachable);
            } else {
                debug!(host = %host, port, reachable, "probe");
            }
            if tx.send(reachable).await.is_err() {
                break;
            }
        }
    })
}
