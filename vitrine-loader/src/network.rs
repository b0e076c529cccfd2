//! Network signal adapter.
//!
//! Turns raw connectivity readings into [`NetworkQuality`] classes and
//! publishes them on a watch channel. Subscribers only wake when the class
//! changes, not on every reading.

use tokio::sync::watch;
use tracing::debug;
use vitrine_core::NetworkQuality;

/// Publishes the current network quality class.
#[derive(Debug)]
pub struct NetworkMonitor {
    sender: watch::Sender<NetworkQuality>,
}

impl NetworkMonitor {
    pub fn new(initial: NetworkQuality) -> Self {
        let (sender, _) = watch::channel(initial);
        Self { sender }
    }

    /// Feed one reading. Returns the class it maps to.
    pub fn report(&self, downlink_mbps: Option<f64>, online: bool) -> NetworkQuality {
        let quality = NetworkQuality::classify(downlink_mbps, online);
        let changed = self.sender.send_if_modified(|current| {
            if *current == quality {
                false
            } else {
                *current = quality;
                true
            }
        });
        if changed {
            debug!(quality = %quality, downlink_mbps = ?downlink_mbps, "Network class changed");
        }
        quality
    }

    pub fn current(&self) -> NetworkQuality {
        *self.sender.borrow()
    }

    /// A receiver suitable for [`FastLoader::attach_network`](crate::FastLoader::attach_network).
    pub fn subscribe(&self) -> watch::Receiver<NetworkQuality> {
        self.sender.subscribe()
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(NetworkQuality::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_classifies() {
        let monitor = NetworkMonitor::default();
        assert_eq!(monitor.report(Some(0.5), true), NetworkQuality::Slow);
        assert_eq!(monitor.current(), NetworkQuality::Slow);
        assert_eq!(monitor.report(None, false), NetworkQuality::Offline);
    }

    #[tokio::test]
    async fn test_subscribers_wake_only_on_class_change() {
        let monitor = NetworkMonitor::default();
        let mut receiver = monitor.subscribe();

        monitor.report(Some(50.0), true);
        monitor.report(Some(8.0), true);
        assert!(!receiver.has_changed().unwrap());

        monitor.report(Some(2.0), true);
        assert!(receiver.has_changed().unwrap());
        assert_eq!(*receiver.borrow_and_update(), NetworkQuality::Medium);
    }
}
