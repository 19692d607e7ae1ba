// crates/network/src/connectivity.rs
//! Connection state monitoring and connectivity probes

use crate::error::{NetworkError, NetworkResult};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Default number of transitions buffered per subscriber
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Connectivity state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Connected,
    Connecting,
    Disconnected,
}

/// A single observed state transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub at: DateTime<Utc>,
}

#[derive(Debug)]
struct MonitorInner {
    state: Mutex<ConnectionState>,
    events: broadcast::Sender<ConnectionEvent>,
}

/// Tracks connectivity and publishes every transition to subscribers
///
/// Recovery from `Disconnected` always passes through `Connecting`, so
/// subscribers see two events rather than a jump. Subscribers only receive
/// transitions that happen after they subscribe.
#[derive(Debug, Clone)]
pub struct ConnectionMonitor {
    inner: Arc<MonitorInner>,
}

impl ConnectionMonitor {
    /// Creates a monitor that starts connected
    pub fn new() -> Self {
        Self::with_state(ConnectionState::Connected)
    }

    /// Creates a monitor in the given state
    pub fn with_state(initial: ConnectionState) -> Self {
        Self::with_event_capacity(initial, DEFAULT_EVENT_CAPACITY)
    }

    /// Creates a monitor whose subscribers may fall `capacity` transitions
    /// behind before they start losing the oldest ones
    pub fn with_event_capacity(initial: ConnectionState, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(MonitorInner {
                state: Mutex::new(initial),
                events,
            }),
        }
    }

    /// Gets the current state
    pub fn state(&self) -> ConnectionState {
        self.inner
            .state
            .lock()
            .map(|s| *s)
            .unwrap_or(ConnectionState::Disconnected)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Subscribes to transitions from this point forward.
    ///
    /// Every transition reaches every subscriber as long as it keeps within
    /// the event capacity. A subscriber that falls further behind gets
    /// `RecvError::Lagged` with the number of transitions it missed, then
    /// resumes from the oldest one still buffered; [`state`](Self::state)
    /// stays authoritative.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    /// Moves to `target`, emitting each intermediate transition.
    ///
    /// Returns the transitions that were published; setting the current
    /// state again publishes nothing.
    pub fn set_state(&self, target: ConnectionState) -> Vec<ConnectionEvent> {
        let Ok(mut state) = self.inner.state.lock() else {
            return Vec::new();
        };

        let path: &[ConnectionState] = match (*state, target) {
            (current, target) if current == target => &[],
            (ConnectionState::Disconnected, ConnectionState::Connected) => {
                &[ConnectionState::Connecting, ConnectionState::Connected]
            }
            _ => std::slice::from_ref(&target),
        };

        let mut published = Vec::with_capacity(path.len());
        for &next in path {
            let event = ConnectionEvent {
                from: *state,
                to: next,
                at: Utc::now(),
            };
            *state = next;
            log::info!("Connection state {:?} -> {:?}", event.from, event.to);
            // Sending fails only when nobody is subscribed
            let _ = self.inner.events.send(event.clone());
            published.push(event);
        }

        published
    }

    /// Feeds a reachability signal from a probe
    pub fn report(&self, reachable: bool) -> Vec<ConnectionEvent> {
        if reachable {
            self.set_state(ConnectionState::Connected)
        } else {
            self.set_state(ConnectionState::Disconnected)
        }
    }

    /// Forces the monitor offline
    pub fn simulate_connection_loss(&self) -> Vec<ConnectionEvent> {
        self.report(false)
    }

    /// Forces the monitor back online via `Connecting`
    pub fn simulate_connection_recovery(&self) -> Vec<ConnectionEvent> {
        self.report(true)
    }

    /// Spawns a task that polls `probe` every `interval` and reports the result.
    ///
    /// The task stops by itself once every handle to this monitor is dropped.
    pub fn watch<P: ConnectivityProbe>(&self, probe: P, interval: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            loop {
                let reachable = probe.check().await;
                match weak.upgrade() {
                    Some(inner) => {
                        ConnectionMonitor { inner }.report(reachable);
                    }
                    None => break,
                }
                tokio::time::sleep(interval).await;
            }
            log::debug!("Connectivity watcher stopped");
        })
    }
}

impl Default for ConnectionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// A source of reachability signals
pub trait ConnectivityProbe: Send + Sync + 'static {
    /// Returns true if the remote side currently looks reachable
    fn check(&self) -> impl Future<Output = bool> + Send;
}

/// Probe that issues HEAD requests and reports online if any URL answers
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    check_urls: Vec<String>,
}

impl HttpProbe {
    /// Creates a probe with default URLs
    pub fn new() -> NetworkResult<Self> {
        Self::with_urls(vec![
            "https://www.google.com".to_string(),
            "https://www.cloudflare.com".to_string(),
            "https://www.rust-lang.org".to_string(),
        ])
    }

    /// Creates a probe with custom URLs
    pub fn with_urls(urls: Vec<String>) -> NetworkResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            client,
            check_urls: urls,
        })
    }

    pub fn urls(&self) -> &[String] {
        &self.check_urls
    }

    /// Checks if network is available
    pub async fn is_online(&self) -> bool {
        for url in &self.check_urls {
            if self.client.head(url).send().await.is_ok() {
                return true;
            }
        }
        false
    }

    /// Checks network connectivity and returns error if offline
    pub async fn ensure_online(&self) -> NetworkResult<()> {
        if self.is_online().await {
            Ok(())
        } else {
            Err(NetworkError::NetworkUnavailable)
        }
    }
}

impl ConnectivityProbe for HttpProbe {
    fn check(&self) -> impl Future<Output = bool> + Send {
        self.is_online()
    }
}

/// Probe driven by hand, for tests and simulations
#[derive(Debug, Clone)]
pub struct ManualProbe {
    reachable: Arc<AtomicBool>,
}

impl ManualProbe {
    pub fn new(reachable: bool) -> Self {
        Self {
            reachable: Arc::new(AtomicBool::new(reachable)),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }
}

impl ConnectivityProbe for ManualProbe {
    fn check(&self) -> impl Future<Output = bool> + Send {
        let reachable = self.reachable.load(Ordering::SeqCst);
        async move { reachable }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    fn transitions(events: &[ConnectionEvent]) -> Vec<(ConnectionState, ConnectionState)> {
        events.iter().map(|e| (e.from, e.to)).collect()
    }

    #[test]
    fn test_initial_state() {
        assert_eq!(ConnectionMonitor::new().state(), Connected);
        assert_eq!(ConnectionMonitor::with_state(Disconnected).state(), Disconnected);
    }

    #[test]
    fn test_recovery_passes_through_connecting() {
        let monitor = ConnectionMonitor::new();

        let lost = monitor.simulate_connection_loss();
        assert_eq!(transitions(&lost), vec![(Connected, Disconnected)]);

        let recovered = monitor.simulate_connection_recovery();
        assert_eq!(
            transitions(&recovered),
            vec![(Disconnected, Connecting), (Connecting, Connected)]
        );
        assert!(monitor.is_connected());
    }

    #[test]
    fn test_same_state_publishes_nothing() {
        let monitor = ConnectionMonitor::new();
        assert!(monitor.set_state(Connected).is_empty());
    }

    #[test]
    fn test_connecting_to_connected_is_single_step() {
        let monitor = ConnectionMonitor::with_state(Connecting);
        let events = monitor.set_state(Connected);
        assert_eq!(transitions(&events), vec![(Connecting, Connected)]);
    }

    #[tokio::test]
    async fn test_subscribers_receive_every_transition() {
        let monitor = ConnectionMonitor::new();
        let mut first = monitor.subscribe();
        let mut second = monitor.subscribe();

        monitor.simulate_connection_loss();
        monitor.simulate_connection_recovery();

        for rx in [&mut first, &mut second] {
            let mut seen = Vec::new();
            for _ in 0..3 {
                let event = rx.recv().await.expect("event");
                seen.push((event.from, event.to));
            }
            assert_eq!(
                seen,
                vec![
                    (Connected, Disconnected),
                    (Disconnected, Connecting),
                    (Connecting, Connected)
                ]
            );
        }
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_only_new_events() {
        let monitor = ConnectionMonitor::new();
        monitor.simulate_connection_loss();

        let mut rx = monitor.subscribe();
        assert!(rx.try_recv().is_err());

        monitor.simulate_connection_recovery();
        let event = rx.recv().await.expect("event");
        assert_eq!((event.from, event.to), (Disconnected, Connecting));
    }

    #[tokio::test]
    async fn test_watch_follows_manual_probe() {
        let monitor = ConnectionMonitor::new();
        let probe = ManualProbe::new(false);
        let handle = monitor.watch(probe.clone(), Duration::from_millis(5));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(monitor.state(), Disconnected);

        probe.set_reachable(true);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(monitor.state(), Connected);

        handle.abort();
    }

    #[test]
    fn test_http_probe_with_custom_urls() {
        let probe = HttpProbe::with_urls(vec!["https://example.com".to_string()])
            .expect("Failed to create probe");
        assert_eq!(probe.urls(), ["https://example.com".to_string()]);
    }

    #[tokio::test]
    async fn test_http_probe_unreachable_host() {
        // Port 9 (discard) on loopback is refused on any normal machine
        let probe = HttpProbe::with_urls(vec!["http://127.0.0.1:9".to_string()])
            .expect("Failed to create probe");
        assert!(!probe.check().await);
        assert!(matches!(
            probe.ensure_online().await,
            Err(NetworkError::NetworkUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_lagging_subscriber_is_told_what_it_missed() {
        use tokio::sync::broadcast::error::RecvError;

        let monitor = ConnectionMonitor::with_event_capacity(Connected, 2);
        let mut rx = monitor.subscribe();

        monitor.simulate_connection_loss();
        monitor.simulate_connection_recovery();
        monitor.simulate_connection_loss();

        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(2))));
        let event = rx.recv().await.expect("event");
        assert_eq!((event.from, event.to), (Connecting, Connected));
        let event = rx.recv().await.expect("event");
        assert_eq!((event.from, event.to), (Connected, Disconnected));
        assert_eq!(monitor.state(), Disconnected);
    }

    #[test]
    fn test_default_capacity_holds_many_transitions() {
        let monitor = ConnectionMonitor::new();
        let mut rx = monitor.subscribe();

        for _ in 0..(DEFAULT_EVENT_CAPACITY / 3) {
            monitor.simulate_connection_loss();
            monitor.simulate_connection_recovery();
        }

        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, (DEFAULT_EVENT_CAPACITY / 3) * 3);
    }
}
