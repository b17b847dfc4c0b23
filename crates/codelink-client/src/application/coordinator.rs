//! ConnectionCoordinator: the single facade the UI layer talks to.
//!
//! The coordinator owns a [`ServiceDiscoveryEngine`] and a [`ConnectionClient`]
//! and adds the little bit of state that belongs to neither:
//!
//! - the **selected service** (what the user last asked to connect to),
//! - the **editor-state snapshot** mirrored from the companion,
//! - the **error message** shown to the user until dismissed.
//!
//! # Data flow
//!
//! ```text
//!  UI ── start_scanning / refresh ──► discovery ──► services (watch)
//!  UI ── connect(service) ──────────► client ──► state (watch)
//!                                        │
//!                                        └─ inbound messages ──► pump task
//!                                                                   │
//!                                         EditorStateSync ──► editor snapshot (watch)
//!                                         Failed(reason)  ──► error message (watch)
//! ```
//!
//! The pump task is the only writer of the snapshot and error from the
//! session side.  Messages tagged with a retired session generation are
//! dropped, so a late frame from a previous companion never shows up after
//! `disconnect()` or a new `connect()`.
//!
//! # Ordering
//!
//! `connect()` and `disconnect()` clear the snapshot and error while holding
//! the coordinator's view lock, and they raise a generation floor under that
//! same lock.  The pump checks a message's generation and writes its update
//! under the same lock too, so an update from a retired session can never
//! land after the clear.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use codelink_core::{
    ConnectionInfo, ConnectionState, EditorState, ServiceRecord, WireMessage,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::domain::AppConfig;
use crate::infrastructure::discovery::{
    DiscoveryNotice, HttpProber, ServiceDiscoveryEngine, ServiceProber,
};
use crate::infrastructure::network::{ClientError, ConnectionClient, InboundMessage};

/// Composes discovery and the connection client for the UI layer.
pub struct ConnectionCoordinator<P: ServiceProber = HttpProber> {
    discovery: ServiceDiscoveryEngine<P>,
    client: Arc<ConnectionClient>,
    shared: Arc<Shared>,
    pump: JoinHandle<()>,
}

struct Shared {
    view: Mutex<View>,
    editor: watch::Sender<Option<EditorState>>,
    error: watch::Sender<Option<String>>,
}

#[derive(Default)]
struct View {
    selected: Option<ServiceRecord>,
    /// Lowest session generation whose updates are still applied.
    floor: u64,
}

impl Shared {
    fn view(&self) -> MutexGuard<'_, View> {
        self.view.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Selects `service` and clears the error and snapshot.  Updates from any
    /// session `client` started before this call are ignored from now on.
    fn begin(&self, client: &ConnectionClient, service: ServiceRecord) {
        let mut view = self.view();
        view.selected = Some(service);
        view.floor = client.generation() + 1;
        self.error.send_replace(None);
        self.editor.send_replace(None);
    }

    /// Disconnects `client` and clears the selection and snapshot.
    fn end(&self, client: &ConnectionClient) {
        let mut view = self.view();
        client.disconnect();
        view.selected = None;
        view.floor = client.generation() + 1;
        self.editor.send_replace(None);
    }

    /// Applies one inbound message if its session is still current.
    fn apply_inbound(&self, client: &ConnectionClient, received: InboundMessage) {
        let InboundMessage {
            generation,
            message,
        } = received;
        let view = self.view();
        if generation < view.floor || generation != client.generation() {
            debug!("dropping {} from retired session {generation}", message.message_type());
            return;
        }

        match message {
            WireMessage::EditorStateSync(sync) => {
                let snapshot = EditorState::from(sync);
                debug!(
                    "editor state: {} at {}",
                    snapshot.file_name().unwrap_or("<no file>"),
                    snapshot.cursor_label()
                );
                self.editor.send_replace(Some(snapshot));
            }
            other => debug!("observed {}", other.message_type()),
        }
    }

    /// Surfaces the client's current failure, unless its session was retired.
    fn apply_state(&self, client: &ConnectionClient) {
        let view = self.view();
        let (generation, state) = client.session_state();
        info!("connection state: {state}");
        if let ConnectionState::Failed(reason) = state {
            if generation >= view.floor {
                self.error.send_replace(Some(reason));
            } else {
                debug!("ignoring failure of retired session {generation}");
            }
        }
    }
}

impl ConnectionCoordinator<HttpProber> {
    /// Builds a coordinator with HTTP discovery from `config`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns the `reqwest` error if the discovery HTTP client cannot be
    /// built.
    pub fn from_config(config: &AppConfig) -> Result<Self, reqwest::Error> {
        let discovery = ServiceDiscoveryEngine::http(config.discovery.clone())?;
        Ok(Self::new(discovery, ConnectionClient::new(config.connection.clone())))
    }
}

impl<P: ServiceProber> ConnectionCoordinator<P> {
    /// Wires `discovery` and `client` together and starts the pump task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        discovery: ServiceDiscoveryEngine<P>,
        (client, inbound): (ConnectionClient, mpsc::Receiver<InboundMessage>),
    ) -> Self {
        let client = Arc::new(client);
        let (editor, _) = watch::channel(None);
        let (error, _) = watch::channel(None);
        let shared = Arc::new(Shared {
            view: Mutex::new(View::default()),
            editor,
            error,
        });

        let pump = tokio::spawn(pump(
            Arc::clone(&client),
            Arc::clone(&shared),
            inbound,
            client.subscribe_state(),
        ));

        Self {
            discovery,
            client,
            shared,
            pump,
        }
    }

    // ── Discovery ─────────────────────────────────────────────────────────────

    pub fn start_scanning(&self) {
        self.discovery.start_scanning();
    }

    pub fn stop_scanning(&self) {
        self.discovery.stop_scanning();
    }

    pub fn refresh(&self) {
        self.discovery.refresh();
    }

    pub fn services(&self) -> Vec<ServiceRecord> {
        self.discovery.services()
    }

    pub fn is_scanning(&self) -> bool {
        self.discovery.is_scanning()
    }

    pub fn discovery_notice(&self) -> Option<DiscoveryNotice> {
        self.discovery.notice()
    }

    pub fn discovery(&self) -> &ServiceDiscoveryEngine<P> {
        &self.discovery
    }

    // ── Connection ────────────────────────────────────────────────────────────

    /// Connects to `service`, replacing any current session.
    ///
    /// Records the selection and clears the previous error and editor
    /// snapshot before delegating to the client.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidAddress`] if the service's endpoint is not
    /// a valid WebSocket URL.  The message is also kept as the current error.
    pub async fn connect(&self, service: ServiceRecord) -> Result<(), ClientError> {
        let endpoint = service.endpoint();
        info!("connecting to {service}");

        self.shared.begin(&self.client, service);

        self.client.connect(&endpoint).await.map_err(|e| {
            self.shared.error.send_replace(Some(e.to_string()));
            e
        })
    }

    /// Re-targets the selected service through `Reconnecting`.
    ///
    /// Does nothing when no service is selected.
    ///
    /// # Errors
    ///
    /// See [`ConnectionCoordinator::connect`].
    pub async fn reconnect(&self) -> Result<(), ClientError> {
        let Some(service) = self.selected_service() else {
            debug!("reconnect ignored: no service selected");
            return Ok(());
        };
        self.client.mark_reconnecting();
        self.connect(service).await
    }

    /// Ends the session and clears the snapshot and selection.
    pub fn disconnect(&self) {
        self.shared.end(&self.client);
    }

    /// Sends `message` on the current session.
    ///
    /// # Errors
    ///
    /// See [`ConnectionClient::send`].
    pub async fn send(&self, message: &WireMessage) -> Result<(), ClientError> {
        self.client.send(message).await
    }

    pub fn dismiss_error(&self) {
        self.shared.error.send_replace(None);
    }

    // ── Observation ───────────────────────────────────────────────────────────

    pub fn connection_state(&self) -> ConnectionState {
        self.client.state()
    }

    pub fn connection_info(&self) -> Option<ConnectionInfo> {
        self.client.connection_info()
    }

    pub fn selected_service(&self) -> Option<ServiceRecord> {
        self.shared.view().selected.clone()
    }

    pub fn editor_state(&self) -> Option<EditorState> {
        self.shared.editor.borrow().clone()
    }

    pub fn error_message(&self) -> Option<String> {
        self.shared.error.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.client.subscribe_state()
    }

    pub fn subscribe_editor(&self) -> watch::Receiver<Option<EditorState>> {
        self.shared.editor.subscribe()
    }

    pub fn subscribe_error(&self) -> watch::Receiver<Option<String>> {
        self.shared.error.subscribe()
    }

    pub fn subscribe_services(&self) -> watch::Receiver<Vec<ServiceRecord>> {
        self.discovery.subscribe_services()
    }

    /// One-line, human-readable summary for a status bar.
    pub fn status_text(&self) -> String {
        let target = self
            .selected_service()
            .map_or_else(|| "companion".to_string(), |s| s.name);

        match self.connection_state() {
            ConnectionState::Connected => format!("Connected to {target}"),
            ConnectionState::Connecting => format!("Connecting to {target}..."),
            ConnectionState::Reconnecting => format!("Reconnecting to {target}..."),
            ConnectionState::Failed(reason) => format!("Connection failed: {reason}"),
            ConnectionState::Disconnected => {
                if self.is_scanning() {
                    "Searching for companions...".to_string()
                } else if let Some(notice) = self.discovery_notice() {
                    notice.to_string()
                } else {
                    match self.services().len() {
                        0 => "Not connected".to_string(),
                        1 => "1 companion found".to_string(),
                        n => format!("{n} companions found"),
                    }
                }
            }
        }
    }
}

impl<P: ServiceProber> Drop for ConnectionCoordinator<P> {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Applies inbound messages and state changes to the shared state.
async fn pump(
    client: Arc<ConnectionClient>,
    shared: Arc<Shared>,
    mut inbound: mpsc::Receiver<InboundMessage>,
    mut state_rx: watch::Receiver<ConnectionState>,
) {
    loop {
        tokio::select! {
            received = inbound.recv() => {
                let Some(received) = received else {
                    break;
                };
                shared.apply_inbound(&client, received);
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                shared.apply_state(&client);
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::time::Duration;

    use super::*;
    use crate::domain::{ConnectionConfig, DiscoveryConfig};
    use crate::infrastructure::discovery::prober::MockServiceProber;
    use crate::infrastructure::discovery::ProbeMiss;
    use codelink_core::protocol::messages::EditorStateSync;

    fn coordinator(prober: MockServiceProber) -> ConnectionCoordinator<MockServiceProber> {
        let discovery = ServiceDiscoveryEngine::with_local_address(
            DiscoveryConfig {
                per_segment_limit: 3,
                fallback_segments: vec![Ipv4Addr::new(10, 0, 0, 0)],
                ..DiscoveryConfig::default()
            },
            prober,
            None,
        );
        let client = ConnectionClient::new(ConnectionConfig {
            connect_timeout_ms: 500,
            ..ConnectionConfig::default()
        });
        ConnectionCoordinator::new(discovery, client)
    }

    fn missing_prober() -> MockServiceProber {
        let mut prober = MockServiceProber::new();
        prober
            .expect_probe()
            .returning(|_| Err(ProbeMiss::Unreachable("refused".to_string())));
        prober
    }

    async fn wait_for_scan(coordinator: &ConnectionCoordinator<MockServiceProber>) {
        let mut rx = coordinator.discovery().subscribe_scanning();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| !*s))
            .await
            .expect("scan finished")
            .expect("engine alive");
    }

    #[tokio::test]
    async fn test_initial_status_is_not_connected() {
        let coordinator = coordinator(MockServiceProber::new());
        assert_eq!(coordinator.status_text(), "Not connected");
        assert_eq!(coordinator.connection_state(), ConnectionState::Disconnected);
        assert!(coordinator.editor_state().is_none());
    }

    #[tokio::test]
    async fn test_empty_scan_status_shows_notice() {
        // Arrange
        let coordinator = coordinator(missing_prober());

        // Act
        coordinator.start_scanning();
        wait_for_scan(&coordinator).await;

        // Assert
        assert_eq!(
            coordinator.discovery_notice(),
            Some(DiscoveryNotice::NoInstancesFound)
        );
        assert_eq!(
            coordinator.status_text(),
            "No companion instances found on the local network"
        );
    }

    #[tokio::test]
    async fn test_found_services_are_counted_in_status() {
        // Arrange
        let mut prober = MockServiceProber::new();
        prober.expect_probe().returning(|host| {
            Ok(ServiceRecord::manual(host.to_string(), 9090))
        });
        let coordinator = coordinator(prober);

        // Act
        coordinator.refresh();
        wait_for_scan(&coordinator).await;

        // Assert
        assert_eq!(coordinator.services().len(), 3);
        assert_eq!(coordinator.status_text(), "3 companions found");
    }

    #[tokio::test]
    async fn test_connect_to_invalid_endpoint_sets_error() {
        // Arrange
        let coordinator = coordinator(MockServiceProber::new());
        let service = ServiceRecord::manual("bad host", 9090);

        // Act
        let result = coordinator.connect(service).await;

        // Assert
        assert!(matches!(result, Err(ClientError::InvalidAddress { .. })));
        assert!(coordinator.error_message().is_some());
    }

    #[tokio::test]
    async fn test_failed_connection_surfaces_dismissible_error() {
        // Arrange: a port with nothing listening.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let coordinator = coordinator(MockServiceProber::new());
        let mut error_rx = coordinator.subscribe_error();

        // Act
        coordinator
            .connect(ServiceRecord::manual("127.0.0.1", port))
            .await
            .unwrap();
        let surfaced = tokio::time::timeout(Duration::from_secs(5), error_rx.wait_for(Option::is_some))
            .await
            .is_ok();

        // Assert
        assert!(surfaced, "error message expected");
        assert!(coordinator.status_text().starts_with("Connection failed:"));
        coordinator.dismiss_error();
        assert!(coordinator.error_message().is_none());
    }

    #[tokio::test]
    async fn test_disconnect_clears_selection_and_snapshot() {
        // Arrange
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let coordinator = coordinator(MockServiceProber::new());
        coordinator
            .connect(ServiceRecord::manual("127.0.0.1", port))
            .await
            .unwrap();
        assert!(coordinator.selected_service().is_some());
        assert!(coordinator.status_text().starts_with("Connecting to 127.0.0.1"));

        // Act
        coordinator.disconnect();

        // Assert
        assert!(coordinator.selected_service().is_none());
        assert!(coordinator.editor_state().is_none());
        assert_eq!(coordinator.connection_state(), ConnectionState::Disconnected);
        drop(listener);
    }

    #[tokio::test]
    async fn test_updates_from_session_before_new_selection_are_ignored() {
        // Arrange: a session that failed, then a new selection made before
        // the client has started the next session.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let coordinator = coordinator(MockServiceProber::new());
        let mut error_rx = coordinator.subscribe_error();
        coordinator
            .connect(ServiceRecord::manual("127.0.0.1", port))
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), error_rx.wait_for(Option::is_some))
            .await
            .expect("failure surfaced")
            .unwrap();
        let stale = coordinator.client.generation();
        let next = ServiceRecord::manual("127.0.0.1", 9090);
        coordinator.shared.begin(&coordinator.client, next.clone());

        // Act: the old session's failure and a late frame arrive afterwards.
        coordinator.shared.apply_state(&coordinator.client);
        coordinator.shared.apply_inbound(
            &coordinator.client,
            InboundMessage {
                generation: stale,
                message: WireMessage::EditorStateSync(EditorStateSync {
                    file_path: Some("/late.rs".to_string()),
                    cursor_line: 3,
                    cursor_column: 0,
                    content_preview: String::new(),
                }),
            },
        );

        // Assert
        assert!(coordinator.error_message().is_none());
        assert!(coordinator.editor_state().is_none());
        assert_eq!(coordinator.selected_service(), Some(next));
    }

    #[tokio::test]
    async fn test_late_frame_after_disconnect_is_ignored() {
        // Arrange
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let coordinator = coordinator(MockServiceProber::new());
        coordinator
            .connect(ServiceRecord::manual("127.0.0.1", port))
            .await
            .unwrap();
        let retired = coordinator.client.generation();

        // Act
        coordinator.disconnect();
        coordinator.shared.apply_inbound(
            &coordinator.client,
            InboundMessage {
                generation: retired,
                message: WireMessage::EditorStateSync(EditorStateSync::default()),
            },
        );

        // Assert
        assert!(coordinator.editor_state().is_none());
        drop(listener);
    }

    #[tokio::test]
    async fn test_reconnect_without_selection_is_noop() {
        let coordinator = coordinator(MockServiceProber::new());
        coordinator.reconnect().await.unwrap();
        assert_eq!(coordinator.connection_state(), ConnectionState::Disconnected);
    }
}
