//! A spawned session's bundle of live collaborators: its connector, its
//! permission gateway, and the shutdown channel that ends it independently
//! of the daemon-wide one.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast;

use beacon_approval::AutoApprovalOverrides;
use beacon_core::{AgentState, DaemonConfig, SessionId, SessionMetadata};
use beacon_handlers::uploads::UploadRegistry;
use beacon_sandbox::WorkingRoot;
use beacon_transport::{BootstrapClient, SessionConnector, TransportError};

use crate::permission_gateway::{install_permission_handler, PermissionGateway};
use crate::sandboxed_handlers::{install_sandboxed_handlers, install_upload_handlers};

/// Everything spawned for one live session.
pub struct SessionHandle {
    /// The session's own id.
    pub id: SessionId,
    /// The session-scoped connector.
    pub connector: Arc<SessionConnector>,
    /// The session's permission gateway.
    pub permissions: Arc<PermissionGateway>,
    /// Shutdown channel for this session alone; dropping the last sender
    /// lets its `run()` loop's `broadcast::Receiver` see the channel close.
    shutdown_tx: broadcast::Sender<()>,
}

impl SessionHandle {
    /// End this session: stop its connector's run loop, cancel any
    /// outstanding permission requests, and close its terminals.
    pub async fn shutdown(&self) {
        self.permissions.cancel_all("session ended", "session ended").await;
        let _ = self.shutdown_tx.send(());
        self.connector.end_session("stopped").await;
    }
}

/// Bootstrap a new session over HTTP, construct its connector, install the
/// generic sandboxed handlers, upload handlers, and permission RPC handler
/// on its registry, and start its `run()` loop on the `tokio` runtime.
///
/// # Errors
///
/// Returns [`TransportError`] if the HTTP bootstrap call fails.
pub async fn spawn_session(
    config: DaemonConfig,
    bootstrap: &BootstrapClient,
    tag: &str,
    host: &str,
    working_directory: PathBuf,
    home: Arc<PathBuf>,
    uploads: Arc<UploadRegistry>,
) -> Result<Arc<SessionHandle>, TransportError> {
    let metadata = SessionMetadata {
        working_path: working_directory.display().to_string(),
        host: host.to_string(),
        agent: "claude".to_string(),
        tools: Vec::new(),
        slash_commands: Vec::new(),
        summary: None,
        ended: false,
    };
    let session = bootstrap.get_or_create_session(tag, &metadata, &AgentState::default()).await?;

    let connector = SessionConnector::new(
        config.clone(),
        session.id.clone(),
        session.metadata,
        session.metadata_version,
        session.agent_state,
        session.agent_state_version,
        Some(working_directory.clone()),
    );

    let root = Arc::new(
        WorkingRoot::new(working_directory.clone())
            .map_err(|err| TransportError::Protocol(err.to_string()))?,
    );

    install_sandboxed_handlers(connector.rpc(), Arc::clone(&root), Arc::clone(&home)).await;
    install_upload_handlers(connector.rpc(), Arc::clone(&uploads), Arc::new(tag.to_string())).await;

    let gateway = PermissionGateway::new(Arc::clone(&connector), AutoApprovalOverrides::default());
    install_permission_handler(connector.rpc(), Arc::clone(&gateway)).await;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(Arc::clone(&connector).run(shutdown_rx));

    Ok(Arc::new(SessionHandle {
        id: session.id,
        connector,
        permissions: gateway,
        shutdown_tx,
    }))
}
