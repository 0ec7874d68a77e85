//! The central `Daemon`: owns the machine connector, every live session,
//! and the upload staging area, and wires the machine-only RPCs onto the
//! machine connector's registry.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use tokio::sync::{broadcast, Mutex};

use beacon_core::{DaemonConfig, MachineMetadata, SessionId};
use beacon_handlers::uploads::UploadRegistry;
use beacon_transport::{BootstrapClient, MachineConnector};

use crate::error::BeaconError;
use crate::machine_rpc::install_machine_rpc;
use crate::sessions::SessionHandle;

/// Owns every collaborator needed to run one daemon process end to end:
/// the bootstrap client, the machine connector, the live session table, and
/// the shared upload staging area.
pub struct Daemon {
    pub(crate) config: DaemonConfig,
    pub(crate) bootstrap: BootstrapClient,
    pub(crate) machine: Arc<MachineConnector>,
    pub(crate) sessions: Mutex<HashMap<SessionId, Arc<SessionHandle>>>,
    pub(crate) uploads: Arc<UploadRegistry>,
    pub(crate) home: Arc<PathBuf>,
    pub(crate) shutdown_tx: broadcast::Sender<()>,
}

impl Daemon {
    /// Register this machine over HTTP, construct the machine connector
    /// seeded with the returned record, install the machine-only RPCs, and
    /// return the running `Daemon`.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::Transport`] if the HTTP bootstrap call or the
    /// `reqwest::Client` construction fails.
    pub async fn bootstrap(
        config: DaemonConfig,
        machine_metadata: MachineMetadata,
        home: PathBuf,
    ) -> Result<Arc<Self>, BeaconError> {
        let bootstrap = BootstrapClient::new(config.server_url.clone(), config.bearer_token.clone())?;
        let machine = bootstrap
            .get_or_create_machine(config.machine_id.as_str(), &machine_metadata, None)
            .await?;

        let connector = MachineConnector::new(
            config.clone(),
            machine.metadata,
            machine.metadata_version,
            machine.daemon_state,
            machine.daemon_state_version,
        );

        let uploads = Arc::new(UploadRegistry::new(config.blobs_root.clone()));
        let home = Arc::new(home);
        let (shutdown_tx, _) = broadcast::channel(1);

        let daemon = Arc::new_cyclic(|weak: &Weak<Daemon>| Self {
            config,
            bootstrap,
            machine: connector,
            sessions: Mutex::new(HashMap::new()),
            uploads,
            home,
            shutdown_tx,
        });

        install_machine_rpc(Arc::downgrade(&daemon), daemon.machine.rpc()).await;

        Ok(daemon)
    }

    /// Run the machine connector's connect/reconnect loop until shutdown is
    /// requested, either through `stop-daemon` or an external signal.
    pub async fn run(self: &Arc<Self>) {
        let machine_shutdown = self.shutdown_tx.subscribe();
        Arc::clone(&self.machine).run(machine_shutdown).await;
    }

    /// Broadcast shutdown to the machine connector and every live session,
    /// waiting for each session to finish tearing down first.
    pub async fn shutdown(&self) {
        let handles: Vec<Arc<SessionHandle>> = self.sessions.lock().await.drain().map(|(_, v)| v).collect();
        for handle in handles {
            handle.shutdown().await;
        }
        let _ = self.shutdown_tx.send(());
    }

    /// Register a freshly spawned session in the live-session table.
    pub(crate) async fn track_session(&self, handle: Arc<SessionHandle>) {
        self.sessions.lock().await.insert(handle.id.clone(), handle);
    }

    /// Remove and tear down a session by id.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::UnknownSession`] if no session with this id is
    /// currently tracked.
    pub(crate) async fn stop_session(&self, id: &SessionId) -> Result<(), BeaconError> {
        let handle = self.sessions.lock().await.remove(id);
        match handle {
            Some(handle) => {
                handle.shutdown().await;
                Ok(())
            },
            None => Err(BeaconError::UnknownSession(id.clone())),
        }
    }
}
