use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::db::KeyValueStore;
use crate::models::Settings;
use crate::services::connectivity::{poll_connectivity, Connectivity, ConnectivityProbe};
use crate::services::gemini::ReceiptExtractor;
use crate::services::ingest::Ingestor;
use crate::services::store::ReceiptStore;
use crate::services::sync::SyncCoordinator;

pub struct AppState {
    pub store: Arc<ReceiptStore>,
    pub connectivity: Arc<Connectivity>,
    pub coordinator: Arc<SyncCoordinator>,
    pub ingestor: Ingestor,
    pub settings: Settings,
    probe: Option<Arc<dyn ConnectivityProbe>>,
}

impl AppState {
    /// Wires the store, extraction client and connectivity signal together.
    /// Without a probe the connectivity signal stays at `online`.
    pub fn new(
        backend: Box<dyn KeyValueStore>,
        settings: Settings,
        extractor: Arc<dyn ReceiptExtractor>,
        online: bool,
        probe: Option<Arc<dyn ConnectivityProbe>>,
    ) -> Self {
        let store = Arc::new(ReceiptStore::open(backend));
        let connectivity = Arc::new(Connectivity::new(online));
        let coordinator = Arc::new(SyncCoordinator::new(
            store.clone(),
            extractor.clone(),
            connectivity.clone(),
        ));
        let ingestor = Ingestor::new(store.clone(), extractor, connectivity.clone());

        AppState {
            store,
            connectivity,
            coordinator,
            ingestor,
            settings,
            probe,
        }
    }

    /// Re-probes connectivity, if a probe is configured, and returns the result.
    pub async fn refresh_connectivity(&self) -> bool {
        if let Some(probe) = &self.probe {
            self.connectivity.set_online(probe.check().await);
        }
        self.connectivity.is_online()
    }

    /// Startup sync, then a sync pass on each reconnect until Ctrl-C.
    pub async fn watch(&self, interval: Duration) -> Result<()> {
        self.refresh_connectivity().await;
        let reconnect = tokio::spawn(self.coordinator.clone().run_on_reconnect());
        let startup = self.coordinator.sync_on_startup().await?;
        info!(outcome = ?startup, "Startup sync finished");

        let poller = self.probe.clone().map(|probe| {
            tokio::spawn(poll_connectivity(probe, self.connectivity.clone(), interval))
        });

        info!(
            online = self.connectivity.is_online(),
            "Watching for connectivity changes, press Ctrl-C to stop"
        );
        tokio::signal::ctrl_c().await?;

        reconnect.abort();
        if let Some(poller) = poller {
            poller.abort();
        }
        Ok(())
    }
}
