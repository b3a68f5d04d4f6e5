//! ---
//! bc_section: "02-position-engine"
//! bc_subsection: "module"
//! bc_type: "source"
//! bc_scope: "code"
//! bc_description: "Shared engine state handed to the API layer."
//! bc_version: "v0.1.0"
//! bc_owner: "tbd"
//! ---
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{ConnectError, StoreError};
use crate::hub::{BroadcastHub, Subscriber, SubscriberId};
use crate::model::{BroadcastPayload, FeedSource, Stop, VehiclePosition};
use crate::store::PositionStore;

/// Store, hub, and static route data shared by every connection.
#[derive(Clone)]
pub struct PositionService {
    store: Arc<dyn PositionStore>,
    hub: Arc<BroadcastHub>,
    source: FeedSource,
    stops: Arc<[Stop]>,
}

impl std::fmt::Debug for PositionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionService")
            .field("store", &self.store.name())
            .field("hub", &self.hub)
            .field("source", &self.source)
            .field("stops", &self.stops.len())
            .finish()
    }
}

impl PositionService {
    pub fn new(
        store: Arc<dyn PositionStore>,
        hub: Arc<BroadcastHub>,
        source: FeedSource,
        stops: Vec<Stop>,
    ) -> Self {
        Self {
            store,
            hub,
            source,
            stops: stops.into(),
        }
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    pub fn store(&self) -> &Arc<dyn PositionStore> {
        &self.store
    }

    pub fn source(&self) -> FeedSource {
        self.source
    }

    pub fn stops(&self) -> &[Stop] {
        &self.stops
    }

    /// Every live vehicle position.
    pub async fn snapshot(&self) -> Result<Vec<VehiclePosition>, StoreError> {
        self.store.read_all().await
    }

    /// Prime `subscriber` with the current snapshot, then register it for broadcasts.
    ///
    /// The priming message is sent even when no vehicle is live. A store failure
    /// primes with an empty list rather than refusing the connection.
    pub async fn connect(
        &self,
        subscriber: Arc<dyn Subscriber>,
    ) -> Result<SubscriberId, ConnectError> {
        let buses = match self.snapshot().await {
            Ok(buses) => buses,
            Err(err) => {
                warn!(error = %err, "snapshot unavailable while priming subscriber");
                Vec::new()
            }
        };
        let priming = BroadcastPayload::priming(buses, self.source);
        let message: Arc<str> = serde_json::to_string(&priming)?.into();
        subscriber.send(message).await?;
        let id = self.hub.register(subscriber);
        debug!(subscriber = %id, "subscriber primed");
        Ok(id)
    }

    pub fn disconnect(&self, id: SubscriberId) {
        self.hub.unregister(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SendError;
    use crate::hub::ChannelSubscriber;
    use crate::model::{VehicleStatus, NO_STOP};
    use crate::store::MemoryPositionStore;
    use std::time::Duration;

    fn service() -> (PositionService, Arc<dyn PositionStore>) {
        let store: Arc<dyn PositionStore> =
            Arc::new(MemoryPositionStore::new(Duration::from_secs(30)));
        let service = PositionService::new(
            store.clone(),
            Arc::new(BroadcastHub::new()),
            FeedSource::Demo,
            Vec::new(),
        );
        (service, store)
    }

    #[tokio::test]
    async fn priming_message_is_sent_even_when_empty() {
        let (service, _) = service();
        let (subscriber, mut rx) = ChannelSubscriber::channel(4, Duration::from_millis(100));
        let id = service.connect(Arc::new(subscriber)).await.unwrap();

        let message = rx.recv().await.unwrap();
        assert_eq!(&*message, r#"{"buses":[],"source":"demo"}"#);
        assert!(service.hub().contains(id));

        service.disconnect(id);
        assert!(service.hub().is_empty());
    }

    #[tokio::test]
    async fn priming_carries_live_positions() {
        let (service, store) = service();
        store
            .write(&VehiclePosition {
                vehicle_id: "DL-01".into(),
                route_name: "r".into(),
                latitude: 28.6,
                longitude: 77.2,
                heading: 10.0,
                speed_kmh: 20.0,
                timestamp: 1.0,
                status: VehicleStatus::Running,
                last_stop_index: NO_STOP,
            })
            .await
            .unwrap();

        let (subscriber, mut rx) = ChannelSubscriber::channel(4, Duration::from_millis(100));
        service.connect(Arc::new(subscriber)).await.unwrap();
        let priming: BroadcastPayload =
            serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(priming.buses.len(), 1);
        assert_eq!(priming.buses[0].vehicle_id, "DL-01");
        assert!(priming.stop_event.is_none());
    }

    #[tokio::test]
    async fn failed_priming_does_not_register() {
        let (service, _) = service();
        let (subscriber, rx) = ChannelSubscriber::channel(1, Duration::from_millis(10));
        drop(rx);
        let err = service.connect(Arc::new(subscriber)).await.unwrap_err();
        assert!(matches!(err, ConnectError::Send(SendError::Closed)));
        assert!(service.hub().is_empty());
    }
}
