//! Stack event dispatch
//!
//! The radio stacks report through event channels. Each dispatcher owns one
//! channel, updates the link context and issues the follow-up control
//! request for every event.

use crate::bridge::{BridgeOutcome, BridgeStats, SppBridge};
use crate::config::{GattConfig, SppConfig};
use crate::transport::ble::advertising::advertising_payload;
use crate::transport::ble::gatt::{AttributeIndex, HandleTable};
use crate::transport::{
    ByteSocket, ConnectionIndicator, GattEvent, GattLink, GattServer, SppEvent, SppLink,
    SppServer, UartPort,
};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Drives the GATT server through its lifecycle
pub struct GattDispatcher<G> {
    server: Arc<G>,
    link: Arc<GattLink>,
    config: GattConfig,
}

impl<G: GattServer + 'static> GattDispatcher<G> {
    pub fn new(server: Arc<G>, link: Arc<GattLink>, config: GattConfig) -> Self {
        Self {
            server,
            link,
            config,
        }
    }

    /// Handle stack events until the channel closes or `shutdown` fires
    pub async fn run(
        self,
        mut events: mpsc::Receiver<GattEvent>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
                _ = &mut shutdown => break,
            }
        }
        debug!("GATT dispatcher stopped");
    }

    pub fn handle_event(&self, event: GattEvent) {
        match event {
            GattEvent::Registered { ok: true } => {
                let payload =
                    advertising_payload(&self.config.device_name, self.config.conn_interval());
                if let Err(e) = self.server.set_advertising_data(&payload) {
                    error!("Setting advertising data failed: {}", e);
                }
                if let Err(e) = self.server.create_attribute_table() {
                    error!("Creating attribute table failed: {}", e);
                }
            }
            GattEvent::Registered { ok: false } => error!("GATT registration failed"),
            GattEvent::AttrTableCreated { ok, handles } => {
                let table = if ok {
                    HandleTable::from_handles(&handles)
                } else {
                    None
                };
                match table {
                    Some(table) => {
                        info!("Attribute table created: {:?}", handles);
                        self.link.on_attribute_table(table);
                        if let Err(e) = self
                            .server
                            .start_service(table.handle(AttributeIndex::Service))
                        {
                            error!("Starting service failed: {}", e);
                        }
                    }
                    None => error!(
                        "Attribute table creation failed (ok {}, {} handles, expected {})",
                        ok,
                        handles.len(),
                        AttributeIndex::COUNT
                    ),
                }
            }
            GattEvent::AdvertisingDataSet => {
                if let Err(e) = self.server.start_advertising() {
                    error!("Starting advertising failed: {}", e);
                }
            }
            GattEvent::AdvertisingStarted { ok: true } => self.link.on_advertising_started(),
            GattEvent::AdvertisingStarted { ok: false } => error!("Advertising start failed"),
            GattEvent::Connect { conn_id, remote } => self.link.on_connect(conn_id, remote),
            GattEvent::Disconnect => {
                self.link.on_disconnect();
                if let Err(e) = self.server.start_advertising() {
                    error!("Restarting advertising failed: {}", e);
                }
            }
            GattEvent::ConfigWrite {
                handle,
                value,
                is_prep,
            } => {
                self.link.on_attribute_write(handle, &value, is_prep);
            }
            GattEvent::MtuNegotiated { mtu } => self.link.on_mtu_negotiated(mtu),
            GattEvent::Congested { congested } => debug!("GATT congested: {}", congested),
        }
    }
}

struct ActiveBridge {
    stop: oneshot::Sender<()>,
    task: JoinHandle<BridgeOutcome>,
}

/// Drives the SPP server and owns the byte bridge of the open session
pub struct SppDispatcher<U, P, S> {
    uart: Arc<U>,
    server: Arc<P>,
    link: Arc<SppLink>,
    indicator: Arc<dyn ConnectionIndicator>,
    config: SppConfig,
    active: Option<ActiveBridge>,
    totals: BridgeStats,
    _socket: std::marker::PhantomData<fn(S)>,
}

impl<U, P, S> SppDispatcher<U, P, S>
where
    U: UartPort + 'static,
    P: SppServer + 'static,
    S: ByteSocket + 'static,
{
    pub fn new(
        uart: Arc<U>,
        server: Arc<P>,
        link: Arc<SppLink>,
        indicator: Arc<dyn ConnectionIndicator>,
        config: SppConfig,
    ) -> Self {
        Self {
            uart,
            server,
            link,
            indicator,
            config,
            active: None,
            totals: BridgeStats::default(),
            _socket: std::marker::PhantomData,
        }
    }

    /// A bridge task is running
    pub fn has_active_bridge(&self) -> bool {
        self.active
            .as_ref()
            .map_or(false, |active| !active.task.is_finished())
    }

    /// Handle stack events until the channel closes or `shutdown` fires.
    /// Returns the counters summed over every session.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<SppEvent<S>>,
        mut shutdown: oneshot::Receiver<()>,
    ) -> BridgeStats {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
                _ = &mut shutdown => break,
            }
        }
        self.teardown().await;
        debug!("SPP dispatcher stopped");
        self.totals
    }

    pub async fn handle_event(&mut self, event: SppEvent<S>) {
        match event {
            SppEvent::Init { ok: true } => {
                if let Err(e) = self.server.start_server(&self.config.server_name) {
                    error!("Starting SPP server failed: {}", e);
                }
            }
            SppEvent::Init { ok: false } => error!("SPP init failed"),
            SppEvent::Started => self.link.on_server_started(),
            SppEvent::ServiceOpen(socket) => {
                if self.active.is_some() {
                    warn!("SPP service opened while a session is active, replacing it");
                    self.teardown().await;
                }
                let session = self.link.on_connect();
                let bridge = SppBridge::new(
                    Arc::clone(&self.uart),
                    socket,
                    Arc::clone(&self.link),
                    session,
                    Arc::clone(&self.indicator),
                    &self.config,
                );
                let (stop, stop_rx) = oneshot::channel();
                let task = tokio::spawn(bridge.run(stop_rx));
                self.active = Some(ActiveBridge { stop, task });
            }
            SppEvent::Close => {
                info!("SPP connection closed");
                self.teardown().await;
            }
        }
    }

    async fn teardown(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        // The bridge may already have stopped on its own
        let _ = active.stop.send(());
        match active.task.await {
            Ok(outcome) => self.totals.merge(&outcome.stats),
            Err(e) => error!("SPP bridge task failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::abstraction::{MockGattServer, MockSppServer};
    use crate::transport::{
        LinkState, MemoryUart, NoIndicator, PeerAddress, TransportError, UartConfig,
    };
    use mockall::predicate::eq;
    use std::time::Duration;

    fn gatt(server: MockGattServer) -> (GattDispatcher<MockGattServer>, Arc<GattLink>) {
        let link = Arc::new(GattLink::new(23));
        let dispatcher = GattDispatcher::new(Arc::new(server), link.clone(), GattConfig::default());
        (dispatcher, link)
    }

    #[test]
    fn test_registration_sets_advertising_and_table() {
        let mut server = MockGattServer::new();
        let expected = advertising_payload("BT-UART", GattConfig::default().conn_interval());
        server
            .expect_set_advertising_data()
            .withf(move |payload| payload.to_vec() == expected)
            .times(1)
            .returning(|_| Ok(()));
        server
            .expect_create_attribute_table()
            .times(1)
            .returning(|| Ok(()));

        let (dispatcher, _) = gatt(server);
        dispatcher.handle_event(GattEvent::Registered { ok: true });
    }

    #[test]
    fn test_table_created_starts_service() {
        let mut server = MockGattServer::new();
        server
            .expect_start_service()
            .with(eq(40))
            .times(1)
            .returning(|_| Ok(()));

        let (dispatcher, link) = gatt(server);
        dispatcher.handle_event(GattEvent::AttrTableCreated {
            ok: true,
            handles: vec![40, 41, 42, 43],
        });
        assert_eq!(
            link.handles().map(|t| t.handle(AttributeIndex::DataNotifyConfig)),
            Some(43)
        );
    }

    #[test]
    fn test_bad_table_rejected() {
        let (dispatcher, link) = gatt(MockGattServer::new());
        dispatcher.handle_event(GattEvent::AttrTableCreated {
            ok: true,
            handles: vec![40, 41, 42],
        });
        dispatcher.handle_event(GattEvent::AttrTableCreated {
            ok: false,
            handles: vec![40, 41, 42, 43],
        });
        assert!(link.handles().is_none());
    }

    #[test]
    fn test_connection_lifecycle() {
        let mut server = MockGattServer::new();
        server
            .expect_start_advertising()
            .times(2)
            .returning(|| Ok(()));
        server.expect_start_service().returning(|_| Ok(()));

        let (dispatcher, link) = gatt(server);
        dispatcher.handle_event(GattEvent::AttrTableCreated {
            ok: true,
            handles: vec![40, 41, 42, 43],
        });
        dispatcher.handle_event(GattEvent::AdvertisingDataSet);
        dispatcher.handle_event(GattEvent::AdvertisingStarted { ok: true });
        assert_eq!(link.state(), LinkState::Advertising);

        dispatcher.handle_event(GattEvent::Connect {
            conn_id: 3,
            remote: PeerAddress([9, 8, 7, 6, 5, 4]),
        });
        dispatcher.handle_event(GattEvent::MtuNegotiated { mtu: 185 });
        dispatcher.handle_event(GattEvent::ConfigWrite {
            handle: 43,
            value: vec![0x01, 0x00],
            is_prep: false,
        });
        assert!(link.is_connected());
        assert!(link.is_notify_enabled());
        assert_eq!(link.max_payload(), 182);

        dispatcher.handle_event(GattEvent::Disconnect);
        assert_eq!(link.state(), LinkState::Advertising);
        assert!(!link.is_notify_enabled());
    }

    #[test]
    fn test_server_error_is_logged_not_fatal() {
        let mut server = MockGattServer::new();
        server
            .expect_start_advertising()
            .returning(|| Err(TransportError::Stack("busy".to_string())));

        let (dispatcher, link) = gatt(server);
        dispatcher.handle_event(GattEvent::Disconnect);
        assert_eq!(link.state(), LinkState::Advertising);
    }

    struct IdleSocket;

    impl ByteSocket for IdleSocket {
        fn read(&mut self, _buf: &mut [u8]) -> Result<usize, TransportError> {
            Ok(0)
        }

        fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
            Ok(buf.len())
        }
    }

    fn spp(server: MockSppServer) -> (SppDispatcher<MemoryUart, MockSppServer, IdleSocket>, Arc<SppLink>) {
        let uart = Arc::new(MemoryUart::new(UartConfig::default(), Duration::from_millis(1)));
        let link = Arc::new(SppLink::new());
        let config = SppConfig {
            tick_ms: 1,
            ..SppConfig::default()
        };
        let dispatcher = SppDispatcher::new(
            uart,
            Arc::new(server),
            link.clone(),
            Arc::new(NoIndicator),
            config,
        );
        (dispatcher, link)
    }

    #[tokio::test]
    async fn test_spp_init_starts_server() {
        let mut server = MockSppServer::new();
        server
            .expect_start_server()
            .withf(|name| name.to_string() == "SPP_SERVER")
            .times(1)
            .returning(|_| Ok(()));

        let (mut dispatcher, link) = spp(server);
        dispatcher.handle_event(SppEvent::Init { ok: true }).await;
        dispatcher.handle_event(SppEvent::Started).await;
        assert_eq!(link.state(), LinkState::Advertising);
    }

    #[tokio::test]
    async fn test_spp_open_and_close() {
        let (mut dispatcher, link) = spp(MockSppServer::new());
        dispatcher.handle_event(SppEvent::Started).await;

        dispatcher.handle_event(SppEvent::ServiceOpen(IdleSocket)).await;
        assert!(link.is_connected());
        assert!(dispatcher.has_active_bridge());

        dispatcher.handle_event(SppEvent::Close).await;
        assert!(!dispatcher.has_active_bridge());
        assert_eq!(link.state(), LinkState::Advertising);
    }

    #[tokio::test]
    async fn test_spp_reopen_replaces_session() {
        let (mut dispatcher, link) = spp(MockSppServer::new());

        dispatcher.handle_event(SppEvent::ServiceOpen(IdleSocket)).await;
        let first = link.session();
        dispatcher.handle_event(SppEvent::ServiceOpen(IdleSocket)).await;
        let second = link.session();

        assert_ne!(first, second);
        assert!(link.is_connected());
        dispatcher.handle_event(SppEvent::Close).await;
        assert!(!link.is_connected());
    }
}
