//! Start-up of the two bridge paths
//!
//! `start_gatt` and `start_spp` validate the configuration, bring up the
//! UART and spawn the dispatch and bridge tasks on the current tokio
//! runtime. The returned handle is how the platform stack feeds events in
//! and how the owner stops everything.

use crate::bridge::{BridgeStats, NotifyBridge};
use crate::config::BridgeConfig;
use crate::dispatch::{GattDispatcher, SppDispatcher};
use crate::transport::{
    ByteSocket, ConnectionIndicator, GattEvent, GattLink, GattServer, NotifySink, SppEvent,
    SppLink, SppServer, UartEvent, UartPort,
};
use crate::{BridgeError, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::info;

/// Depth of the stack event channels
pub const STACK_EVENT_QUEUE: usize = 32;

/// Running GATT notify path
pub struct GattHandle {
    events: mpsc::Sender<GattEvent>,
    link: Arc<GattLink>,
    bridge_stop: oneshot::Sender<()>,
    dispatch_stop: oneshot::Sender<()>,
    bridge: JoinHandle<BridgeStats>,
    dispatcher: JoinHandle<()>,
}

impl GattHandle {
    /// Sender the GATT stack reports its events through
    pub fn events(&self) -> mpsc::Sender<GattEvent> {
        self.events.clone()
    }

    pub fn link(&self) -> Arc<GattLink> {
        Arc::clone(&self.link)
    }

    /// Stop both tasks and return the notify bridge counters
    pub async fn shutdown(self) -> Result<BridgeStats> {
        let _ = self.dispatch_stop.send(());
        let _ = self.bridge_stop.send(());
        self.dispatcher
            .await
            .map_err(|e| BridgeError::Task(e.to_string()))?;
        let stats = self
            .bridge
            .await
            .map_err(|e| BridgeError::Task(e.to_string()))?;
        info!("GATT path stopped: {}", stats);
        Ok(stats)
    }
}

/// Bring up the GATT notify path.
///
/// `uart_events` is the UART driver's event queue; `sink` sends
/// notifications and `server` receives control requests. Feed stack events
/// through [`GattHandle::events`].
pub fn start_gatt<U, N, G>(
    config: &BridgeConfig,
    uart: Arc<U>,
    uart_events: mpsc::Receiver<UartEvent>,
    sink: Arc<N>,
    server: Arc<G>,
) -> Result<GattHandle>
where
    U: UartPort + 'static,
    N: NotifySink + 'static,
    G: GattServer + 'static,
{
    config.validate()?;
    uart.configure(&config.uart).map_err(BridgeError::Init)?;

    let link = Arc::new(GattLink::new(config.gatt.initial_mtu));
    let (events, event_rx) = mpsc::channel(STACK_EVENT_QUEUE);
    let (bridge_stop, bridge_stop_rx) = oneshot::channel();
    let (dispatch_stop, dispatch_stop_rx) = oneshot::channel();

    let bridge = NotifyBridge::new(uart, sink, Arc::clone(&link), config.gatt.ack_required);
    let bridge = tokio::spawn(bridge.run(uart_events, bridge_stop_rx));

    let dispatcher = GattDispatcher::new(server, Arc::clone(&link), config.gatt.clone());
    let dispatcher = tokio::spawn(dispatcher.run(event_rx, dispatch_stop_rx));

    info!(
        "GATT path started ({}, initial MTU {})",
        config.gatt.device_name, config.gatt.initial_mtu
    );
    Ok(GattHandle {
        events,
        link,
        bridge_stop,
        dispatch_stop,
        bridge,
        dispatcher,
    })
}

/// Running SPP byte path
pub struct SppHandle<S> {
    events: mpsc::Sender<SppEvent<S>>,
    link: Arc<SppLink>,
    stop: oneshot::Sender<()>,
    dispatcher: JoinHandle<BridgeStats>,
}

impl<S: ByteSocket + 'static> SppHandle<S> {
    /// Sender the SPP stack reports its events through
    pub fn events(&self) -> mpsc::Sender<SppEvent<S>> {
        self.events.clone()
    }

    pub fn link(&self) -> Arc<SppLink> {
        Arc::clone(&self.link)
    }

    /// Stop the dispatcher and any running bridge; returns the counters
    /// summed over all sessions
    pub async fn shutdown(self) -> Result<BridgeStats> {
        let _ = self.stop.send(());
        let stats = self
            .dispatcher
            .await
            .map_err(|e| BridgeError::Task(e.to_string()))?;
        info!("SPP path stopped: {}", stats);
        Ok(stats)
    }
}

/// Bring up the SPP byte path. Each `ServiceOpen` event hands a socket to a
/// fresh byte bridge.
pub fn start_spp<U, P, S>(
    config: &BridgeConfig,
    uart: Arc<U>,
    server: Arc<P>,
    indicator: Arc<dyn ConnectionIndicator>,
) -> Result<SppHandle<S>>
where
    U: UartPort + 'static,
    P: SppServer + 'static,
    S: ByteSocket + 'static,
{
    config.validate()?;
    uart.configure(&config.uart).map_err(BridgeError::Init)?;
    indicator.set_connected(false);

    let link = Arc::new(SppLink::new());
    let (events, event_rx) = mpsc::channel(STACK_EVENT_QUEUE);
    let (stop, stop_rx) = oneshot::channel();

    let dispatcher = SppDispatcher::new(
        uart,
        server,
        Arc::clone(&link),
        indicator,
        config.spp.clone(),
    );
    let dispatcher = tokio::spawn(dispatcher.run(event_rx, stop_rx));

    info!("SPP path started ({})", config.spp.server_name);
    Ok(SppHandle {
        events,
        link,
        stop,
        dispatcher,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::abstraction::{MockGattServer, MockSppServer};
    use crate::transport::{MemoryUart, NoIndicator, NotifyTarget, TransportError, UartConfig};
    use async_trait::async_trait;
    use std::time::Duration;

    struct NullSink;

    #[async_trait]
    impl NotifySink for NullSink {
        async fn send_notification(
            &self,
            _target: NotifyTarget,
            _payload: &[u8],
            _ack_required: bool,
        ) -> std::result::Result<(), TransportError> {
            Ok(())
        }
    }

    struct NullSocket;

    impl ByteSocket for NullSocket {
        fn read(&mut self, _buf: &mut [u8]) -> std::result::Result<usize, TransportError> {
            Ok(0)
        }

        fn write(&mut self, buf: &[u8]) -> std::result::Result<usize, TransportError> {
            Ok(buf.len())
        }
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = BridgeConfig::default();
        config.spp.transfer_unit = 0;
        let (uart, events) =
            MemoryUart::with_events(UartConfig::default(), Duration::from_millis(1));

        let result = start_gatt(
            &config,
            Arc::new(uart),
            events,
            Arc::new(NullSink),
            Arc::new(MockGattServer::new()),
        );
        assert!(matches!(result, Err(BridgeError::Config(_))));
    }

    #[tokio::test]
    async fn test_gatt_start_and_shutdown() {
        let (uart, events) =
            MemoryUart::with_events(UartConfig::default(), Duration::from_millis(1));
        let handle = start_gatt(
            &BridgeConfig::default(),
            Arc::new(uart),
            events,
            Arc::new(NullSink),
            Arc::new(MockGattServer::new()),
        )
        .unwrap();

        handle
            .events()
            .send(GattEvent::MtuNegotiated { mtu: 50 })
            .await
            .unwrap();
        let link = handle.link();
        for _ in 0..100 {
            if link.max_payload() == 47 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(link.max_payload(), 47);

        let stats = handle.shutdown().await.unwrap();
        assert_eq!(stats, BridgeStats::default());
    }

    #[tokio::test]
    async fn test_spp_start_and_shutdown() {
        let uart = Arc::new(MemoryUart::new(UartConfig::default(), Duration::from_millis(1)));
        let handle: SppHandle<NullSocket> = start_spp(
            &BridgeConfig::default(),
            uart,
            Arc::new(MockSppServer::new()),
            Arc::new(NoIndicator),
        )
        .unwrap();

        handle.events().send(SppEvent::Started).await.unwrap();
        handle.shutdown().await.unwrap();
    }
}
