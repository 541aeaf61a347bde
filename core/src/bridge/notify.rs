//! UART → GATT notify bridge
//!
//! Waits on the UART event queue. Every data event is read out of the UART
//! in full, then either framed into sequence-tagged chunks and notified to
//! the peer, or discarded when the link cannot take it. Sends are
//! fire-and-forget: a refused chunk is logged and the rest still go out.

use super::BridgeStats;
use crate::transport::ble::framing::Framer;
use crate::transport::{GattLink, NotifySink, Ticks, TransportError, UartEvent, UartPort};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

pub struct NotifyBridge<U, N> {
    uart: Arc<U>,
    sink: Arc<N>,
    link: Arc<GattLink>,
    ack_required: bool,
    wire: Vec<u8>,
    stats: BridgeStats,
}

impl<U, N> NotifyBridge<U, N>
where
    U: UartPort + 'static,
    N: NotifySink + 'static,
{
    pub fn new(uart: Arc<U>, sink: Arc<N>, link: Arc<GattLink>, ack_required: bool) -> Self {
        Self {
            uart,
            sink,
            link,
            ack_required,
            wire: Vec::new(),
            stats: BridgeStats::default(),
        }
    }

    pub fn stats(&self) -> BridgeStats {
        self.stats
    }

    /// Process UART events until `shutdown` fires (or its sender is
    /// dropped) or the event queue closes.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<UartEvent>,
        mut shutdown: oneshot::Receiver<()>,
    ) -> BridgeStats {
        info!("UART notify bridge started");
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event @ (UartEvent::FifoOverflow | UartEvent::BufferFull)) => {
                        // Events still queued describe bytes the flush removes
                        let stale = drain_data_events(&mut events);
                        if stale > 0 {
                            debug!("Dropped {} queued data events after overflow", stale);
                        }
                        self.handle_event(event).await;
                    }
                    Some(event) => self.handle_event(event).await,
                    None => {
                        debug!("UART event queue closed");
                        break;
                    }
                },
                _ = &mut shutdown => break,
            }
        }

        // Stop accepting events, then drop whatever was still queued
        events.close();
        let mut pending = 0usize;
        while let Ok(event) = events.try_recv() {
            if let UartEvent::DataReceived { size } = event {
                pending += size;
            }
        }
        let buffered = self.uart.buffered_len();
        self.uart.flush_input();
        self.stats.bytes_discarded += buffered as u64;
        if pending > 0 {
            debug!("Dropped {} queued bytes on shutdown", pending);
        }

        info!("UART notify bridge stopped: {}", self.stats);
        self.stats
    }

    /// Handle one UART event to completion
    pub async fn handle_event(&mut self, event: UartEvent) {
        match event {
            UartEvent::DataReceived { size: 0 } => {}
            UartEvent::DataReceived { size } => self.forward(size).await,
            UartEvent::FifoOverflow | UartEvent::BufferFull => {
                let buffered = self.uart.buffered_len();
                warn!("UART {:?}, flushing {} buffered bytes", event, buffered);
                self.uart.flush_input();
                self.stats.bytes_discarded += buffered as u64;
            }
            other => warn!("UART line event: {:?}", other),
        }
    }

    async fn forward(&mut self, size: usize) {
        // An event can outlive its bytes when the input was flushed
        let size = size.min(self.uart.buffered_len());
        if size == 0 {
            debug!("Data event for flushed bytes, nothing to read");
            return;
        }
        let mut buf = Vec::new();
        if buf.try_reserve_exact(size).is_err() {
            error!("{}", TransportError::Allocation(size));
            self.stats.allocation_failures += 1;
            return;
        }
        buf.resize(size, 0);

        // Always consume the bytes, even if they end up discarded
        let n = match self.uart.read(&mut buf, Ticks::FOREVER).await {
            Ok(n) => n,
            Err(e) => {
                warn!("UART read failed: {}", e);
                return;
            }
        };
        buf.truncate(n);
        self.stats.uart_bytes_in += n as u64;

        let snapshot = self.link.snapshot();
        if !snapshot.is_connected() {
            warn!("Not connected, discarding {} bytes", n);
            self.stats.bytes_discarded += n as u64;
            return;
        }
        if !snapshot.notify.enabled {
            warn!("Notifications not enabled, discarding {} bytes", n);
            self.stats.bytes_discarded += n as u64;
            return;
        }
        let Some(target) = snapshot.target else {
            warn!("Attribute table not ready, discarding {} bytes", n);
            self.stats.bytes_discarded += n as u64;
            return;
        };

        let link = Arc::clone(&self.link);
        let framer = match Framer::new(&buf, snapshot.notify.max_payload, link.sequence()) {
            Ok(framer) => framer,
            Err(e) => {
                warn!("Cannot frame {} bytes: {}", n, e);
                self.stats.bytes_discarded += n as u64;
                return;
            }
        };
        debug!(
            "Sending {} bytes as {} chunks of up to {}",
            n,
            framer.len(),
            framer.unit()
        );

        for chunk in framer {
            self.wire.clear();
            chunk.encode_into(&mut self.wire);
            match self
                .sink
                .send_notification(target, &self.wire, self.ack_required)
                .await
            {
                Ok(()) => {
                    self.stats.chunks_sent += 1;
                    self.stats.radio_bytes_out += chunk.payload.len() as u64;
                }
                Err(e) => {
                    self.stats.chunks_failed += 1;
                    warn!("Chunk '{}' dropped: {}", chunk.tag as char, e);
                }
            }
        }
    }
}

/// Empty the event queue, returning how many data events it held
fn drain_data_events(events: &mut mpsc::Receiver<UartEvent>) -> usize {
    let mut dropped = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            UartEvent::DataReceived { .. } => dropped += 1,
            other => warn!("UART line event: {:?}", other),
        }
    }
    dropped
}
