// In-process echo probe over the GATT notify path
//
// Probe messages are pushed into a memory UART, framed by the real notify
// bridge and "sent" through a sink that can drop a share of the
// notifications. The surviving chunks are checked the way a peer would:
// tag sequence first, then message reassembly and validation.

use anyhow::{Context, Result};
use btuart_core::{
    check_message, random_message, start_gatt, BridgeConfig, BridgeStats, ChunkReceiver,
    GattEvent, MemoryUart, MessageSplitter, NotifySink, NotifyTarget, PeerAddress, ProbeVerdict,
    TransportError, UartPort,
};
use btuart_core::transport::ble::{AttributeIndex, HandleTable};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::socket::LogStack;

const PROBE_HANDLES: [u16; AttributeIndex::COUNT] = [40, 41, 42, 43];
const MAX_HALF_LEN: usize = 256;

/// Sink that loses a share of the notifications it is given
struct LossySink {
    loss: f64,
    rng: Mutex<StdRng>,
    delivered: Mutex<Vec<Vec<u8>>>,
    attempted_bytes: AtomicUsize,
}

#[async_trait::async_trait]
impl NotifySink for LossySink {
    async fn send_notification(
        &self,
        _target: NotifyTarget,
        payload: &[u8],
        _ack_required: bool,
    ) -> std::result::Result<(), TransportError> {
        self.attempted_bytes
            .fetch_add(payload.len().saturating_sub(1), Ordering::SeqCst);
        if self.rng.lock().gen::<f64>() >= self.loss {
            self.delivered.lock().push(payload.to_vec());
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ProbeReport {
    pub bridge: BridgeStats,
    pub chunks_received: u64,
    pub chunks_out_of_sequence: u64,
    pub messages_sent: usize,
    pub messages_valid: usize,
    pub messages_bad: usize,
    pub messages_dropped: u64,
}

pub async fn run(
    config: &BridgeConfig,
    count: usize,
    mtu: u16,
    loss: f64,
    seed: u64,
) -> Result<ProbeReport> {
    anyhow::ensure!((0.0..=1.0).contains(&loss), "Loss must be within 0.0..=1.0");

    let (uart, uart_events) = MemoryUart::with_events(config.uart.clone(), config.spp.tick());
    let uart = Arc::new(uart);
    let sink = Arc::new(LossySink {
        loss,
        rng: Mutex::new(StdRng::seed_from_u64(seed ^ 0x5eed)),
        delivered: Mutex::new(Vec::new()),
        attempted_bytes: AtomicUsize::new(0),
    });
    let handle = start_gatt(config, uart.clone(), uart_events, sink.clone(), Arc::new(LogStack))
        .context("Failed to start GATT path")?;

    let table = HandleTable::from_handles(&PROBE_HANDLES).context("Bad probe handle table")?;
    let events = handle.events();
    for event in [
        GattEvent::Registered { ok: true },
        GattEvent::AttrTableCreated {
            ok: true,
            handles: PROBE_HANDLES.to_vec(),
        },
        GattEvent::AdvertisingDataSet,
        GattEvent::AdvertisingStarted { ok: true },
        GattEvent::Connect {
            conn_id: 1,
            remote: PeerAddress([0x02, 0, 0, 0, 0, 0x01]),
        },
        GattEvent::MtuNegotiated { mtu },
        GattEvent::ConfigWrite {
            handle: table.handle(AttributeIndex::DataNotifyConfig),
            value: vec![0x01, 0x00],
            is_prep: false,
        },
    ] {
        events.send(event).await.context("GATT dispatcher stopped")?;
    }
    let link = handle.link();
    wait_for(|| link.is_notify_enabled())
        .await
        .context("Link never became ready")?;

    let capacity = config.uart.rx_buffer_size;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut total = 0;
    for _ in 0..count {
        let msg = random_message(&mut rng, MAX_HALF_LEN);
        total += msg.len();
        // Overrunning the receive buffer would make the bridge flush it
        wait_for(|| {
            let buffered = uart.buffered_len();
            buffered == 0 || buffered + msg.len() <= capacity
        })
        .await
        .context("UART never drained")?;
        uart.inject(&msg).await;
    }
    wait_for(|| sink.attempted_bytes.load(Ordering::SeqCst) >= total)
        .await
        .context("Bridge did not forward every byte")?;

    let mut report = ProbeReport {
        bridge: handle.shutdown().await?,
        messages_sent: count,
        ..ProbeReport::default()
    };

    let mut receiver = ChunkReceiver::new();
    let mut splitter = MessageSplitter::new();
    let delivered = std::mem::take(&mut *sink.delivered.lock());
    let mut messages = Vec::new();
    for wire in &delivered {
        let chunk = match receiver.accept(wire) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!("Unparseable chunk: {}", e);
                continue;
            }
        };
        messages.extend(splitter.feed(chunk.payload, chunk.in_sequence));
    }
    messages.extend(splitter.finish());

    for msg in &messages {
        match check_message(msg) {
            ProbeVerdict::Valid => report.messages_valid += 1,
            verdict => {
                tracing::debug!("Bad message ({}): {} bytes", verdict, msg.len());
                report.messages_bad += 1;
            }
        }
    }
    let stats = receiver.stats();
    report.chunks_received = stats.total_chunks;
    report.chunks_out_of_sequence = stats.out_of_sequence;
    report.messages_dropped = splitter.dropped();
    Ok(report)
}

async fn wait_for(condition: impl Fn() -> bool) -> Result<()> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !condition() {
        anyhow::ensure!(tokio::time::Instant::now() < deadline, "Timed out");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    Ok(())
}
