//! UART line settings, scheduler tick budgets and an in-memory UART
//!
//! `MemoryUart` behaves like a driver with a receive ring buffer and an
//! optional event queue: injected bytes land in the buffer and, when events
//! are enabled, a `DataReceived` event is queued for them.

use crate::transport::abstraction::{TransportError, UartEvent, UartPort};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

/// Bounded wait expressed in scheduler ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticks(pub u32);

impl Ticks {
    /// Do not wait at all
    pub const ZERO: Ticks = Ticks(0);
    /// Wait without bound
    pub const FOREVER: Ticks = Ticks(u32::MAX);

    /// Convert to wall time, `None` for `FOREVER`
    pub fn to_duration(self, tick: Duration) -> Option<Duration> {
        if self == Self::FOREVER {
            None
        } else {
            Some(tick * self.0)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    None,
    Even,
    Odd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopBits {
    One,
    OnePointFive,
    Two,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowControl {
    /// No hardware flow control
    None,
    /// RTS only
    Rts,
    /// RTS and CTS
    CtsRts,
}

/// UART driver configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UartConfig {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
    /// Driver receive ring buffer size in bytes
    pub rx_buffer_size: usize,
    /// Driver transmit ring buffer size in bytes
    pub tx_buffer_size: usize,
    /// Depth of the driver event queue
    pub event_queue_depth: usize,
}

impl Default for UartConfig {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
            rx_buffer_size: 4096,
            tx_buffer_size: 8192,
            event_queue_depth: 10,
        }
    }
}

/// In-memory UART with driver-like buffering semantics
pub struct MemoryUart {
    config: Mutex<UartConfig>,
    tick: Duration,
    rx: Mutex<VecDeque<u8>>,
    rx_ready: Notify,
    tx: Mutex<Vec<u8>>,
    tx_ready: Notify,
    events: Option<mpsc::Sender<UartEvent>>,
}

impl MemoryUart {
    /// Create a UART without an event queue
    pub fn new(config: UartConfig, tick: Duration) -> Self {
        Self {
            config: Mutex::new(config),
            tick,
            rx: Mutex::new(VecDeque::new()),
            rx_ready: Notify::new(),
            tx: Mutex::new(Vec::new()),
            tx_ready: Notify::new(),
            events: None,
        }
    }

    /// Create a UART that reports received data through an event queue
    pub fn with_events(config: UartConfig, tick: Duration) -> (Self, mpsc::Receiver<UartEvent>) {
        let (tx, rx) = mpsc::channel(config.event_queue_depth.max(1));
        let mut uart = Self::new(config, tick);
        uart.events = Some(tx);
        (uart, rx)
    }

    /// Current line settings
    pub fn config(&self) -> UartConfig {
        self.config.lock().clone()
    }

    /// Simulate bytes arriving on the RX line.
    ///
    /// Bytes beyond the ring buffer capacity are dropped and reported as
    /// `BufferFull`. Returns the number of bytes accepted.
    pub async fn inject(&self, data: &[u8]) -> usize {
        let capacity = self.config.lock().rx_buffer_size;
        let accepted = {
            let mut rx = self.rx.lock();
            let room = capacity.saturating_sub(rx.len());
            let accepted = room.min(data.len());
            rx.extend(&data[..accepted]);
            accepted
        };
        if accepted > 0 {
            self.rx_ready.notify_one();
        }

        if let Some(events) = &self.events {
            if accepted > 0 {
                // Receiver gone means nobody is listening any more
                let _ = events.send(UartEvent::DataReceived { size: accepted }).await;
            }
            if accepted < data.len() {
                warn!("UART rx buffer full, dropped {} bytes", data.len() - accepted);
                let _ = events.send(UartEvent::BufferFull).await;
            }
        } else if accepted < data.len() {
            warn!("UART rx buffer full, dropped {} bytes", data.len() - accepted);
        }
        accepted
    }

    /// Wait until something has been transmitted and take it
    pub async fn recv_tx(&self) -> Vec<u8> {
        loop {
            {
                let mut tx = self.tx.lock();
                if !tx.is_empty() {
                    return std::mem::take(&mut *tx);
                }
            }
            self.tx_ready.notified().await;
        }
    }

    /// Take whatever has been transmitted so far without waiting
    pub fn take_tx(&self) -> Vec<u8> {
        std::mem::take(&mut *self.tx.lock())
    }
}

#[async_trait]
impl UartPort for MemoryUart {
    fn configure(&self, config: &UartConfig) -> Result<(), TransportError> {
        if config.baud_rate == 0 {
            return Err(TransportError::Uart("baud rate must be non-zero".to_string()));
        }
        *self.config.lock() = config.clone();
        debug!("UART configured at {} baud", config.baud_rate);
        Ok(())
    }

    async fn read(&self, buf: &mut [u8], timeout: Ticks) -> Result<usize, TransportError> {
        let deadline = timeout
            .to_duration(self.tick)
            .map(|d| tokio::time::Instant::now() + d);

        loop {
            {
                let mut rx = self.rx.lock();
                let expired = deadline.map_or(false, |d| tokio::time::Instant::now() >= d);
                if rx.len() >= buf.len() || expired {
                    let n = rx.len().min(buf.len());
                    for (slot, byte) in buf.iter_mut().zip(rx.drain(..n)) {
                        *slot = byte;
                    }
                    return Ok(n);
                }
            }
            match deadline {
                Some(d) => {
                    let _ = tokio::time::timeout_at(d, self.rx_ready.notified()).await;
                }
                None => self.rx_ready.notified().await,
            }
        }
    }

    async fn write(&self, buf: &[u8]) -> Result<usize, TransportError> {
        self.tx.lock().extend_from_slice(buf);
        self.tx_ready.notify_one();
        Ok(buf.len())
    }

    fn buffered_len(&self) -> usize {
        self.rx.lock().len()
    }

    fn flush_input(&self) {
        let dropped = {
            let mut rx = self.rx.lock();
            let n = rx.len();
            rx.clear();
            n
        };
        if dropped > 0 {
            debug!("UART input flushed, {} bytes dropped", dropped);
        }
    }
}
