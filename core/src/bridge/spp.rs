//! UART ⇄ SPP byte bridge
//!
//! One task per open SPP session. Each iteration:
//!
//! 1. if the UART holds at least `bulk_threshold` bytes, drain it to the
//!    socket in `transfer_unit` reads that do not wait
//! 2. read the socket; anything received goes to the UART and the
//!    iteration ends there
//! 3. otherwise forward one UART read to the socket, waiting 0 ticks after a
//!    bulk drain, 1 tick when some bytes are buffered and 2 when none are
//!
//! A socket error ends the task. The UART side never does.

use super::{BridgeExit, BridgeOutcome, BridgeStats};
use crate::config::SppConfig;
use crate::transport::spp::SessionId;
use crate::transport::{ByteSocket, ConnectionIndicator, SppLink, Ticks, TransportError, UartPort};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

pub struct SppBridge<U, S> {
    uart: Arc<U>,
    socket: S,
    link: Arc<SppLink>,
    session: SessionId,
    indicator: Arc<dyn ConnectionIndicator>,
    transfer_unit: usize,
    bulk_threshold: usize,
    tick: Duration,
    scratch: Vec<u8>,
    stats: BridgeStats,
}

impl<U, S> SppBridge<U, S>
where
    U: UartPort + 'static,
    S: ByteSocket + 'static,
{
    pub fn new(
        uart: Arc<U>,
        socket: S,
        link: Arc<SppLink>,
        session: SessionId,
        indicator: Arc<dyn ConnectionIndicator>,
        config: &SppConfig,
    ) -> Self {
        let transfer_unit = config.transfer_unit.max(1);
        Self {
            uart,
            socket,
            link,
            session,
            indicator,
            transfer_unit,
            bulk_threshold: config.bulk_threshold.max(transfer_unit),
            tick: config.tick(),
            scratch: vec![0; transfer_unit],
            stats: BridgeStats::default(),
        }
    }

    pub fn stats(&self) -> BridgeStats {
        self.stats
    }

    /// Pump bytes until the socket fails or `shutdown` fires (or its sender
    /// is dropped). A step stuck on a stalled socket is abandoned on
    /// shutdown.
    pub async fn run(mut self, mut shutdown: oneshot::Receiver<()>) -> BridgeOutcome {
        info!("SPP bridge started for session {}", self.session);
        // Bytes that piled up while nobody was connected are stale
        let stale = self.uart.buffered_len();
        if stale > 0 {
            warn!("No SPP session was open, discarding {} bytes", stale);
            self.stats.bytes_discarded += stale as u64;
        }
        self.uart.flush_input();
        self.indicator.set_connected(true);

        let exit = loop {
            let result = tokio::select! {
                biased;
                _ = &mut shutdown => None,
                result = self.step() => Some(result),
            };
            match result {
                None => break BridgeExit::Shutdown,
                Some(Ok(())) => {}
                Some(Err(e)) => {
                    warn!("SPP session {} lost: {}", self.session, e);
                    break BridgeExit::Disconnected(e);
                }
            }
        };

        self.indicator.set_connected(false);
        self.link.on_disconnect(self.session);
        info!("SPP bridge stopped ({:?}): {}", exit, self.stats);
        BridgeOutcome {
            exit,
            stats: self.stats,
        }
    }

    /// One bridge iteration. `Err` means the socket is gone.
    pub async fn step(&mut self) -> Result<(), TransportError> {
        let buffered = self.uart.buffered_len();
        let mut drained = 0;
        if buffered >= self.bulk_threshold {
            drained = self.bulk_drain(buffered).await?;
        }

        let n = self.socket.read(&mut self.scratch)?;
        if n > 0 {
            self.write_uart(n).await;
            return Ok(());
        }

        if buffered < self.bulk_threshold || drained > 0 {
            let ticks = if drained > 0 {
                Ticks::ZERO
            } else if buffered > 0 {
                Ticks(1)
            } else {
                Ticks(2)
            };
            self.forward_once(ticks).await?;
        }
        Ok(())
    }

    async fn bulk_drain(&mut self, buffered: usize) -> Result<usize, TransportError> {
        let mut remain = buffered;
        let mut moved = 0;
        while remain >= self.transfer_unit {
            let n = self.forward_once(Ticks::ZERO).await?;
            if n == 0 {
                break;
            }
            remain = remain.saturating_sub(n);
            moved += n;
        }
        debug!("Bulk drained {} of {} buffered bytes", moved, buffered);
        Ok(moved)
    }

    /// Move one UART read to the socket. Partial writes are retried until
    /// the whole read is delivered.
    async fn forward_once(&mut self, ticks: Ticks) -> Result<usize, TransportError> {
        let unit = self.transfer_unit;
        let n = match self.uart.read(&mut self.scratch[..unit], ticks).await {
            Ok(n) => n,
            Err(e) => {
                warn!("UART read failed: {}", e);
                return Ok(0);
            }
        };
        if n == 0 {
            return Ok(0);
        }
        self.stats.uart_bytes_in += n as u64;

        let mut offset = 0;
        while offset < n {
            let written = self.socket.write(&self.scratch[offset..n])?;
            if written == 0 {
                tokio::time::sleep(self.tick).await;
                continue;
            }
            offset += written;
        }
        self.stats.radio_bytes_out += n as u64;
        Ok(n)
    }

    async fn write_uart(&mut self, n: usize) {
        self.stats.radio_bytes_in += n as u64;
        let mut offset = 0;
        while offset < n {
            match self.uart.write(&self.scratch[offset..n]).await {
                Ok(0) => tokio::time::sleep(self.tick).await,
                Ok(written) => offset += written,
                Err(e) => {
                    warn!("UART write failed, {} bytes lost: {}", n - offset, e);
                    self.stats.bytes_discarded += (n - offset) as u64;
                    return;
                }
            }
        }
        self.stats.uart_bytes_out += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::abstraction::MockConnectionIndicator;
    use crate::transport::{MemoryUart, NoIndicator, UartConfig};
    use mockall::predicate::eq;
    use mockall::Sequence;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Socket whose peer never reads
    struct StalledSocket;

    impl ByteSocket for StalledSocket {
        fn read(&mut self, _buf: &mut [u8]) -> Result<usize, TransportError> {
            Ok(0)
        }

        fn write(&mut self, _buf: &[u8]) -> Result<usize, TransportError> {
            Ok(0)
        }
    }

    #[derive(Default)]
    struct Script {
        reads: VecDeque<Result<Vec<u8>, TransportError>>,
        writes: Vec<Vec<u8>>,
        write_limit: Option<usize>,
        stall_once: bool,
    }

    #[derive(Clone, Default)]
    struct ScriptedSocket(Arc<Mutex<Script>>);

    impl ByteSocket for ScriptedSocket {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
            match self.0.lock().reads.pop_front() {
                Some(Ok(data)) => {
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                }
                Some(Err(e)) => Err(e),
                None => Ok(0),
            }
        }

        fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
            let mut script = self.0.lock();
            if script.stall_once {
                script.stall_once = false;
                return Ok(0);
            }
            let n = script.write_limit.map_or(buf.len(), |l| l.min(buf.len()));
            script.writes.push(buf[..n].to_vec());
            Ok(n)
        }
    }

    fn uart() -> Arc<MemoryUart> {
        Arc::new(MemoryUart::new(UartConfig::default(), Duration::from_millis(1)))
    }

    fn config() -> SppConfig {
        SppConfig {
            tick_ms: 1,
            ..SppConfig::default()
        }
    }

    fn bridge(uart: &Arc<MemoryUart>, socket: &ScriptedSocket) -> SppBridge<MemoryUart, ScriptedSocket> {
        let link = Arc::new(SppLink::new());
        let session = link.on_connect();
        SppBridge::new(
            uart.clone(),
            socket.clone(),
            link,
            session,
            Arc::new(NoIndicator),
            &config(),
        )
    }

    #[tokio::test]
    async fn test_bulk_drain_in_transfer_units() {
        let uart = uart();
        let socket = ScriptedSocket::default();
        uart.inject(&[0x5A; 600]).await;

        let mut bridge = bridge(&uart, &socket);
        bridge.step().await.unwrap();

        let sizes: Vec<usize> = socket.0.lock().writes.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![128, 128, 128, 128, 88]);
        assert_eq!(uart.buffered_len(), 0);
        assert_eq!(bridge.stats().radio_bytes_out, 600);
    }

    #[tokio::test]
    async fn test_small_backlog_forwarded_after_timeout() {
        let uart = uart();
        let socket = ScriptedSocket::default();
        uart.inject(b"abc").await;

        let mut bridge = bridge(&uart, &socket);
        bridge.step().await.unwrap();

        assert_eq!(socket.0.lock().writes, vec![b"abc".to_vec()]);
    }

    #[tokio::test]
    async fn test_socket_data_written_to_uart() {
        let uart = uart();
        let socket = ScriptedSocket::default();
        socket.0.lock().reads.push_back(Ok(b"hello".to_vec()));
        uart.inject(b"xyz").await;

        let mut bridge = bridge(&uart, &socket);
        bridge.step().await.unwrap();

        assert_eq!(uart.take_tx(), b"hello");
        // Inbound data ends the iteration, the UART backlog waits
        assert!(socket.0.lock().writes.is_empty());
        assert_eq!(uart.buffered_len(), 3);
    }

    #[tokio::test]
    async fn test_partial_and_stalled_writes_are_retried() {
        let uart = uart();
        let socket = ScriptedSocket::default();
        {
            let mut script = socket.0.lock();
            script.write_limit = Some(50);
            script.stall_once = true;
        }
        uart.inject(&[0x01; 128]).await;

        let mut bridge = bridge(&uart, &socket);
        bridge.step().await.unwrap();

        let sizes: Vec<usize> = socket.0.lock().writes.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![50, 50, 28]);
    }

    #[tokio::test]
    async fn test_socket_error_ends_session() {
        let uart = uart();
        let socket = ScriptedSocket::default();
        socket
            .0
            .lock()
            .reads
            .push_back(Err(TransportError::SocketClosed));

        let mut indicator = MockConnectionIndicator::new();
        let mut seq = Sequence::new();
        indicator
            .expect_set_connected()
            .with(eq(true))
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        indicator
            .expect_set_connected()
            .with(eq(false))
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());

        let link = Arc::new(SppLink::new());
        let session = link.on_connect();
        let bridge = SppBridge::new(
            uart,
            socket,
            link.clone(),
            session,
            Arc::new(indicator),
            &config(),
        );
        let (_stop_tx, stop_rx) = oneshot::channel();
        let outcome = bridge.run(stop_rx).await;

        assert_eq!(
            outcome.exit,
            BridgeExit::Disconnected(TransportError::SocketClosed)
        );
        assert!(!link.is_connected());
    }

    #[tokio::test]
    async fn test_shutdown_stops_bridge() {
        let uart = uart();
        let socket = ScriptedSocket::default();
        let bridge = bridge(&uart, &socket);

        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(bridge.run(stop_rx));
        tokio::time::sleep(Duration::from_millis(5)).await;
        stop_tx.send(()).unwrap();

        let outcome = task.await.unwrap();
        assert_eq!(outcome.exit, BridgeExit::Shutdown);
    }

    #[tokio::test]
    async fn test_shutdown_while_socket_write_stalls() {
        let uart = uart();
        let link = Arc::new(SppLink::new());
        let session = link.on_connect();
        let bridge = SppBridge::new(
            uart.clone(),
            StalledSocket,
            link.clone(),
            session,
            Arc::new(NoIndicator),
            &config(),
        );

        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(bridge.run(stop_rx));
        tokio::time::sleep(Duration::from_millis(5)).await;
        uart.inject(b"abc").await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        stop_tx.send(()).unwrap();

        let outcome = tokio::time::timeout(Duration::from_millis(500), task)
            .await
            .expect("bridge should stop while the socket is stalled")
            .unwrap();
        assert_eq!(outcome.exit, BridgeExit::Shutdown);
        assert!(!link.is_connected());
    }

    #[tokio::test]
    async fn test_stale_uart_bytes_counted_as_discarded() {
        let uart = uart();
        let socket = ScriptedSocket::default();
        uart.inject(b"stale").await;
        let bridge = bridge(&uart, &socket);

        let (stop_tx, stop_rx) = oneshot::channel();
        stop_tx.send(()).unwrap();
        let outcome = bridge.run(stop_rx).await;

        assert_eq!(outcome.stats.bytes_discarded, 5);
        assert_eq!(uart.buffered_len(), 0);
        assert!(socket.0.lock().writes.is_empty());
    }

    #[tokio::test]
    async fn test_both_directions_progress_under_load() {
        let uart = uart();
        let socket = ScriptedSocket::default();
        {
            let mut script = socket.0.lock();
            for i in 0..4u8 {
                script.reads.push_back(Ok(vec![b'0' + i; 8]));
            }
        }
        let mut bridge = bridge(&uart, &socket);

        let mut uart_tx = Vec::new();
        for _ in 0..4 {
            uart.inject(&[0x7E; 600]).await;
            bridge.step().await.unwrap();
            uart_tx.extend(uart.take_tx());
        }

        // Every step carried inbound data and still drained the backlog
        assert_eq!(uart_tx, b"00000000111111112222222233333333");
        let stats = bridge.stats();
        assert_eq!(stats.radio_bytes_in, 32);
        assert!(stats.radio_bytes_out >= 4 * 512);
        assert!(uart.buffered_len() < 128);
    }
}
