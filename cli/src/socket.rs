// Host stand-ins for the Bluetooth collaborators
//
// A TCP connection plays the SPP socket; the stack control requests and the
// connection indicator only log.

use btuart_core::{ByteSocket, ConnectionIndicator, GattServer, SppServer, TransportError};
use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;

/// Non-blocking TCP stream used as an SPP socket
pub struct TcpSocket {
    stream: TcpStream,
    peer: String,
}

impl TcpSocket {
    pub fn new(stream: TcpStream) -> std::io::Result<Self> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        Ok(Self { stream, peer })
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }
}

impl ByteSocket for TcpSocket {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        match self.stream.read(buf) {
            Ok(0) => Err(TransportError::SocketClosed),
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => {
                Ok(0)
            }
            Err(e) => Err(TransportError::Socket(e.to_string())),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        match self.stream.write(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => {
                Ok(0)
            }
            Err(e) => Err(TransportError::Socket(e.to_string())),
        }
    }
}

/// Connection indicator that logs instead of driving an LED
pub struct LogIndicator;

impl ConnectionIndicator for LogIndicator {
    fn set_connected(&self, connected: bool) {
        tracing::info!("Indicator {}", if connected { "on" } else { "off" });
    }
}

/// Stack control requests have nowhere to go on a host; log and accept them
pub struct LogStack;

impl SppServer for LogStack {
    fn start_server(&self, name: &str) -> Result<(), TransportError> {
        tracing::info!("SPP server '{}' started", name);
        Ok(())
    }
}

impl GattServer for LogStack {
    fn set_advertising_data(&self, payload: &[u8]) -> Result<(), TransportError> {
        tracing::debug!("Advertising data: {}", hex::encode(payload));
        Ok(())
    }

    fn start_advertising(&self) -> Result<(), TransportError> {
        tracing::debug!("Advertising started");
        Ok(())
    }

    fn create_attribute_table(&self) -> Result<(), TransportError> {
        tracing::debug!("Attribute table requested");
        Ok(())
    }

    fn start_service(&self, service_handle: u16) -> Result<(), TransportError> {
        tracing::debug!("Service {} started", service_handle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn pair() -> (TcpSocket, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (TcpSocket::new(server).unwrap(), client)
    }

    #[test]
    fn test_read_would_block_is_zero() {
        let (mut socket, _client) = pair();
        let mut buf = [0u8; 16];
        assert_eq!(socket.read(&mut buf), Ok(0));
    }

    #[test]
    fn test_roundtrip_and_close() {
        let (mut socket, mut client) = pair();
        client.write_all(b"hello").unwrap();

        let mut buf = [0u8; 16];
        let mut got = 0;
        for _ in 0..100 {
            got = socket.read(&mut buf).unwrap();
            if got > 0 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(&buf[..got], b"hello");

        assert_eq!(socket.write(b"back"), Ok(4));
        let mut reply = [0u8; 4];
        client.read_exact(&mut reply).unwrap();
        assert_eq!(&reply, b"back");

        drop(client);
        let mut closed = false;
        for _ in 0..100 {
            match socket.read(&mut buf) {
                Err(TransportError::SocketClosed) => {
                    closed = true;
                    break;
                }
                _ => std::thread::sleep(std::time::Duration::from_millis(5)),
            }
        }
        assert!(closed);
    }
}
