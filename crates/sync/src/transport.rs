use std::io::{self, Read};
use std::net::{SocketAddr, TcpStream, UdpSocket};
use std::time::Duration;

use log::debug;

use crate::protocol::ControlFrame;

/// `std` cannot start a connect without blocking, so the one bounded wait in
/// this module is the TCP connect itself. Everything after the stream exists
/// is non-blocking.
const CONNECT_TIMEOUT: Duration = Duration::from_millis(250);

/// Unreliable channel: connectionless, unordered, possibly lossy. Carries
/// high-frequency transform state in both directions.
pub struct StateChannel {
    socket: UdpSocket,
    remote: SocketAddr,
}

impl StateChannel {
    pub fn open(local_port: u16, remote: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", local_port))?;
        socket.set_nonblocking(true)?;
        Ok(Self { socket, remote })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    pub fn send(&self, data: &[u8]) -> io::Result<usize> {
        self.socket.send_to(data, self.remote)
    }

    /// Single bounded read. `None` when no datagram is pending, so a
    /// spurious readiness notification is harmless.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        match self.socket.recv_from(buf) {
            Ok((len, _)) => Ok(Some(len)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Result of draining the control channel after a readiness notification.
#[derive(Debug, Default)]
pub struct ControlRead {
    pub frames: Vec<ControlFrame>,
    pub closed: bool,
}

/// Reliable channel: ordered, connection-oriented. Carries fixed-size
/// control frames; TCP gives no message boundaries, so partial reads are
/// buffered until a whole frame is available and frames are surfaced
/// strictly in arrival order.
pub struct ControlChannel {
    remote: SocketAddr,
    stream: Option<TcpStream>,
    pending: Vec<u8>,
}

impl ControlChannel {
    pub fn new(remote: SocketAddr) -> Self {
        Self {
            remote,
            stream: None,
            pending: Vec::new(),
        }
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Open a fresh stream to the server, replacing any previous one.
    pub fn connect(&mut self) -> io::Result<()> {
        self.close();
        let stream = TcpStream::connect_timeout(&self.remote, CONNECT_TIMEOUT)?;
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        self.stream = Some(stream);
        Ok(())
    }

    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!("control channel to {} closed", self.remote);
        }
        self.pending.clear();
    }

    /// Single bounded read; returns the complete frames received so far and
    /// whether the peer closed the connection.
    pub fn read_frames(&mut self) -> io::Result<ControlRead> {
        let mut result = ControlRead::default();
        let Some(stream) = self.stream.as_mut() else {
            return Ok(result);
        };

        let mut buf = [0u8; 256];
        match stream.read(&mut buf) {
            Ok(0) => result.closed = true,
            Ok(len) => self.pending.extend_from_slice(&buf[..len]),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(e),
        }

        let complete = self.pending.len() - self.pending.len() % ControlFrame::LEN;
        for chunk in self.pending[..complete].chunks_exact(ControlFrame::LEN) {
            let frame = ControlFrame::decode(chunk).expect("chunk length checked");
            result.frames.push(frame);
        }
        self.pending.drain(..complete);

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicU16, Ordering};
    use std::thread;
    use std::time::Instant;

    use super::*;

    static PORT_COUNTER: AtomicU16 = AtomicU16::new(42000);

    fn next_port() -> u16 {
        PORT_COUNTER.fetch_add(10, Ordering::SeqCst)
    }

    fn drain_until(
        channel: &mut ControlChannel,
        want: usize,
        timeout_ms: u64,
    ) -> (Vec<ControlFrame>, bool) {
        let start = Instant::now();
        let mut frames = Vec::new();
        let mut closed = false;
        while start.elapsed() < Duration::from_millis(timeout_ms) {
            let read = channel.read_frames().unwrap();
            frames.extend(read.frames);
            closed |= read.closed;
            if frames.len() >= want && (want > 0 || closed) {
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
        (frames, closed)
    }

    #[test]
    fn test_state_channel_loopback() {
        let port_a = next_port();
        let port_b = next_port();
        let addr_a: SocketAddr = format!("127.0.0.1:{}", port_a).parse().unwrap();
        let addr_b: SocketAddr = format!("127.0.0.1:{}", port_b).parse().unwrap();

        let a = StateChannel::open(port_a, addr_b).unwrap();
        let b = StateChannel::open(port_b, addr_a).unwrap();

        let mut buf = [0u8; 64];
        assert!(b.recv(&mut buf).unwrap().is_none());

        a.send(&[1, 2, 3, 4]).unwrap();

        let start = Instant::now();
        let len = loop {
            if let Some(len) = b.recv(&mut buf).unwrap() {
                break len;
            }
            assert!(start.elapsed() < Duration::from_millis(200), "no datagram");
            thread::sleep(Duration::from_millis(1));
        };
        assert_eq!(&buf[..len], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_control_channel_frame_reassembly() {
        let port = next_port();
        let addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
        let listener = TcpListener::bind(addr).unwrap();

        let mut channel = ControlChannel::new(addr);
        channel.connect().unwrap();
        let (mut server_side, _) = listener.accept().unwrap();

        let frame_a = ControlFrame {
            connected: true,
            participant_id: 1,
        };
        let frame_b = ControlFrame {
            connected: false,
            participant_id: 2,
        };

        // First a partial frame, then the remainder plus a whole frame.
        let bytes_a = frame_a.encode();
        server_side.write_all(&bytes_a[..3]).unwrap();
        thread::sleep(Duration::from_millis(10));
        let (frames, _) = drain_until(&mut channel, 0, 20);
        assert!(frames.is_empty());

        server_side.write_all(&bytes_a[3..]).unwrap();
        server_side.write_all(&frame_b.encode()).unwrap();

        let (frames, closed) = drain_until(&mut channel, 2, 200);
        assert_eq!(frames, vec![frame_a, frame_b]);
        assert!(!closed);
    }

    #[test]
    fn test_control_channel_detects_close() {
        let port = next_port();
        let addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
        let listener = TcpListener::bind(addr).unwrap();

        let mut channel = ControlChannel::new(addr);
        channel.connect().unwrap();
        let (server_side, _) = listener.accept().unwrap();
        drop(server_side);

        let (_, closed) = drain_until(&mut channel, 0, 200);
        assert!(closed);
    }

    #[test]
    fn test_read_frames_without_stream_is_noop() {
        let addr: SocketAddr = format!("127.0.0.1:{}", next_port()).parse().unwrap();
        let mut channel = ControlChannel::new(addr);
        let read = channel.read_frames().unwrap();
        assert!(read.frames.is_empty());
        assert!(!read.closed);
    }
}
