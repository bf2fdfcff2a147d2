//! Framed message transport over one TCP socket.
//!
//! Sending happens on the caller's thread under a writer lock. Receiving
//! happens on a dedicated `rconsole-rx` thread that decodes frames until the
//! stream ends, then reports the failure exactly once.

use std::io::BufReader;
use std::net::Shutdown;
use std::net::SocketAddr;
use std::net::TcpStream;
use std::net::ToSocketAddrs;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use rconsole_common::mutex_lock_or_recover;
use tracing::debug;
use tracing::trace;

use crate::codec::read_frame;
use crate::codec::write_frame;
use crate::error::TransportError;
use crate::message::Family;
use crate::message::Message;

/// Anything that can carry a message to the peer.
pub trait MessageSink: Send + Sync {
    fn send_message(&self, message: Message) -> Result<(), TransportError>;
}

pub struct FramedTransport {
    writer: Mutex<TcpStream>,
    reader: Mutex<Option<TcpStream>>,
    peer: Option<SocketAddr>,
    closed: Arc<AtomicBool>,
}

impl FramedTransport {
    /// Takes ownership of `stream`. Nothing is read until
    /// [`start_receiving`](Self::start_receiving) is called.
    pub fn new(stream: TcpStream, write_timeout: Option<Duration>) -> Result<Arc<Self>, TransportError> {
        stream.set_nodelay(true)?;
        stream.set_read_timeout(None)?;
        stream.set_write_timeout(write_timeout)?;

        let reader = stream.try_clone()?;
        Ok(Arc::new(Self {
            peer: stream.peer_addr().ok(),
            writer: Mutex::new(stream),
            reader: Mutex::new(Some(reader)),
            closed: Arc::new(AtomicBool::new(false)),
        }))
    }

    /// Creates the transport and starts its receive loop in one step.
    pub fn start<M, E>(
        stream: TcpStream,
        expect: Family,
        write_timeout: Option<Duration>,
        on_message: M,
        on_error: E,
    ) -> Result<Arc<Self>, TransportError>
    where
        M: FnMut(Message) + Send + 'static,
        E: FnOnce(TransportError) + Send + 'static,
    {
        let transport = Self::new(stream, write_timeout)?;
        transport.start_receiving(expect, on_message, on_error)?;
        Ok(transport)
    }

    /// Spawns the receive loop.
    ///
    /// `on_message` runs on the receive thread for every message of the
    /// `expect` family. `on_error` runs once when the loop stops: end of
    /// stream, a malformed frame, or a message of the other family.
    /// Fails if the loop was already started.
    pub fn start_receiving<M, E>(&self, expect: Family, on_message: M, on_error: E) -> Result<(), TransportError>
    where
        M: FnMut(Message) + Send + 'static,
        E: FnOnce(TransportError) + Send + 'static,
    {
        let reader = mutex_lock_or_recover(&self.reader).take().ok_or_else(|| {
            TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "receive loop already started",
            ))
        })?;
        let closed = Arc::clone(&self.closed);

        thread::Builder::new()
            .name("rconsole-rx".to_string())
            .spawn(move || receive_loop(reader, expect, closed, on_message, on_error))?;

        Ok(())
    }

    pub fn send(&self, message: &Message) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed);
        }

        let mut writer = mutex_lock_or_recover(&self.writer);
        let result = write_frame(&mut *writer, message);
        if result.is_err() {
            // Wake the receive loop so the failure is reported through on_error.
            let _ = writer.shutdown(Shutdown::Both);
        }
        result
    }

    /// Shuts the socket down in both directions. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(peer = ?self.peer, "Closing transport");
            let _ = mutex_lock_or_recover(&self.writer).shutdown(Shutdown::Both);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }
}

impl MessageSink for FramedTransport {
    fn send_message(&self, message: Message) -> Result<(), TransportError> {
        self.send(&message)
    }
}

impl std::fmt::Debug for FramedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramedTransport")
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn receive_loop<M, E>(
    stream: TcpStream,
    expect: Family,
    closed: Arc<AtomicBool>,
    mut on_message: M,
    on_error: E,
) where
    M: FnMut(Message),
    E: FnOnce(TransportError),
{
    let mut reader = BufReader::new(stream);
    let error = loop {
        match read_frame(&mut reader) {
            Ok(message) if message.family() == expect => {
                trace!(?message, "Received message");
                on_message(message);
            }
            Ok(message) => {
                break TransportError::UnexpectedFamily {
                    expected: expect,
                    actual: message.family(),
                };
            }
            Err(e) => break e,
        }
    };

    closed.store(true, Ordering::SeqCst);
    let _ = reader.get_ref().shutdown(Shutdown::Both);
    debug!(error = %error, "Receive loop stopped");
    on_error(error);
}

/// Opens a TCP connection to `host:port`, trying each resolved address.
pub fn connect_stream(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, TransportError> {
    let mut last_error = None;
    for addr in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }

    Err(match last_error {
        Some(e) => TransportError::from(e),
        None => TransportError::Io(std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            format!("no addresses resolved for {}", host),
        )),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Instruction, Response};
    use std::io::Write;
    use std::net::TcpListener;
    use std::sync::mpsc;

    fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    fn start_collecting(
        stream: TcpStream,
        expect: Family,
    ) -> (
        Arc<FramedTransport>,
        mpsc::Receiver<Message>,
        mpsc::Receiver<TransportError>,
    ) {
        let (msg_tx, msg_rx) = mpsc::channel();
        let (err_tx, err_rx) = mpsc::channel();
        let transport = FramedTransport::start(
            stream,
            expect,
            Some(Duration::from_secs(1)),
            move |m| {
                let _ = msg_tx.send(m);
            },
            move |e| {
                let _ = err_tx.send(e);
            },
        )
        .unwrap();
        (transport, msg_rx, err_rx)
    }

    #[test]
    fn test_messages_arrive_in_order() {
        let (client, server) = socket_pair();
        let (server_side, server_msgs, _server_errs) = start_collecting(server, Family::Instruction);
        let (client_side, _client_msgs, _client_errs) = start_collecting(client, Family::Response);

        for id in 1..=20 {
            client_side
                .send(&Instruction::Keepalive { process_id: id }.into())
                .unwrap();
        }

        for id in 1..=20 {
            let message = server_msgs.recv_timeout(Duration::from_secs(2)).unwrap();
            assert_eq!(message, Instruction::Keepalive { process_id: id }.into());
        }
        server_side.close();
    }

    #[test]
    fn test_wrong_family_stops_loop_once() {
        let (client, server) = socket_pair();
        let (_server_side, server_msgs, server_errs) = start_collecting(server, Family::Instruction);
        let (client_side, _m, _e) = start_collecting(client, Family::Response);

        client_side
            .send(&Response::ConnectionResponse.into())
            .unwrap();

        let error = server_errs.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(
            error,
            TransportError::UnexpectedFamily {
                expected: Family::Instruction,
                actual: Family::Response
            }
        ));
        assert!(server_msgs.try_recv().is_err());
        assert!(server_errs.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_peer_close_reports_error_and_marks_closed() {
        let (client, server) = socket_pair();
        let (server_side, _msgs, server_errs) = start_collecting(server, Family::Instruction);

        drop(client);

        let error = server_errs.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(error, TransportError::ConnectionClosed));
        assert!(server_side.is_closed());
        assert!(matches!(
            server_side.send(&Response::ConnectionResponse.into()),
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[test]
    fn test_close_is_idempotent() {
        let (client, server) = socket_pair();
        let (server_side, _msgs, server_errs) = start_collecting(server, Family::Instruction);

        server_side.close();
        server_side.close();

        assert!(server_side.is_closed());
        assert!(server_errs.recv_timeout(Duration::from_secs(2)).is_ok());
        assert!(server_errs.recv_timeout(Duration::from_millis(50)).is_err());
        drop(client);
    }

    #[test]
    fn test_malformed_frame_reports_codec_error() {
        let (mut client, server) = socket_pair();
        let (_server_side, _msgs, server_errs) = start_collecting(server, Family::Instruction);

        let payload = b"{\"family\":";
        client
            .write_all(&(payload.len() as u32).to_be_bytes())
            .unwrap();
        client.write_all(payload).unwrap();

        let error = server_errs.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(error, TransportError::Codec(_)));
    }

    #[test]
    fn test_receive_loop_starts_only_once() {
        let (client, server) = socket_pair();
        let transport = FramedTransport::new(server, None).unwrap();

        transport
            .start_receiving(Family::Instruction, |_| {}, |_| {})
            .unwrap();
        let second = transport.start_receiving(Family::Instruction, |_| {}, |_| {});

        assert!(matches!(second, Err(TransportError::Io(_))));
        transport.close();
        drop(client);
    }

    #[test]
    fn test_connect_stream_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = connect_stream("127.0.0.1", port, Duration::from_millis(200));
        assert!(result.is_err());
    }
}
