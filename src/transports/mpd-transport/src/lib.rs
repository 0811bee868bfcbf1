//! [`Transport`] over the line-based MPD protocol on a plain TCP socket.

pub mod protocol;

use mpdsync_core::{
    Command, Connector, ServerStats, ServerStatus, Song, Transport, TransportError,
    TransportResult,
};
use protocol::{io_error, Pair};
use std::io::{BufReader, BufWriter, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Opens [`MpdTransport`]s with connect, read and write timeouts.
#[derive(Debug, Clone, Copy, Default)]
pub struct MpdConnector;

impl MpdConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for MpdConnector {
    fn open(&self, host: &str, port: u16, timeout: Duration) -> TransportResult<Box<dyn Transport>> {
        Ok(Box::new(MpdTransport::connect(host, port, timeout)?))
    }
}

pub struct MpdTransport {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
    server_version: String,
    last_error: Option<TransportError>,
}

impl std::fmt::Debug for MpdTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MpdTransport")
            .field("peer", &self.writer.get_ref().peer_addr().ok())
            .field("server_version", &self.server_version)
            .field("last_error", &self.last_error)
            .finish()
    }
}

impl MpdTransport {
    /// Connects to the first address `host` resolves to that accepts, then
    /// reads the server greeting.
    pub fn connect(host: &str, port: u16, timeout: Duration) -> TransportResult<Self> {
        let address = format!("{host}:{port}");
        let connect_error = |message: String| TransportError::Connect {
            address: address.clone(),
            message,
        };

        let candidates = (host, port)
            .to_socket_addrs()
            .map_err(|e| connect_error(e.to_string()))?;

        let mut last_failure = None;
        let mut stream = None;
        for candidate in candidates {
            match TcpStream::connect_timeout(&candidate, timeout) {
                Ok(connected) => {
                    stream = Some(connected);
                    break;
                }
                Err(err) => last_failure = Some(err),
            }
        }
        let stream = stream.ok_or_else(|| {
            connect_error(
                last_failure
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "no addresses resolved".to_string()),
            )
        })?;

        Self::from_stream(stream, timeout)
    }

    /// Wraps an already connected stream and consumes its greeting.
    pub fn from_stream(stream: TcpStream, timeout: Duration) -> TransportResult<Self> {
        let timeout = Some(timeout).filter(|t| !t.is_zero());
        stream.set_read_timeout(timeout).map_err(io_error)?;
        stream.set_write_timeout(timeout).map_err(io_error)?;
        stream.set_nodelay(true).map_err(io_error)?;

        let read_half = stream.try_clone().map_err(io_error)?;
        let mut reader = BufReader::new(read_half);
        let greeting = protocol::read_line(&mut reader)?;
        let server_version = protocol::parse_greeting(&greeting)?;
        tracing::debug!(server_version = %server_version, "server greeting received");

        Ok(Self {
            reader,
            writer: BufWriter::new(stream),
            server_version,
            last_error: None,
        })
    }

    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    /// Sends `request` (one or more newline-terminated lines) and reads the
    /// single response. The first failure poisons the handle.
    fn round_trip(&mut self, request: &str) -> TransportResult<Vec<Pair>> {
        if let Some(err) = &self.last_error {
            return Err(err.clone());
        }
        let result = self.send(request).and_then(|()| protocol::read_response(&mut self.reader));
        if let Err(err) = &result {
            tracing::debug!(error = %err, "request failed");
            self.last_error = Some(err.clone());
        }
        result
    }

    fn send(&mut self, request: &str) -> TransportResult<()> {
        self.writer.write_all(request.as_bytes()).map_err(io_error)?;
        self.writer.flush().map_err(io_error)
    }

    fn query(&mut self, command: &str) -> TransportResult<Vec<Pair>> {
        self.round_trip(&format!("{command}\n"))
    }
}

impl Transport for MpdTransport {
    fn authenticate(&mut self, password: &str) -> TransportResult<()> {
        match self.query(&format!("password {}", protocol::quote(password))) {
            Ok(_) => Ok(()),
            Err(TransportError::Server { message, .. }) => {
                let err = TransportError::Auth { message };
                self.last_error = Some(err.clone());
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    fn status(&mut self) -> TransportResult<ServerStatus> {
        let pairs = self.query("status")?;
        self.parsed(protocol::parse_status(&pairs))
    }

    fn stats(&mut self) -> TransportResult<ServerStats> {
        let pairs = self.query("stats")?;
        self.parsed(protocol::parse_stats(&pairs))
    }

    fn current_song(&mut self) -> TransportResult<Option<Song>> {
        let pairs = self.query("currentsong")?;
        let songs = self.parsed(protocol::parse_songs(&pairs))?;
        Ok(songs.into_iter().next())
    }

    fn playlist_changes(&mut self, version: i64) -> TransportResult<Vec<Song>> {
        let pairs = self.query(&format!("plchanges {}", version.max(0)))?;
        self.parsed(protocol::parse_songs(&pairs))
    }

    fn playlist_info(&mut self) -> TransportResult<Vec<Song>> {
        let pairs = self.query("playlistinfo")?;
        self.parsed(protocol::parse_songs(&pairs))
    }

    fn execute(&mut self, command: &Command) -> TransportResult<()> {
        self.query(&protocol::encode(command)).map(|_| ())
    }

    fn execute_batch(&mut self, commands: &[Command]) -> TransportResult<()> {
        self.round_trip(&protocol::encode_batch(commands)).map(|_| ())
    }

    fn last_error(&self) -> Option<&TransportError> {
        self.last_error.as_ref()
    }

    fn close(&mut self) {
        if self.last_error.is_none() {
            let _ = self.send("close\n");
        }
        let _ = self.writer.get_ref().shutdown(Shutdown::Both);
        self.last_error.get_or_insert(TransportError::Closed);
    }
}

impl MpdTransport {
    /// Records parse failures the same way as I/O failures.
    fn parsed<T>(&mut self, result: TransportResult<T>) -> TransportResult<T> {
        if let Err(err) = &result {
            self.last_error = Some(err.clone());
        }
        result
    }
}
