//! Transport shim
//!
//! Relays Wayland byte streams between a local endpoint and a remote one.
//! Each direction is pumped by its own thread that frames the stream with a
//! [`FrameDecoder`] and only ever writes whole messages, so message
//! boundaries survive the hop. When either side closes or misbehaves both
//! sockets are shut down and the other pump unblocks and exits.
//!
//! Only bytes cross the relay. File descriptors (shm pools, keymaps) cannot
//! be forwarded to a remote peer.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};

use log::{debug, info, warn};

use crate::wire::{FrameDecoder, WireError, MAX_MESSAGE_SIZE};

/// Read size for the pumps
const READ_CHUNK: usize = 4 * MAX_MESSAGE_SIZE;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid endpoint {0:?} (expected unix:<path> or tcp:<host>:<port>)")]
    Endpoint(String),
    #[error("cannot connect to {endpoint}")]
    Connect {
        endpoint: Endpoint,
        #[source]
        source: io::Error,
    },
    #[error("cannot listen on {endpoint}")]
    Bind {
        endpoint: Endpoint,
        #[source]
        source: io::Error,
    },
    #[error("relay I/O failed")]
    Io(#[from] io::Error),
    #[error("malformed message on relayed stream")]
    Wire(#[from] WireError),
    #[error("relay pump thread panicked")]
    Panicked,
}

/// One side of a relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Unix(PathBuf),
    /// `host:port`
    Tcp(String),
}

impl Endpoint {
    /// Parse `unix:<path>` or `tcp:<host>:<port>`
    pub fn parse(s: &str) -> Result<Self, TransportError> {
        let invalid = || TransportError::Endpoint(s.to_string());
        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(invalid());
            }
            return Ok(Endpoint::Unix(PathBuf::from(path)));
        }
        if let Some(addr) = s.strip_prefix("tcp:") {
            let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
            if host.is_empty() || port.parse::<u16>().is_err() {
                return Err(invalid());
            }
            return Ok(Endpoint::Tcp(addr.to_string()));
        }
        Err(invalid())
    }

    pub fn connect(&self) -> Result<Stream, TransportError> {
        let stream = match self {
            Endpoint::Unix(path) => UnixStream::connect(path).map(Stream::Unix),
            Endpoint::Tcp(addr) => TcpStream::connect(addr.as_str()).and_then(|s| {
                s.set_nodelay(true)?;
                Ok(Stream::Tcp(s))
            }),
        };
        stream.map_err(|source| TransportError::Connect {
            endpoint: self.clone(),
            source,
        })
    }

    pub fn listen(&self) -> Result<Listener, TransportError> {
        let listener = match self {
            Endpoint::Unix(path) => UnixListener::bind(path).map(Listener::Unix),
            Endpoint::Tcp(addr) => TcpListener::bind(addr.as_str()).map(Listener::Tcp),
        };
        listener.map_err(|source| TransportError::Bind {
            endpoint: self.clone(),
            source,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Unix(path) => write!(f, "unix:{}", path.display()),
            Endpoint::Tcp(addr) => write!(f, "tcp:{}", addr),
        }
    }
}

impl std::str::FromStr for Endpoint {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Endpoint::parse(s)
    }
}

/// A connected byte stream of either kind
#[derive(Debug)]
pub enum Stream {
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl Stream {
    pub fn try_clone(&self) -> io::Result<Stream> {
        match self {
            Stream::Unix(s) => s.try_clone().map(Stream::Unix),
            Stream::Tcp(s) => s.try_clone().map(Stream::Tcp),
        }
    }

    /// Shut down both directions, ignoring sockets that are already gone
    pub fn close(&self) {
        let result = match self {
            Stream::Unix(s) => s.shutdown(Shutdown::Both),
            Stream::Tcp(s) => s.shutdown(Shutdown::Both),
        };
        if let Err(e) = result {
            if e.kind() != io::ErrorKind::NotConnected {
                debug!("Shutdown failed: {}", e);
            }
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Unix(s) => s.read(buf),
            Stream::Tcp(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Unix(s) => s.write(buf),
            Stream::Tcp(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Unix(s) => s.flush(),
            Stream::Tcp(s) => s.flush(),
        }
    }
}

/// A listening socket of either kind
#[derive(Debug)]
pub enum Listener {
    Unix(UnixListener),
    Tcp(TcpListener),
}

impl Listener {
    pub fn accept(&self) -> io::Result<Stream> {
        match self {
            Listener::Unix(l) => l.accept().map(|(s, _)| Stream::Unix(s)),
            Listener::Tcp(l) => {
                let (s, _) = l.accept()?;
                s.set_nodelay(true)?;
                Ok(Stream::Tcp(s))
            }
        }
    }
}

/// Traffic counted by one pump
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    pub messages: u64,
    pub bytes: u64,
}

/// Final counts of a finished relay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Local side to remote side
    pub outbound: PumpStats,
    /// Remote side to local side
    pub inbound: PumpStats,
}

/// A running relay between two connected streams
pub struct Relay {
    outbound: JoinHandle<Result<PumpStats, TransportError>>,
    inbound: JoinHandle<Result<PumpStats, TransportError>>,
}

impl Relay {
    /// Start pumping between `local` and `remote`
    pub fn start(local: Stream, remote: Stream) -> Result<Self, TransportError> {
        let local_rx = local.try_clone()?;
        let remote_rx = remote.try_clone()?;

        let outbound = thread::Builder::new()
            .name("relay-out".into())
            .spawn(move || pump(local_rx, remote, "outbound"))?;
        let inbound = thread::Builder::new()
            .name("relay-in".into())
            .spawn(move || pump(remote_rx, local, "inbound"))?;

        Ok(Self { outbound, inbound })
    }

    /// Whether both pumps have exited
    pub fn is_finished(&self) -> bool {
        self.outbound.is_finished() && self.inbound.is_finished()
    }

    /// Block until both directions have stopped
    ///
    /// Returns the first error either pump hit.
    pub fn wait(self) -> Result<RelayStats, TransportError> {
        let outbound = self.outbound.join().map_err(|_| TransportError::Panicked)?;
        let inbound = self.inbound.join().map_err(|_| TransportError::Panicked)?;
        Ok(RelayStats {
            outbound: outbound?,
            inbound: inbound?,
        })
    }
}

/// Copy whole messages from `from` to `to` until either side goes away,
/// then shut both down
fn pump(mut from: Stream, mut to: Stream, direction: &str) -> Result<PumpStats, TransportError> {
    let result = pump_frames(&mut from, &mut to);
    from.close();
    to.close();
    match &result {
        Ok(stats) => debug!(
            "Relay {} closed after {} messages ({} bytes)",
            direction, stats.messages, stats.bytes
        ),
        Err(e) => warn!("Relay {} failed: {}", direction, e),
    }
    result
}

fn pump_frames(from: &mut Stream, to: &mut Stream) -> Result<PumpStats, TransportError> {
    let mut decoder = FrameDecoder::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    let mut out = Vec::with_capacity(READ_CHUNK);
    let mut stats = PumpStats::default();

    loop {
        let n = match from.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if is_disconnect(&e) => break,
            Err(e) => return Err(e.into()),
        };
        decoder.push(&chunk[..n]);

        out.clear();
        while let Some(frame) = decoder.next_frame()? {
            stats.messages += 1;
            out.extend_from_slice(&frame);
        }
        if !out.is_empty() {
            match to.write_all(&out) {
                Ok(()) => stats.bytes += out.len() as u64,
                Err(e) if is_disconnect(&e) => break,
                Err(e) => return Err(e.into()),
            }
        }
    }

    if decoder.pending() > 0 {
        debug!("Dropping {} bytes of a partial message", decoder.pending());
        decoder.clear();
    }
    Ok(stats)
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
    )
}

/// Accepts on one endpoint and relays each connection to another
pub struct RelayListener {
    listener: Listener,
    listen: Endpoint,
    target: Endpoint,
}

impl RelayListener {
    pub fn bind(listen: Endpoint, target: Endpoint) -> Result<Self, TransportError> {
        let listener = listen.listen()?;
        info!("Relaying {} -> {}", listen, target);
        Ok(Self {
            listener,
            listen,
            target,
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.listen
    }

    /// Accept one connection and start relaying it
    pub fn accept_one(&self) -> Result<Relay, TransportError> {
        let local = self.listener.accept()?;
        let remote = match self.target.connect() {
            Ok(remote) => remote,
            Err(e) => {
                local.close();
                return Err(e);
            }
        };
        debug!("Accepted relay connection on {}", self.listen);
        Relay::start(local, remote)
    }

    /// Serve connections until accepting fails
    ///
    /// A target that refuses a connection only drops that connection.
    pub fn run(&self) -> Result<(), TransportError> {
        let mut relays: Vec<Relay> = Vec::new();
        loop {
            match self.accept_one() {
                Ok(relay) => relays.push(relay),
                Err(e) if is_transient(&e) => warn!("{}", e),
                Err(e) => return Err(e),
            }
            relays.retain(|r| !r.is_finished());
        }
    }
}

/// Failures that only cost the connection being accepted
fn is_transient(error: &TransportError) -> bool {
    match error {
        TransportError::Connect { .. } => true,
        TransportError::Io(e) => matches!(
            e.kind(),
            io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted
        ),
        _ => false,
    }
}

impl Drop for RelayListener {
    fn drop(&mut self) {
        if let Endpoint::Unix(path) = &self.listen {
            let _ = std::fs::remove_file(path);
        }
    }
}
