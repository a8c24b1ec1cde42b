//! Connection management
//!
//! Owns the TCP stream to the game server. A reader thread performs the
//! blocking reads and forwards chunks over a channel; all session state is
//! mutated on the caller's thread in [`Connection::process_input`].

use std::io::{self, Read};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::error::TermError;
use super::telnet::TelnetSession;

/// Upper bound on a single blocking write to the server
const WRITE_TIMEOUT: Duration = Duration::from_millis(20);

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Failed to resolve {target}: {source}")]
    Resolve {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to connect to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("Connection I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Not connected")]
    NotConnected,

    #[error(transparent)]
    Term(#[from] TermError),
}

pub type Result<T> = std::result::Result<T, ConnectionError>;

/// A telnet connection driving a [`TelnetSession`]
pub struct Connection {
    /// Protocol and terminal state
    pub session: TelnetSession,
    stream: Option<TcpStream>,
    /// Running flag shared with the reader thread
    running: Arc<AtomicBool>,
    reader_thread: Option<JoinHandle<()>>,
    input_rx: Option<Receiver<Vec<u8>>>,
    send_interval: Duration,
    last_flush: Instant,
    peer: Option<String>,
}

impl Connection {
    pub fn new(session: TelnetSession, send_interval: Duration) -> Self {
        Self {
            session,
            stream: None,
            running: Arc::new(AtomicBool::new(false)),
            reader_thread: None,
            input_rx: None,
            send_interval,
            last_flush: Instant::now(),
            peer: None,
        }
    }

    /// Connect to `host:port`, replacing any existing connection
    pub fn connect(&mut self, host: &str, port: u16, timeout: Duration) -> Result<()> {
        self.close();

        let target = format!("{}:{}", host, port);
        let addrs: Vec<SocketAddr> = target
            .to_socket_addrs()
            .map_err(|source| ConnectionError::Resolve {
                target: target.clone(),
                source,
            })?
            .collect();

        let mut last_err = None;
        let mut stream = None;
        for addr in &addrs {
            match TcpStream::connect_timeout(addr, timeout) {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => {
                    debug!("Connect to {} failed: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }

        let stream = match stream {
            Some(s) => s,
            None => {
                return Err(ConnectionError::Connect {
                    target,
                    source: last_err
                        .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no addresses resolved")),
                })
            }
        };

        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
        let reader = stream.try_clone()?;

        self.session.connect();
        self.running.store(true, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        let running = self.running.clone();
        let reader_thread = thread::Builder::new()
            .name("ebonterm-reader".to_string())
            .spawn(move || reader_loop(reader, tx, running))?;

        self.stream = Some(stream);
        self.reader_thread = Some(reader_thread);
        self.input_rx = Some(rx);
        self.last_flush = Instant::now();
        self.peer = Some(target);

        info!("Connected to {}", self.peer.as_deref().unwrap_or_default());
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some() && self.session.is_connected()
    }

    pub fn peer(&self) -> Option<&str> {
        self.peer.as_deref()
    }

    /// Feed everything the reader thread has received so far into the session
    /// (non-blocking). Returns whether any data was processed.
    ///
    /// When the server hangs up, the last data is delivered first and the
    /// session is disconnected on the following call, so the caller sees the
    /// final screen and its events before the grid is cleared.
    pub fn process_input(&mut self) -> Result<bool> {
        let mut chunks: Vec<Vec<u8>> = Vec::new();
        let mut closed = false;

        if let Some(rx) = &self.input_rx {
            loop {
                match rx.try_recv() {
                    Ok(data) => chunks.push(data),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        closed = true;
                        break;
                    }
                }
            }
        } else {
            return Ok(false);
        }

        let processed = !chunks.is_empty();
        for chunk in chunks {
            self.session.feed(&chunk)?;
        }

        if closed && !processed {
            info!("Server closed the connection");
            self.close();
        }

        Ok(processed)
    }

    /// Flush the outbound queue if the send interval has elapsed
    pub fn tick(&mut self) -> Result<usize> {
        if self.last_flush.elapsed() < self.send_interval {
            return Ok(0);
        }
        self.last_flush = Instant::now();
        self.flush()
    }

    /// Write as much queued output as the socket accepts right now
    pub fn flush(&mut self) -> Result<usize> {
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None if self.session.pending_output().is_empty() => return Ok(0),
            None => return Err(ConnectionError::NotConnected),
        };

        match self.session.flush(stream) {
            Ok(n) => Ok(n),
            Err(e) => {
                warn!("Send failed: {}", e);
                self.close();
                Err(e.into())
            }
        }
    }

    /// Close the connection and stop the reader thread
    pub fn disconnect(&mut self) {
        if self.stream.is_some() {
            info!("Disconnecting from {}", self.peer.as_deref().unwrap_or_default());
        }
        self.close();
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(stream) = self.stream.take() {
            // unblocks the reader
            let _ = stream.shutdown(Shutdown::Both);
            self.session.disconnect();
        }

        if let Some(handle) = self.reader_thread.take() {
            let _ = handle.join();
        }
        self.input_rx = None;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

fn reader_loop(mut stream: TcpStream, tx: Sender<Vec<u8>>, running: Arc<AtomicBool>) {
    let mut buffer = vec![0u8; 4096];

    while running.load(Ordering::SeqCst) {
        match stream.read(&mut buffer) {
            Ok(0) => {
                debug!("Reader reached end of stream");
                break;
            }
            Ok(n) => {
                if tx.send(buffer[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!("Reader stopped: {}", e);
                break;
            }
        }
    }

    running.store(false, Ordering::SeqCst);
}
