/// Socket plumbing for the console link.
///
/// Stream links wrap a TCP connection with keepalive enabled; datagram links
/// use a connected UDP socket and treat each datagram as one or more lines.
/// Bytes that are not valid UTF-8 are decoded lossily, so a garbled line
/// reaches the client as an unparseable reply instead of ending the link.
/// A reader task per link feeds lines back into the client until the link
/// is shut down or the peer goes away.

use std::sync::Arc;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use monmix_protocol::status::ConnectionConfig;

use super::error::{ClientError, Result};
use super::simulator::SimulatedConsole;

const KEEPALIVE_TIME: Duration = Duration::from_secs(10);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);
const MAX_DATAGRAM: usize = 2048;
/// Longest line accepted from a stream link; longer lines are dropped whole
const MAX_LINE_BYTES: usize = 4096;

/// The active connection. Exactly one variant exists at a time, so a
/// simulated link can never share state with a real socket.
pub(crate) enum Link {
    Stream {
        writer: OwnedWriteHalf,
        shutdown: CancellationToken,
    },
    Datagram {
        socket: Arc<UdpSocket>,
        shutdown: CancellationToken,
    },
    Simulated(SimulatedConsole),
}

impl Link {
    pub(crate) async fn write_line(&mut self, line: &str) -> Result<()> {
        match self {
            Self::Stream { writer, .. } => {
                writer.write_all(line.as_bytes()).await?;
                writer.flush().await?;
            }
            Self::Datagram { socket, .. } => {
                socket.send(line.as_bytes()).await?;
            }
            Self::Simulated(_) => {}
        }
        Ok(())
    }

    /// Stop the reader task (or the simulator's meter task).
    pub(crate) fn shutdown(&self) {
        match self {
            Self::Stream { shutdown, .. } | Self::Datagram { shutdown, .. } => shutdown.cancel(),
            Self::Simulated(sim) => sim.shutdown(),
        }
    }

    pub(crate) fn shutdown_token(&self) -> Option<CancellationToken> {
        match self {
            Self::Stream { shutdown, .. } | Self::Datagram { shutdown, .. } => Some(shutdown.clone()),
            Self::Simulated(_) => None,
        }
    }

    pub(crate) fn simulator(&self) -> Option<&SimulatedConsole> {
        match self {
            Self::Simulated(sim) => Some(sim),
            _ => None,
        }
    }
}

/// Read side handed to the reader task.
pub(crate) enum LinkReader {
    Stream(OwnedReadHalf),
    Datagram(Arc<UdpSocket>),
}

/// What ended a reader task.
pub(crate) enum ReaderExit {
    Shutdown,
    Lost(String),
}

pub(crate) async fn open_stream(config: &ConnectionConfig) -> Result<(Link, LinkReader)> {
    let address = config.address();
    let connect = TcpStream::connect(&address);
    let stream = match tokio::time::timeout(
        Duration::from_millis(config.connect_timeout_ms),
        connect,
    )
    .await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            return Err(ClientError::Connect {
                address,
                reason: e.to_string(),
            })
        }
        Err(_) => {
            return Err(ClientError::Connect {
                address,
                reason: format!("timed out after {}ms", config.connect_timeout_ms),
            })
        }
    };

    stream.set_nodelay(true)?;
    let keepalive = TcpKeepalive::new()
        .with_time(KEEPALIVE_TIME)
        .with_interval(KEEPALIVE_INTERVAL);
    if let Err(e) = SockRef::from(&stream).set_tcp_keepalive(&keepalive) {
        warn!(error = %e, "Failed to enable TCP keepalive on console socket");
    }

    let (reader, writer) = stream.into_split();
    Ok((
        Link::Stream {
            writer,
            shutdown: CancellationToken::new(),
        },
        LinkReader::Stream(reader),
    ))
}

pub(crate) async fn open_datagram(config: &ConnectionConfig) -> Result<(Link, LinkReader)> {
    let address = config.address();
    let open = async {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(&address).await?;
        Ok::<_, std::io::Error>(socket)
    };
    let socket = match tokio::time::timeout(
        Duration::from_millis(config.connect_timeout_ms),
        open,
    )
    .await
    {
        Ok(Ok(socket)) => Arc::new(socket),
        Ok(Err(e)) => {
            return Err(ClientError::Connect {
                address,
                reason: e.to_string(),
            })
        }
        Err(_) => {
            return Err(ClientError::Connect {
                address,
                reason: format!("timed out after {}ms", config.connect_timeout_ms),
            })
        }
    };

    Ok((
        Link::Datagram {
            socket: socket.clone(),
            shutdown: CancellationToken::new(),
        },
        LinkReader::Datagram(socket),
    ))
}

/// Pump lines from the link into `on_line` until shutdown or loss.
pub(crate) async fn read_lines<F>(
    reader: LinkReader,
    shutdown: CancellationToken,
    mut on_line: F,
) -> ReaderExit
where
    F: FnMut(&str),
{
    match reader {
        LinkReader::Stream(read_half) => {
            let mut reader = BufReader::new(read_half);
            let mut buf = Vec::with_capacity(256);
            // Set while skipping the tail of an oversized line
            let mut discarding = false;
            loop {
                buf.clear();
                let mut limited = (&mut reader).take(MAX_LINE_BYTES as u64);
                tokio::select! {
                    _ = shutdown.cancelled() => return ReaderExit::Shutdown,
                    read = limited.read_until(b'\n', &mut buf) => match read {
                        Ok(0) => return ReaderExit::Lost("connection closed by console".to_string()),
                        Ok(_) => {
                            let complete = buf.last() == Some(&b'\n');
                            if discarding {
                                discarding = !complete;
                            } else if !complete && buf.len() >= MAX_LINE_BYTES {
                                warn!(limit = MAX_LINE_BYTES, "Oversized console line discarded");
                                discarding = true;
                            } else {
                                let text = String::from_utf8_lossy(&buf);
                                let line = text.trim_end_matches(|c: char| c == '\r' || c == '\n');
                                if !line.trim().is_empty() {
                                    on_line(line);
                                }
                            }
                        }
                        Err(e) => return ReaderExit::Lost(e.to_string()),
                    }
                }
            }
        }
        LinkReader::Datagram(socket) => {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return ReaderExit::Shutdown,
                    received = socket.recv(&mut buf) => match received {
                        Ok(len) => {
                            let text = String::from_utf8_lossy(&buf[..len]);
                            for line in text.split(|c: char| c == '\r' || c == '\n').filter(|l| !l.trim().is_empty()) {
                                on_line(line);
                            }
                        }
                        Err(e) => {
                            debug!(error = %e, "Datagram receive failed");
                            return ReaderExit::Lost(e.to_string());
                        }
                    }
                }
            }
        }
    }
}
