// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Payload log sinks.
//!
//! Accepted payload lines are the relay's sole durable output. The handler
//! writes through the [`PayloadSink`] trait only; the concrete destinations
//! (local console, remote syslog) are registered once at startup behind a
//! [`FanoutSink`].

use std::env;
use std::io;

use async_trait::async_trait;
use chrono::{Local, SecondsFormat};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::Mutex;
use tracing::error;

/// Fixed marker prepended to every forwarded payload line. Downstream log
/// consumers key on this token; it must remain stable.
pub const POST_BODY_TOKEN: &str = "POSTBODY";

// Severity LOG_INFO with the default facility, as a single priority value.
const SYSLOG_PRIORITY: u8 = 6;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("unsupported syslog network '{0}'")]
    UnsupportedNetwork(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Write-only destination for accepted payload lines. Implementations must be
/// safe for uncoordinated concurrent use; the relay holds one sink for the
/// process lifetime and calls it from every request task.
#[async_trait]
pub trait PayloadSink: Send + Sync {
    async fn emit(&self, line: &str) -> Result<(), SinkError>;
}

/// Writes payload lines to stdout, undecorated, so the console copy of the
/// artifact matches what the remote facility receives.
pub struct ConsoleSink;

#[async_trait]
impl PayloadSink for ConsoleSink {
    async fn emit(&self, line: &str) -> Result<(), SinkError> {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(line.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
        Ok(())
    }
}

enum SyslogTransport {
    Udp(UdpSocket),
    // TCP is a shared stream; writes are serialized behind the mutex.
    Tcp(Mutex<TcpStream>),
    #[cfg(unix)]
    Unix(tokio::net::UnixDatagram),
}

/// Remote log facility client. Connects once at startup; a failed connection
/// is a startup-fatal error surfaced to the composition root. Each emitted
/// line is framed as an RFC 3164 message tagged with the configured tag.
pub struct SyslogSink {
    transport: SyslogTransport,
    /// HOSTNAME field for remote frames: the local address of the connected
    /// socket, falling back to "localhost".
    hostname: String,
    tag: String,
}

impl SyslogSink {
    pub async fn connect(network: &str, address: &str, tag: &str) -> Result<SyslogSink, SinkError> {
        // An empty tag falls back to the process name.
        let tag = if tag.is_empty() {
            env::args().next().unwrap_or_else(|| "metrics-relay".to_string())
        } else {
            tag.to_string()
        };

        match network {
            "udp" | "udp4" | "udp6" => {
                let socket = UdpSocket::bind("0.0.0.0:0").await?;
                socket.connect(address).await?;
                let hostname = local_hostname(socket.local_addr());
                Ok(SyslogSink {
                    transport: SyslogTransport::Udp(socket),
                    hostname,
                    tag,
                })
            }
            "tcp" | "tcp4" | "tcp6" => {
                let stream = TcpStream::connect(address).await?;
                let hostname = local_hostname(stream.local_addr());
                Ok(SyslogSink {
                    transport: SyslogTransport::Tcp(Mutex::new(stream)),
                    hostname,
                    tag,
                })
            }
            // An empty network kind targets the local syslog daemon.
            "" => Self::connect_local(tag),
            other => Err(SinkError::UnsupportedNetwork(other.to_string())),
        }
    }

    #[cfg(unix)]
    fn connect_local(tag: String) -> Result<SyslogSink, SinkError> {
        // Candidate sockets the platform syslog daemons listen on.
        for path in ["/dev/log", "/var/run/syslog", "/var/run/log"] {
            let socket = tokio::net::UnixDatagram::unbound()?;
            if socket.connect(path).is_ok() {
                return Ok(SyslogSink {
                    transport: SyslogTransport::Unix(socket),
                    hostname: "localhost".to_string(),
                    tag,
                });
            }
        }
        Err(SinkError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            "no local syslog socket available",
        )))
    }

    #[cfg(not(unix))]
    fn connect_local(_tag: String) -> Result<SyslogSink, SinkError> {
        Err(SinkError::UnsupportedNetwork(
            "local syslog is only available on unix".to_string(),
        ))
    }

    fn frame(&self, msg: &str) -> String {
        let pid = std::process::id();
        match &self.transport {
            #[cfg(unix)]
            SyslogTransport::Unix(_) => local_frame(
                &Local::now().format("%b %e %H:%M:%S").to_string(),
                &self.tag,
                pid,
                msg,
            ),
            _ => remote_frame(
                &Local::now().to_rfc3339_opts(SecondsFormat::Secs, false),
                &self.hostname,
                &self.tag,
                pid,
                msg,
            ),
        }
    }
}

#[async_trait]
impl PayloadSink for SyslogSink {
    async fn emit(&self, line: &str) -> Result<(), SinkError> {
        let frame = self.frame(line);
        match &self.transport {
            SyslogTransport::Udp(socket) => {
                socket.send(frame.as_bytes()).await?;
            }
            SyslogTransport::Tcp(stream) => {
                let mut stream = stream.lock().await;
                stream.write_all(frame.as_bytes()).await?;
            }
            #[cfg(unix)]
            SyslogTransport::Unix(socket) => {
                socket.send(frame.as_bytes()).await?;
            }
        }
        Ok(())
    }
}

fn local_hostname(addr: io::Result<std::net::SocketAddr>) -> String {
    addr.map(|a| a.ip().to_string())
        .unwrap_or_else(|_| "localhost".to_string())
}

fn remote_frame(timestamp: &str, hostname: &str, tag: &str, pid: u32, msg: &str) -> String {
    format!("<{SYSLOG_PRIORITY}>{timestamp} {hostname} {tag}[{pid}]: {msg}\n")
}

#[cfg(unix)]
fn local_frame(timestamp: &str, tag: &str, pid: u32, msg: &str) -> String {
    format!("<{SYSLOG_PRIORITY}>{timestamp} {tag}[{pid}]: {msg}\n")
}

/// Emits each line to every registered sink in order. A failing sink is
/// logged and skipped; one slow or broken destination must not take the
/// payload away from the others or fail the request that produced it.
pub struct FanoutSink {
    sinks: Vec<std::sync::Arc<dyn PayloadSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<std::sync::Arc<dyn PayloadSink>>) -> Self {
        FanoutSink { sinks }
    }
}

#[async_trait]
impl PayloadSink for FanoutSink {
    async fn emit(&self, line: &str) -> Result<(), SinkError> {
        for sink in &self.sinks {
            if let Err(e) = sink.emit(line).await {
                error!("Failed to write payload line to sink: {e}");
            }
        }
        Ok(())
    }
}
