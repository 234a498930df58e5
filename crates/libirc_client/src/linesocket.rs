//! Connection establishment and the line-oriented reader/writer tasks, grounded on
//! `libtiny_client`'s `connect`/`resolve_addr`/`try_connect` and its reader/writer halves in
//! `main_loop`'s spawned tasks.
//!
//! DNS resolution runs on a blocking-pool thread (`to_socket_addrs` is synchronous); each
//! candidate address then gets its own TCP(+TLS) connect attempt bounded by
//! `irc.connect_timeout_secs`, tried in order until one succeeds or the list is exhausted. Once
//! connected, the socket is split and handed to two independent tasks: a reader that buffers
//! bytes and yields complete `\r\n`/`\n`-terminated lines onto a bounded channel, and a writer
//! that pulls lines off another bounded channel and appends `\r\n` before writing (the
//! `libirc_wire` builders never include the terminator themselves, so it's added exactly once,
//! here).

use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::error::SocketError;
use crate::stream::Stream;

const LINE_QUEUE_DEPTH: usize = 256;
const READ_CHUNK: usize = 4096;

/// A connected, line-buffered duplex socket to an IRC server. Dropping it (or exhausting its
/// inbound channel) stops both the reader and writer tasks.
pub(crate) struct LineSocket {
    outbound: mpsc::Sender<String>,
    inbound: mpsc::Receiver<Result<String, SocketError>>,
    reader_task: tokio::task::JoinHandle<()>,
    writer_task: tokio::task::JoinHandle<()>,
}

impl LineSocket {
    /// Resolve `host`, then try each resolved address in turn, TLS-wrapped if `tls`, each bounded
    /// by `connect_timeout`. Returns as soon as one address connects.
    pub(crate) async fn connect(
        host: &str,
        port: u16,
        tls: bool,
        connect_timeout: Duration,
    ) -> Result<LineSocket, SocketError> {
        let addrs = resolve(host, port).await?;

        let mut stream = None;
        for addr in addrs {
            let attempt = if tls {
                tokio::time::timeout(connect_timeout, Stream::new_tls(addr, host)).await
            } else {
                tokio::time::timeout(connect_timeout, Stream::new_tcp(addr)).await
            };
            match attempt {
                Ok(Ok(s)) => {
                    stream = Some(s);
                    break;
                }
                Ok(Err(_)) | Err(_) => continue,
            }
        }

        let stream = stream.ok_or(SocketError::ConnectFailed)?;
        Ok(LineSocket::spawn(stream))
    }

    fn spawn(stream: Stream) -> LineSocket {
        let (mut read_half, mut write_half) = tokio::io::split(stream);

        let (inbound_tx, inbound_rx) = mpsc::channel(LINE_QUEUE_DEPTH);
        let reader_task = tokio::task::spawn_local(async move {
            let mut buf = Vec::with_capacity(READ_CHUNK);
            let mut chunk = [0u8; READ_CHUNK];
            loop {
                let n = match read_half.read(&mut chunk).await {
                    Ok(0) => {
                        flush_remainder(&buf, &inbound_tx).await;
                        let _ = inbound_tx.send(Err(SocketError::Eof)).await;
                        return;
                    }
                    Ok(n) => n,
                    Err(err) => {
                        let _ = inbound_tx.send(Err(SocketError::from(err))).await;
                        return;
                    }
                };
                buf.extend_from_slice(&chunk[..n]);

                loop {
                    let newline_idx = match buf.iter().position(|&b| b == b'\n') {
                        Some(idx) => idx,
                        None => break,
                    };
                    let mut line: Vec<u8> = buf.drain(..=newline_idx).collect();
                    line.pop(); // '\n'
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }
                    let line = String::from_utf8_lossy(&line).into_owned();
                    if inbound_tx.send(Ok(line)).await.is_err() {
                        return;
                    }
                }
            }
        });

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(LINE_QUEUE_DEPTH);
        let writer_task = tokio::task::spawn_local(async move {
            while let Some(line) = outbound_rx.recv().await {
                if write_half.write_all(line.as_bytes()).await.is_err() {
                    return;
                }
                if write_half.write_all(b"\r\n").await.is_err() {
                    return;
                }
                if write_half.flush().await.is_err() {
                    return;
                }
            }
        });

        LineSocket {
            outbound: outbound_tx,
            inbound: inbound_rx,
            reader_task,
            writer_task,
        }
    }

    /// Tear down the reader/writer tasks: drop the channels (so each task exits at its next
    /// natural yield point) and give them 1s to do so, aborting whichever hasn't by then. Per
    /// the concurrency model's cancellation policy: background tasks get a grace period, not an
    /// indefinite wait.
    pub(crate) async fn shutdown(self) {
        let LineSocket {
            outbound,
            inbound,
            reader_task,
            writer_task,
        } = self;
        drop(outbound);
        drop(inbound);

        for task in [reader_task, writer_task] {
            if tokio::time::timeout(Duration::from_secs(1), &task)
                .await
                .is_err()
            {
                task.abort();
            }
        }
    }

    /// Queue `line` (without a terminator) for the writer task. Silently dropped if the writer
    /// has already stopped (the next `readline` will surface the reason).
    pub(crate) fn writeline(&self, line: String) {
        let _ = self.outbound.try_send(line);
    }

    /// A clone of the writer task's inbound sender, so `Context::set_outbound` can queue lines
    /// for this connection directly instead of routing them through a forwarding task.
    pub(crate) fn outbound(&self) -> mpsc::Sender<String> {
        self.outbound.clone()
    }

    /// Read the next complete line, or the error that ended the connection.
    pub(crate) async fn readline(&mut self) -> Result<String, SocketError> {
        match self.inbound.recv().await {
            Some(result) => result,
            None => Err(SocketError::BrokenPipe),
        }
    }
}

async fn flush_remainder(buf: &[u8], inbound_tx: &mpsc::Sender<Result<String, SocketError>>) {
    if !buf.is_empty() {
        let line = String::from_utf8_lossy(buf).into_owned();
        let _ = inbound_tx.send(Ok(line)).await;
    }
}

async fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>, SocketError> {
    let owned_host = host.to_owned();
    let addrs = tokio::task::spawn_blocking(move || (owned_host.as_str(), port).to_socket_addrs())
        .await
        .map_err(|join_err| {
            SocketError::Dns(std::io::Error::new(
                std::io::ErrorKind::Other,
                join_err.to_string(),
            ))
        })?
        .map_err(SocketError::Dns)?
        .collect::<Vec<_>>();
    if addrs.is_empty() {
        return Err(SocketError::ConnectFailed);
    }
    Ok(addrs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test(flavor = "current_thread")]
    async fn readline_splits_on_crlf_and_bare_lf() {
        tokio::task::LocalSet::new()
            .run_until(async {
                let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
                let addr = listener.local_addr().unwrap();

                let server = tokio::task::spawn_local(async move {
                    let (mut socket, _) = listener.accept().await.unwrap();
                    socket
                        .write_all(b"PING :one\r\nPING :two\n")
                        .await
                        .unwrap();
                });

                let mut line_socket =
                    LineSocket::connect(&addr.ip().to_string(), addr.port(), false, Duration::from_secs(5))
                        .await
                        .unwrap();

                let first = line_socket.readline().await.unwrap();
                let second = line_socket.readline().await.unwrap();
                assert_eq!(first, "PING :one");
                assert_eq!(second, "PING :two");

                server.await.unwrap();
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn readline_reports_eof_when_peer_closes() {
        tokio::task::LocalSet::new()
            .run_until(async {
                let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
                let addr = listener.local_addr().unwrap();

                tokio::task::spawn_local(async move {
                    let (_socket, _) = listener.accept().await.unwrap();
                });

                let mut line_socket =
                    LineSocket::connect(&addr.ip().to_string(), addr.port(), false, Duration::from_secs(5))
                        .await
                        .unwrap();

                let result = line_socket.readline().await;
                assert!(matches!(result, Err(SocketError::Eof)));
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn connect_fails_fast_when_nothing_listens() {
        tokio::task::LocalSet::new()
            .run_until(async {
                let result =
                    LineSocket::connect("127.0.0.1", 1, false, Duration::from_millis(200)).await;
                assert!(result.is_err());
            })
            .await;
    }
}
