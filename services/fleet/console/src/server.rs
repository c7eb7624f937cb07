//! TCP listener and per-connection loops.
//!
//! Every connection runs three loops under one `select!`: the line reader,
//! the event loop fed by the router broadcast, and the socket writer. When
//! any of them ends the others are dropped with it.

use crate::error::ConsoleError;
use crate::render::Frame;
use crate::session::{ConsoleContext, Session, SessionView};
use fleet_router::DecodedEvent;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

/// Frames a session may have queued for its socket
pub const DEFAULT_OUTBOUND_QUEUE: usize = 256;

/// Longest accepted input line
pub const MAX_LINE_LENGTH: usize = 4096;

/// Console listener
pub struct ConsoleServer {
    ctx: Arc<ConsoleContext>,
    outbound_queue: usize,
    next_id: AtomicU64,
}

struct ClientGuard {
    ctx: Arc<ConsoleContext>,
}

impl ClientGuard {
    fn new(ctx: Arc<ConsoleContext>) -> (Self, usize) {
        let clients = ctx.client_connected();
        (Self { ctx }, clients)
    }
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.ctx.client_disconnected();
    }
}

impl ConsoleServer {
    /// Create a server
    pub fn new(ctx: Arc<ConsoleContext>, outbound_queue: usize) -> Self {
        Self {
            ctx,
            outbound_queue: outbound_queue.max(1),
            next_id: AtomicU64::new(0),
        }
    }

    /// Shared context
    pub fn context(&self) -> &Arc<ConsoleContext> {
        &self.ctx
    }

    /// Bind the listening socket
    pub async fn bind(addr: &str) -> Result<TcpListener, ConsoleError> {
        let listener = TcpListener::bind(addr).await?;
        info!("Console listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Accept connections forever
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
                    }
                    let server = self.clone();
                    tokio::spawn(async move {
                        server.handle_connection(stream, peer.to_string()).await;
                    });
                }
                Err(e) => {
                    error!("Console accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    /// Run one session over any byte stream until it ends
    pub async fn handle_connection<S>(self: Arc<Self>, stream: S, peer: String)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (_guard, clients) = ClientGuard::new(self.ctx.clone());
        info!("Console client {} connected from {} ({} connected)", id, peer, clients);

        let (reader, writer) = tokio::io::split(stream);
        let (out_tx, out_rx) = mpsc::channel::<String>(self.outbound_queue);
        let mut session = Session::new(id, self.ctx.clone());
        let (view_tx, view_rx) = watch::channel(session.view());
        let events = self.ctx.router().subscribe();

        // Greeting goes out before any event can be queued
        if out_tx.send(Session::greeting().to_line()).await.is_err() {
            return;
        }

        let read_loop = async {
            let mut reader = BufReader::new(reader);
            let mut buf = Vec::with_capacity(256);
            loop {
                let frame = match read_line_bounded(&mut reader, &mut buf).await {
                    Ok(LineRead::Line(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        let frame = session.handle_line(line);
                        view_tx.send_replace(session.view());
                        frame
                    }
                    Ok(LineRead::TooLong) => {
                        debug!("Console client {} sent a line over {} bytes", id, MAX_LINE_LENGTH);
                        Frame::error(&ConsoleError::InvalidFormat)
                    }
                    Ok(LineRead::Eof) => break,
                    Err(e) => {
                        debug!("Console client {} read error: {}", id, e);
                        break;
                    }
                };
                if out_tx.send(frame.to_line()).await.is_err() {
                    break;
                }
            }
        };

        tokio::select! {
            _ = read_loop => {}
            result = write_loop(writer, out_rx) => {
                if let Err(e) = result {
                    debug!("Console client {} write error: {}", id, e);
                }
            }
            _ = event_loop(id, events, view_rx, out_tx.clone()) => {}
        }

        info!("Console client {} disconnected", id);
    }
}

enum LineRead {
    Line(String),
    TooLong,
    Eof,
}

/// Read one line without buffering more than `MAX_LINE_LENGTH` bytes of it
///
/// An over-long line is consumed up to and including its newline.
async fn read_line_bounded<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<LineRead>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    buf.clear();
    let read = (&mut *reader)
        .take(MAX_LINE_LENGTH as u64 + 1)
        .read_until(b'\n', buf)
        .await?;
    if read == 0 {
        return Ok(LineRead::Eof);
    }
    if buf.last() == Some(&b'\n') || buf.len() <= MAX_LINE_LENGTH {
        return Ok(LineRead::Line(String::from_utf8_lossy(buf).into_owned()));
    }

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            break;
        }
        match available.iter().position(|b| *b == b'\n') {
            Some(pos) => {
                reader.consume(pos + 1);
                break;
            }
            None => {
                let len = available.len();
                reader.consume(len);
            }
        }
    }
    Ok(LineRead::TooLong)
}

async fn write_loop<W: AsyncWrite>(writer: W, mut frames: mpsc::Receiver<String>) -> std::io::Result<()> {
    let mut writer = Box::pin(writer);
    while let Some(mut line) = frames.recv().await {
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}

/// Forward router events to one session
///
/// A full outbound queue stalls only this loop; the broadcast ring keeps
/// moving and the session later learns how many events it lost.
async fn event_loop(
    id: u64,
    mut events: broadcast::Receiver<Arc<DecodedEvent>>,
    view: watch::Receiver<SessionView>,
    out: mpsc::Sender<String>,
) {
    loop {
        let line = match events.recv().await {
            Ok(event) => {
                let frame = view.borrow().frame_for(&event);
                match frame {
                    Some(frame) => frame.to_line(),
                    None => continue,
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Console client {} lagging, dropped {} events", id, n);
                if !view.borrow().authenticated {
                    continue;
                }
                Frame::system(format!("dropped {} events", n)).to_line()
            }
            Err(broadcast::error::RecvError::Closed) => {
                let _ = out.send(Frame::system("router stopped").to_line()).await;
                break;
            }
        };
        if out.send(line).await.is_err() {
            break;
        }
    }
}
