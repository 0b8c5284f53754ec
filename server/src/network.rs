//! Server network layer handling TCP connections and match loop coordination
//!
//! One task owns the [`MatchController`]. Everything else (the accept task,
//! per-connection readers and writers, the public [`ServerHandle`]) talks to
//! it through a single message channel, so match state is only ever touched
//! serially. After every event the task reconciles the listener and the tick
//! timer with what the controller wants.

use crate::client_manager::{ClientId, OUTBOX_CAPACITY};
use crate::config::ServerConfig;
use crate::controller::{MatchController, MatchSnapshot};
use crate::error::{ServerError, ServerResult};
use log::{debug, error, info, warn};
use shared::MAX_FRAME_LEN;
use std::collections::HashMap;
use std::future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

const LISTEN_BACKLOG: u32 = 16;
const REBIND_DELAY: Duration = Duration::from_secs(1);

/// Messages sent from network tasks and the handle to the match task
#[derive(Debug)]
pub enum ServerMessage {
    ConnectionAccepted {
        stream: TcpStream,
        addr: SocketAddr,
    },
    FrameReceived {
        client_id: ClientId,
        frame: String,
    },
    ConnectionClosed {
        client_id: ClientId,
    },
    StartLoop {
        reply: oneshot::Sender<bool>,
    },
    StopLoop {
        reply: oneshot::Sender<()>,
    },
    Broadcast {
        message: String,
        reply: oneshot::Sender<usize>,
    },
    Shutdown,
}

/// Reader and writer tasks of one open connection
struct ConnectionTasks {
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl ConnectionTasks {
    /// Drops both halves of the socket, even if the writer is blocked on a
    /// peer that stopped reading.
    fn abort(&self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// Match server coordinating networking and game simulation
pub struct Server {
    controller: MatchController,
    local_addr: SocketAddr,

    /// Listener bound by `start`, handed to the first accept task.
    bound_listener: Option<TcpListener>,
    listener_task: Option<JoinHandle<()>>,
    connections: HashMap<ClientId, ConnectionTasks>,
    ticker: Option<Interval>,
    /// Next attempt to reopen the listener after a failed rebind.
    rebind_at: Option<Instant>,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    snapshot_tx: watch::Sender<MatchSnapshot>,
}

impl Server {
    /// Validates the configuration, binds the listener and spawns the match task.
    ///
    /// Bind failures are returned to the caller; nothing is spawned in that case.
    pub async fn start(config: ServerConfig) -> ServerResult<ServerHandle> {
        config.validate()?;

        let bind_addr = config.bind_addr;
        let listener =
            bind_listener(bind_addr).map_err(|source| ServerError::Bind { addr: bind_addr, source })?;
        let local_addr = listener.local_addr()?;
        info!("Server listening on {}", local_addr);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let controller = MatchController::new(config);
        let (snapshot_tx, snapshot_rx) = watch::channel(controller.snapshot());

        let server = Server {
            controller,
            local_addr,
            bound_listener: Some(listener),
            listener_task: None,
            connections: HashMap::new(),
            ticker: None,
            rebind_at: None,
            server_tx: server_tx.clone(),
            server_rx,
            snapshot_tx,
        };
        let task = tokio::spawn(server.run());

        Ok(ServerHandle {
            local_addr,
            server_tx,
            snapshot_rx,
            task: Some(task),
        })
    }

    /// Main server loop coordinating all operations
    async fn run(mut self) {
        self.reconcile().await;
        info!("Server started successfully");

        loop {
            tokio::select! {
                // Handle network events and control requests
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                        Some(message) => self.handle_message(message),
                    }
                },

                // Handle match tick events
                _ = next_tick(&mut self.ticker) => {
                    self.controller.tick();
                    let tick = self.controller.game().tick;
                    if tick % 600 == 0 {
                        debug!("Tick {}: {} connections", tick, self.controller.connection_count());
                    }
                },

                _ = sleep_until_deadline(self.controller.start_deadline()) => {
                    self.controller.on_start_timer();
                },

                _ = sleep_until_deadline(self.rebind_at) => {
                    self.rebind_at = None;
                },
            }

            self.reconcile().await;
        }

        self.stop_tasks().await;
    }

    fn handle_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::ConnectionAccepted { stream, addr } => {
                self.on_connection(stream, addr);
            }
            ServerMessage::FrameReceived { client_id, frame } => {
                self.controller.handle_frame(client_id, &frame);
            }
            ServerMessage::ConnectionClosed { client_id } => {
                self.connections.remove(&client_id);
                self.controller.on_connection_closed(client_id);
            }
            ServerMessage::StartLoop { reply } => {
                let _ = reply.send(self.controller.start_loop());
            }
            ServerMessage::StopLoop { reply } => {
                self.controller.stop_loop();
                let _ = reply.send(());
            }
            ServerMessage::Broadcast { message, reply } => {
                let _ = reply.send(self.controller.broadcast_message(&message));
            }
            ServerMessage::Shutdown => {}
        }
    }

    /// Registers an accepted stream and spawns its reader and writer tasks.
    /// Streams beyond the player cap are closed immediately.
    fn on_connection(&mut self, stream: TcpStream, addr: SocketAddr) {
        let (outbox_tx, outbox_rx) = mpsc::channel(OUTBOX_CAPACITY);
        let Some(client_id) = self.controller.accept_connection(addr, outbox_tx) else {
            drop(stream);
            return;
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY for client {}: {}", client_id, e);
        }

        let (reader, writer) = stream.into_split();
        let server_tx = self.server_tx.clone();
        let reader_task = tokio::spawn(async move {
            if let Err(e) = read_frames(client_id, reader, &server_tx).await {
                debug!("Read error on client {}: {}", client_id, e);
            }
            let _ = server_tx.send(ServerMessage::ConnectionClosed { client_id });
        });
        let writer_task = tokio::spawn(write_commands(client_id, writer, outbox_rx));

        self.connections.insert(
            client_id,
            ConnectionTasks {
                reader: reader_task,
                writer: writer_task,
            },
        );
    }

    /// Brings the listener and tick timer in line with the controller, then
    /// publishes a fresh snapshot.
    async fn reconcile(&mut self) {
        self.controller.close_stalled();
        let controller = &self.controller;
        self.connections.retain(|client_id, tasks| {
            let open = controller.is_connected(*client_id);
            if !open {
                tasks.abort();
            }
            open
        });

        let wants_listener = self.controller.should_listen();
        if wants_listener && self.listener_task.is_none() && self.rebind_at.is_none() {
            self.open_listener();
        } else if !wants_listener && self.listener_task.is_some() {
            self.close_listener().await;
        }
        self.controller.set_listening(self.listener_task.is_some());

        if self.controller.is_running() {
            if self.ticker.is_none() {
                self.ticker = Some(new_ticker(self.controller.tick_duration()));
            }
        } else {
            self.ticker = None;
        }

        self.snapshot_tx.send_replace(self.controller.snapshot());
    }

    fn open_listener(&mut self) {
        let listener = match self.bound_listener.take() {
            Some(listener) => Ok(listener),
            None => bind_listener(self.local_addr),
        };

        match listener {
            Ok(listener) => {
                info!("Accepting connections on {}", self.local_addr);
                self.listener_task = Some(spawn_acceptor(listener, self.server_tx.clone()));
            }
            Err(e) => {
                error!("Failed to reopen listener on {}: {}", self.local_addr, e);
                self.rebind_at = Some(Instant::now() + REBIND_DELAY);
            }
        }
    }

    /// Stops accepting and releases the port.
    async fn close_listener(&mut self) {
        if let Some(task) = self.listener_task.take() {
            task.abort();
            let _ = task.await;
            info!("Player cap reached, no longer accepting connections");
        }
    }

    async fn stop_tasks(&mut self) {
        if let Some(task) = self.listener_task.take() {
            task.abort();
            let _ = task.await;
        }
        for (_, tasks) in self.connections.drain() {
            tasks.abort();
        }

        self.controller.stop_loop();
        self.controller.set_listening(false);
        self.ticker = None;
        self.snapshot_tx.send_replace(self.controller.snapshot());
    }
}

/// Binds a listening socket with address reuse, so the port can be reopened
/// right after the previous listener is dropped.
fn bind_listener(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(LISTEN_BACKLOG)
}

/// Spawns task that continuously accepts incoming connections
fn spawn_acceptor(
    listener: TcpListener,
    server_tx: mpsc::UnboundedSender<ServerMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    if server_tx
                        .send(ServerMessage::ConnectionAccepted { stream, addr })
                        .is_err()
                    {
                        break;
                    }
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    })
}

/// Splits an inbound byte stream into frames and forwards them to the match task.
///
/// Frames end at `\n`; a trailing `\r` is stripped. Frames longer than
/// `MAX_FRAME_LEN` are discarded up to the next newline. A final unterminated
/// frame before EOF is still delivered.
pub(crate) async fn read_frames<R>(
    client_id: ClientId,
    reader: R,
    server_tx: &mpsc::UnboundedSender<ServerMessage>,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = Vec::with_capacity(256);
    let mut discarding = false;

    loop {
        line.clear();
        let read = (&mut reader)
            .take(MAX_FRAME_LEN as u64 + 1)
            .read_until(b'\n', &mut line)
            .await?;
        if read == 0 {
            return Ok(());
        }

        let terminated = line.last() == Some(&b'\n');
        if discarding {
            discarding = !terminated;
            continue;
        }
        if !terminated && line.len() > MAX_FRAME_LEN {
            warn!("Dropping oversized frame from client {}", client_id);
            discarding = true;
            continue;
        }

        let frame = String::from_utf8_lossy(&line);
        let frame = frame.trim_end_matches(&['\r', '\n'][..]);
        if frame.is_empty() {
            continue;
        }

        let message = ServerMessage::FrameReceived {
            client_id,
            frame: frame.to_string(),
        };
        if server_tx.send(message).is_err() {
            return Ok(());
        }
    }
}

/// Drains a connection's outbox onto the wire until the client is dropped.
pub(crate) async fn write_commands<W>(
    client_id: ClientId,
    mut writer: W,
    mut outbox: mpsc::Receiver<String>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = outbox.recv().await {
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            debug!("Failed to write to client {}: {}", client_id, e);
            return;
        }
    }
    let _ = writer.shutdown().await;
}

fn new_ticker(period: Duration) -> Interval {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => future::pending().await,
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}

/// Control surface of a running server
///
/// Dropping the handle shuts the server down.
pub struct ServerHandle {
    local_addr: SocketAddr,
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    snapshot_rx: watch::Receiver<MatchSnapshot>,
    task: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Address the listener is bound to, with the real port when 0 was requested.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Latest published match snapshot.
    pub fn snapshot(&self) -> MatchSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Receiver that is notified after every handled event.
    pub fn subscribe(&self) -> watch::Receiver<MatchSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Starts the tick loop. Returns false if the match is not ready.
    pub async fn start_loop(&self) -> ServerResult<bool> {
        self.request(|reply| ServerMessage::StartLoop { reply }).await
    }

    /// Stops the tick loop. Once this returns, no further tick runs until the
    /// loop is started again.
    pub async fn stop_loop(&self) -> ServerResult<()> {
        self.request(|reply| ServerMessage::StopLoop { reply }).await
    }

    /// Sends free-form text to every connection. Returns how many accepted it.
    pub async fn broadcast(&self, message: impl Into<String>) -> ServerResult<usize> {
        let message = message.into();
        self.request(|reply| ServerMessage::Broadcast { message, reply })
            .await
    }

    /// Stops the server and waits for the match task to finish.
    pub async fn shutdown(mut self) {
        let _ = self.server_tx.send(ServerMessage::Shutdown);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Match task ended abnormally: {}", e);
            }
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ServerMessage,
    ) -> ServerResult<T> {
        let (reply, response) = oneshot::channel();
        self.server_tx
            .send(build(reply))
            .map_err(|_| ServerError::ServerClosed)?;
        response.await.map_err(|_| ServerError::ServerClosed)
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            let _ = self.server_tx.send(ServerMessage::Shutdown);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use std::net::{IpAddr, Ipv4Addr};
    use tokio_test::io::Builder;

    fn local_config() -> ServerConfig {
        ServerConfig {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
            countdown: Duration::ZERO,
            seed: Some(3),
            ..Default::default()
        }
    }

    fn frames(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(message) = rx.try_recv() {
            match message {
                ServerMessage::FrameReceived { client_id, frame } => {
                    assert_eq!(client_id, 7);
                    frames.push(frame);
                }
                other => panic!("Unexpected message: {:?}", other),
            }
        }
        frames
    }

    #[tokio::test]
    async fn test_read_frames_splits_lines() {
        let reader = Builder::new()
            .read(b"JOIN:left:Alice\r\nREA")
            .read(b"DY:1\n\nup")
            .build();
        let (tx, mut rx) = mpsc::unbounded_channel();

        read_frames(7, reader, &tx).await.unwrap();

        assert_eq!(frames(&mut rx), vec!["JOIN:left:Alice", "READY:1", "up"]);
    }

    #[tokio::test]
    async fn test_read_frames_drops_oversized_frame() {
        let mut data = vec![b'A'; MAX_FRAME_LEN * 2];
        data.extend_from_slice(b"\ndown\n");
        let reader = Builder::new().read(&data).build();
        let (tx, mut rx) = mpsc::unbounded_channel();

        read_frames(7, reader, &tx).await.unwrap();

        assert_eq!(frames(&mut rx), vec!["down"]);
    }

    #[tokio::test]
    async fn test_read_frames_accepts_frame_at_limit() {
        let mut data = vec![b'B'; MAX_FRAME_LEN];
        data.push(b'\n');
        let reader = Builder::new().read(&data).build();
        let (tx, mut rx) = mpsc::unbounded_channel();

        read_frames(7, reader, &tx).await.unwrap();

        let received = frames(&mut rx);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].len(), MAX_FRAME_LEN);
    }

    #[tokio::test]
    async fn test_write_commands_in_order() {
        let writer = Builder::new().write(b"START\n").write(b"SCORE:1:0\n").build();
        let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
        tx.try_send("START\n".to_string()).unwrap();
        tx.try_send("SCORE:1:0\n".to_string()).unwrap();
        drop(tx);

        write_commands(7, writer, rx).await;
    }

    #[tokio::test]
    async fn test_start_reports_bound_address() {
        let handle = Server::start(local_config()).await.unwrap();

        assert_ne!(handle.local_addr().port(), 0);
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.connections, 0);
        assert!(!snapshot.running);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_fails_when_port_taken() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let config = ServerConfig {
            bind_addr: taken.local_addr().unwrap(),
            ..local_config()
        };

        let result = Server::start(config).await;

        assert!(matches!(result, Err(ServerError::Bind { .. })));
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let config = ServerConfig {
            tick_rate: 0,
            ..local_config()
        };

        assert!(matches!(
            Server::start(config).await,
            Err(ServerError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_control_requests_without_players() {
        let handle = Server::start(local_config()).await.unwrap();

        assert!(!handle.start_loop().await.unwrap());
        handle.stop_loop().await.unwrap();
        assert_eq!(handle.broadcast("nobody home").await.unwrap(), 0);
        assert!(!handle.snapshot().running);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_requests_after_match_task_ends() {
        let mut handle = Server::start(local_config()).await.unwrap();
        assert!(handle.server_tx.send(ServerMessage::Shutdown).is_ok());
        handle.task.take().unwrap().await.unwrap();

        assert!(matches!(
            handle.start_loop().await,
            Err(ServerError::ServerClosed)
        ));
        assert!(matches!(
            handle.stop_loop().await,
            Err(ServerError::ServerClosed)
        ));
        assert!(matches!(
            handle.broadcast("anyone?").await,
            Err(ServerError::ServerClosed)
        ));
    }
}
