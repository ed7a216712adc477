//! TCP dump server.
//!
//! One task per connection reads the request, then hands streaming to a
//! blocking thread running a [`ReplicaSender`]. Packets flow back through a
//! bounded channel, so a slow replica blocks its own sender and nothing
//! else.

use crate::config::ReplicationConfig;
use crate::error::{ReplicationError, ReplicationResult};
use crate::protocol::{read_frame, write_frame, DumpRequest, Packet};
use crate::sender::ReplicaSender;
use crate::sink::ChannelSink;
use binlog_core::LogFileManager;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

/// Serves dump requests for one log.
#[derive(Debug)]
pub struct DumpServer {
    config: ReplicationConfig,
    manager: Arc<LogFileManager>,
    stop: Arc<AtomicBool>,
    sessions: Arc<Semaphore>,
}

/// What a connection task needs from the server.
#[derive(Clone)]
struct SessionContext {
    config: ReplicationConfig,
    manager: Arc<LogFileManager>,
    stop: Arc<AtomicBool>,
    sessions: Arc<Semaphore>,
}

impl DumpServer {
    /// Creates a server for `manager`.
    pub fn new(config: ReplicationConfig, manager: Arc<LogFileManager>) -> Self {
        let sessions = Arc::new(Semaphore::new(config.max_connections));
        Self {
            config,
            manager,
            stop: Arc::new(AtomicBool::new(false)),
            sessions,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// Returns the number of dump sessions in progress.
    pub fn active_sessions(&self) -> usize {
        self.config.max_connections - self.sessions.available_permits()
    }

    /// Binds the configured address and serves until `shutdown` completes.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the address cannot be bound.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> ReplicationResult<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serves connections from `listener` until `shutdown` completes, then
    /// stops every session.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the listener has no local address.
    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> ReplicationResult<()> {
        let addr = listener.local_addr()?;
        info!(addr = %addr, max_connections = self.config.max_connections, "dump server listening");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    let ctx = self.context();
                    tokio::spawn(async move {
                        match serve_connection(ctx, stream, peer).await {
                            Ok(()) => {}
                            Err(e) if e.is_disconnect() => debug!(peer = %peer, "replica disconnected"),
                            Err(e) => warn!(peer = %peer, error = %e, "dump session failed"),
                        }
                    });
                }
                () = &mut shutdown => break,
            }
        }

        self.stop.store(true, Ordering::SeqCst);
        info!(addr = %addr, "dump server shutting down");
        Ok(())
    }

    fn context(&self) -> SessionContext {
        SessionContext {
            config: self.config.clone(),
            manager: Arc::clone(&self.manager),
            stop: Arc::clone(&self.stop),
            sessions: Arc::clone(&self.sessions),
        }
    }
}

async fn send_error(stream: &mut TcpStream, err: &ReplicationError) {
    let frame = Packet::Error(err.to_string()).to_frame();
    let _ = write_frame(stream, &frame).await;
}

async fn serve_connection(
    ctx: SessionContext,
    mut stream: TcpStream,
    peer: SocketAddr,
) -> ReplicationResult<()> {
    let Ok(permit) = Arc::clone(&ctx.sessions).try_acquire_owned() else {
        let err = ReplicationError::TooManyConnections(ctx.config.max_connections);
        send_error(&mut stream, &err).await;
        return Err(err);
    };

    let Some((tag, payload)) = read_frame(&mut stream).await? else {
        return Ok(());
    };
    let sender = match DumpRequest::from_frame(tag, &payload).and_then(|request| {
        info!(
            peer = %peer,
            replica = request.server_id,
            file = request.start_file.as_deref().unwrap_or("<first>"),
            offset = request.start_offset,
            "dump session started"
        );
        ReplicaSender::from_request(
            Arc::clone(&ctx.manager),
            &request,
            ctx.config.default_heartbeat,
        )
    }) {
        Ok(sender) => sender,
        Err(e) => {
            send_error(&mut stream, &e).await;
            return Err(e);
        }
    };

    let conn_stop = Arc::new(AtomicBool::new(false));
    let mut sender = sender
        .with_poll_interval(ctx.config.poll_interval)
        .with_stop_flag(Arc::clone(&ctx.stop))
        .with_stop_flag(Arc::clone(&conn_stop));
    let (tx, mut rx) = mpsc::channel(ctx.config.channel_capacity.max(1));
    let worker = tokio::task::spawn_blocking(move || {
        let mut sink = ChannelSink::new(tx);
        sender.run(&mut sink)
    });

    let (mut rd, mut wr) = stream.split();
    let mut probe = [0u8; 1];
    let written: ReplicationResult<()> = loop {
        tokio::select! {
            packet = rx.recv() => match packet {
                Some(packet) => {
                    let last = !matches!(packet, Packet::Event(_));
                    if let Err(e) = write_frame(&mut wr, &packet.to_frame()).await {
                        break Err(e);
                    }
                    if last {
                        break Ok(());
                    }
                }
                None => break Ok(()),
            },
            // A replica sends nothing after its request.
            read = rd.read(&mut probe) => {
                break match read {
                    Ok(0) => Err(ReplicationError::Disconnected),
                    Ok(_) => Err(ReplicationError::protocol("unexpected data after dump request")),
                    Err(e) => Err(e.into()),
                };
            }
        }
    };

    conn_stop.store(true, Ordering::SeqCst);
    // Unblocks a sender waiting on a full channel.
    drop(rx);
    let outcome = worker
        .await
        .map_err(|e| ReplicationError::Internal(format!("sender task failed: {e}")))?;
    drop(permit);

    written?;
    let stats = outcome?;
    info!(
        peer = %peer,
        events = stats.events,
        bytes = stats.bytes,
        skipped = stats.skipped,
        "dump session ended"
    );
    Ok(())
}
