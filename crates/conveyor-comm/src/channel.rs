//! Receiving side of a node's transport.

use crate::{error::ChannelError, file_sink::FileSink};
use anyhow::Result;
use conveyor_base::{
    proto::{Acknowledgment, Transmission},
    EndPoint, Envelope,
};
use conveyor_util::net;
use slog::{debug, o, warn, Logger};
use std::{net::SocketAddr, path::PathBuf};
use tokio::{
    io::BufReader,
    net::{TcpListener, TcpStream},
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::{JoinHandle, JoinSet},
};

/// A node's single inbound listener. Peers connect to it and push [`Transmission`]s, which are
/// acknowledged one at a time. Envelopes are queued for [`Channel::receive`]; files are written
/// into the node's storage directory as they arrive.
///
/// Dropping the channel, or calling [`Channel::close`], stops the listener and every connection.
#[derive(Debug)]
pub struct Channel {
    address: EndPoint,
    local_addr: SocketAddr,
    inbound: UnboundedReceiver<Envelope>,
    listener: JoinHandle<()>,
    closed: bool,
}

impl Channel {
    /// Start listening on `address`. Received files are stored in `storage`; a node without
    /// storage refuses every file. Fails with [`ChannelError::BindConflict`] if the address is
    /// already taken.
    pub async fn bind(
        address: &EndPoint,
        storage: Option<PathBuf>,
        log: Logger,
    ) -> Result<Self, ChannelError> {
        let bind_conflict = |source| ChannelError::BindConflict {
            address: address.clone(),
            source,
        };
        let listener = TcpListener::bind(address.as_str())
            .await
            .map_err(bind_conflict)?;
        let local_addr = listener.local_addr().map_err(bind_conflict)?;
        let (inbound_sender, inbound) = mpsc::unbounded_channel();
        let listener = tokio::task::spawn(listener_main(listener, inbound_sender, storage, log));
        Ok(Self {
            address: address.clone(),
            local_addr,
            inbound,
            listener,
            closed: false,
        })
    }

    /// The address the channel was bound with.
    pub fn address(&self) -> &EndPoint {
        &self.address
    }

    /// The socket address actually bound. Differs from [`Channel::address`] when binding to port
    /// 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the next inbound envelope. There is no timeout. Fails only once the channel is
    /// closed.
    pub async fn receive(&mut self) -> Result<Envelope, ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }
        self.inbound.recv().await.ok_or(ChannelError::Closed)
    }

    /// Stop accepting connections. Envelopes already queued are discarded and every later
    /// [`Channel::receive`] fails.
    pub fn close(&mut self) {
        self.closed = true;
        self.listener.abort();
        self.inbound.close();
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

/// Accept connections until aborted. Connection tasks live in a [`JoinSet`] owned by this task,
/// so aborting it tears them all down.
async fn listener_main(
    listener: TcpListener,
    inbound: UnboundedSender<Envelope>,
    storage: Option<PathBuf>,
    log: Logger,
) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((socket, peer_addr)) => {
                    let log = log.new(o!("peer_addr" => peer_addr.to_string()));
                    debug!(log, "connection accepted");
                    connections.spawn(connection_main(
                        socket,
                        inbound.clone(),
                        FileSink::new(storage.clone(), log.clone()),
                        log,
                    ));
                }
                Err(err) => {
                    warn!(log, "error accepting connection"; "error" => %err);
                }
            },
            Some(_) = connections.join_next() => {}
        }
    }
}

async fn connection_main(
    socket: TcpStream,
    inbound: UnboundedSender<Envelope>,
    mut sink: FileSink,
    log: Logger,
) {
    let (read_stream, mut write_stream) = socket.into_split();
    let mut read_stream = BufReader::new(read_stream);
    loop {
        let transmission: Result<Transmission> =
            net::read_message_from_async_socket(&mut read_stream).await;
        let Ok(transmission) = transmission else {
            break;
        };
        let accepted = match transmission {
            Transmission::Envelope(envelope) => {
                debug!(log, "envelope received";
                    "kind" => %envelope.kind,
                    "command" => %envelope.command,
                    "from" => %envelope.from);
                inbound.send(envelope).is_ok()
            }
            Transmission::OpenFile(name) => sink.open_for_write(&name).await,
            Transmission::FileBlock(block) => sink.write_block(&block).await,
            Transmission::CloseFile => sink.close_file().await,
        };
        if net::write_message_to_async_socket(&mut write_stream, Acknowledgment(accepted))
            .await
            .is_err()
        {
            break;
        }
    }
    debug!(log, "connection closed");
}
