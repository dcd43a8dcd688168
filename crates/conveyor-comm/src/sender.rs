//! Sending side of a node's transport.

use crate::error::ChannelError;
use conveyor_base::{
    proto::{Acknowledgment, Transmission},
    EndPoint, Envelope,
};
use conveyor_util::{fs, net};
use slog::{debug, Logger};
use std::{
    collections::{hash_map::Entry, HashMap},
    io, iter,
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::{net::TcpStream, time};

/// How long to keep trying a destination that refuses connections: `attempts` connects, with the
/// delay between them doubling from `initial_delay` up to `max_delay`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ConnectRetry {
    pub attempts: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl ConnectRetry {
    /// Give up after the first refused connect.
    pub const NONE: Self = Self {
        attempts: 1,
        initial_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
    };

    fn delays(self) -> impl Iterator<Item = Duration> {
        let max_delay = self.max_delay;
        iter::successors(Some(self.initial_delay), move |delay| {
            Some((*delay * 2).min(max_delay))
        })
        .take(self.attempts.saturating_sub(1))
    }
}

impl Default for ConnectRetry {
    /// Enough to cover a freshly spawned node binding its address.
    fn default() -> Self {
        Self {
            attempts: 10,
            initial_delay: Duration::from_millis(25),
            max_delay: Duration::from_secs(1),
        }
    }
}

/// Sends envelopes and files to other nodes, keeping one connection per destination. Every
/// transmission waits for the receiver's acknowledgment before returning, so transmissions to
/// one destination are delivered in order.
///
/// A cached connection the peer has closed is replaced before it is used, and a transmission that
/// fails on a reused connection is tried once more on a fresh one. Refused connects are retried
/// according to [`ConnectRetry`]. Any other failure drops the connection and the transmission.
pub struct Sender {
    storage: Option<PathBuf>,
    block_size: usize,
    connect_retry: ConnectRetry,
    connections: HashMap<EndPoint, TcpStream>,
    log: Logger,
}

impl Sender {
    /// Files posted by this sender are read from `storage` and sent in `block_size` chunks.
    pub fn new(storage: Option<PathBuf>, block_size: usize, log: Logger) -> Self {
        Self {
            storage,
            block_size: block_size.max(1),
            connect_retry: ConnectRetry::default(),
            connections: HashMap::new(),
            log,
        }
    }

    pub fn with_connect_retry(mut self, connect_retry: ConnectRetry) -> Self {
        self.connect_retry = connect_retry;
        self
    }

    pub async fn send(&mut self, envelope: &Envelope) -> Result<(), ChannelError> {
        self.transmit(&envelope.to, &Transmission::Envelope(envelope.clone()))
            .await
    }

    /// Stream the file `name` from local storage to `to`: open, every block in order, close. The
    /// receiver stores it under the last component of `name`.
    pub async fn post_file(&mut self, to: &EndPoint, name: &str) -> Result<(), ChannelError> {
        let contents = self.read_local(name).await?;
        let remote_name = Path::new(name)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(name)
            .to_owned();
        self.transmit(to, &Transmission::OpenFile(remote_name))
            .await?;
        for block in contents.chunks(self.block_size) {
            self.transmit(to, &Transmission::FileBlock(block.to_vec()))
                .await?;
        }
        self.transmit(to, &Transmission::CloseFile).await?;
        debug!(self.log, "file sent"; "to" => %to, "name" => name, "bytes" => contents.len());
        Ok(())
    }

    /// Forget the connection to `to`, if there is one.
    pub fn disconnect(&mut self, to: &EndPoint) {
        if self.connections.remove(to).is_some() {
            debug!(self.log, "connection dropped"; "to" => %to);
        }
    }

    async fn read_local(&self, name: &str) -> Result<Vec<u8>, ChannelError> {
        let local_file = |source| ChannelError::LocalFile {
            name: name.to_owned(),
            source,
        };
        let Some(storage) = &self.storage else {
            return Err(local_file(anyhow::anyhow!("node has no storage")));
        };
        let path = fs::path_in(storage, name).map_err(local_file)?;
        fs::Fs::new().read(path).await.map_err(local_file)
    }

    async fn transmit(
        &mut self,
        to: &EndPoint,
        transmission: &Transmission,
    ) -> Result<(), ChannelError> {
        let reused = self.connections.contains_key(to);
        match self.transmit_once(to, transmission).await {
            Err(ChannelError::Transmit { source, .. }) if reused => {
                debug!(self.log, "reused connection failed, reconnecting";
                    "to" => %to,
                    "error" => %source);
                self.transmit_once(to, transmission).await
            }
            result => result,
        }
    }

    async fn transmit_once(
        &mut self,
        to: &EndPoint,
        transmission: &Transmission,
    ) -> Result<(), ChannelError> {
        let stream = self.connection(to).await?;
        let result = async {
            net::write_message_to_async_socket(&mut *stream, transmission).await?;
            net::read_message_from_async_socket::<Acknowledgment>(&mut *stream).await
        }
        .await;
        match result {
            Ok(Acknowledgment(true)) => Ok(()),
            Ok(Acknowledgment(false)) => Err(ChannelError::Refused {
                address: to.clone(),
            }),
            Err(source) => {
                self.connections.remove(to);
                Err(ChannelError::Transmit {
                    address: to.clone(),
                    source,
                })
            }
        }
    }

    async fn connection(&mut self, to: &EndPoint) -> Result<&mut TcpStream, ChannelError> {
        if to.is_unset() {
            return Err(ChannelError::Unreachable {
                address: to.clone(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "no destination"),
            });
        }
        if self.connections.get(to).is_some_and(is_closed) {
            debug!(self.log, "cached connection was closed by peer"; "to" => %to);
            self.connections.remove(to);
        }
        let stream = match self.connections.entry(to.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let stream = connect(to, self.connect_retry, &self.log).await?;
                stream.set_nodelay(true).ok();
                debug!(self.log, "connected"; "to" => %to);
                entry.insert(stream)
            }
        };
        Ok(stream)
    }
}

/// Receivers only ever write acknowledgments, and those are read before a transmission returns.
/// So an idle connection that is readable has either been shut down by the peer or is broken.
fn is_closed(stream: &TcpStream) -> bool {
    let mut byte = [0; 1];
    !matches!(stream.try_read(&mut byte), Err(err) if err.kind() == io::ErrorKind::WouldBlock)
}

async fn connect(
    to: &EndPoint,
    connect_retry: ConnectRetry,
    log: &Logger,
) -> Result<TcpStream, ChannelError> {
    let mut delays = connect_retry.delays();
    loop {
        match TcpStream::connect(to.as_str()).await {
            Ok(stream) => return Ok(stream),
            Err(source) => match delays.next() {
                Some(delay) if source.kind() == io::ErrorKind::ConnectionRefused => {
                    debug!(log, "connection refused, retrying";
                        "to" => %to,
                        "delay" => ?delay);
                    time::sleep(delay).await;
                }
                _ => {
                    return Err(ChannelError::Unreachable {
                        address: to.clone(),
                        source,
                    })
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_delays_double_up_to_the_cap() {
        let retry = ConnectRetry {
            attempts: 6,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };
        let delays: Vec<_> = retry.delays().map(|d| d.as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 500, 500]);
    }

    #[test]
    fn single_attempt_never_waits() {
        assert_eq!(ConnectRetry::NONE.delays().count(), 0);
    }
}
