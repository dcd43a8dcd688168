//! What travels over a connection between two nodes.

use crate::Envelope;
use serde::{Deserialize, Serialize};

/// Sent by a node's sender over an outbound connection. Every transmission is answered with one
/// [`Acknowledgment`] before the next one is sent.
///
/// A file is sent as one [`Transmission::OpenFile`], any number of [`Transmission::FileBlock`]s
/// covering its contents in order, and one [`Transmission::CloseFile`].
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum Transmission {
    Envelope(Envelope),
    OpenFile(String),
    FileBlock(Vec<u8>),
    CloseFile,
}

/// Sent back by the receiving node. `false` means the receiver could not accept the
/// transmission: the envelope could not be queued, or the file could not be opened or written.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Acknowledgment(pub bool);
