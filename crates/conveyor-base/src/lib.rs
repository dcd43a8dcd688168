//! Core structs used by every conveyor node: the coordinator, workers, the test stage, the
//! repository, and clients.

pub mod envelope;
pub mod job;
pub mod peers;
pub mod proto;

pub use envelope::{Command, Envelope, MessageKind};
pub use job::{JobDescriptor, TestElement};

use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use std::{num::ParseIntError, str::FromStr};
use strum::EnumString;

/// A `host:port` address that a node listens on. Every node knows every other node's address
/// statically, through the [`peers::PeerTable`].
#[derive(
    Clone, Debug, Default, Deserialize, Display, Eq, From, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
#[serde(transparent)]
pub struct EndPoint(String);

impl EndPoint {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// An unset end point is used for replies that should never leave the node.
    pub fn is_unset(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for EndPoint {
    fn from(address: &str) -> Self {
        Self(address.to_owned())
    }
}

/// Index of a position in the coordinator's worker pool. A worker process is started with its
/// slot index and derives its listening address from it.
#[derive(
    Copy, Clone, Debug, Deserialize, Display, Eq, From, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub struct SlotId(u32);

impl SlotId {
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl FromStr for SlotId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(u32::from_str(s.trim())?))
    }
}

/// Outcome of a build or of a test run. This is ordinary payload data, not an error.
#[derive(
    Clone, Copy, Debug, Deserialize, Display, EnumString, Eq, Hash, PartialEq, Serialize,
)]
pub enum Verdict {
    Success,
    Failure,
}

impl Verdict {
    pub fn from_success(success: bool) -> Self {
        if success {
            Self::Success
        } else {
            Self::Failure
        }
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}
