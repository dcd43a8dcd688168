//! The static address table every node is configured with. There is no discovery: this is the
//! seam where one would be plugged in.

use crate::{EndPoint, SlotId};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct PeerTable {
    pub coordinator: EndPoint,
    pub client: EndPoint,
    pub repository: EndPoint,
    pub test_stage: EndPoint,
    /// Host the coordinator's workers listen on.
    pub worker_host: String,
    /// Slot `i` listens on `worker_base_port + i`.
    pub worker_base_port: u16,
}

impl Default for PeerTable {
    fn default() -> Self {
        Self {
            coordinator: "localhost:8080".into(),
            client: "localhost:8081".into(),
            repository: "localhost:8082".into(),
            test_stage: "localhost:8083".into(),
            worker_host: "localhost".into(),
            worker_base_port: 8090,
        }
    }
}

impl PeerTable {
    /// The address of the worker in `slot`. Returns `None` if the port would overflow.
    pub fn worker(&self, slot: SlotId) -> Option<EndPoint> {
        let offset = u16::try_from(slot.as_u32()).ok()?;
        let port = self.worker_base_port.checked_add(offset)?;
        Some(EndPoint::new(format!("{}:{port}", self.worker_host)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_addresses_derive_from_base_port() {
        let peers = PeerTable::default();
        assert_eq!(
            peers.worker(SlotId::from(0)),
            Some(EndPoint::from("localhost:8090"))
        );
        assert_eq!(
            peers.worker(SlotId::from(3)),
            Some(EndPoint::from("localhost:8093"))
        );
    }

    #[test]
    fn worker_address_overflow() {
        let peers = PeerTable {
            worker_base_port: u16::MAX,
            ..Default::default()
        };
        assert_eq!(peers.worker(SlotId::from(1)), None);
    }
}
