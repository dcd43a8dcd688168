//! The messaging substrate shared by every conveyor node.
//!
//! A node binds one [`Channel`] on its address and runs [`node::serve`] over it: every inbound
//! [`Envelope`](conveyor_base::Envelope) is handed to the node's [`Dispatcher`], and the reply, if
//! one is owed, goes out through the node's [`Outbox`]. Everything a node sends, replies and
//! pipeline notifications alike, goes through the same [`Outbox`], which drains into a single
//! [`Sender`] so that messages to one destination leave in the order they were posted.

pub mod channel;
pub mod dispatcher;
pub mod error;
pub mod file_sink;
pub mod node;
pub mod outbox;
pub mod sender;

pub use channel::Channel;
pub use dispatcher::Dispatcher;
pub use error::ChannelError;
pub use outbox::{Outbound, Outbox};
pub use sender::Sender;
