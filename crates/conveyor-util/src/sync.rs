//! Functions that are useful for communicating between tasks within a program.
use anyhow::Result;
use tokio::sync::mpsc::UnboundedReceiver;

/// Read messages from a channel, calling an individual function on each one. Return when there are
/// no more channel senders.
pub async fn channel_reader<MessageT>(
    mut channel: UnboundedReceiver<MessageT>,
    mut processor: impl FnMut(MessageT),
) -> Result<()> {
    while let Some(x) = channel.recv().await {
        processor(x);
    }
    Ok(())
}
