//! Functions that are useful for reading/writing messages from/to sockets.

use anyhow::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::io::Write;
use tokio::io::{AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _};

fn write_message_to_vec(msg: impl Serialize) -> Result<Vec<u8>> {
    let msg_len = u32::try_from(bincode::serialized_size(&msg)?)?;
    let mut buf = Vec::<u8>::with_capacity(msg_len as usize + 4);
    Write::write_all(&mut buf, &msg_len.to_be_bytes())?;
    bincode::serialize_into(&mut buf, &msg)?;
    Ok(buf)
}

/// Write a message to a Tokio output stream. Each message is framed by sending a leading 4-byte,
/// big-endian message size.
pub async fn write_message_to_async_socket(
    stream: &mut (impl AsyncWrite + Unpin),
    msg: impl Serialize,
) -> Result<()> {
    stream.write_all(&write_message_to_vec(msg)?).await?;
    Ok(stream.flush().await?)
}

/// Read a message from a Tokio input stream. The framing must match that of
/// [`write_message_to_async_socket`].
pub async fn read_message_from_async_socket<MessageT>(
    stream: &mut (impl AsyncRead + Unpin),
) -> Result<MessageT>
where
    MessageT: DeserializeOwned,
{
    let mut msg_len: [u8; 4] = [0; 4];
    stream.read_exact(&mut msg_len).await?;
    let mut buf = vec![0; u32::from_be_bytes(msg_len) as usize];
    stream.read_exact(&mut buf).await?;
    Ok(bincode::deserialize_from(&mut &buf[..])?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io;

    #[tokio::test]
    async fn messages_arrive_in_order_and_intact() {
        let (mut a, mut b) = io::duplex(64);
        let writer = tokio::spawn(async move {
            for msg in ["first".to_owned(), "x".repeat(500), String::new()] {
                write_message_to_async_socket(&mut a, msg).await.unwrap();
            }
        });
        let mut received: Vec<String> = vec![];
        for _ in 0..3 {
            received.push(read_message_from_async_socket(&mut b).await.unwrap());
        }
        writer.await.unwrap();
        assert_eq!(received, vec!["first".to_owned(), "x".repeat(500), String::new()]);
    }

    #[tokio::test]
    async fn closed_stream_is_an_error() {
        let (a, mut b) = io::duplex(64);
        drop(a);
        assert!(read_message_from_async_socket::<String>(&mut b)
            .await
            .is_err());
    }
}
