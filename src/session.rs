//! Prefix-echo exchange over an authenticated endpoint.
//!
//! The client sends one message; the server answers with
//! [`RESPONSE_PREFIX`] followed by the message.  One read per side, no
//! framing: a message longer than [`MAX_MESSAGE_SIZE`] is truncated by the
//! receiver.

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

use crate::endpoint::SecureEndpoint;
use crate::{Error, Result};

/// Prefix the server puts in front of every echoed message.
pub const RESPONSE_PREFIX: &str = "Return back to client: ";

/// Receive cap per message.
pub const MAX_MESSAGE_SIZE: usize = 1024;

/// Reply the server sends for `message`.
#[must_use]
pub fn expected_reply(message: &[u8]) -> Vec<u8> {
    let mut reply = Vec::with_capacity(RESPONSE_PREFIX.len() + message.len());
    reply.extend_from_slice(RESPONSE_PREFIX.as_bytes());
    reply.extend_from_slice(message);
    reply
}

/// Server side: receive one message, echo it with the prefix and return
/// what was received.
///
/// # Errors
///
/// Any endpoint error (`State`, `Transport`, `Timeout`).
pub async fn respond<IO>(endpoint: &mut SecureEndpoint<IO>) -> Result<Vec<u8>>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    let message = endpoint.receive(MAX_MESSAGE_SIZE).await?;
    info!(
        peer = ?endpoint.peer_addr(),
        message = %String::from_utf8_lossy(&message),
        "received message"
    );
    endpoint.send(&expected_reply(&message)).await?;
    Ok(message)
}

/// Client side: send `message`, receive one reply and require it to be the
/// prefixed echo.  Returns the reply.
///
/// # Errors
///
/// Any endpoint error, or `Error::Protocol` if the reply is not
/// `RESPONSE_PREFIX + message`.
pub async fn initiate<IO>(endpoint: &mut SecureEndpoint<IO>, message: &[u8]) -> Result<Vec<u8>>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    endpoint.send(message).await?;
    let reply = endpoint.receive(MAX_MESSAGE_SIZE).await?;

    if reply != expected_reply(message) {
        return Err(Error::Protocol(format!(
            "unexpected reply: {:?}",
            String::from_utf8_lossy(&reply)
        )));
    }
    debug!(bytes = reply.len(), "echo verified");
    Ok(reply)
}
