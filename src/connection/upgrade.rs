//! Opening handshake over a raw stream.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::config::{Config, Limits};
use crate::connection::{Connection, Role};
use crate::error::{Error, Result};
use crate::protocol::handshake::find_head_end;
use crate::protocol::{ClientHandshake, HandshakeRequest, HandshakeResponse};

/// Read an HTTP head. Returns the head (terminator included) and any bytes
/// that followed it.
async fn read_head<T: AsyncRead + Unpin>(io: &mut T, limits: &Limits) -> Result<(BytesMut, BytesMut)> {
    let mut buf = BytesMut::with_capacity(1024);
    loop {
        if let Some(end) = find_head_end(&buf) {
            let head = buf.split_to(end);
            return Ok((head, buf));
        }
        limits.check_handshake_size(buf.len())?;
        if io.read_buf(&mut buf).await? == 0 {
            return Err(Error::InvalidHandshake(
                "connection closed during handshake".into(),
            ));
        }
    }
}

/// Perform the client side of the opening handshake.
///
/// # Errors
///
/// I/O errors, `Error::HandshakeTooLarge` and `Error::InvalidHandshake` for
/// a reply that does not complete the upgrade.
pub async fn client_upgrade<T>(
    mut io: T,
    handshake: &ClientHandshake,
    config: Config,
) -> Result<(Connection<T>, HandshakeResponse)>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    io.write_all(&handshake.to_bytes()).await?;
    io.flush().await?;
    trace!("upgrade request sent");

    let (head, leftover) = read_head(&mut io, &config.limits).await?;
    let response = handshake.verify(&head)?;
    debug!(protocol = ?response.protocol, buffered = leftover.len(), "upgrade accepted");
    Ok((
        Connection::with_buffered(io, Role::Client, config, leftover),
        response,
    ))
}

/// Read an upgrade request and accept it, selecting the first offered
/// sub-protocol.
///
/// # Errors
///
/// I/O errors and `Error::InvalidHandshake` for a malformed request.
pub async fn server_accept<T>(mut io: T, config: Config) -> Result<(Connection<T>, HandshakeRequest)>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let (head, leftover) = read_head(&mut io, &config.limits).await?;
    let request = HandshakeRequest::parse(&head)?;
    io.write_all(&HandshakeResponse::from_request(&request).to_bytes())
        .await?;
    io.flush().await?;
    Ok((
        Connection::with_buffered(io, Role::Server, config, leftover),
        request,
    ))
}
