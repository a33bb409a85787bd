use crate::socks5::address::{BoundAddress, encode_target_address, read_bound_address};
use crate::socks5::protocol::{Command, RSV, ReplyCode, Version};
use anyhow::{Result, bail};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// send_connect issues a CONNECT request for host:port and waits for the
/// server's reply. On success the stream carries the tunneled connection
pub async fn send_connect<S>(stream: &mut S, host: &str, port: u16) -> Result<BoundAddress>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // SOCKS5 request format
    // +----+-----+-------+------+----------+----------+
    // |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
    // +----+-----+-------+------+----------+----------+
    // | 1  |  1  | X'00' |  1   | Variable |    2     |
    // +----+-----+-------+------+----------+----------+

    // Build request
    let mut request = vec![Version::SOCKS5 as u8, Command::Connect as u8, RSV];
    request.extend(encode_target_address(host, port)?);

    // Write request
    stream.write_all(&request).await?;

    // Read reply and check it
    let bound = read_reply(stream).await?;

    // DEBUG
    debug!("SOCKS5 tunnel to {host}:{port} established (bound {bound:?})");

    Ok(bound)
}

/// read_reply reads and validates a SOCKS5 server reply
async fn read_reply<S>(stream: &mut S) -> Result<BoundAddress>
where
    S: AsyncRead + Unpin,
{
    // SOCKS5 reply format
    // +----+-----+-------+------+----------+----------+
    // |VER | REP |  RSV  | ATYP | BND.ADDR | BND.PORT |
    // +----+-----+-------+------+----------+----------+
    // | 1  |  1  | X'00' |  1   | Variable |    2     |
    // +----+-----+-------+------+----------+----------+

    // Instantiate a reply buffer & read
    let mut head = [0u8; 3];
    stream.read_exact(&mut head).await?;

    // Ensure version is 0x05 -> SOCKS5
    if head[0] != Version::SOCKS5 as u8 {
        bail!("[ERR] not SOCKS5");
    }

    // Map reply code
    match ReplyCode::from_byte(head[1]) {
        Some(ReplyCode::Succeeded) => (),
        Some(code) => bail!("[ERR] SOCKS5 CONNECT failed: {}", code.describe()),
        None => bail!("[ERR] SOCKS5 CONNECT failed: unassigned reply {:#04x}", head[1]),
    }

    // Bound address must be consumed even though the probe has no use for it
    read_bound_address(stream).await
}
