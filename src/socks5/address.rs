use crate::socks5::protocol::AddressType;
use anyhow::{Result, anyhow, bail};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::io::{AsyncRead, AsyncReadExt};

/// encode_target_address builds the ATYP | DST.ADDR | DST.PORT portion of a
/// client request. IP literals are sent as such, anything else as a domain name
pub fn encode_target_address(host: &str, port: u16) -> Result<Vec<u8>> {
    // Instantiate new vec for the address block
    let mut buf = Vec::new();

    // Strip brackets from IPv6 literals such as "[::1]"
    let bare = host.trim_start_matches('[').trim_end_matches(']');

    match bare.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            // ATYP -> 1 byte, Address -> 4 bytes
            buf.push(AddressType::IPv4 as u8);
            buf.extend_from_slice(&ip.octets());
        }
        Ok(IpAddr::V6(ip)) => {
            // ATYP -> 1 byte, Address -> 16 bytes
            buf.push(AddressType::IPv6 as u8);
            buf.extend_from_slice(&ip.octets());
        }
        Err(_) => {
            // Domain length checks
            if host.is_empty() {
                bail!("[ERR] domain length cannot be 0");
            }
            if host.len() > 253 {
                bail!("[ERR] domain name too long: {} (max 253 bytes)", host.len());
            }

            // ATYP -> 1 byte, length -> 1 byte, domain -> variable
            buf.push(AddressType::DomainName as u8);
            buf.push(host.len() as u8);
            buf.extend_from_slice(host.as_bytes());
        }
    }

    // Port in BE -> 2 bytes
    buf.extend_from_slice(&port.to_be_bytes());

    Ok(buf)
}

/// BoundAddress is the BND.ADDR reported by the server in its reply
#[derive(Debug, Clone, PartialEq)]
pub enum BoundAddress {
    Ip(SocketAddr),
    Domain(String, u16),
}

/// read_bound_address reads ATYP | BND.ADDR | BND.PORT from a server reply
pub async fn read_bound_address<S>(stream: &mut S) -> Result<BoundAddress>
where
    S: AsyncRead + Unpin,
{
    // Read address type byte from stream
    let mut atype = [0u8; 1];
    stream.read_exact(&mut atype).await?;

    // Match type and extract address or domain name
    let bound = match AddressType::from_byte(atype[0]) {
        Some(AddressType::IPv4) => {
            let mut addr = [0u8; 4];
            stream.read_exact(&mut addr).await?;
            let ip = Ipv4Addr::from(addr);

            BoundAddress::Ip(SocketAddr::new(ip.into(), read_port(stream).await?))
        }
        Some(AddressType::DomainName) => {
            // First octet in DomainName contains the number of
            // octets to follow
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;

            // Read domain and convert to string
            let mut domain = vec![0u8; len[0] as usize];
            stream.read_exact(&mut domain).await?;
            let domain_str = String::from_utf8(domain)?;

            BoundAddress::Domain(domain_str, read_port(stream).await?)
        }
        Some(AddressType::IPv6) => {
            let mut addr = [0u8; 16];
            stream.read_exact(&mut addr).await?;
            let ip = Ipv6Addr::from(addr);

            BoundAddress::Ip(SocketAddr::new(ip.into(), read_port(stream).await?))
        }
        None => return Err(anyhow!("[ERR] unknown address type: {}", atype[0])),
    };

    Ok(bound)
}

async fn read_port<S>(stream: &mut S) -> Result<u16>
where
    S: AsyncRead + Unpin,
{
    // Port -> BigEndian (network order)
    let mut port_buf = [0u8; 2];
    stream.read_exact(&mut port_buf).await?;
    Ok(u16::from_be_bytes(port_buf))
}
