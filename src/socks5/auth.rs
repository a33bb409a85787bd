use crate::socks5::protocol::{AuthMethod, AuthStatus, USERPASS_VERSION, Version};
use anyhow::{Result, anyhow, bail};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// UserPass holds username/password credentials presented
/// to the upstream SOCKS server
#[derive(Clone)]
pub struct UserPass {
    pub username: String,
    pub password: String,
}

/// negotiate_auth handles authentication negotiation with the SOCKS server
pub async fn negotiate_auth<S>(stream: &mut S, creds: Option<&UserPass>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // ClientHello format
    // +----+----------+----------+
    // |VER | NMETHODS | METHODS  |
    // +----+----------+----------+
    // | 1  |    1     | 1 to 255 |
    // +----+----------+----------+

    // Offer methods in preference order
    let methods = offered_methods(creds.is_some());

    // Build and write hello
    let mut hello = vec![Version::SOCKS5 as u8, methods.len() as u8];
    hello.extend(methods.iter().map(|m| *m as u8));
    stream.write_all(&hello).await?;

    // ServerChoice method selection reply format
    // +----+--------+
    // |VER | METHOD |
    // +----+--------+
    // | 1  |   1    |
    // +----+--------+

    // Instantiate choice buffer & read
    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await?;

    // Ensure version is 0x05 -> SOCKS5
    if choice[0] != Version::SOCKS5 as u8 {
        bail!("[ERR] not SOCKS5: server replied with version {}", choice[0]);
    }

    // Route to appropriate auth handler
    match AuthMethod::from_byte(choice[1]) {
        Some(AuthMethod::NoAuth) => Ok(()),
        Some(AuthMethod::UserPass) => {
            let creds = creds.ok_or_else(|| {
                anyhow!("[ERR] server demands username/password but none configured")
            })?;
            authenticate_userpass(stream, creds).await
        }
        Some(AuthMethod::NoAcceptable) => bail!("[ERR] no acceptable authentication method"),
        None => bail!("[ERR] server selected unoffered method {:#04x}", choice[1]),
    }
}

/// offered_methods returns the auth methods the client advertises.
/// Username/password is only offered when credentials are configured
fn offered_methods(has_creds: bool) -> Vec<AuthMethod> {
    if has_creds {
        vec![AuthMethod::UserPass, AuthMethod::NoAuth]
    } else {
        vec![AuthMethod::NoAuth]
    }
}

/// authenticate_userpass performs username/password authentication according to RFC 1929
async fn authenticate_userpass<S>(stream: &mut S, creds: &UserPass) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // Client Username/Password Request
    // +----+------+----------+------+----------+
    // |VER | ULEN |  UNAME   | PLEN |  PASSWD  |
    // +----+------+----------+------+----------+
    // | 1  |  1   | 1 to 255 |  1   | 1 to 255 |
    // +----+------+----------+------+----------+

    let username = creds.username.as_bytes();
    let password = creds.password.as_bytes();

    if username.is_empty() || username.len() > 255 || password.is_empty() || password.len() > 255 {
        bail!("[ERR] username and password must be 1 to 255 bytes");
    }

    // Build request
    let mut request = Vec::with_capacity(3 + username.len() + password.len());
    request.push(USERPASS_VERSION);
    request.push(username.len() as u8);
    request.extend_from_slice(username);
    request.push(password.len() as u8);
    request.extend_from_slice(password);

    stream.write_all(&request).await?;

    // Username/Password Server response
    // +----+--------+
    // |VER | STATUS |
    // +----+--------+
    // | 1  |   1    |
    // +----+--------+

    let mut response = [0u8; 2];
    stream.read_exact(&mut response).await?;

    // Check subnegotiation version number
    if response[0] != USERPASS_VERSION {
        bail!("[ERR] invalid username/password subnegotiation version");
    }

    // Validate authentication status
    if response[1] == AuthStatus::Success as u8 {
        Ok(())
    } else {
        bail!("[ERR] authentication failed")
    }
}
