//! Handshake message exchange over a connection
//!
//! The receiving side reads each message in stages, fixed prefix first and
//! then the length the prefix declares, so payload bytes that follow the
//! handshake stay in the connection for the relay.

use log::debug;
use rabbit_protocol::{AuthType, BufferPool, ConnectType, Serializable};

use crate::error::{Error, Result};
use crate::socket::{read_exact, Conn};

/// Marshal `msg` into a pooled buffer and write it
///
/// Returns the encoded length. Nothing is written if encoding fails.
pub async fn send_message<C, M>(conn: &C, pool: &BufferPool, msg: &M) -> Result<usize>
where
    C: Conn + ?Sized,
    M: Serializable + Sync,
{
    let mut buf = pool.get();
    let n = msg.marshal(&mut buf)?;
    conn.write(&mut buf[..n]).await?;
    Ok(n)
}

/// Read one [`AuthType`] message
pub async fn recv_auth<C: Conn + ?Sized>(conn: &C, pool: &BufferPool) -> Result<AuthType> {
    let mut buf = pool.get();

    let prefix = AuthType::prefix_len();
    ensure_capacity(&buf, prefix)?;
    read_exact(conn, &mut buf[..prefix]).await?;
    let total = prefix + AuthType::remaining_len(&buf[..prefix]).map_err(malformed("auth"))?;
    ensure_capacity(&buf, total)?;
    read_exact(conn, &mut buf[prefix..total]).await?;

    let (auth, _) = AuthType::unmarshal(&buf[..total]).map_err(malformed("auth"))?;
    Ok(auth)
}

/// Read one [`ConnectType`] message
pub async fn recv_connect<C: Conn + ?Sized>(conn: &C, pool: &BufferPool) -> Result<ConnectType> {
    let mut buf = pool.get();

    let mut filled = ConnectType::prefix_len();
    ensure_capacity(&buf, filled)?;
    read_exact(conn, &mut buf[..filled]).await?;
    let rest = loop {
        match ConnectType::remaining_len(&buf[..filled]).map_err(malformed("connect"))? {
            Some(rest) => break rest,
            // Domain length byte
            None => {
                ensure_capacity(&buf, filled + 1)?;
                read_exact(conn, &mut buf[filled..filled + 1]).await?;
                filled += 1;
            }
        }
    };
    let total = filled + rest;
    ensure_capacity(&buf, total)?;
    read_exact(conn, &mut buf[filled..total]).await?;

    let (target, _) = ConnectType::unmarshal(&buf[..total]).map_err(malformed("connect"))?;
    Ok(target)
}

fn ensure_capacity(buf: &[u8], needed: usize) -> Result<()> {
    if buf.len() < needed {
        return Err(Error::Protocol(rabbit_protocol::Error::BufferTooShort {
            expected: needed,
            actual: buf.len(),
        }));
    }
    Ok(())
}

fn malformed(what: &'static str) -> impl FnOnce(rabbit_protocol::Error) -> Error {
    move |e| {
        debug!("malformed {} message: {}", what, e);
        Error::Protocol(e)
    }
}
