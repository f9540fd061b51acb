//! Wire framing: a big-endian u64 payload length, a kind byte, then payload

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::{DistError, Result};

pub(crate) const KIND_HELLO: u8 = 1;
pub(crate) const KIND_REDUCE: u8 = 2;
pub(crate) const KIND_BCAST: u8 = 3;
pub(crate) const KIND_BARRIER: u8 = 4;

const HEADER_LEN: usize = 9;

pub(crate) async fn write_frame(stream: &mut TcpStream, kind: u8, payload: &[u8]) -> Result<()> {
    let mut header = [0u8; HEADER_LEN];
    header[..8].copy_from_slice(&(payload.len() as u64).to_be_bytes());
    header[8] = kind;
    stream.write_all(&header).await?;
    if !payload.is_empty() {
        stream.write_all(payload).await?;
    }
    stream.flush().await?;
    Ok(())
}

pub(crate) async fn write_f32_frame(stream: &mut TcpStream, kind: u8, data: &[f32]) -> Result<()> {
    write_frame(stream, kind, bytemuck::cast_slice(data)).await
}

async fn read_header(stream: &mut TcpStream) -> Result<(u8, usize)> {
    let mut header = [0u8; HEADER_LEN];
    stream.read_exact(&mut header).await?;
    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&header[..8]);
    Ok((header[8], u64::from_be_bytes(len_bytes) as usize))
}

/// Read one frame of `expect` kind whose payload fills `buf` exactly.
pub(crate) async fn read_f32_frame(
    stream: &mut TcpStream,
    expect: u8,
    buf: &mut [f32],
) -> Result<()> {
    let (kind, len) = read_header(stream).await?;
    if kind != expect {
        return Err(DistError::Protocol(format!("expected frame kind {expect}, got {kind}")));
    }
    let want = std::mem::size_of_val(buf);
    if len != want {
        return Err(DistError::Protocol(format!("payload of {len} bytes, expected {want}")));
    }
    stream.read_exact(bytemuck::cast_slice_mut(buf)).await?;
    Ok(())
}

/// Read an empty frame of `expect` kind.
pub(crate) async fn read_empty_frame(stream: &mut TcpStream, expect: u8) -> Result<()> {
    let (kind, len) = read_header(stream).await?;
    if kind != expect || len != 0 {
        return Err(DistError::Protocol(format!(
            "expected empty frame kind {expect}, got kind {kind} with {len} bytes"
        )));
    }
    Ok(())
}

/// Read the rank a connecting worker announces.
pub(crate) async fn read_hello(stream: &mut TcpStream) -> Result<usize> {
    let (kind, len) = read_header(stream).await?;
    if kind != KIND_HELLO || len != 4 {
        return Err(DistError::Protocol(format!("expected hello, got kind {kind} ({len} bytes)")));
    }
    let mut rank = [0u8; 4];
    stream.read_exact(&mut rank).await?;
    Ok(u32::from_be_bytes(rank) as usize)
}

pub(crate) async fn write_hello(stream: &mut TcpStream, rank: usize) -> Result<()> {
    write_frame(stream, KIND_HELLO, &(rank as u32).to_be_bytes()).await
}
