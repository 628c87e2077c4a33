use serde::Serialize;
use tokio::io::AsyncWriteExt as _;

/// Bytes of a request line beyond which the session is closed.
pub const MAX_LINE_BYTES: usize = 1_000_000;

/// One JSON document per line, flushed immediately.
pub async fn write_frame<W, T>(out: &mut W, v: &T) -> eyre::Result<()>
where
    W: tokio::io::AsyncWrite + Unpin + Send,
    T: Serialize + Sync,
{
    let mut line = serde_json::to_vec(v)?;
    line.push(b'\n');
    out.write_all(&line).await?;
    out.flush().await?;
    Ok(())
}
