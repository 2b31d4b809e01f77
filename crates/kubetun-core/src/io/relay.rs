//! Bidirectional relay with half-close handling and an idle timeout.
//!
//! Both directions run concurrently inside a single task. A direction that
//! reaches EOF shuts down the peer's write side and lets the other
//! direction keep flowing. The idle timer fires only when *neither*
//! direction has moved data within the window.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

/// Bytes transferred in each direction during a relay session.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelayStats {
    /// Bytes copied from the accepted connection to the dialed one.
    pub uplink: u64,
    /// Bytes copied from the dialed connection back to the accepted one.
    pub downlink: u64,
}

impl RelayStats {
    /// Total bytes in both directions.
    #[inline]
    pub fn total(self) -> u64 {
        self.uplink + self.downlink
    }
}

/// Relay bytes between `client` and `remote` until both directions reach
/// EOF, either side errors, or the session stays idle past `idle_timeout`.
///
/// Idle expiry is not an error: the accumulated stats are returned.
pub async fn relay_bidirectional<A, B>(
    client: A,
    remote: B,
    idle_timeout: Duration,
    buffer_size: usize,
) -> io::Result<RelayStats>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let start = Instant::now();
    let uplink = AtomicU64::new(0);
    let downlink = AtomicU64::new(0);
    // Milliseconds since `start` of the most recent transfer, either direction.
    let last_activity = AtomicU64::new(0);

    let (mut client_r, mut client_w) = tokio::io::split(client);
    let (mut remote_r, mut remote_w) = tokio::io::split(remote);

    let transfer = async {
        tokio::try_join!(
            copy_half(
                &mut client_r,
                &mut remote_w,
                buffer_size,
                &uplink,
                &last_activity,
                start,
            ),
            copy_half(
                &mut remote_r,
                &mut client_w,
                buffer_size,
                &downlink,
                &last_activity,
                start,
            ),
        )
    };
    tokio::pin!(transfer);

    loop {
        let idle_since = Duration::from_millis(last_activity.load(Ordering::Relaxed));
        let deadline = start + idle_since + idle_timeout;

        tokio::select! {
            result = &mut transfer => {
                result?;
                break;
            }
            _ = tokio::time::sleep_until(deadline) => {
                // Activity may have happened while we slept; only stop if the
                // deadline still stands.
                let latest = Duration::from_millis(last_activity.load(Ordering::Relaxed));
                if start + latest + idle_timeout <= Instant::now() {
                    break;
                }
            }
        }
    }

    Ok(RelayStats {
        uplink: uplink.load(Ordering::Relaxed),
        downlink: downlink.load(Ordering::Relaxed),
    })
}

async fn copy_half<R, W>(
    reader: &mut R,
    writer: &mut W,
    buffer_size: usize,
    transferred: &AtomicU64,
    last_activity: &AtomicU64,
    start: Instant,
) -> io::Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; buffer_size];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            // Propagate the half-close; the opposite direction continues.
            writer.shutdown().await?;
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        transferred.fetch_add(n as u64, Ordering::Relaxed);
        last_activity.store(start.elapsed().as_millis() as u64, Ordering::Relaxed);
    }
}
