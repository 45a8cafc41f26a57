use std::{
    io::{Error as IOError, ErrorKind},
    time::Duration,
};

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::{AsyncReading, AsyncWriting, config::MuxConfig, error::MuxError, utils::find_in_buf};

const TARGET: &str = "ts0710mux::transport";

/// pause before retrying a write that made no progress
const WRITE_BACKOFF: Duration = Duration::from_millis(2);

/// zero progress writes tolerated before the transport counts as stuck
const WRITE_STALLS: usize = 500;

const HANDSHAKE_BUF_SIZE: usize = 256;

/// writes all of `buf`, sleeping a little whenever the transport takes nothing
pub async fn basic_write<W: AsyncWriting + ?Sized>(
    writer: &mut W,
    buf: &[u8],
) -> Result<usize, IOError> {
    let mut sent = 0;
    let mut stalls = 0;

    while sent < buf.len() {
        match writer.write(&buf[sent..]).await? {
            0 => {
                stalls += 1;
                if stalls > WRITE_STALLS {
                    return Err(IOError::new(
                        ErrorKind::WriteZero,
                        format!("transport took {sent} of {} bytes and stalled", buf.len()),
                    ));
                }
                tokio::time::sleep(WRITE_BACKOFF).await;
            }
            n => {
                sent += n;
                stalls = 0;
            }
        }
    }

    writer.flush().await?;

    Ok(sent)
}

/// talks the modem from AT command mode into cmux mode
///
/// the probe is resent until the modem answers with OK, an ERROR answer means the modem
/// was in an odd state but it is accepted all the same
pub async fn handshake<R, W>(
    reader: &mut R,
    writer: &mut W,
    config: &MuxConfig,
) -> Result<(), MuxError>
where
    R: AsyncReading + ?Sized,
    W: AsyncWriting + ?Sized,
{
    let probe = config.handshake_probe.as_bytes();
    let mut buf = [0u8; HANDSHAKE_BUF_SIZE];
    let mut filled = 0;
    let mut attempts = 0;

    basic_write(writer, probe).await?;

    loop {
        if filled == buf.len() {
            filled = 0;
        }

        let read =
            tokio::time::timeout(config.handshake_read_timeout, reader.read(&mut buf[filled..]))
                .await;

        let backoff = match read {
            Ok(Ok(0)) => Duration::from_millis(200),
            Ok(Ok(n)) => {
                filled += n;
                log::debug!(target: TARGET, "handshake got {n} bytes");

                if find_in_buf(&buf[..filled], b"OK") {
                    break;
                }
                if find_in_buf(&buf[..filled], b"ERROR") {
                    log::warn!(target: TARGET, "modem answered the probe with ERROR, going on");
                    break;
                }
                continue;
            }
            Ok(Err(e)) => {
                log::warn!(target: TARGET, "handshake read failed: {e}");
                Duration::from_secs(2)
            }
            Err(_) => {
                log::debug!(target: TARGET, "no answer to the probe yet");
                Duration::from_secs(2)
            }
        };

        attempts += 1;
        if attempts > config.handshake_attempts {
            log::warn!(target: TARGET, "modem never answered the probe");
            return Err(MuxError::Handshake);
        }

        tokio::time::sleep(backoff).await;
        basic_write(writer, probe).await?;
    }

    basic_write(writer, config.handshake_command.as_bytes()).await?;

    // the modem answers the switch in AT mode, it only has to be drained
    match tokio::time::timeout(config.handshake_read_timeout, reader.read(&mut buf)).await {
        Ok(Ok(n)) => log::debug!(target: TARGET, "cmux switch answered with {n} bytes"),
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => log::debug!(target: TARGET, "cmux switch went unanswered"),
    }

    log::info!(target: TARGET, "modem is in cmux mode");

    Ok(())
}
