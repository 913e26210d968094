//! Scheduler and chunk writer tasks.

use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::fs::OpenOptions;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::CumulusError;

/// Attempts per chunk before a write error fails the upload.
const CHUNK_WRITE_ATTEMPTS: usize = 3;

/// A slice of the inbound stream and where it belongs in the file.
#[derive(Debug)]
pub(crate) struct Chunk {
    pub offset: u64,
    pub data: Vec<u8>,
}

/// Progress reported to the orchestrating loop.
#[derive(Debug)]
pub(crate) enum Event {
    /// A worker finished writing this many bytes.
    Written(usize),
    /// A task hit an unrecoverable error.
    Failed(CumulusError),
    /// The scheduler read everything it will ever read.
    Exhausted(u64),
}

pub(crate) type JobQueue = Arc<Mutex<mpsc::Receiver<Chunk>>>;

/// Read `source` sequentially into chunks and queue them.
///
/// Stops after `expected` bytes, at end of stream, or on the first error.
pub(crate) async fn run_scheduler<R>(
    mut source: R,
    expected: u64,
    chunk_size: usize,
    jobs: mpsc::Sender<Chunk>,
    events: mpsc::UnboundedSender<Event>,
    token: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
{
    let mut offset = 0u64;

    while offset < expected {
        let want = chunk_size.min((expected - offset) as usize);
        let mut data = vec![0u8; want];

        let read = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            read = read_full(&mut source, &mut data) => read,
        };

        let n = match read {
            Ok(n) => n,
            Err(e) => {
                let _ = events.send(Event::Failed(CumulusError::Upload(format!(
                    "read failed at offset {offset}: {e}"
                ))));
                return;
            }
        };
        if n == 0 {
            break;
        }
        data.truncate(n);

        let chunk = Chunk { offset, data };
        offset += n as u64;

        tokio::select! {
            biased;
            _ = token.cancelled() => return,
            sent = jobs.send(chunk) => {
                if sent.is_err() {
                    return;
                }
            }
        }

        if n < want {
            break;
        }
    }

    trace!(bytes = offset, "scheduler finished reading");
    let _ = events.send(Event::Exhausted(offset));
}

/// Fill `buf` unless the stream ends first. Returns the bytes read.
async fn read_full<R>(source: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Drain the job queue, writing each chunk at its offset.
///
/// Cancellation is observed between chunks only.
pub(crate) async fn run_worker(
    id: usize,
    path: PathBuf,
    jobs: JobQueue,
    events: mpsc::UnboundedSender<Event>,
    token: CancellationToken,
) {
    let mut file = match OpenOptions::new().write(true).open(&path).await {
        Ok(file) => file,
        Err(e) => {
            let _ = events.send(Event::Failed(e.into()));
            return;
        }
    };

    loop {
        let job = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            job = async { jobs.lock().await.recv().await } => job,
        };
        let Some(chunk) = job else {
            break;
        };

        // A started chunk is always finished so nothing lands after we return
        let written = write_with_retry(&mut file, &chunk).await;

        match written {
            Ok(()) => {
                if events.send(Event::Written(chunk.data.len())).is_err() {
                    break;
                }
            }
            Err(e) => {
                let _ = events.send(Event::Failed(CumulusError::Upload(format!(
                    "write failed at offset {}: {e}",
                    chunk.offset
                ))));
                break;
            }
        }
    }

    debug!(worker = id, "upload worker stopped");
}

async fn write_with_retry(file: &mut tokio::fs::File, chunk: &Chunk) -> std::io::Result<()> {
    let mut attempt = 1;
    loop {
        match write_chunk(file, chunk).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < CHUNK_WRITE_ATTEMPTS => {
                trace!(offset = chunk.offset, attempt, error = %e, "retrying chunk write");
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn write_chunk(file: &mut tokio::fs::File, chunk: &Chunk) -> std::io::Result<()> {
    file.seek(SeekFrom::Start(chunk.offset)).await?;
    file.write_all(&chunk.data).await?;
    file.flush().await
}
