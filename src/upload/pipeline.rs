//! Chunked, concurrent upload into a staging directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs;
use tokio::io::AsyncRead;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::worker::{run_scheduler, run_worker, Event};
use crate::config::UploadConfig;
use crate::tree::validate_name;
use crate::{CumulusError, Result};

/// Suffix of the file an upload is written to before it completes.
pub const TEMP_SUFFIX: &str = ".temp";

/// Worker-pool upload writer.
#[derive(Debug, Clone)]
pub struct UploadPipeline {
    config: UploadConfig,
    idle_timeout: Duration,
}

impl UploadPipeline {
    /// Create a pipeline from its configuration.
    pub fn new(config: UploadConfig) -> Self {
        let idle_timeout = config.idle_timeout();
        Self {
            config,
            idle_timeout,
        }
    }

    /// Override the idle timeout with sub-second precision.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Pipeline configuration.
    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Idle window after which a stalled transfer is aborted.
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Stream exactly `expected_size` bytes from `source` into `dir/filename`.
    ///
    /// Bytes land in `dir/filename.temp` first and are renamed once all of
    /// them are on disk. On any failure every task is stopped and joined, then
    /// the temp file is removed, along with `dir` if this call created it.
    pub async fn receive<R>(
        &self,
        dir: &Path,
        filename: &str,
        source: R,
        expected_size: u64,
    ) -> Result<PathBuf>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        validate_name(filename)?;

        let created_dir = !fs::try_exists(dir).await?;
        fs::create_dir_all(dir).await?;

        let final_path = dir.join(filename);
        let temp_path = dir.join(format!("{filename}{TEMP_SUFFIX}"));

        let mut transfer = Transfer::default();
        let result = self
            .transfer(&mut transfer, &temp_path, source, expected_size)
            .await;
        transfer.shutdown().await;

        match result {
            Ok(()) => {
                fs::rename(&temp_path, &final_path).await?;
                debug!(path = %final_path.display(), bytes = expected_size, "upload staged");
                Ok(final_path)
            }
            Err(e) => {
                warn!(file = filename, error = %e, "upload aborted");
                discard(&temp_path, dir, created_dir).await;
                Err(e)
            }
        }
    }

    async fn transfer<R>(
        &self,
        transfer: &mut Transfer,
        temp_path: &Path,
        source: R,
        expected: u64,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let file = fs::File::create(temp_path).await?;
        file.set_len(expected).await?;
        drop(file);

        let (job_tx, job_rx) = mpsc::channel(self.config.effective_queue_depth());
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let jobs = Arc::new(Mutex::new(job_rx));

        for id in 0..self.config.workers.max(1) {
            transfer.tasks.push(tokio::spawn(run_worker(
                id,
                temp_path.to_path_buf(),
                Arc::clone(&jobs),
                event_tx.clone(),
                transfer.token.clone(),
            )));
        }
        transfer.tasks.push(tokio::spawn(run_scheduler(
            source,
            expected,
            self.config.chunk_size.max(1),
            job_tx,
            event_tx,
            transfer.token.clone(),
        )));

        let idle = tokio::time::sleep(self.idle_timeout);
        tokio::pin!(idle);

        let mut written = 0u64;
        while written < expected {
            tokio::select! {
                event = event_rx.recv() => match event {
                    Some(Event::Written(n)) => {
                        written += n as u64;
                        idle.as_mut().reset(Instant::now() + self.idle_timeout);
                    }
                    Some(Event::Failed(e)) => return Err(e),
                    Some(Event::Exhausted(read)) if read < expected => {
                        return Err(CumulusError::Upload(format!(
                            "stream ended after {read} of {expected} bytes"
                        )));
                    }
                    Some(Event::Exhausted(_)) => {}
                    None => {
                        return Err(CumulusError::Upload(format!(
                            "upload tasks exited after {written} of {expected} bytes"
                        )));
                    }
                },
                _ = &mut idle => return Err(CumulusError::UploadTimeout(self.idle_timeout)),
            }
        }
        Ok(())
    }
}

/// Tasks of one transfer and the token that stops them.
#[derive(Default)]
struct Transfer {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Transfer {
    /// Signal stop and wait for every task to finish. Safe with no tasks.
    async fn shutdown(&mut self) {
        self.token.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "upload task panicked");
            }
        }
    }
}

async fn discard(temp_path: &Path, dir: &Path, created_dir: bool) {
    if let Err(e) = fs::remove_file(temp_path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %temp_path.display(), error = %e, "failed to remove temp file");
        }
    }
    if created_dir {
        // Fails harmlessly if anything else was placed there meanwhile
        let _ = fs::remove_dir(dir).await;
    }
}
