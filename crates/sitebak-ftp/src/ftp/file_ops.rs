//! File-level download (RETR) streamed straight to disk.

use crate::ftp::client::FtpClient;
use crate::ftp::error::FtpResult;
use crate::ftp::transfer::DataStream;
use sitebak_core::ProgressRecord;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Chunk size for streaming downloads (1 MiB).
pub const DOWNLOAD_CHUNK: usize = 1024 * 1024;

impl FtpClient {
    /// Download `remote_path` into `local_path`, truncating any existing file.
    ///
    /// Logs a progress line after every chunk. Returns the bytes written.
    pub async fn retrieve_file(&mut self, remote_path: &str, local_path: &Path) -> FtpResult<u64> {
        // Size for progress only; verification happens after the transfer.
        let total_bytes = match self.size(remote_path).await {
            Ok(n) => Some(n),
            Err(e) => {
                debug!("SIZE {} unavailable: {}", remote_path, e);
                None
            }
        };

        let mut file = fs::File::create(local_path).await?;
        let mut ds = self.begin_transfer(&format!("RETR {}", remote_path)).await?;

        let streamed = stream_to_file(&mut ds, &mut file, local_path, total_bytes).await;
        drop(file);
        drop(ds);

        match streamed {
            Ok(transferred) => {
                self.finish_transfer().await?;
                Ok(transferred)
            }
            Err(e) => {
                self.abandon_transfer().await;
                Err(e)
            }
        }
    }
}

async fn stream_to_file(
    ds: &mut DataStream,
    file: &mut fs::File,
    local_path: &Path,
    total_bytes: Option<u64>,
) -> FtpResult<u64> {
    let mut transferred = 0u64;
    let mut buf = vec![0u8; DOWNLOAD_CHUNK];
    loop {
        let n = ds.read_chunk(&mut buf).await?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).await?;
        transferred += n as u64;
        info!("{}", ProgressRecord::new(local_path, transferred, total_bytes));
    }
    file.flush().await?;
    Ok(transferred)
}
