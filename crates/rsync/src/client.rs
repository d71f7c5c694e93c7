//! Replica-side transfer client
//!
//! Talks the length-prefixed request/response protocol against a primary:
//! fetch the snapshot listing, pull file ranges chunk by chunk, and verify
//! the digest on the final chunk. A meta request that the primary silently
//! drops (background save in flight) surfaces here as `Timeout`; callers
//! retry with backoff.

use std::path::Path;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::info;

use crate::error::{RsyncError, RsyncResult};
use crate::protocol::{read_frame, write_frame, Code, Request, RequestKind, Response, ResponseKind};
use crate::reader::MAX_COPY_BLOCK_SIZE;
use crate::registry::DumpMeta;

/// One chunk of a file as the primary returned it
#[derive(Debug, Clone)]
pub struct FileChunk {
    pub snapshot_uuid: String,
    pub offset: u64,
    pub data: Vec<u8>,
    pub eof: bool,
    pub checksum: String,
}

/// Transfer client bound to one `(db_name, slot_id)` partition
pub struct RsyncClient {
    stream: TcpStream,
    db_name: String,
    slot_id: u32,
    response_timeout: Duration,
}

impl RsyncClient {
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        db_name: &str,
        slot_id: u32,
    ) -> RsyncResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            stream,
            db_name: db_name.to_string(),
            slot_id,
            response_timeout: Duration::from_secs(10),
        })
    }

    /// How long to wait for a response before reporting `Timeout`
    pub fn set_response_timeout(&mut self, timeout: Duration) {
        self.response_timeout = timeout;
    }

    async fn send(&mut self, kind: RequestKind) -> RsyncResult<()> {
        let request = Request {
            db_name: self.db_name.clone(),
            slot_id: self.slot_id,
            kind,
        };
        let payload = request.encode()?;
        write_frame(&mut self.stream, &payload).await
    }

    async fn recv(&mut self) -> RsyncResult<Response> {
        let payload = tokio::time::timeout(self.response_timeout, read_frame(&mut self.stream))
            .await
            .map_err(|_| RsyncError::Timeout)??;
        Response::decode(&payload)
    }

    /// Snapshot file listing and uuid of the partition
    pub async fn meta(&mut self) -> RsyncResult<DumpMeta> {
        self.send(RequestKind::Meta).await?;
        let response = self.recv().await?;
        if response.code == Code::Err {
            return Err(RsyncError::NotFound(format!(
                "meta request failed for {} slot {}",
                self.db_name, self.slot_id
            )));
        }
        match response.kind {
            ResponseKind::Meta { filenames } => Ok(DumpMeta {
                snapshot_uuid: response.snapshot_uuid,
                filenames,
            }),
            ResponseKind::File { .. } => Err(RsyncError::Protocol(
                "file response to a meta request".to_string(),
            )),
        }
    }

    /// One byte range of a snapshot file
    pub async fn fetch(&mut self, filename: &str, offset: u64, count: u64) -> RsyncResult<FileChunk> {
        self.send(RequestKind::File {
            filename: filename.to_string(),
            offset,
            count,
        })
        .await?;
        let response = self.recv().await?;
        if response.code == Code::Err {
            return Err(RsyncError::NotFound(format!(
                "file request failed for {}",
                filename
            )));
        }
        match response.kind {
            ResponseKind::File {
                offset,
                data,
                eof,
                checksum,
                ..
            } => Ok(FileChunk {
                snapshot_uuid: response.snapshot_uuid,
                offset,
                data,
                eof,
                checksum,
            }),
            ResponseKind::Meta { .. } => Err(RsyncError::Protocol(
                "meta response to a file request".to_string(),
            )),
        }
    }

    /// Pull a whole snapshot file into `dest`, verifying that the snapshot
    /// uuid stays `expected_uuid` for the duration and that the assembled
    /// bytes match the digest reported on the final chunk. Returns the
    /// number of bytes written.
    pub async fn download(
        &mut self,
        filename: &str,
        dest: &Path,
        expected_uuid: &str,
    ) -> RsyncResult<u64> {
        let mut file = File::create(dest).await?;
        let mut context = md5::Context::new();
        let mut offset = 0u64;

        loop {
            let chunk = self.fetch(filename, offset, MAX_COPY_BLOCK_SIZE).await?;
            if chunk.snapshot_uuid != expected_uuid {
                return Err(RsyncError::SnapshotChanged(filename.to_string()));
            }
            context.consume(&chunk.data);
            file.write_all(&chunk.data).await?;
            offset += chunk.data.len() as u64;

            if chunk.eof {
                let digest = format!("{:x}", context.compute());
                if digest != chunk.checksum {
                    return Err(RsyncError::ChecksumMismatch(filename.to_string()));
                }
                break;
            }
        }

        file.flush().await?;
        info!("rsync downloaded {} ({} bytes)", filename, offset);
        Ok(offset)
    }
}
