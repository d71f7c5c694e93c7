//! Wire format of the transfer service
//!
//! Every message is a 4-byte big-endian payload length followed by the
//! bincode-encoded payload. Field order of the types below is the wire
//! contract; primary and replica builds must agree on it.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{RsyncError, RsyncResult};

/// Upper bound on a frame payload: one data chunk plus headroom
pub const MAX_FRAME_SIZE: u32 = 8 * 1024 * 1024;

/// Request payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub db_name: String,
    pub slot_id: u32,
    pub kind: RequestKind,
}

/// What the replica is asking for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestKind {
    /// The snapshot file listing and its uuid
    Meta,
    /// A byte range of one snapshot file
    File {
        filename: String,
        offset: u64,
        count: u64,
    },
}

/// Response status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Code {
    Ok,
    Err,
}

/// Response payload. `snapshot_uuid` binds the response to the snapshot
/// currently advertised; a replica aborts if it changes mid-transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub code: Code,
    pub db_name: String,
    pub slot_id: u32,
    pub snapshot_uuid: String,
    pub kind: ResponseKind,
}

/// Response body, echoing the request type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseKind {
    Meta {
        filenames: Vec<String>,
    },
    /// One chunk of a file. `eof` marks the final chunk and is the only
    /// case where `checksum` (hex MD5 of the whole file) is populated.
    File {
        filename: String,
        offset: u64,
        count: u64,
        data: Vec<u8>,
        eof: bool,
        checksum: String,
    },
}

impl Request {
    pub fn encode(&self) -> RsyncResult<Vec<u8>> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| RsyncError::Protocol(format!("request encode failed: {}", e)))
    }

    pub fn decode(bytes: &[u8]) -> RsyncResult<Self> {
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map(|(request, _)| request)
            .map_err(|e| RsyncError::Protocol(format!("request decode failed: {}", e)))
    }
}

impl Response {
    pub fn encode(&self) -> RsyncResult<Vec<u8>> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| RsyncError::Protocol(format!("response encode failed: {}", e)))
    }

    pub fn decode(bytes: &[u8]) -> RsyncResult<Self> {
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map(|(response, _)| response)
            .map_err(|e| RsyncError::Protocol(format!("response decode failed: {}", e)))
    }
}

/// Read one length-prefixed frame
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> RsyncResult<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_SIZE {
        return Err(RsyncError::Protocol(format!(
            "frame of {} bytes exceeds limit",
            len
        )));
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Write one length-prefixed frame
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> RsyncResult<()> {
    if payload.len() > MAX_FRAME_SIZE as usize {
        return Err(RsyncError::Protocol(format!(
            "frame of {} bytes exceeds limit",
            payload.len()
        )));
    }
    writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_roundtrip() {
        let requests = vec![
            Request {
                db_name: "db0".to_string(),
                slot_id: 3,
                kind: RequestKind::Meta,
            },
            Request {
                db_name: "db0".to_string(),
                slot_id: 3,
                kind: RequestKind::File {
                    filename: "00001.sst".to_string(),
                    offset: 1024,
                    count: 4096,
                },
            },
        ];
        for request in requests {
            let bytes = request.encode().unwrap();
            assert_eq!(Request::decode(&bytes).unwrap(), request);
        }
    }

    #[test]
    fn test_response_roundtrip() {
        let responses = vec![
            Response {
                code: Code::Ok,
                db_name: "db0".to_string(),
                slot_id: 0,
                snapshot_uuid: "abc".to_string(),
                kind: ResponseKind::Meta {
                    filenames: vec!["CURRENT".to_string(), "MANIFEST-01".to_string()],
                },
            },
            Response {
                code: Code::Err,
                db_name: "db0".to_string(),
                slot_id: 0,
                snapshot_uuid: String::new(),
                kind: ResponseKind::File {
                    filename: "00001.sst".to_string(),
                    offset: 0,
                    count: 3,
                    data: vec![1, 2, 3],
                    eof: true,
                    checksum: "d41d8cd98f00b204e9800998ecf8427e".to_string(),
                },
            },
        ];
        for response in responses {
            let bytes = response.encode().unwrap();
            assert_eq!(Response::decode(&bytes).unwrap(), response);
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            Request::decode(&[0xff; 16]),
            Err(RsyncError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_frame_roundtrip() {
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);

        let payload = vec![7u8; 1000];
        write_frame(&mut client, &payload).await.unwrap();
        let read = read_frame(&mut server).await.unwrap();
        assert_eq!(read, payload);
    }

    #[tokio::test]
    async fn test_frame_length_limit() {
        let (mut client, mut server) = tokio::io::duplex(64);

        let mut oversized = (MAX_FRAME_SIZE + 1).to_be_bytes().to_vec();
        oversized.extend_from_slice(&[0u8; 16]);
        tokio::io::AsyncWriteExt::write_all(&mut client, &oversized)
            .await
            .unwrap();

        assert!(matches!(
            read_frame(&mut server).await,
            Err(RsyncError::Protocol(_))
        ));
    }
}
