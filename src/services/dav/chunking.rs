//! Server-side reassembly of chunked uploads.
//!
//! A client splits a file into `count` pieces and uploads each one to
//! `<name>-chunking-<transferid>-<count>-<index>`. Chunks may arrive in
//! any order and concurrently; the store keeps them per transfer id until
//! every index `0..count` is present, at which point exactly one request
//! takes the session out of the store and assembles the file.

use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;

use chrono::{DateTime, Duration, Utc};
use tokio::io::AsyncReadExt;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::errors::{DavError, DavResult, StorageError};
use crate::storage::DataStream;

const CHUNKING_MARKER: &str = "-chunking";

/// Descriptor decoded from a chunk's file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkInfo {
    /// Logical name of the file being uploaded
    pub name: String,
    pub transfer_id: String,
    pub count: u32,
    pub index: u32,
}

impl ChunkInfo {
    pub fn decode(encoded: &str) -> Option<Self> {
        let mut parts = encoded.rsplitn(4, '-');
        let index = parts.next()?.parse::<u32>().ok()?;
        let count = parts.next()?.parse::<u32>().ok()?;
        let transfer_id = parts.next()?;
        let name = parts.next()?.strip_suffix(CHUNKING_MARKER)?;

        if name.is_empty() || transfer_id.is_empty() || count == 0 || index >= count {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            transfer_id: transfer_id.to_string(),
            count,
            index,
        })
    }

    pub fn encode(&self) -> String {
        format!(
            "{}{}-{}-{}-{}",
            self.name, CHUNKING_MARKER, self.transfer_id, self.count, self.index
        )
    }

    /// Staging name the assembled file is written to before the final rename
    pub fn part_file_name(&self) -> String {
        format!("{}.ocTransferId{}.part", self.name, self.transfer_id)
    }
}

#[derive(Debug)]
struct ChunkSession {
    name: String,
    count: u32,
    chunks: BTreeMap<u32, Vec<u8>>,
    updated_at: DateTime<Utc>,
}

impl ChunkSession {
    fn received_bytes(&self) -> u64 {
        self.chunks.values().map(|c| c.len() as u64).sum()
    }

    fn is_complete(&self) -> bool {
        self.chunks.len() as u64 == u64::from(self.count)
            && (0..self.count).all(|i| self.chunks.contains_key(&i))
    }
}

/// Chunks of a completed session, ordered by index
#[derive(Debug)]
pub struct AssembledChunks {
    pub name: String,
    chunks: Vec<Vec<u8>>,
}

impl AssembledChunks {
    pub fn total_size(&self) -> u64 {
        self.chunks.iter().map(|c| c.len() as u64).sum()
    }

    /// Concatenate the chunks into one readable stream
    pub fn into_stream(self) -> DataStream {
        self.chunks
            .into_iter()
            .fold(Box::new(tokio::io::empty()) as DataStream, |stream, chunk| {
                Box::new(stream.chain(Cursor::new(chunk))) as DataStream
            })
    }
}

/// Upload sessions shared across requests, keyed by transfer id
#[derive(Debug, Default)]
pub struct ChunkStore {
    sessions: RwLock<HashMap<String, ChunkSession>>,
}

impl ChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store one chunk and return the number of bytes it contained.
    ///
    /// The body is read completely before the session is touched so that a
    /// slow client does not block other chunks of the same transfer.
    pub async fn store(&self, info: &ChunkInfo, mut data: DataStream) -> DavResult<u64> {
        let mut buffer = Vec::new();
        data.read_to_end(&mut buffer)
            .await
            .map_err(|e| DavError::from(StorageError::Io(e)))?;
        let written = buffer.len() as u64;

        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(info.transfer_id.clone())
            .or_insert_with(|| ChunkSession {
                name: info.name.clone(),
                count: info.count,
                chunks: BTreeMap::new(),
                updated_at: Utc::now(),
            });
        if session.count != info.count || session.name != info.name {
            return Err(DavError::bad_request(format!(
                "chunk {} does not belong to transfer {} ({} of {} chunks)",
                info.encode(),
                info.transfer_id,
                session.name,
                session.count
            )));
        }
        session.chunks.insert(info.index, buffer);
        session.updated_at = Utc::now();
        debug!(
            transfer_id = %info.transfer_id,
            index = info.index,
            bytes = written,
            received = session.chunks.len(),
            expected = session.count,
            "stored chunk"
        );
        Ok(written)
    }

    /// Forget one chunk, e.g. after it arrived truncated
    pub async fn remove(&self, info: &ChunkInfo) {
        if let Some(session) = self.sessions.write().await.get_mut(&info.transfer_id) {
            session.chunks.remove(&info.index);
        }
    }

    /// Bytes received so far across all chunks of the transfer
    pub async fn current_size(&self, info: &ChunkInfo) -> u64 {
        self.sessions
            .read()
            .await
            .get(&info.transfer_id)
            .map(ChunkSession::received_bytes)
            .unwrap_or(0)
    }

    pub async fn is_complete(&self, info: &ChunkInfo) -> bool {
        self.sessions
            .read()
            .await
            .get(&info.transfer_id)
            .map(ChunkSession::is_complete)
            .unwrap_or(false)
    }

    /// Remove and return the session if every chunk has arrived.
    ///
    /// Only one caller can win this for a given transfer, which makes
    /// assembly happen exactly once.
    pub async fn take_complete(&self, info: &ChunkInfo) -> Option<AssembledChunks> {
        let mut sessions = self.sessions.write().await;
        if !sessions.get(&info.transfer_id)?.is_complete() {
            return None;
        }
        let session = sessions.remove(&info.transfer_id)?;
        Some(AssembledChunks {
            name: session.name,
            chunks: session.chunks.into_values().collect(),
        })
    }

    /// Drop the whole session
    pub async fn cleanup(&self, info: &ChunkInfo) {
        if self.sessions.write().await.remove(&info.transfer_id).is_some() {
            info!(transfer_id = %info.transfer_id, "discarded chunk session");
        }
    }

    /// Drop sessions that have not received a chunk within `ttl`
    pub async fn sweep_expired(&self, ttl: Duration) -> usize {
        let cutoff = Utc::now() - ttl;
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| session.updated_at >= cutoff);
        let removed = before - sessions.len();
        if removed > 0 {
            info!("Expired {} abandoned chunk sessions", removed);
        }
        removed
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(index: u32, count: u32) -> ChunkInfo {
        ChunkInfo {
            name: "movie.mkv".to_string(),
            transfer_id: "4711".to_string(),
            count,
            index,
        }
    }

    fn body(bytes: &'static [u8]) -> DataStream {
        Box::new(Cursor::new(bytes))
    }

    #[test]
    fn test_decode_chunk_name() {
        let info = ChunkInfo::decode("movie.mkv-chunking-4711-3-2").unwrap();
        assert_eq!(info, chunk(2, 3));
        assert_eq!(info.encode(), "movie.mkv-chunking-4711-3-2");
        assert_eq!(info.part_file_name(), "movie.mkv.ocTransferId4711.part");
    }

    #[test]
    fn test_decode_keeps_dashes_in_the_file_name() {
        let info = ChunkInfo::decode("my-file-chunking-9-2-0").unwrap();
        assert_eq!(info.name, "my-file");
    }

    #[test]
    fn test_decode_rejects_malformed_names() {
        for name in [
            "movie.mkv",
            "movie.mkv-chunking-4711-3",
            "movie.mkv-chunking-4711-3-3",
            "movie.mkv-chunking-4711-0-0",
            "-chunking-4711-3-0",
            "movie.mkv-chunked-4711-3-0",
            "movie.mkv-chunking-4711-x-0",
        ] {
            assert!(ChunkInfo::decode(name).is_none(), "{} should not decode", name);
        }
    }

    #[tokio::test]
    async fn test_out_of_order_chunks_assemble_in_index_order() {
        let store = ChunkStore::new();
        store.store(&chunk(2, 3), body(b"CC")).await.unwrap();
        store.store(&chunk(0, 3), body(b"A")).await.unwrap();
        assert!(store.take_complete(&chunk(0, 3)).await.is_none());
        assert_eq!(store.current_size(&chunk(0, 3)).await, 3);

        store.store(&chunk(1, 3), body(b"BBB")).await.unwrap();
        let assembled = store.take_complete(&chunk(1, 3)).await.unwrap();
        assert_eq!(assembled.total_size(), 6);

        let mut content = Vec::new();
        assembled.into_stream().read_to_end(&mut content).await.unwrap();
        assert_eq!(content, b"ABBBCC");

        // the session is gone, a second completion attempt finds nothing
        assert!(store.take_complete(&chunk(1, 3)).await.is_none());
        assert_eq!(store.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_chunks_are_not_lost() {
        let store = std::sync::Arc::new(ChunkStore::new());
        let count = 16;
        let mut handles = Vec::new();
        for index in 0..count {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.store(&chunk(index, count), body(b"0123456789")).await.unwrap()
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), 10);
        }
        assert!(store.is_complete(&chunk(0, count)).await);
        assert_eq!(store.current_size(&chunk(0, count)).await, 160);
    }

    #[tokio::test]
    async fn test_mismatched_chunk_count_is_rejected() {
        let store = ChunkStore::new();
        store.store(&chunk(0, 3), body(b"A")).await.unwrap();
        let err = store.store(&chunk(1, 4), body(b"B")).await.unwrap_err();
        assert!(matches!(err, DavError::BadRequest { .. }));
    }

    #[tokio::test]
    async fn test_remove_and_cleanup() {
        let store = ChunkStore::new();
        store.store(&chunk(0, 2), body(b"AA")).await.unwrap();
        store.store(&chunk(1, 2), body(b"B")).await.unwrap();
        store.remove(&chunk(1, 2)).await;
        assert!(!store.is_complete(&chunk(0, 2)).await);
        assert_eq!(store.current_size(&chunk(0, 2)).await, 2);

        store.cleanup(&chunk(0, 2)).await;
        assert_eq!(store.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_sweep_expired_sessions() {
        let store = ChunkStore::new();
        store.store(&chunk(0, 2), body(b"AA")).await.unwrap();
        assert_eq!(store.sweep_expired(Duration::hours(1)).await, 0);
        assert_eq!(store.sweep_expired(Duration::seconds(-1)).await, 1);
        assert_eq!(store.session_count().await, 0);
    }
}
