use std::collections::HashMap;
use std::io::{self, Cursor};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tracing::instrument;

use super::{BlobFetcher, BlobReader};
use crate::{Digest, DigestFunction};

/// Serves blobs from memory.
/// Cloning shares the underlying storage.
#[derive(Clone, Default)]
pub struct MemoryBlobFetcher {
    db: Arc<RwLock<HashMap<Digest, Bytes>>>,
    digest_function: DigestFunction,
}

impl MemoryBlobFetcher {
    pub fn new(digest_function: DigestFunction) -> Self {
        Self {
            db: Default::default(),
            digest_function,
        }
    }

    /// Stores `data`, returning its digest.
    pub fn put(&self, data: impl Into<Bytes>) -> Digest {
        let data = data.into();
        let digest = self.digest_function.compute(&data);
        self.db.write().insert(digest.clone(), data);
        digest
    }

    /// Stores `data` under the given digest, without checking it matches.
    pub fn insert(&self, digest: Digest, data: impl Into<Bytes>) {
        self.db.write().insert(digest, data.into());
    }
}

#[async_trait]
impl BlobFetcher for MemoryBlobFetcher {
    #[instrument(skip_all, fields(blob.digest=%digest))]
    async fn open_read(&self, digest: &Digest) -> io::Result<Option<Box<dyn BlobReader>>> {
        let db = self.db.read();

        Ok(db
            .get(digest)
            .map(|data| Box::new(Cursor::new(data.clone())) as Box<dyn BlobReader>))
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::MemoryBlobFetcher;
    use crate::blobfetcher::BlobFetcher;
    use crate::fixtures::{HELLOWORLD_BLOB_CONTENTS, HELLOWORLD_BLOB_DIGEST};
    use crate::DigestFunction;

    #[tokio::test]
    async fn put_and_read() {
        let fetcher = MemoryBlobFetcher::default();
        let digest = fetcher.put(HELLOWORLD_BLOB_CONTENTS);
        assert_eq!(*HELLOWORLD_BLOB_DIGEST, digest);

        let mut r = fetcher
            .open_read(&digest)
            .await
            .expect("must succeed")
            .expect("must be some");
        let mut buf = Vec::new();
        r.read_to_end(&mut buf).await.expect("must read");

        assert_eq!(HELLOWORLD_BLOB_CONTENTS, buf.as_slice());
    }

    #[tokio::test]
    async fn not_found() {
        let fetcher = MemoryBlobFetcher::new(DigestFunction::Blake3);
        let digest = DigestFunction::Blake3.compute(b"absent");

        assert!(fetcher
            .open_read(&digest)
            .await
            .expect("must succeed")
            .is_none());
    }
}
