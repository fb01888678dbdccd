use std::io;

use async_trait::async_trait;

use crate::Digest;

mod from_addr;
mod memory;
mod object_store;

pub use self::from_addr::{from_addr, Error};
pub use self::memory::MemoryBlobFetcher;
pub use self::object_store::ObjectStoreBlobFetcher;

/// The base trait all BlobFetchers need to implement.
/// It provides read access to blobs in a remote content-addressable store,
/// by their [Digest].
///
/// Implementations may be called concurrently from many tasks. The data
/// returned is not trusted, callers verify it against the requested digest.
#[async_trait]
pub trait BlobFetcher: Send + Sync {
    /// Request a blob from the store, by its digest.
    /// Returns Ok(None) if the store doesn't have the blob. Any other error
    /// (while opening, or while reading from the returned reader) is
    /// considered a transport error.
    async fn open_read(&self, digest: &Digest) -> io::Result<Option<Box<dyn BlobReader>>>;
}

#[async_trait]
impl<A> BlobFetcher for A
where
    A: AsRef<dyn BlobFetcher> + Send + Sync,
{
    async fn open_read(&self, digest: &Digest) -> io::Result<Option<Box<dyn BlobReader>>> {
        self.as_ref().open_read(digest).await
    }
}

/// A streaming reader over the contents of a blob.
pub trait BlobReader: tokio::io::AsyncRead + Send + Unpin + 'static {}

impl<R> BlobReader for R where R: tokio::io::AsyncRead + Send + Unpin + 'static {}
