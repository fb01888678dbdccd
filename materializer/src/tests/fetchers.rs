//! [BlobFetcher] doubles, wrapping another fetcher.
use std::io::{self, Cursor};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;

use crate::blobfetcher::{BlobFetcher, BlobReader};
use crate::Digest;

/// Counts calls to open_read.
pub struct CountingBlobFetcher {
    inner: Arc<dyn BlobFetcher>,
    calls: AtomicUsize,
}

impl CountingBlobFetcher {
    pub fn new(inner: Arc<dyn BlobFetcher>) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobFetcher for CountingBlobFetcher {
    async fn open_read(&self, digest: &Digest) -> io::Result<Option<Box<dyn BlobReader>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.open_read(digest).await
    }
}

/// Reads the whole blob and sleeps while holding it, recording the highest
/// number of fetches in progress at the same time.
pub struct SlowBlobFetcher {
    inner: Arc<dyn BlobFetcher>,
    delay: Duration,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl SlowBlobFetcher {
    pub fn new(inner: Arc<dyn BlobFetcher>, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    async fn read_slowly(&self, digest: &Digest) -> io::Result<Option<Box<dyn BlobReader>>> {
        let Some(mut r) = self.inner.open_read(digest).await? else {
            return Ok(None);
        };
        let mut buf = Vec::new();
        r.read_to_end(&mut buf).await?;
        tokio::time::sleep(self.delay).await;

        Ok(Some(Box::new(Cursor::new(buf))))
    }
}

#[async_trait]
impl BlobFetcher for SlowBlobFetcher {
    async fn open_read(&self, digest: &Digest) -> io::Result<Option<Box<dyn BlobReader>>> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        let res = self.read_slowly(digest).await;

        self.active.fetch_sub(1, Ordering::SeqCst);
        res
    }
}

/// Fails the first `failures` calls with a transport error.
pub struct FlakyBlobFetcher {
    inner: Arc<dyn BlobFetcher>,
    failures: usize,
    calls: AtomicUsize,
}

impl FlakyBlobFetcher {
    pub fn new(inner: Arc<dyn BlobFetcher>, failures: usize) -> Self {
        Self {
            inner,
            failures,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobFetcher for FlakyBlobFetcher {
    async fn open_read(&self, digest: &Digest) -> io::Result<Option<Box<dyn BlobReader>>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            ));
        }
        self.inner.open_read(digest).await
    }
}

/// Never answers, except for the `served` digests, which are read from
/// `inner`. Only unanswered calls are counted.
#[derive(Default)]
pub struct StuckBlobFetcher {
    inner: Option<Arc<dyn BlobFetcher>>,
    served: Vec<Digest>,
    calls: AtomicUsize,
}

impl StuckBlobFetcher {
    pub fn serving(inner: Arc<dyn BlobFetcher>, served: Vec<Digest>) -> Self {
        Self {
            inner: Some(inner),
            served,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobFetcher for StuckBlobFetcher {
    async fn open_read(&self, digest: &Digest) -> io::Result<Option<Box<dyn BlobReader>>> {
        if let Some(inner) = &self.inner {
            if self.served.contains(digest) {
                return inner.open_read(digest).await;
            }
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        futures::future::pending().await
    }
}
