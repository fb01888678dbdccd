use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use object_store::{path::Path, ObjectStore};
use tokio_util::io::StreamReader;
use tracing::{instrument, Level};
use url::Url;

use super::{BlobFetcher, BlobReader};
use crate::Digest;

/// Uses any object storage supported by the [object_store] crate as a
/// [BlobFetcher].
///
/// # Data format
/// Blobs are stored at `${base_path}/cas/$hexdigest`, uncompressed. This is
/// the layout used by HTTP remote caches, so pointing this at such a cache
/// (with an `http(s)` url) or at a local mirror of one (with a `file` url)
/// works without further configuration.
#[derive(Clone)]
pub struct ObjectStoreBlobFetcher {
    object_store: Arc<dyn ObjectStore>,
    base_path: Path,
}

impl ObjectStoreBlobFetcher {
    /// Constructs a new [ObjectStoreBlobFetcher] from a [Url] supported by
    /// [object_store].
    /// Any path suffix becomes the base path of the object store.
    /// additional options, the same as in [object_store::parse_url_opts] can
    /// be passed.
    pub fn parse_url_opts<I, K, V>(url: &Url, options: I) -> Result<Self, object_store::Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let (object_store, path) = object_store::parse_url_opts(url, options)?;

        Ok(Self {
            object_store: Arc::new(object_store),
            base_path: path,
        })
    }

    /// Like [Self::parse_url_opts], except without the options.
    pub fn parse_url(url: &Url) -> Result<Self, object_store::Error> {
        Self::parse_url_opts(url, Vec::<(String, String)>::new())
    }
}

#[instrument(level=Level::TRACE, skip_all,fields(base_path=%base_path,blob.digest=%digest),ret(Display))]
fn derive_blob_path(base_path: &Path, digest: &Digest) -> Path {
    base_path.child("cas").child(digest.hash_hex())
}

#[async_trait]
impl BlobFetcher for ObjectStoreBlobFetcher {
    #[instrument(skip_all, err, fields(blob.digest=%digest))]
    async fn open_read(&self, digest: &Digest) -> io::Result<Option<Box<dyn BlobReader>>> {
        match self
            .object_store
            .get(&derive_blob_path(&self.base_path, digest))
            .await
        {
            Ok(get_result) => {
                let stream = get_result.into_stream().map_err(io::Error::from);
                Ok(Some(Box::new(StreamReader::new(stream))))
            }
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;
    use url::Url;

    use super::ObjectStoreBlobFetcher;
    use crate::blobfetcher::BlobFetcher;
    use crate::fixtures::{BLOB_B, BLOB_B_DIGEST, HELLOWORLD_BLOB_DIGEST};

    #[tokio::test]
    async fn read_from_local_filesystem() {
        let tmpdir = TempDir::new().unwrap();
        std::fs::create_dir_all(tmpdir.path().join("cas")).unwrap();
        std::fs::write(
            tmpdir.path().join("cas").join(BLOB_B_DIGEST.hash_hex()),
            &*BLOB_B,
        )
        .unwrap();

        let url = Url::from_file_path(tmpdir.path()).unwrap();
        let fetcher = ObjectStoreBlobFetcher::parse_url(&url).expect("must parse");

        let mut r = fetcher
            .open_read(&BLOB_B_DIGEST)
            .await
            .expect("must succeed")
            .expect("must be some");
        let mut buf = Vec::new();
        r.read_to_end(&mut buf).await.expect("must read");
        assert_eq!(&BLOB_B[..], buf.as_slice());

        assert!(fetcher
            .open_read(&HELLOWORLD_BLOB_DIGEST)
            .await
            .expect("must succeed")
            .is_none());
    }
}
