use std::sync::Arc;

use url::Url;

use super::{BlobFetcher, MemoryBlobFetcher, ObjectStoreBlobFetcher};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unable to parse url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("invalid url: {0}")]
    InvalidRequest(String),

    #[error("unknown scheme: {0}")]
    UnknownScheme(String),

    #[error("unable to open object store: {0}")]
    ObjectStore(#[from] object_store::Error),
}

/// Constructs a new instance of a [BlobFetcher] from an URI.
///
/// The following schemes are supported by the following fetchers:
/// - `memory://` ([MemoryBlobFetcher])
/// - `objectstore+*://` ([ObjectStoreBlobFetcher])
pub fn from_addr(uri: &str) -> Result<Arc<dyn BlobFetcher>, Error> {
    let url = Url::parse(uri)?;

    let blob_fetcher: Arc<dyn BlobFetcher> = match url.scheme() {
        "memory" => {
            // memory doesn't support host or path in the URL.
            if url.has_host() || !url.path().is_empty() {
                return Err(Error::InvalidRequest(uri.to_string()));
            }
            Arc::new(MemoryBlobFetcher::default())
        }
        scheme if scheme.starts_with("objectstore+") => {
            // We need to convert the URL to string, strip the prefix there, and then
            // parse it back as url, as Url::set_scheme() rejects some of the transitions we want to do.
            let trimmed_url = match url.as_str().strip_prefix("objectstore+") {
                Some(s) => Url::parse(s)?,
                None => return Err(Error::InvalidRequest(uri.to_string())),
            };
            Arc::new(ObjectStoreBlobFetcher::parse_url(&trimmed_url)?)
        }
        scheme => return Err(Error::UnknownScheme(scheme.to_string())),
    };

    Ok(blob_fetcher)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::from_addr;

    #[rstest]
    /// This uses an unsupported scheme.
    #[case::unsupported_scheme("http://foo.example/test", false)]
    /// This correctly sets the scheme, and doesn't set a path.
    #[case::memory_valid("memory://", true)]
    /// This sets a memory url host to `foo`
    #[case::memory_invalid_host("memory://foo", false)]
    /// This sets a memory url path to "/", which is invalid.
    #[case::memory_invalid_root_path("memory:///", false)]
    /// A local directory through object_store.
    #[case::objectstore_valid_file("objectstore+file:///var/cache/cas", true)]
    /// A remote http cache through object_store.
    #[case::objectstore_valid_http("objectstore+https://cache.example/prefix", true)]
    /// Not a url at all.
    #[case::garbage("::nope", false)]
    fn test_from_addr(#[case] uri_str: &str, #[case] exp_succeed: bool) {
        if exp_succeed {
            from_addr(uri_str).expect("should succeed");
        } else {
            assert!(from_addr(uri_str).is_err(), "should fail");
        }
    }
}
