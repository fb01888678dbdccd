use std::io::{self, Cursor};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use async_tempfile::TempFile;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::blobfetcher::{BlobFetcher, BlobReader};
use crate::retry::RetryPolicy;
use crate::{Digest, DigestFunction, Error, HashingReader};

const EXECUTABLE_MODE: u32 = 0o755;
const REGULAR_MODE: u32 = 0o644;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Upper bound for buffers preallocated based on a (not yet verified) size.
const MAX_PREALLOC: u64 = 16 * 1024 * 1024;

/// Binds the content with a given [Digest] to a local destination path.
///
/// Running it fetches the content, verifies it against the digest while
/// writing it to a temporary file next to the destination, and then renames
/// the temporary file into place. Readers of the destination path never
/// observe partially written content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    pub digest: Digest,
    pub path: PathBuf,
    pub executable: bool,
    /// Contents already known locally, which are verified and written
    /// instead of fetching them.
    pub contents: Option<Bytes>,
}

impl DownloadTask {
    pub fn new(digest: Digest, path: impl Into<PathBuf>, executable: bool) -> Self {
        Self {
            digest,
            path: path.into(),
            executable,
            contents: None,
        }
    }

    pub fn with_contents(self, contents: Option<Bytes>) -> Self {
        Self { contents, ..self }
    }

    #[instrument(skip_all, fields(path=?self.path, blob.digest=%self.digest), err)]
    pub async fn run(
        &self,
        fetcher: &dyn BlobFetcher,
        digest_function: DigestFunction,
        retry: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        if let Some(contents) = &self.contents {
            debug!("writing inlined contents");
            return self
                .place(Cursor::new(contents.clone()), digest_function, cancel)
                .await;
        }

        if self.digest.size() == 0 {
            // The empty blob is never fetched, it still gets verified below.
            return self
                .place(Cursor::new(Bytes::new()), digest_function, cancel)
                .await;
        }

        retry
            .run(cancel, || {
                self.fetch_and_place(fetcher, digest_function, cancel)
            })
            .await
    }

    async fn fetch_and_place(
        &self,
        fetcher: &dyn BlobFetcher,
        digest_function: DigestFunction,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let reader = open_blob(fetcher, &self.digest, &self.path, cancel).await?;
        self.place(reader, digest_function, cancel).await
    }

    /// Writes everything from `reader` to a temporary file, verifies it, and
    /// moves it to the destination.
    async fn place<R>(
        &self,
        reader: R,
        digest_function: DigestFunction,
        cancel: &CancellationToken,
    ) -> Result<(), Error>
    where
        R: AsyncRead + Send + Unpin,
    {
        let local_io = |path: &Path, source: io::Error| Error::LocalIO {
            path: path.to_path_buf(),
            digest: Some(self.digest.clone()),
            source,
        };

        let parent = self.path.parent().ok_or_else(|| {
            local_io(
                &self.path,
                io::Error::new(io::ErrorKind::InvalidInput, "destination has no parent"),
            )
        })?;

        // Dropping the TempFile removes it, which takes care of discarding
        // the data on all error paths.
        let mut file = TempFile::new_in(parent.to_path_buf())
            .await
            .map_err(|e| local_io(parent, tempfile_error(e)))?;

        copy_verified(
            digest_function,
            reader,
            &mut file,
            &self.digest,
            &self.path,
            cancel,
        )
        .await?;

        file.flush()
            .await
            .map_err(|e| local_io(file.file_path(), e))?;

        let mode = if self.executable {
            EXECUTABLE_MODE
        } else {
            REGULAR_MODE
        };
        tokio::fs::set_permissions(file.file_path(), std::fs::Permissions::from_mode(mode))
            .await
            .map_err(|e| local_io(file.file_path(), e))?;

        // Nothing may appear at the destination once cancelled.
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        tokio::fs::rename(file.file_path(), &self.path)
            .await
            .map_err(|e| local_io(&self.path, e))?;

        debug!(executable = self.executable, "placed");
        Ok(())
    }
}

/// Opens a blob, translating a missing blob and fetcher failures into
/// [Error]s for the given destination path.
pub(crate) async fn open_blob(
    fetcher: &dyn BlobFetcher,
    digest: &Digest,
    path: &Path,
    cancel: &CancellationToken,
) -> Result<Box<dyn BlobReader>, Error> {
    let res = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(Error::Cancelled),
        res = fetcher.open_read(digest) => res,
    };

    match res {
        Ok(Some(reader)) => Ok(reader),
        Ok(None) => Err(Error::NotFound {
            path: path.to_path_buf(),
            digest: digest.clone(),
        }),
        Err(source) => Err(Error::Transport {
            path: path.to_path_buf(),
            digest: digest.clone(),
            source,
        }),
    }
}

/// Fetches a blob into memory, and verifies it.
/// Used for tree descriptors, which are consumed rather than placed.
#[instrument(skip_all, fields(path=?path, blob.digest=%digest), err)]
pub(crate) async fn fetch_verified(
    fetcher: &dyn BlobFetcher,
    digest: &Digest,
    path: &Path,
    digest_function: DigestFunction,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<Bytes, Error> {
    if digest.size() == 0 {
        copy_verified(
            digest_function,
            Cursor::new(Bytes::new()),
            &mut Vec::new(),
            digest,
            path,
            cancel,
        )
        .await?;
        return Ok(Bytes::new());
    }

    retry
        .run(cancel, || async move {
            let reader = open_blob(fetcher, digest, path, cancel).await?;
            let mut buf = Vec::with_capacity(digest.size().min(MAX_PREALLOC) as usize);
            copy_verified(digest_function, reader, &mut buf, digest, path, cancel).await?;

            Ok(Bytes::from(buf))
        })
        .await
}

/// Copies all data from `reader` to `writer`, failing if it doesn't match
/// `digest`. Exceeding the expected size fails immediately, without reading
/// the rest.
async fn copy_verified<R, W>(
    digest_function: DigestFunction,
    reader: R,
    writer: &mut W,
    digest: &Digest,
    path: &Path,
    cancel: &CancellationToken,
) -> Result<(), Error>
where
    R: AsyncRead + Send + Unpin,
    W: AsyncWrite + Send + Unpin,
{
    match digest_function {
        DigestFunction::Sha256 => {
            copy_verified_with::<sha2::Sha256, _, _>(reader, writer, digest, path, cancel).await
        }
        DigestFunction::Blake3 => {
            copy_verified_with::<blake3::Hasher, _, _>(reader, writer, digest, path, cancel).await
        }
    }
}

async fn copy_verified_with<H, R, W>(
    reader: R,
    writer: &mut W,
    digest: &Digest,
    path: &Path,
    cancel: &CancellationToken,
) -> Result<(), Error>
where
    H: digest::Digest + Send,
    R: AsyncRead + Send + Unpin,
    W: AsyncWrite + Send + Unpin,
{
    let mut reader = HashingReader::<_, H>::from(reader);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            res = reader.read(&mut buf) => res.map_err(|source| Error::Transport {
                path: path.to_path_buf(),
                digest: digest.clone(),
                source,
            })?,
        };
        if n == 0 {
            break;
        }

        if reader.bytes_read() > digest.size() {
            return Err(Error::UnexpectedSize {
                path: path.to_path_buf(),
                digest: digest.clone(),
                got: reader.bytes_read(),
            });
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            res = writer.write_all(&buf[..n]) => res.map_err(|source| Error::LocalIO {
                path: path.to_path_buf(),
                digest: Some(digest.clone()),
                source,
            })?,
        }
    }

    if reader.bytes_read() != digest.size() {
        return Err(Error::UnexpectedSize {
            path: path.to_path_buf(),
            digest: digest.clone(),
            got: reader.bytes_read(),
        });
    }

    let got = reader.digest();
    if got != *digest {
        return Err(Error::UnexpectedDigest {
            path: path.to_path_buf(),
            digest: digest.clone(),
            got,
        });
    }

    Ok(())
}

fn tempfile_error(e: async_tempfile::Error) -> io::Error {
    match e {
        async_tempfile::Error::Io(io_error) => io_error,
        async_tempfile::Error::InvalidFile => io::Error::new(
            io::ErrorKind::NotFound,
            "invalid or missing file specified",
        ),
        async_tempfile::Error::InvalidDirectory => io::Error::new(
            io::ErrorKind::NotFound,
            "invalid or missing directory specified",
        ),
    }
}
