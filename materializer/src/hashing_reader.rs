use pin_project_lite::pin_project;
use tokio::io::AsyncRead;

use crate::Digest;

pin_project! {
    /// Wraps an existing AsyncRead, and allows querying for the digest and
    /// number of bytes of all data read "through" it.
    /// The hash function is configurable by type parameter.
    pub struct HashingReader<R, H>
    where
        R: AsyncRead,
        H: digest::Digest,
    {
        #[pin]
        inner: R,
        hasher: H,
        bytes_read: u64,
    }
}

pub type Sha256HashingReader<R> = HashingReader<R, sha2::Sha256>;
pub type B3HashingReader<R> = HashingReader<R, blake3::Hasher>;

impl<R, H> HashingReader<R, H>
where
    R: AsyncRead,
    H: digest::Digest,
{
    pub fn from(r: R) -> Self {
        Self {
            inner: r,
            hasher: H::new(),
            bytes_read: 0,
        }
    }

    /// The number of bytes that went through the reader so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Consumes the reader and returns the [Digest] of everything read.
    pub fn digest(self) -> Digest {
        Digest::from_output(self.hasher.finalize().as_slice(), self.bytes_read)
    }
}

impl<R, H> tokio::io::AsyncRead for HashingReader<R, H>
where
    R: AsyncRead,
    H: digest::Digest,
{
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        let buf_filled_len_before = buf.filled().len();

        let this = self.project();
        let ret = this.inner.poll_read(cx, buf);

        // write everything new filled into the hasher.
        let new = &buf.filled()[buf_filled_len_before..];
        this.hasher.update(new);
        *this.bytes_read += new.len() as u64;

        ret
    }
}
