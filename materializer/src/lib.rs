mod digests;
mod errors;
mod hashing_reader;
mod materializer;

pub mod blobfetcher;
pub mod config;
pub mod download;
pub mod fixtures;
pub mod limiter;
pub mod model;
pub mod path_resolver;
pub mod proto;
pub mod retry;
pub mod symlink;
pub mod tree;

pub use config::MaterializerConfig;
pub use digests::{Digest, DigestFunction, HASH_LEN};
pub use errors::{Error, ErrorKind};
pub use hashing_reader::{B3HashingReader, HashingReader, Sha256HashingReader};
pub use materializer::{
    materialize, MaterializationHandle, Materializer, StdStreams, PB_PROGRESS_STYLE,
};
pub use model::{
    ActionResult, DirectoryContents, DirectoryListing, OutputDirectory, OutputFile, OutputSymlink,
};
pub use path_resolver::{ExecRootPathResolver, PathResolver, PathSecurityError};

#[cfg(test)]
mod tests;
