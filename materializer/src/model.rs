//! Types describing the outputs of a finished remote action.
//! All of them are produced by the remote side, and only read here.
use bytes::Bytes;

use crate::Digest;

/// A regular file to materialize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    /// The declared path, relative to the output root (or, inside a
    /// [DirectoryListing], relative to the containing directory).
    pub path: String,
    pub digest: Digest,
    pub is_executable: bool,
    /// The file contents, if the remote side inlined them.
    pub contents: Option<Bytes>,
}

impl OutputFile {
    pub fn new(path: impl Into<String>, digest: Digest, is_executable: bool) -> Self {
        Self {
            path: path.into(),
            digest,
            is_executable,
            contents: None,
        }
    }

    pub fn with_contents(self, contents: impl Into<Bytes>) -> Self {
        Self {
            contents: Some(contents.into()),
            ..self
        }
    }
}

/// A symlink to materialize. The target is written verbatim, and never
/// resolved or validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSymlink {
    pub path: String,
    pub target: String,
}

impl OutputSymlink {
    pub fn new(path: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            target: target.into(),
        }
    }
}

/// How the contents of an [OutputDirectory] are described.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryContents {
    /// The digest of a serialized [crate::proto::Tree], which needs to be
    /// fetched before its contents are known.
    Tree(Digest),
    /// An explicit listing of the directory contents.
    Listing(DirectoryListing),
}

/// The contents of a directory, with all paths relative to that directory.
/// An empty listing describes an empty directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryListing {
    pub files: Vec<OutputFile>,
    pub directories: Vec<OutputDirectory>,
    pub symlinks: Vec<OutputSymlink>,
}

/// A directory subtree to materialize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDirectory {
    pub path: String,
    pub contents: DirectoryContents,
}

impl OutputDirectory {
    pub fn from_tree(path: impl Into<String>, tree_digest: Digest) -> Self {
        Self {
            path: path.into(),
            contents: DirectoryContents::Tree(tree_digest),
        }
    }

    pub fn from_listing(path: impl Into<String>, listing: DirectoryListing) -> Self {
        Self {
            path: path.into(),
            contents: DirectoryContents::Listing(listing),
        }
    }
}

/// Everything a finished remote action declared as its outputs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionResult {
    pub output_files: Vec<OutputFile>,
    pub output_directories: Vec<OutputDirectory>,
    pub output_symlinks: Vec<OutputSymlink>,
    pub exit_code: i32,

    pub stdout_digest: Option<Digest>,
    pub stdout_raw: Option<Bytes>,
    pub stderr_digest: Option<Digest>,
    pub stderr_raw: Option<Bytes>,
}

impl ActionResult {
    /// Number of outputs declared at the top level.
    pub fn num_outputs(&self) -> usize {
        self.output_files.len() + self.output_directories.len() + self.output_symlinks.len()
    }
}
