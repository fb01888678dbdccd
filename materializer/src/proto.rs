//! Protobuf messages describing serialized directory trees, as referenced by
//! the tree digest of an output directory.
//! Field numbers match the remote execution API, so trees produced by remote
//! executors can be decoded directly.
use prost::Message;

use crate::{digests, DigestFunction};

/// A content digest, with the hash in lowercase hex.
#[derive(Clone, PartialEq, Eq, Hash, Message)]
pub struct Digest {
    #[prost(string, tag = "1")]
    pub hash: String,
    #[prost(int64, tag = "2")]
    pub size_bytes: i64,
}

/// A regular or executable file inside a [Directory].
#[derive(Clone, PartialEq, Message)]
pub struct FileNode {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, optional, tag = "2")]
    pub digest: Option<Digest>,
    #[prost(bool, tag = "4")]
    pub is_executable: bool,
}

/// A subdirectory inside a [Directory], pointing to another [Directory] by
/// the digest of its canonical serialization.
#[derive(Clone, PartialEq, Message)]
pub struct DirectoryNode {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, optional, tag = "2")]
    pub digest: Option<Digest>,
}

/// A symlink inside a [Directory]. The target is kept verbatim.
#[derive(Clone, PartialEq, Message)]
pub struct SymlinkNode {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub target: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct Directory {
    #[prost(message, repeated, tag = "1")]
    pub files: Vec<FileNode>,
    #[prost(message, repeated, tag = "2")]
    pub directories: Vec<DirectoryNode>,
    #[prost(message, repeated, tag = "3")]
    pub symlinks: Vec<SymlinkNode>,
}

/// A root [Directory] together with all directories reachable from it.
#[derive(Clone, PartialEq, Message)]
pub struct Tree {
    #[prost(message, optional, tag = "1")]
    pub root: Option<Directory>,
    #[prost(message, repeated, tag = "2")]
    pub children: Vec<Directory>,
}

impl Directory {
    /// The digest of this message in canonical protobuf serialization.
    pub fn digest(&self, digest_function: DigestFunction) -> crate::Digest {
        digest_function.compute(&self.encode_to_vec())
    }
}

impl Tree {
    pub fn digest(&self, digest_function: DigestFunction) -> crate::Digest {
        digest_function.compute(&self.encode_to_vec())
    }
}

impl TryFrom<&Digest> for crate::Digest {
    type Error = digests::Error;

    fn try_from(value: &Digest) -> Result<Self, Self::Error> {
        let size = u64::try_from(value.size_bytes)
            .map_err(|_| digests::Error::InvalidSize(value.size_bytes.to_string()))?;

        crate::Digest::from_hex(&value.hash, size)
    }
}

impl From<&crate::Digest> for Digest {
    fn from(value: &crate::Digest) -> Self {
        Self {
            hash: value.hash_hex(),
            // sizes above i64::MAX don't exist in practice.
            size_bytes: value.size() as i64,
        }
    }
}

#[cfg(test)]
mod tests {
    use prost::Message;

    use super::{Digest, Tree};
    use crate::fixtures::{DIRECTORY_WITH_KEEP, HELLOWORLD_BLOB_DIGEST, TREE_COMPLICATED};
    use crate::{digests, DigestFunction};

    #[test]
    fn digest_conversion() {
        let proto_digest = Digest::from(&*HELLOWORLD_BLOB_DIGEST);
        assert_eq!(12, proto_digest.size_bytes);

        let digest = crate::Digest::try_from(&proto_digest).expect("must convert");
        assert_eq!(*HELLOWORLD_BLOB_DIGEST, digest);
    }

    #[test]
    fn negative_size_rejected() {
        let proto_digest = Digest {
            size_bytes: -1,
            ..Digest::from(&*HELLOWORLD_BLOB_DIGEST)
        };

        assert_eq!(
            digests::Error::InvalidSize("-1".to_string()),
            crate::Digest::try_from(&proto_digest).expect_err("must fail")
        );
    }

    #[test]
    fn tree_decodes_after_encoding() {
        let encoded = TREE_COMPLICATED.encode_to_vec();
        let decoded = Tree::decode(encoded.as_slice()).expect("must decode");

        assert_eq!(*TREE_COMPLICATED, decoded);
        assert_eq!(
            DIRECTORY_WITH_KEEP.digest(DigestFunction::Sha256),
            decoded.children[0].digest(DigestFunction::Sha256)
        );
    }
}
