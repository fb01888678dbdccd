use bytes::Bytes;
use lazy_static::lazy_static;

use crate::proto::{self, DirectoryNode, FileNode, SymlinkNode};
use crate::{Digest, DigestFunction};

pub const HELLOWORLD_BLOB_CONTENTS: &[u8] = b"Hello World!";
pub const EMPTY_BLOB_CONTENTS: &[u8] = b"";

lazy_static! {
    pub static ref HELLOWORLD_BLOB_DIGEST: Digest =
        DigestFunction::Sha256.compute(HELLOWORLD_BLOB_CONTENTS);
    pub static ref EMPTY_BLOB_DIGEST: Digest =
        DigestFunction::Sha256.compute(EMPTY_BLOB_CONTENTS);

    // 2 bytes
    pub static ref BLOB_A: Bytes = vec![0x00, 0x01].into();
    pub static ref BLOB_A_DIGEST: Digest = DigestFunction::Sha256.compute(&BLOB_A);

    // 1MB
    pub static ref BLOB_B: Bytes = (0..255).collect::<Vec<u8>>().repeat(4 * 1024).into();
    pub static ref BLOB_B_DIGEST: Digest = DigestFunction::Sha256.compute(&BLOB_B);

    // Directories
    pub static ref DIRECTORY_WITH_KEEP: proto::Directory = proto::Directory {
        files: vec![FileNode {
            name: ".keep".to_string(),
            digest: Some((&*EMPTY_BLOB_DIGEST).into()),
            is_executable: false,
        }],
        directories: vec![],
        symlinks: vec![],
    };
    pub static ref DIRECTORY_COMPLICATED: proto::Directory = proto::Directory {
        files: vec![FileNode {
            name: ".keep".to_string(),
            digest: Some((&*EMPTY_BLOB_DIGEST).into()),
            is_executable: false,
        }],
        directories: vec![DirectoryNode {
            name: "keep".to_string(),
            digest: Some((&DIRECTORY_WITH_KEEP.digest(DigestFunction::Sha256)).into()),
        }],
        symlinks: vec![SymlinkNode {
            name: "aa".to_string(),
            target: "/nix/store/somewhereelse".to_string(),
        }],
    };
    pub static ref DIRECTORY_WITH_BLOBS: proto::Directory = proto::Directory {
        files: vec![
            FileNode {
                name: "a".to_string(),
                digest: Some((&*BLOB_A_DIGEST).into()),
                is_executable: true,
            },
            FileNode {
                name: "b".to_string(),
                digest: Some((&*BLOB_B_DIGEST).into()),
                is_executable: false,
            },
        ],
        ..Default::default()
    };

    // Trees
    pub static ref TREE_COMPLICATED: proto::Tree = proto::Tree {
        root: Some(DIRECTORY_COMPLICATED.clone()),
        children: vec![DIRECTORY_WITH_KEEP.clone()],
    };
    /// A tree using [DIRECTORY_WITH_BLOBS] at two places.
    pub static ref TREE_REUSED_CHILD: proto::Tree = proto::Tree {
        root: Some(proto::Directory {
            directories: vec![
                DirectoryNode {
                    name: "x".to_string(),
                    digest: Some((&DIRECTORY_WITH_BLOBS.digest(DigestFunction::Sha256)).into()),
                },
                DirectoryNode {
                    name: "y".to_string(),
                    digest: Some((&DIRECTORY_WITH_BLOBS.digest(DigestFunction::Sha256)).into()),
                },
            ],
            ..Default::default()
        }),
        children: vec![DIRECTORY_WITH_BLOBS.clone()],
    };
}
