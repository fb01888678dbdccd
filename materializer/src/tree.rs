//! Expansion of declared outputs into flat lists of filesystem steps.
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use prost::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::blobfetcher::BlobFetcher;
use crate::download::{fetch_verified, DownloadTask};
use crate::model::{ActionResult, DirectoryContents, DirectoryListing, OutputFile};
use crate::path_resolver::{push_relative, PathResolver, PathSecurityError};
use crate::retry::RetryPolicy;
use crate::symlink::SymlinkStep;
use crate::{proto, Digest, DigestFunction, Error, StdStreams};

/// An output directory described by a tree digest, whose contents are only
/// known once the tree descriptor has been fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTree {
    pub path: PathBuf,
    pub digest: Digest,
}

impl PendingTree {
    /// Fetches and decodes the tree descriptor, and returns the steps
    /// materializing its contents.
    #[instrument(skip_all, fields(path=?self.path, tree.digest=%self.digest), err)]
    pub async fn expand(
        &self,
        fetcher: &dyn BlobFetcher,
        digest_function: DigestFunction,
        retry: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<Plan, Error> {
        let data = fetch_verified(
            fetcher,
            &self.digest,
            &self.path,
            digest_function,
            retry,
            cancel,
        )
        .await?;

        let tree = proto::Tree::decode(data).map_err(|e| Error::InvalidTree {
            path: self.path.clone(),
            digest: self.digest.clone(),
            reason: e.to_string(),
        })?;

        let mut plan = Plan::default();
        plan.add_tree(&self.path, &self.digest, &tree, digest_function)?;

        debug!(
            directories = plan.directories.len(),
            files = plan.downloads.len(),
            symlinks = plan.symlinks.len(),
            "expanded tree"
        );

        Ok(plan)
    }
}

/// Everything that needs to happen on the local filesystem.
///
/// Directories are created first, as all other steps may depend on them.
/// Symlinks are created last. Pending trees produce another [Plan] once
/// expanded.
#[derive(Debug, Default)]
pub struct Plan {
    pub directories: BTreeSet<PathBuf>,
    pub downloads: Vec<DownloadTask>,
    pub symlinks: Vec<SymlinkStep>,
    pub trees: Vec<PendingTree>,
}

impl Plan {
    /// Resolves all declared paths of an action result, and expands all
    /// inline directory listings.
    /// Nothing is fetched, so path security errors surface before any
    /// fetch is made.
    pub fn for_action_result<R>(
        action_result: &ActionResult,
        resolver: &R,
        std_streams: &StdStreams,
        digest_function: DigestFunction,
    ) -> Result<Self, Error>
    where
        R: PathResolver + ?Sized,
    {
        let mut plan = Plan::default();

        for file in &action_result.output_files {
            let path = resolver.resolve(&file.path)?;
            plan.add_file(path, file);
        }

        for directory in &action_result.output_directories {
            let path = resolver.resolve(&directory.path)?;
            match &directory.contents {
                DirectoryContents::Tree(digest) => {
                    plan.directories.insert(path.clone());
                    plan.trees.push(PendingTree {
                        path,
                        digest: digest.clone(),
                    });
                }
                DirectoryContents::Listing(listing) => plan.add_listing(path, listing)?,
            }
        }

        for symlink in &action_result.output_symlinks {
            let path = resolver.resolve(&symlink.path)?;
            plan.add_parent(&path);
            plan.symlinks
                .push(SymlinkStep::new(path, symlink.target.clone()));
        }

        // Captured streams go to caller-provided paths, whose parents are
        // expected to exist.
        let streams = [
            (
                &std_streams.stdout,
                &action_result.stdout_digest,
                &action_result.stdout_raw,
            ),
            (
                &std_streams.stderr,
                &action_result.stderr_digest,
                &action_result.stderr_raw,
            ),
        ];
        for (dest, digest, raw) in streams {
            let Some(dest) = dest else { continue };
            let digest = match (digest, raw) {
                (Some(digest), _) => digest.clone(),
                (None, Some(raw)) => digest_function.compute(raw),
                (None, None) => continue,
            };

            plan.downloads
                .push(DownloadTask::new(digest, dest, false).with_contents(raw.clone()));
        }

        Ok(plan)
    }

    fn add_parent(&mut self, path: &Path) {
        if let Some(parent) = path.parent() {
            self.directories.insert(parent.to_path_buf());
        }
    }

    fn add_file(&mut self, path: PathBuf, file: &OutputFile) {
        self.add_parent(&path);
        self.downloads.push(
            DownloadTask::new(file.digest.clone(), path, file.is_executable)
                .with_contents(file.contents.clone()),
        );
    }

    /// Adds a directory described by an inline listing, with all of its
    /// contents, at `path`.
    fn add_listing(&mut self, path: PathBuf, listing: &DirectoryListing) -> Result<(), Error> {
        for file in &listing.files {
            let file_path = listing_child_path(&path, &file.path)?;
            self.add_file(file_path, file);
        }

        for directory in &listing.directories {
            let directory_path = listing_child_path(&path, &directory.path)?;
            self.add_parent(&directory_path);
            match &directory.contents {
                DirectoryContents::Tree(digest) => {
                    self.directories.insert(directory_path.clone());
                    self.trees.push(PendingTree {
                        path: directory_path,
                        digest: digest.clone(),
                    });
                }
                DirectoryContents::Listing(listing) => {
                    self.add_listing(directory_path, listing)?
                }
            }
        }

        for symlink in &listing.symlinks {
            let symlink_path = listing_child_path(&path, &symlink.path)?;
            self.add_parent(&symlink_path);
            self.symlinks
                .push(SymlinkStep::new(symlink_path, symlink.target.clone()));
        }

        self.directories.insert(path);
        Ok(())
    }

    /// Adds the contents of a decoded tree descriptor, rooted at `path`.
    /// Directories referenced from multiple places are expanded at each.
    fn add_tree(
        &mut self,
        path: &Path,
        tree_digest: &Digest,
        tree: &proto::Tree,
        digest_function: DigestFunction,
    ) -> Result<(), Error> {
        let invalid = |reason: String| Error::InvalidTree {
            path: path.to_path_buf(),
            digest: tree_digest.clone(),
            reason,
        };
        let node_digest = |name: &str, digest: Option<&proto::Digest>| {
            let digest = digest.ok_or_else(|| invalid(format!("{} has no digest", name)))?;
            Digest::try_from(digest).map_err(|e| invalid(format!("{}: {}", name, e)))
        };

        let root = tree
            .root
            .as_ref()
            .ok_or_else(|| invalid("tree has no root directory".to_string()))?;

        let children: HashMap<Digest, &proto::Directory> = tree
            .children
            .iter()
            .map(|directory| (directory.digest(digest_function), directory))
            .collect();

        let mut stack = vec![(path.to_path_buf(), root)];
        while let Some((directory_path, directory)) = stack.pop() {
            for file in &directory.files {
                let file_path = tree_child_path(&directory_path, &file.name)?;
                let digest = node_digest(&file.name, file.digest.as_ref())?;
                self.downloads
                    .push(DownloadTask::new(digest, file_path, file.is_executable));
            }

            for node in &directory.directories {
                let child_path = tree_child_path(&directory_path, &node.name)?;
                let digest = node_digest(&node.name, node.digest.as_ref())?;
                let child = children.get(&digest).ok_or_else(|| {
                    invalid(format!("directory {} ({}) not found in tree", node.name, digest))
                })?;

                stack.push((child_path, *child));
            }

            for symlink in &directory.symlinks {
                let symlink_path = tree_child_path(&directory_path, &symlink.name)?;
                self.symlinks
                    .push(SymlinkStep::new(symlink_path, symlink.target.clone()));
            }

            self.directories.insert(directory_path);
        }

        Ok(())
    }
}

/// Paths inside inline listings are relative, and may span multiple
/// components.
fn listing_child_path(base: &Path, rel: &str) -> Result<PathBuf, PathSecurityError> {
    let mut path = base.to_path_buf();
    push_relative(&mut path, rel, false)?;
    Ok(path)
}

/// Names inside tree descriptors are single path components.
fn tree_child_path(base: &Path, name: &str) -> Result<PathBuf, PathSecurityError> {
    validate_node_name(name)?;
    Ok(base.join(name))
}

fn validate_node_name(name: &str) -> Result<(), PathSecurityError> {
    if name.is_empty() || name == ".." || name == "." || name.contains('\0') || name.contains('/')
    {
        Err(PathSecurityError {
            path: PathBuf::from(name),
            reason: "invalid node name",
        })
    } else {
        Ok(())
    }
}
