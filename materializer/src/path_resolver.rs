//! Mapping of declared output paths to local filesystem paths.
use std::path::{Component, Path, PathBuf};

/// A declared output path that may not be materialized, because it would
/// end up outside the output root.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("refusing to materialize {path:?}: {reason}")]
pub struct PathSecurityError {
    pub path: PathBuf,
    pub reason: &'static str,
}

/// Maps declared output paths, as found in an action result, to validated
/// local absolute paths.
///
/// Implementations must be safe to call concurrently, and must not touch the
/// filesystem. Any checks against the filesystem are done by the
/// materializer itself.
pub trait PathResolver: Send + Sync {
    /// The root all outputs are materialized below.
    fn execution_root(&self) -> &Path;

    /// Returns the local path for a declared output path, or an error if
    /// the declared path escapes the output root.
    fn resolve(&self, declared_path: &str) -> Result<PathBuf, PathSecurityError>;
}

impl<A> PathResolver for A
where
    A: AsRef<dyn PathResolver> + Send + Sync,
{
    fn execution_root(&self) -> &Path {
        self.as_ref().execution_root()
    }

    fn resolve(&self, declared_path: &str) -> Result<PathBuf, PathSecurityError> {
        self.as_ref().resolve(declared_path)
    }
}

/// Resolves declared paths relative to an execution root, and an optional
/// working directory below it.
///
/// Absolute paths and paths containing `..` are rejected.
#[derive(Debug, Clone)]
pub struct ExecRootPathResolver {
    execution_root: PathBuf,
    working_directory: PathBuf,
}

impl ExecRootPathResolver {
    pub fn new(execution_root: impl Into<PathBuf>) -> Self {
        let execution_root = execution_root.into();
        Self {
            working_directory: execution_root.clone(),
            execution_root,
        }
    }

    /// Declared paths are resolved relative to `working_directory`, which is
    /// itself relative to the execution root.
    pub fn with_working_directory(
        execution_root: impl Into<PathBuf>,
        working_directory: &str,
    ) -> Result<Self, PathSecurityError> {
        let execution_root = execution_root.into();
        let mut resolved = execution_root.clone();
        push_relative(&mut resolved, working_directory, true)?;

        Ok(Self {
            execution_root,
            working_directory: resolved,
        })
    }
}

impl PathResolver for ExecRootPathResolver {
    fn execution_root(&self) -> &Path {
        &self.execution_root
    }

    fn resolve(&self, declared_path: &str) -> Result<PathBuf, PathSecurityError> {
        let mut resolved = self.working_directory.clone();
        push_relative(&mut resolved, declared_path, false)?;
        Ok(resolved)
    }
}

/// Appends the relative path `rel` to `base`, only accepting plain path
/// components (and `.`).
pub(crate) fn push_relative(
    base: &mut PathBuf,
    rel: &str,
    allow_empty: bool,
) -> Result<(), PathSecurityError> {
    let err = |reason| PathSecurityError {
        path: PathBuf::from(rel),
        reason,
    };

    if rel.contains('\0') {
        return Err(err("path contains a null byte"));
    }

    let mut pushed = 0;
    for component in Path::new(rel).components() {
        match component {
            Component::Normal(c) => {
                base.push(c);
                pushed += 1;
            }
            Component::CurDir => {}
            Component::ParentDir => return Err(err("path contains a parent directory traversal")),
            Component::RootDir | Component::Prefix(_) => return Err(err("path is absolute")),
        }
    }

    if pushed == 0 && !allow_empty {
        return Err(err("path is empty"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use rstest::rstest;

    use super::{ExecRootPathResolver, PathResolver};

    #[rstest]
    #[case::simple("bazel-out/k8/bin/foo", Some("/exec/bazel-out/k8/bin/foo"))]
    #[case::curdir("./foo/./bar", Some("/exec/foo/bar"))]
    #[case::trailing_slash("foo/", Some("/exec/foo"))]
    #[case::parent_traversal("foo/../../etc/passwd", None)]
    #[case::leading_parent("../foo", None)]
    #[case::absolute("/etc/passwd", None)]
    #[case::empty("", None)]
    #[case::only_curdir(".", None)]
    #[case::null_byte("foo\0bar", None)]
    fn resolve(#[case] declared: &str, #[case] expected: Option<&str>) {
        let resolver = ExecRootPathResolver::new("/exec");

        match expected {
            Some(expected) => assert_eq!(
                PathBuf::from(expected),
                resolver.resolve(declared).expect("must resolve")
            ),
            None => {
                let e = resolver.resolve(declared).expect_err("must be rejected");
                assert_eq!(PathBuf::from(declared), e.path);
            }
        }
    }

    #[test]
    fn working_directory() {
        let resolver =
            ExecRootPathResolver::with_working_directory("/exec", "pkg/sub").expect("valid");

        assert_eq!(Path::new("/exec"), resolver.execution_root());
        assert_eq!(
            PathBuf::from("/exec/pkg/sub/out.txt"),
            resolver.resolve("out.txt").expect("must resolve")
        );
        assert!(resolver.resolve("../out.txt").is_err());
        assert!(ExecRootPathResolver::with_working_directory("/exec", "../x").is_err());
    }
}
