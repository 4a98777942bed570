use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;

use crate::TransferError;

/// What to do with an absolute path supplied by a client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbsolutePathPolicy {
    /// Treat `/a/b` as `a/b` under the root.
    #[default]
    Rebase,
    /// Refuse absolute paths outright.
    Reject,
}

/// A path that has been resolved and confirmed to lie under the allowed root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValidatedPath(PathBuf);

impl ValidatedPath {
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }
}

impl AsRef<Path> for ValidatedPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for ValidatedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Confines client-supplied paths to a single root directory.
///
/// Symlinks are resolved before the containment check, so a link inside the
/// root pointing elsewhere is rejected like any other escape.
#[derive(Debug, Clone)]
pub struct PathValidator {
    root: PathBuf,
    policy: AbsolutePathPolicy,
}

impl PathValidator {
    /// Creates a validator for `root`, which must be an existing directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, TransferError> {
        let root = root.as_ref();
        let canonical = root.canonicalize().map_err(|e| {
            TransferError::InvalidPath(format!("root {}: {e}", root.display()))
        })?;
        if !canonical.is_dir() {
            return Err(TransferError::InvalidPath(format!(
                "root {} is not a directory",
                root.display()
            )));
        }
        Ok(Self {
            root: canonical,
            policy: AbsolutePathPolicy::default(),
        })
    }

    pub fn with_policy(mut self, policy: AbsolutePathPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Canonical root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn policy(&self) -> AbsolutePathPolicy {
        self.policy
    }

    /// Resolves `raw` against the root and checks it stays inside.
    ///
    /// The target does not need to exist; missing trailing components are
    /// resolved relative to their nearest existing ancestor.
    pub fn validate(&self, raw: &str) -> Result<ValidatedPath, TransferError> {
        let relative = self.clean(raw)?;
        let candidate = self.root.join(&relative);
        let resolved = resolve(&candidate, raw)?;
        self.confine(resolved, raw)
    }

    /// Expands a source pattern into the regular files it names.
    ///
    /// A directory expands to every regular file beneath it. A pattern may
    /// use `*` and `?` in any component; matched directories are expanded
    /// the same way. Symlinks found while walking are skipped. The result is
    /// sorted and never empty.
    pub fn expand_sources(&self, pattern: &str) -> Result<Vec<ValidatedPath>, TransferError> {
        if !has_wildcard(pattern) {
            let path = self.validate(pattern)?;
            let mut files = Vec::new();
            match std::fs::metadata(path.as_path()) {
                Ok(meta) if meta.is_dir() => self.collect_files(path.as_path(), &mut files)?,
                Ok(meta) if meta.is_file() => files.push(path),
                Ok(_) => {
                    return Err(TransferError::InvalidPath(format!(
                        "{pattern} is not a regular file"
                    )));
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(TransferError::NoMatch(pattern.to_string()));
                }
                Err(e) => return Err(e.into()),
            }
            return self.finish(files, pattern);
        }

        let relative = self.clean(pattern)?;
        let mut literal = PathBuf::new();
        let mut parts: Vec<String> = Vec::new();
        for component in relative.components() {
            let name = component.as_os_str().to_string_lossy();
            if parts.is_empty() && !has_wildcard(&name) {
                literal.push(component);
            } else {
                parts.push(name.into_owned());
            }
        }

        let base = resolve(&self.root.join(&literal), pattern)?;
        let base = self.confine(base, pattern)?;
        if !base.as_path().is_dir() {
            return Err(TransferError::NoMatch(pattern.to_string()));
        }

        let depth = parts.len();
        // filter_entry never sees entries cut by min_depth, so depth is
        // checked in the loop instead.
        let walker = WalkDir::new(base.as_path())
            .max_depth(depth)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                let d = entry.depth();
                d == 0 || wildcard_match(&parts[d - 1], &entry.file_name().to_string_lossy())
            });

        let mut files = Vec::new();
        for entry in walker {
            let entry = entry.map_err(io::Error::from)?;
            if entry.depth() != depth {
                continue;
            }
            if entry.path_is_symlink() {
                tracing::debug!(path = %entry.path().display(), "skipping symlink");
                continue;
            }
            let path = entry.into_path();
            if path.is_dir() {
                self.collect_files(&path, &mut files)?;
            } else if path.is_file() && path.starts_with(&self.root) {
                files.push(ValidatedPath(path));
            }
        }
        self.finish(files, pattern)
    }

    fn finish(
        &self,
        mut files: Vec<ValidatedPath>,
        pattern: &str,
    ) -> Result<Vec<ValidatedPath>, TransferError> {
        files.sort();
        files.dedup();
        if files.is_empty() {
            return Err(TransferError::NoMatch(pattern.to_string()));
        }
        Ok(files)
    }

    fn collect_files(&self, dir: &Path, out: &mut Vec<ValidatedPath>) -> Result<(), TransferError> {
        for entry in WalkDir::new(dir).follow_links(false).sort_by_file_name() {
            let entry = entry.map_err(io::Error::from)?;
            if entry.file_type().is_file() {
                out.push(ValidatedPath(entry.into_path()));
            }
        }
        Ok(())
    }

    /// Lexical pass: rejects `..`, drive prefixes and (per policy) absolute
    /// paths, and returns the path relative to the root.
    fn clean(&self, raw: &str) -> Result<PathBuf, TransferError> {
        if raw.is_empty() {
            return Err(TransferError::InvalidPath("empty path".into()));
        }
        if raw.split(['/', '\\']).any(|segment| segment == "..") {
            return Err(TransferError::Traversal(raw.to_string()));
        }

        let mut relative = PathBuf::new();
        for component in Path::new(raw).components() {
            match component {
                Component::Normal(part) => relative.push(part),
                Component::CurDir => {}
                Component::RootDir => {
                    if self.policy == AbsolutePathPolicy::Reject {
                        return Err(TransferError::InvalidPath(format!(
                            "absolute path not allowed: {raw}"
                        )));
                    }
                }
                Component::Prefix(_) => {
                    return Err(TransferError::InvalidPath(format!(
                        "path prefix not allowed: {raw}"
                    )));
                }
                Component::ParentDir => return Err(TransferError::Traversal(raw.to_string())),
            }
        }
        Ok(relative)
    }

    fn confine(&self, resolved: PathBuf, raw: &str) -> Result<ValidatedPath, TransferError> {
        match resolved.strip_prefix(&self.root) {
            Ok(rest) if !rest.components().any(|c| c == Component::ParentDir) => {
                Ok(ValidatedPath(resolved))
            }
            _ => Err(TransferError::OutsideRoot(raw.to_string())),
        }
    }
}

/// Canonicalizes `path`, tolerating missing trailing components.
fn resolve(path: &Path, raw: &str) -> Result<PathBuf, TransferError> {
    let mut tail = Vec::new();
    let mut cursor = path;
    loop {
        match cursor.canonicalize() {
            Ok(mut real) => {
                for part in tail.iter().rev() {
                    real.push(part);
                }
                return Ok(real);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // A link whose target is missing cannot be confined.
                if cursor.symlink_metadata().is_ok() {
                    return Err(TransferError::OutsideRoot(raw.to_string()));
                }
                let (Some(name), Some(parent)) = (cursor.file_name(), cursor.parent()) else {
                    return Err(TransferError::InvalidPath(format!("{raw}: {e}")));
                };
                tail.push(name.to_os_string());
                cursor = parent;
            }
            Err(e) => return Err(TransferError::InvalidPath(format!("{raw}: {e}"))),
        }
    }
}

fn has_wildcard(s: &str) -> bool {
    s.contains(['*', '?'])
}

/// Matches `name` against a pattern where `*` is any run of characters and
/// `?` is exactly one.
pub fn wildcard_match(pattern: &str, name: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let s: Vec<char> = name.chars().collect();
    let (mut pi, mut si) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut resume = 0usize;
    while si < s.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == s[si]) {
            pi += 1;
            si += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            pi += 1;
            resume = si;
        } else if let Some(star_at) = star {
            pi = star_at + 1;
            resume += 1;
            si = resume;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}
