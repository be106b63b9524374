//! Attribution and classification of changed paths.
//!
//! A path is attributed to an owner by its position under a watched root:
//! `{personal_root}/{username}/...` belongs to that user, and
//! `{spaces_root}/{space}/...` to that space. Paths outside any root are not
//! part of the pipeline.

use std::{
  collections::HashMap,
  path::{Component, Path, PathBuf},
};

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use tracing::{debug, warn};

use super::WatcherError;
use crate::domain::keys::{Owner, Priority, Scope};

/// Patterns ignored under every root.
const DEFAULT_IGNORES: &[&str] = &[
  ".git/",
  ".svn/",
  ".hg/",
  ".DS_Store",
  "Thumbs.db",
  "desktop.ini",
  "*.swp",
  "*.swo",
  "*~",
  "*.tmp",
  "*.temp",
  ".~lock.*#",
  "~$*",
  "*.lock",
  "*.crdownload",
  "*.part",
];

/// Per-root ignore file, in gitignore syntax.
pub const IGNORE_FILE: &str = ".docsyncignore";

const HIGH_EXTENSIONS: &[&str] = &["json", "yaml", "yml", "toml", "ini", "conf"];
const TEMPLATE_DIRS: &[&str] = &["templates", ".templates"];

const LOW_EXTENSIONS: &[&str] = &[
  "log", "png", "jpg", "jpeg", "gif", "webp", "bmp", "ico", "tif", "tiff", "svg", "pdf", "zip", "tar", "gz", "tgz",
  "bz2", "xz", "7z", "rar", "mp3", "mp4", "m4a", "mov", "avi", "mkv", "wav", "ogg", "flac", "woff", "woff2", "ttf",
  "otf", "eot", "exe", "dll", "so", "dylib", "bin", "dat", "iso", "psd", "doc", "docx", "xls", "xlsx", "ppt", "pptx",
];

/// Priority of a change by file role.
///
/// Configuration, templates and JSON are high; binary assets and logs are low;
/// everything else (markdown included) is medium.
pub fn classify_priority(rel_path: &str) -> Priority {
  let mut components = rel_path.split('/').filter(|c| !c.is_empty());
  let in_templates = components.any(|c| TEMPLATE_DIRS.contains(&c));
  let ext = extension(rel_path);

  if in_templates || ext.as_deref().is_some_and(|e| HIGH_EXTENSIONS.contains(&e)) {
    Priority::High
  } else if ext.as_deref().is_some_and(|e| LOW_EXTENSIONS.contains(&e)) {
    Priority::Low
  } else {
    Priority::Medium
  }
}

/// Lower-cased extension of the last path component.
pub fn extension(path: &str) -> Option<String> {
  let name = path.rsplit('/').next()?;
  let (stem, ext) = name.rsplit_once('.')?;
  (!stem.is_empty() && !ext.is_empty()).then(|| ext.to_lowercase())
}

// ============================================================================
// Roots
// ============================================================================

/// Owner and relative location of a changed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribution {
  pub owner: Owner,
  /// Path relative to the owner directory, `/`-separated
  pub rel_path: String,
  pub space_access: Option<String>,
}

/// One watched root and its ignore rules.
pub struct WatchRoot {
  pub path: PathBuf,
  pub scope: Scope,
  ignore: Gitignore,
}

impl WatchRoot {
  pub fn new(path: &Path, scope: Scope, extra_ignores: &[String]) -> Result<Self, WatcherError> {
    let path = std::fs::canonicalize(path).map_err(|source| WatcherError::Root {
      path: path.to_path_buf(),
      source,
    })?;
    let ignore = build_ignore(&path, extra_ignores)?;
    Ok(Self { path, scope, ignore })
  }

  /// Whether `path` (under this root) or one of its parents is ignored.
  pub fn is_ignored(&self, path: &Path, is_dir: bool) -> bool {
    path.starts_with(&self.path) && self.ignore.matched_path_or_any_parents(path, is_dir).is_ignore()
  }
}

/// All watched roots plus the space access table.
pub struct Roots {
  roots: Vec<WatchRoot>,
  space_access: HashMap<String, String>,
}

impl Roots {
  pub fn new(roots: Vec<WatchRoot>, space_access: HashMap<String, String>) -> Self {
    Self { roots, space_access }
  }

  pub fn iter(&self) -> impl Iterator<Item = &WatchRoot> {
    self.roots.iter()
  }

  pub fn is_empty(&self) -> bool {
    self.roots.is_empty()
  }

  pub fn root_of(&self, path: &Path) -> Option<&WatchRoot> {
    self.roots.iter().find(|r| path.starts_with(&r.path))
  }

  pub fn is_ignored(&self, path: &Path, is_dir: bool) -> bool {
    self.root_of(path).is_some_and(|r| r.is_ignored(path, is_dir))
  }

  /// Attribute `path` to its owner. `None` for paths outside every root and for
  /// the root or owner directories themselves.
  pub fn attribute(&self, path: &Path) -> Option<Attribution> {
    let root = self.root_of(path)?;
    let rel = path.strip_prefix(&root.path).ok()?;

    let mut parts = rel.components().filter_map(|c| match c {
      Component::Normal(s) => s.to_str(),
      _ => None,
    });
    let identity = parts.next()?;
    let rel_path = parts.collect::<Vec<_>>().join("/");
    if rel_path.is_empty() {
      return None;
    }

    let (owner, space_access) = match root.scope {
      Scope::Personal => (Owner::personal(identity), None),
      Scope::Git => (Owner::space(identity), self.space_access.get(identity).cloned()),
    };

    Some(Attribution {
      owner,
      rel_path,
      space_access,
    })
  }
}

/// Build the ignore matcher for `root`: built-in patterns, the root's
/// `.docsyncignore`, then configured extras.
fn build_ignore(root: &Path, extra_ignores: &[String]) -> Result<Gitignore, WatcherError> {
  let mut builder = GitignoreBuilder::new(root);

  for pattern in DEFAULT_IGNORES {
    if let Err(e) = builder.add_line(None, pattern) {
      warn!(pattern, error = %e, "Invalid built-in ignore pattern");
    }
  }

  let ignore_file = root.join(IGNORE_FILE);
  if ignore_file.exists()
    && let Some(err) = builder.add(&ignore_file)
  {
    warn!(error = %err, "Error parsing {}, continuing with partial rules", IGNORE_FILE);
  }

  for pattern in extra_ignores {
    if let Err(e) = builder.add_line(None, pattern) {
      warn!(pattern = %pattern, error = %e, "Invalid ignore pattern in config");
    }
  }

  let ignore = builder.build().map_err(WatcherError::Ignore)?;
  debug!(root = %root.display(), rules = ignore.num_ignores(), "Ignore matcher built");
  Ok(ignore)
}
