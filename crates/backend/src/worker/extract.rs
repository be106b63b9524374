//! Searchable text and metadata extraction for changed files.

use std::{path::Path, sync::LazyLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::watcher::extension;

const MARKDOWN_EXTENSIONS: &[&str] = &["md", "markdown", "mdx"];

const BINARY_EXTENSIONS: &[&str] = &[
  "png", "jpg", "jpeg", "gif", "webp", "bmp", "ico", "tif", "tiff", "pdf", "zip", "tar", "gz", "tgz", "bz2", "xz",
  "7z", "rar", "mp3", "mp4", "m4a", "mov", "avi", "mkv", "wav", "ogg", "flac", "woff", "woff2", "ttf", "otf", "eot",
  "exe", "dll", "so", "dylib", "bin", "iso", "psd", "doc", "docx", "xls", "xlsx", "ppt", "pptx",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
  Markdown,
  Json,
  Text,
  Binary,
}

/// What the Content Processor derived from one file.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
  pub kind: FileKind,
  /// Raw text to cache; `None` for binary files and stubs
  pub content: Option<String>,
  /// Plain text handed to the search index
  pub text: String,
  pub metadata: Value,
}

/// Read `path` and derive cacheable content, searchable text and metadata.
///
/// Files larger than `max_bytes` are not read; they reduce to a metadata stub.
pub async fn extract(path: &Path, rel_path: &str, max_bytes: u64) -> std::io::Result<Extracted> {
  let fs_meta = tokio::fs::metadata(path).await?;
  if fs_meta.is_dir() {
    return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, "path is a directory"));
  }
  let size = fs_meta.len();
  let modified = fs_meta.modified().ok().map(|t| DateTime::<Utc>::from(t).to_rfc3339());
  let ext = extension(rel_path);
  let stem = file_stem(rel_path);

  let stub = |kind: FileKind| Extracted {
    kind,
    content: None,
    text: searchable_name(rel_path),
    metadata: json!({
      "size": size,
      "modified": modified,
      "extension": ext,
      "kind": kind,
      "title": stem,
      "wordCount": 0,
      "stub": true,
    }),
  };

  let by_extension = ext.as_deref().is_some_and(|e| BINARY_EXTENSIONS.contains(&e));
  if by_extension {
    return Ok(stub(FileKind::Binary));
  }
  if size > max_bytes {
    return Ok(stub(kind_for(ext.as_deref())));
  }

  let bytes = tokio::fs::read(path).await?;
  let hash = hex::encode(Sha256::digest(&bytes));

  let raw = match String::from_utf8(bytes) {
    Ok(raw) if !raw.contains('\0') => raw,
    _ => {
      let mut extracted = stub(FileKind::Binary);
      extracted.metadata["hash"] = json!(hash);
      return Ok(extracted);
    }
  };

  let (kind, text, title) = match kind_for(ext.as_deref()) {
    FileKind::Markdown => {
      let title = markdown_title(&raw);
      (FileKind::Markdown, strip_markdown(&raw), title)
    }
    FileKind::Json => match serde_json::from_str::<Value>(&raw) {
      Ok(value) => {
        let pretty = serde_json::to_string_pretty(&value).unwrap_or_else(|_| raw.clone());
        let title = value.get("title").and_then(Value::as_str).map(str::to_string);
        (FileKind::Json, pretty, title)
      }
      Err(_) => (FileKind::Text, raw.clone(), None),
    },
    _ => (FileKind::Text, raw.clone(), None),
  };

  Ok(Extracted {
    kind,
    metadata: json!({
      "size": size,
      "modified": modified,
      "extension": ext,
      "kind": kind,
      "title": title.unwrap_or(stem),
      "hash": hash,
      "wordCount": text.split_whitespace().count(),
    }),
    content: Some(raw),
    text,
  })
}

fn kind_for(ext: Option<&str>) -> FileKind {
  match ext {
    Some(e) if MARKDOWN_EXTENSIONS.contains(&e) => FileKind::Markdown,
    Some("json") => FileKind::Json,
    Some(e) if BINARY_EXTENSIONS.contains(&e) => FileKind::Binary,
    _ => FileKind::Text,
  }
}

fn file_stem(rel_path: &str) -> String {
  let name = rel_path.rsplit('/').next().unwrap_or(rel_path);
  match name.rsplit_once('.') {
    Some((stem, _)) if !stem.is_empty() => stem.to_string(),
    _ => name.to_string(),
  }
}

/// Stubs stay findable by their name.
fn searchable_name(rel_path: &str) -> String {
  file_stem(rel_path).replace(['-', '_', '.'], " ")
}

// ============================================================================
// Markdown
// ============================================================================

static FRONT_MATTER: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"(?s)\A---\r?\n(.*?)\r?\n---[ \t]*(\r?\n|\z)").expect("front matter pattern")
});
static FRONT_MATTER_TITLE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r#"(?m)^title:\s*["']?(.+?)["']?\s*$"#).expect("front matter title pattern"));
static HEADING: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"(?m)^#{1,6}[ \t]+(.+?)[ \t#]*$").expect("heading pattern"));

/// Ordered rewrite rules; each keeps the text and drops the syntax.
static MARKDOWN_RULES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
  [
    // code fences (the code itself stays)
    (r"(?m)^[ \t]*(```|~~~).*$", ""),
    // table separator rows
    (r"(?m)^[ \t]*\|?[ \t]*:?-{3,}:?[ \t]*(\|[ \t]*:?-{3,}:?[ \t]*)*\|?[ \t]*$", ""),
    // reference definitions
    (r"(?m)^[ \t]*\[[^\]]+\]:.*$", ""),
    // images and links keep alt / label text
    (r"!\[([^\]]*)\]\([^)]*\)", "$1"),
    (r"\[([^\]]+)\]\([^)]*\)", "$1"),
    (r"\[([^\]]+)\]\[[^\]]*\]", "$1"),
    // html tags
    (r"</?[A-Za-z][^>]*>", ""),
    (r"<!--(?s:.*?)-->", ""),
    // block markers
    (r"(?m)^[ \t]*#{1,6}[ \t]+", ""),
    (r"(?m)^[ \t]*>[ \t]?", ""),
    (r"(?m)^[ \t]*([-*_][ \t]*){3,}$", ""),
    (r"(?m)^[ \t]*([-*+]|\d+[.)])[ \t]+(\[[ xX]\][ \t]+)?", ""),
    // inline markers
    (r"`([^`]*)`", "$1"),
    (r"\*\*([^*]+)\*\*", "$1"),
    (r"__([^_]+)__", "$1"),
    (r"\*([^*\s][^*]*)\*", "$1"),
    (r"\b_([^_]+)_\b", "$1"),
    (r"~~([^~]+)~~", "$1"),
    (r"\|", " "),
  ]
  .into_iter()
  .map(|(pattern, replacement)| (Regex::new(pattern).expect("markdown rule pattern"), replacement))
  .collect()
});

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern"));

/// Plain text of a markdown document.
pub fn strip_markdown(src: &str) -> String {
  let mut text = FRONT_MATTER.replace(src, "").into_owned();

  for (re, replacement) in MARKDOWN_RULES.iter() {
    text = re.replace_all(&text, *replacement).into_owned();
  }

  WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

/// Front-matter `title`, else the first heading.
pub fn markdown_title(src: &str) -> Option<String> {
  if let Some(front) = FRONT_MATTER.captures(src)
    && let Some(title) = FRONT_MATTER_TITLE.captures(&front[1]).map(|c| c[1].trim().to_string())
    && !title.is_empty()
  {
    return Some(title);
  }

  let body = FRONT_MATTER.replace(src, "");
  HEADING
    .captures(&body)
    .map(|c| strip_markdown(&c[1]))
    .filter(|t| !t.is_empty())
}
