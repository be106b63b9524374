//! Search collaborator.
//!
//! The Search Processor only needs `add` and `remove`; `search` backs the query
//! endpoint. Documents are keyed `{scope}:{identity}:{path}`.

use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

use crate::domain::keys::{Owner, Scope, search_id};

const DEFAULT_LIMIT: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
  #[error("Invalid search query: {0}")]
  InvalidQuery(String),
  #[error("Document id '{id}' does not match its owner and path (expected '{expected}')")]
  MismatchedId { id: String, expected: String },
}

/// A document handed to the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchDocument {
  pub id: String,
  pub scope: Scope,
  pub identity: String,
  pub path: String,
  pub text: String,
  pub metadata: Value,
}

impl SearchDocument {
  pub fn new(owner: &Owner, path: impl Into<String>, text: impl Into<String>, metadata: Value) -> Self {
    let path = path.into();
    Self {
      id: owner.search_id(&path),
      scope: owner.scope,
      identity: owner.identity.clone(),
      path,
      text: text.into(),
      metadata,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchQuery {
  #[serde(rename = "q")]
  pub text: String,
  pub scope: Option<Scope>,
  /// Matches identities starting with this value
  pub identity: Option<String>,
  pub limit: Option<usize>,
}

impl SearchQuery {
  pub fn new(text: impl Into<String>) -> Self {
    Self {
      text: text.into(),
      ..Default::default()
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
  pub id: String,
  pub scope: Scope,
  pub identity: String,
  pub path: String,
  /// Number of distinct query terms found in the document
  pub score: usize,
  pub metadata: Value,
}

#[async_trait]
pub trait SearchIndex: Send + Sync {
  fn name(&self) -> &str;

  /// Insert or replace the document with `doc.id`.
  async fn add(&self, doc: SearchDocument) -> Result<(), SearchError>;

  /// Remove a document; returns whether it existed.
  async fn remove(&self, id: &str) -> Result<bool, SearchError>;

  async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>, SearchError>;

  fn len(&self) -> usize;

  fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// Lower-cased alphanumeric terms of `text`.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
  text
    .split(|c: char| !c.is_alphanumeric())
    .filter(|t| !t.is_empty())
    .map(|t| t.to_lowercase())
}

// ============================================================================
// In-memory index
// ============================================================================

struct Indexed {
  doc: SearchDocument,
  terms: HashSet<String>,
}

#[derive(Default)]
pub struct MemorySearchIndex {
  docs: DashMap<String, Indexed>,
}

impl MemorySearchIndex {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn shared() -> Arc<dyn SearchIndex> {
    Arc::new(Self::new())
  }

  pub fn get(&self, id: &str) -> Option<SearchDocument> {
    self.docs.get(id).map(|entry| entry.doc.clone())
  }
}

#[async_trait]
impl SearchIndex for MemorySearchIndex {
  fn name(&self) -> &str {
    "memory"
  }

  async fn add(&self, doc: SearchDocument) -> Result<(), SearchError> {
    let expected = search_id(doc.scope, &doc.identity, &doc.path);
    if doc.id != expected {
      return Err(SearchError::MismatchedId { id: doc.id, expected });
    }
    let mut terms: HashSet<String> = tokenize(&doc.text).collect();
    terms.extend(tokenize(&doc.path));
    trace!(id = %doc.id, terms = terms.len(), "Indexed document");
    self.docs.insert(doc.id.clone(), Indexed { doc, terms });
    Ok(())
  }

  async fn remove(&self, id: &str) -> Result<bool, SearchError> {
    let existed = self.docs.remove(id).is_some();
    trace!(id, existed, "Removed document");
    Ok(existed)
  }

  async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>, SearchError> {
    if query.limit == Some(0) {
      return Err(SearchError::InvalidQuery("limit must be at least 1".to_string()));
    }
    let wanted: HashSet<String> = tokenize(&query.text).collect();
    if wanted.is_empty() {
      return Ok(Vec::new());
    }

    let mut hits: Vec<SearchHit> = self
      .docs
      .iter()
      .filter(|entry| query.scope.is_none_or(|scope| entry.doc.scope == scope))
      .filter(|entry| {
        query
          .identity
          .as_deref()
          .is_none_or(|prefix| entry.doc.identity.starts_with(prefix))
      })
      .filter_map(|entry| {
        let score = wanted.iter().filter(|t| entry.terms.contains(*t)).count();
        (score > 0).then(|| SearchHit {
          id: entry.doc.id.clone(),
          scope: entry.doc.scope,
          identity: entry.doc.identity.clone(),
          path: entry.doc.path.clone(),
          score,
          metadata: entry.doc.metadata.clone(),
        })
      })
      .collect();

    hits.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
    hits.truncate(query.limit.unwrap_or(DEFAULT_LIMIT));
    Ok(hits)
  }

  fn len(&self) -> usize {
    self.docs.len()
  }
}
