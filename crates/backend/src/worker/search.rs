//! Search Processor - keeps the search collaborator in step with the tree.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{ProcessError, Processor};
use crate::{
  domain::{
    keys::Concern,
    task::{self, SearchAction, SearchTask},
  },
  search::{SearchDocument, SearchIndex},
};

pub struct SearchProcessor {
  index: Arc<dyn SearchIndex>,
}

impl SearchProcessor {
  pub fn new(index: Arc<dyn SearchIndex>) -> Self {
    Self { index }
  }
}

#[async_trait]
impl Processor for SearchProcessor {
  fn concern(&self) -> Concern {
    Concern::SearchIndexing
  }

  async fn process(&self, item: &Value) -> Result<(), ProcessError> {
    let task: SearchTask = task::decode(item.clone())?;
    let owner = task.owner.resolve()?;

    match task.action {
      SearchAction::Index => {
        let doc = SearchDocument::new(
          &owner,
          task.path,
          task.searchable_text.unwrap_or_default(),
          task.metadata.unwrap_or(Value::Null),
        );
        debug!(id = %doc.id, "Indexing document");
        self.index.add(doc).await?;
      }
      SearchAction::Remove => {
        let id = owner.search_id(&task.path);
        let existed = self.index.remove(&id).await?;
        debug!(id = %id, existed, "Removed document");
      }
    }
    Ok(())
  }
}
