use std::collections::HashMap;

use sieve_core::{Document, Key, Result, ResultList, SIMILARITY_FIELD};

pub const MAPPING_STAGE: &str = "documents";

/// Resolves bare keys to full documents from an in-memory table.
///
/// Fields already on an item win over the table's, so an upstream
/// `similarity` or partial field is never overwritten. Unknown keys pass
/// through unchanged.
#[derive(Debug, Clone)]
pub struct DocumentMap {
    key_field: String,
    table: HashMap<Key, Document>,
}

impl DocumentMap {
    pub fn new(key_field: impl Into<String>, documents: &[Document]) -> Result<Self> {
        let mut map = Self { key_field: key_field.into(), table: HashMap::new() };
        map.rebind(documents)?;
        Ok(map)
    }

    /// Replace the lookup table. On a schema error the old table is kept.
    pub fn rebind(&mut self, documents: &[Document]) -> Result<()> {
        let mut table = HashMap::with_capacity(documents.len());
        for document in documents {
            table.insert(Key::of(document, &self.key_field, MAPPING_STAGE)?, document.clone());
        }
        self.table = table;
        Ok(())
    }

    pub fn key_field(&self) -> &str { &self.key_field }

    pub fn len(&self) -> usize { self.table.len() }

    pub fn is_empty(&self) -> bool { self.table.is_empty() }

    pub fn apply(&self, list: &ResultList) -> ResultList {
        let mut out = list.clone();
        for item in out.iter_mut() {
            let Some(document) = self.table.get(item.key()) else { continue };
            for (field, value) in document {
                if field != SIMILARITY_FIELD && !item.fields.contains_key(field) {
                    item.fields.insert(field.clone(), value.clone());
                }
            }
        }
        out
    }
}
