//! The buffer of bulk commands shared by both pipeline flavours.

use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::error::StorageResult;
use crate::mapper::Elastic;
use crate::schema::Entity;
use crate::schema::entity::{document_body, extract_source};

const COMMAND_INDEX: &str = "index";
const COMMAND_DELETE: &str = "delete";
const KEY_INDEX: &str = "_index";
const KEY_ID: &str = "_id";
const KEY_ROUTING: &str = "routing";
const KEY_PRIMARY_TERM: &str = "if_primary_term";
const KEY_SEQ_NO: &str = "if_seq_no";

/// Ordered bulk lines: a metadata line per command, followed by the document for writes.
#[derive(Debug, Default)]
pub(crate) struct CommandBuffer {
    lines: Vec<Value>,
    commands: usize,
}

impl CommandBuffer {
    /// Queues an index command. Returns false if the entity has no changes.
    ///
    /// New entities are assigned their id right away. Tokens and snapshot stay untouched
    /// until the flush outcome is applied via [`BulkResult::acknowledge`].
    ///
    /// [`BulkResult::acknowledge`]: super::BulkResult::acknowledge
    pub(crate) fn queue_update<E: Entity>(
        &mut self,
        elastic: &Elastic,
        entity: &mut E,
        force: bool,
    ) -> StorageResult<bool> {
        let descriptor = elastic.descriptor::<E>()?;
        let source = extract_source(&descriptor, entity)?;
        if entity.state().is_loaded() && entity.state().changed_properties(&source).is_empty() {
            return Ok(false);
        }

        let id = match entity.id() {
            Some(id) => id.to_string(),
            None => {
                let id = Uuid::new_v4().to_string();
                entity.state_mut().set_id(id.clone());
                id
            }
        };

        let mut meta = Map::new();
        meta.insert(
            KEY_INDEX.to_string(),
            json!(elastic.determine_write_alias(&descriptor)),
        );
        meta.insert(KEY_ID.to_string(), json!(id));
        if let Some(routing) = elastic.write_routing(&descriptor, &source, "update") {
            meta.insert(KEY_ROUTING.to_string(), json!(routing));
        }
        if let Some(tokens) = elastic.conditional_tokens(&descriptor, entity, force) {
            meta.insert(KEY_PRIMARY_TERM.to_string(), json!(tokens.primary_term));
            meta.insert(KEY_SEQ_NO.to_string(), json!(tokens.seq_no));
        }

        self.lines.push(json!({ COMMAND_INDEX: meta }));
        self.lines.push(document_body(&source, &id));
        self.commands += 1;
        Ok(true)
    }

    /// Queues a delete command. Returns false for entities without an id.
    pub(crate) fn queue_delete<E: Entity>(
        &mut self,
        elastic: &Elastic,
        entity: &E,
        force: bool,
    ) -> StorageResult<bool> {
        let Some(id) = entity.id() else {
            return Ok(false);
        };

        let descriptor = elastic.descriptor::<E>()?;
        let source = extract_source(&descriptor, entity)?;

        let mut meta = Map::new();
        meta.insert(
            KEY_INDEX.to_string(),
            json!(elastic.determine_write_alias(&descriptor)),
        );
        meta.insert(KEY_ID.to_string(), json!(id));
        if let Some(routing) = elastic.write_routing(&descriptor, &source, "delete") {
            meta.insert(KEY_ROUTING.to_string(), json!(routing));
        }
        if let Some(tokens) = elastic.conditional_tokens(&descriptor, entity, force) {
            meta.insert(KEY_PRIMARY_TERM.to_string(), json!(tokens.primary_term));
            meta.insert(KEY_SEQ_NO.to_string(), json!(tokens.seq_no));
        }

        self.lines.push(json!({ COMMAND_DELETE: meta }));
        self.commands += 1;
        Ok(true)
    }

    /// Returns the number of queued commands.
    pub(crate) fn len(&self) -> usize {
        self.commands
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.commands == 0
    }

    /// Removes and returns all queued lines.
    pub(crate) fn take(&mut self) -> Vec<Value> {
        self.commands = 0;
        std::mem::take(&mut self.lines)
    }
}
