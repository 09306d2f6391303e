//! Outcome of a bulk request.

use std::collections::BTreeSet;
use std::fmt::Write;
use std::sync::OnceLock;

use serde_json::{Map, Value};

use crate::error::{BulkError, StorageResult};
use crate::schema::{Entity, VersionTokens};

const KEY_ERRORS: &str = "errors";
const KEY_ITEMS: &str = "items";
const KEY_ERROR: &str = "error";
const KEY_ID: &str = "_id";
const RESPONSE_INDEX: &str = "index";
const RESPONSE_TYPE: &str = "type";
const RESPONSE_REASON: &str = "reason";
const RESPONSE_CAUSED_BY: &str = "caused_by";
const ITEM_TYPES: [&str; 4] = ["index", "delete", "create", "update"];
const WRITE_ITEM_TYPES: [&str; 3] = ["index", "create", "update"];

#[derive(Debug, Default)]
struct Digest {
    failed_ids: BTreeSet<String>,
    message: String,
}

/// The response of one bulk request.
///
/// Failed items are only inspected once one of the failure accessors is called.
#[derive(Debug, Default)]
pub struct BulkResult {
    response: Option<Value>,
    digest: OnceLock<Result<Digest, String>>,
}

impl BulkResult {
    pub(crate) fn new(response: Value) -> Self {
        Self {
            response: Some(response),
            digest: OnceLock::new(),
        }
    }

    /// A result for a flush which had nothing to send.
    pub(crate) fn empty() -> Self {
        Self::default()
    }

    /// Returns the raw response, `None` if no request was sent.
    pub fn response(&self) -> Option<&Value> {
        self.response.as_ref()
    }

    /// Returns true unless the server reported an error for at least one command.
    pub fn is_successful(&self) -> bool {
        !self.has_errors()
    }

    fn has_errors(&self) -> bool {
        self.response
            .as_ref()
            .and_then(|r| r.get(KEY_ERRORS))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Returns the ids of all commands which failed.
    pub fn failed_ids(&self) -> StorageResult<&BTreeSet<String>> {
        Ok(&self.digest()?.failed_ids)
    }

    /// Returns one line per failed command, empty if all succeeded.
    pub fn failure_message(&self) -> StorageResult<&str> {
        Ok(&self.digest()?.message)
    }

    /// Marks an entity whose write was part of this request as persisted.
    ///
    /// Takes the concurrency tokens from the response, so later conditional writes and
    /// deletes of the entity are checked. Returns false if the entity has no successful
    /// write in this request.
    pub fn acknowledge<E: Entity>(&self, entity: &mut E) -> StorageResult<bool> {
        let Some(id) = entity.id().map(str::to_string) else {
            return Ok(false);
        };
        let Some(item) = self.write_item(&id) else {
            return Ok(false);
        };

        let tokens = if E::descriptor().is_versioned() {
            VersionTokens::from_response(item)
        } else {
            None
        };
        let source = match serde_json::to_value(&*entity)? {
            Value::Object(source) => source,
            _ => Map::new(),
        };
        entity.state_mut().mark_persisted(id, tokens, source);
        Ok(true)
    }

    fn write_item(&self, id: &str) -> Option<&Value> {
        self.response
            .as_ref()?
            .get(KEY_ITEMS)?
            .as_array()?
            .iter()
            .filter_map(|item| WRITE_ITEM_TYPES.iter().find_map(|kind| item.get(*kind)))
            .filter(|current| current.get(KEY_ERROR).is_none())
            .rfind(|current| current.get(KEY_ID).and_then(Value::as_str) == Some(id))
    }

    /// Fails with [`BulkError::CommandsFailed`] if any command failed.
    pub fn throw_failures(&self) -> StorageResult<()> {
        if self.is_successful() {
            return Ok(());
        }

        Err(BulkError::CommandsFailed {
            message: self.failure_message()?.to_string(),
        }
        .into())
    }

    fn digest(&self) -> StorageResult<&Digest> {
        let digest = self.digest.get_or_init(|| match self.response {
            Some(ref response) if self.has_errors() => digest(response),
            _ => Ok(Digest::default()),
        });

        digest.as_ref().map_err(|item| {
            BulkError::UnknownItemType {
                item: item.clone(),
            }
            .into()
        })
    }
}

fn digest(response: &Value) -> Result<Digest, String> {
    let mut digest = Digest::default();
    let items = response
        .get(KEY_ITEMS)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    for item in items {
        let current = ITEM_TYPES
            .iter()
            .find_map(|kind| item.get(*kind))
            .ok_or_else(|| item.to_string())?;

        let Some(error) = current.get(KEY_ERROR) else {
            continue;
        };

        if let Some(id) = current.get(KEY_ID).and_then(Value::as_str) {
            digest.failed_ids.insert(id.to_string());
        }

        let _ = write!(
            digest.message,
            "index: {} type: {} reason: {}",
            text(error, RESPONSE_INDEX),
            text(error, RESPONSE_TYPE),
            text(error, RESPONSE_REASON)
        );
        if let Some(cause) = error.get(RESPONSE_CAUSED_BY) {
            let _ = write!(digest.message, " cause: {}", text(cause, RESPONSE_REASON));
        }
        digest.message.push('\n');
    }

    Ok(digest)
}

fn text<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or_default()
}
