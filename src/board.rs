//! # Comment Board
//!
//! The read-modify-write contract against the single `comments.json` object.
//!
//! - **List**: best effort. An absent or unparsable object reads as an empty list.
//!   The two cases log differently (`debug` vs `warn`) so a failed fetch is never
//!   mistaken for an empty board.
//! - **Create**: stamp, append, conditional write.
//! - **Delete**: filter out by timestamp, conditional write. No match is still a
//!   successful (unchanged) write.
//!
//! ## Lost Updates
//!
//! Two writers that read the same version would otherwise race, the later overwrite
//! discarding the earlier change. Every write here is conditional on the ETag that
//! was read; when another writer got there first the whole read-transform-write is
//! replayed against the fresh list, up to `write_attempts` times.
use std::{sync::Arc, time::Duration};

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::{
    comments::{append_comment, decode_list, encode_list, remove_by_timestamp},
    error::ProxyError,
    store::{COMMENTS_KEY, ObjectStore, Precondition, StoreError, StoredObject, with_timeout},
};

pub struct CommentBoard {
    store: Arc<dyn ObjectStore>,
    timeout: Duration,
    write_attempts: u32,
}

impl CommentBoard {
    pub fn new(store: Arc<dyn ObjectStore>, timeout: Duration, write_attempts: u32) -> Self {
        Self {
            store,
            timeout,
            write_attempts: write_attempts.max(1),
        }
    }

    async fn fetch(&self) -> Result<Option<StoredObject>, StoreError> {
        with_timeout(self.timeout, self.store.get(COMMENTS_KEY)).await
    }

    pub async fn list(&self) -> Result<Vec<Value>, StoreError> {
        let Some(object) = self.fetch().await? else {
            debug!("{COMMENTS_KEY} absent, serving empty list");
            return Ok(Vec::new());
        };

        match decode_list(&object.body) {
            Ok(list) => Ok(list),
            Err(e) => {
                warn!("Stored {COMMENTS_KEY} is unreadable, serving empty list: {e}");
                Ok(Vec::new())
            }
        }
    }

    /// Appends `entry` with a fresh server timestamp and returns that timestamp.
    pub async fn create(&self, entry: Map<String, Value>) -> Result<String, ProxyError> {
        let mut stamped = String::new();

        self.mutate("create", |list| {
            stamped = append_comment(list, entry.clone(), Utc::now());
        })
        .await?;

        Ok(stamped)
    }

    /// Removes every entry stamped `timestamp` and returns how many went.
    pub async fn delete(&self, timestamp: &Value) -> Result<usize, ProxyError> {
        let mut removed = 0;

        self.mutate("delete", |list| {
            removed = remove_by_timestamp(list, timestamp);
        })
        .await?;

        Ok(removed)
    }

    async fn mutate<F>(&self, operation: &str, mut apply: F) -> Result<(), ProxyError>
    where
        F: FnMut(&mut Vec<Value>) + Send,
    {
        for attempt in 1..=self.write_attempts {
            let (mut list, precondition) = match self.fetch().await? {
                None => (Vec::new(), Precondition::Absent),
                Some(object) => {
                    let list = decode_list(&object.body).map_err(|source| StoreError::Corrupt {
                        key: COMMENTS_KEY.to_string(),
                        source,
                    })?;

                    (list, Precondition::Matches(object.etag))
                }
            };

            apply(&mut list);
            let body = encode_list(&list).map_err(StoreError::from)?;

            let write = self.store.put(COMMENTS_KEY, body, precondition);
            match with_timeout(self.timeout, write).await {
                Ok(etag) => {
                    debug!(
                        "{operation} committed {COMMENTS_KEY} ({} entries, etag {etag})",
                        list.len()
                    );
                    return Ok(());
                }
                Err(StoreError::PreconditionFailed(_)) => {
                    warn!(
                        "{operation} lost a race on {COMMENTS_KEY} (attempt {attempt}), retrying"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ProxyError::Conflict {
            key: COMMENTS_KEY,
            attempts: self.write_attempts,
        })
    }
}
