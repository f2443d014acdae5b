//! Public-Data Propagator
//!
//! On `setPublicData`, pushes the configured subset of keys into every other
//! session owned by the same user. A plain loop over
//! `store.get_sessions`/`update_session`, no batching. The store contract
//! doesn't expose one, and the expected fan-out (a user's concurrently open
//! sessions) is small.

use serde_json::Map;

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::models::SessionPatch;
use crate::store::SessionStore;

/// Merges the keys named in `config.public_data_keys_to_sync_across_sessions`
/// that are present in `incoming` into every other session record owned by
/// `user_id` (i.e. every handle except `exclude_handle`, typically the
/// session that triggered the update).
pub async fn sync_public_data_keys(
    store: &dyn SessionStore,
    config: &SessionConfig,
    user_id: &str,
    incoming: &Map<String, serde_json::Value>,
    exclude_handle: &str,
) -> Result<(), SessionError> {
    let keys_to_sync: Vec<&String> = config
        .public_data_keys_to_sync_across_sessions
        .iter()
        .filter(|k| incoming.contains_key(k.as_str()))
        .collect();

    if keys_to_sync.is_empty() {
        return Ok(());
    }

    let mut patch = Map::new();
    for key in &keys_to_sync {
        if let Some(value) = incoming.get(key.as_str()) {
            patch.insert((*key).clone(), value.clone());
        }
    }

    let records = store.get_sessions(user_id).await?;
    for record in records {
        if record.handle == exclude_handle {
            continue;
        }
        let mut public_data = record.public_data();
        public_data.merge_from(&patch);
        store
            .update_session(
                &record.handle,
                SessionPatch {
                    expires_at: None,
                    public_data: Some(public_data.to_json_string()),
                    private_data: None,
                },
            )
            .await?;
    }

    Ok(())
}
