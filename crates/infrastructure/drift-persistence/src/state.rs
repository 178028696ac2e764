//! Engine state persisted through the settings store: the one-slot sync
//! queue (so a crash does not lose a queued request) and the approval gate.

use drift_core::{ConflictDetail, Manifest};
use serde::{Deserialize, Serialize};

use crate::{SettingsStore, StoreError};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalState {
    pub waiting_for_approval: bool,
    pub pending_deletions: Vec<String>,
    pub conflicts: Vec<ConflictDetail>,
}

fn queue_key(engine_id: u32) -> String {
    format!("engine_queue_{engine_id}")
}

fn approval_key(engine_id: u32) -> String {
    format!("approval_state_{engine_id}")
}

pub fn save_engine_queue(
    store: &dyn SettingsStore,
    engine_id: u32,
    manifest: &Manifest,
) -> Result<(), StoreError> {
    let json = serde_json::to_string(manifest).map_err(|e| StoreError::Encoding(e.to_string()))?;
    store.save_setting(&queue_key(engine_id), &json)
}

pub fn load_engine_queue(
    store: &dyn SettingsStore,
    engine_id: u32,
) -> Result<Option<Manifest>, StoreError> {
    match store.get_setting(&queue_key(engine_id))? {
        Some(json) if !json.is_empty() => Ok(serde_json::from_str(&json).ok()),
        _ => Ok(None),
    }
}

pub fn clear_engine_queue(store: &dyn SettingsStore, engine_id: u32) -> Result<(), StoreError> {
    store.save_setting(&queue_key(engine_id), "")
}

pub fn save_approval_state(
    store: &dyn SettingsStore,
    engine_id: u32,
    state: &ApprovalState,
) -> Result<(), StoreError> {
    let json = serde_json::to_string(state).map_err(|e| StoreError::Encoding(e.to_string()))?;
    store.save_setting(&approval_key(engine_id), &json)
}

pub fn load_approval_state(
    store: &dyn SettingsStore,
    engine_id: u32,
) -> Result<Option<ApprovalState>, StoreError> {
    match store.get_setting(&approval_key(engine_id))? {
        Some(json) if !json.is_empty() => Ok(serde_json::from_str(&json).ok()),
        _ => Ok(None),
    }
}

pub fn clear_approval_state(store: &dyn SettingsStore, engine_id: u32) -> Result<(), StoreError> {
    store.save_setting(&approval_key(engine_id), "")
}
