//! State-backed provider
//!
//! Applies changes directly to the stack's durable state. Every mutation is
//! persisted before the call returns, so a second invocation of the tool
//! sees exactly what the first one created.

use async_trait::async_trait;
use std::sync::Mutex;
use tracing::debug;

use crate::models::{ResourceKind, ResourceRecord};
use crate::state::{StackState, StateStore};

use super::{Provider, ProviderError};

/// Provider backed by the durable state store
pub struct LocalProvider {
    store: StateStore,
    state: Mutex<StackState>,
}

impl LocalProvider {
    /// Open a provider for a stack, loading any persisted state
    pub fn open(store: StateStore, state: StackState) -> Self {
        Self {
            store,
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StackState> {
        // A poisoned lock still holds consistent state: every mutation is
        // persisted before the guard drops.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, state: &StackState) -> Result<(), ProviderError> {
        self.store
            .save_stack(state)
            .map_err(|e| ProviderError::Storage(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl Provider for LocalProvider {
    async fn create(&self, record: ResourceRecord) -> Result<ResourceRecord, ProviderError> {
        let mut state = self.lock();

        if state.get(&record.logical_id).is_some() {
            return Err(ProviderError::AlreadyExists(record.logical_id));
        }

        debug!("Creating {} ({})", record.logical_id, record.physical_id);
        state.upsert(record.clone());
        self.persist(&state)?;
        Ok(record)
    }

    async fn find(&self, logical_id: &str) -> Result<Option<ResourceRecord>, ProviderError> {
        let state = self.lock();
        Ok(state.get(logical_id).cloned())
    }

    async fn delete(&self, logical_id: &str) -> Result<(), ProviderError> {
        let mut state = self.lock();

        if state.remove(logical_id).is_none() {
            return Err(ProviderError::NotFound(logical_id.to_string()));
        }

        debug!("Deleted {}", logical_id);
        self.persist(&state)?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ResourceRecord>, ProviderError> {
        let state = self.lock();
        Ok(state.resources.values().cloned().collect())
    }

    async fn instances_by_tag(
        &self,
        key: &str,
        value: &str,
    ) -> Result<Vec<ResourceRecord>, ProviderError> {
        let state = self.lock();
        Ok(state
            .resources
            .values()
            .filter(|r| r.kind == ResourceKind::Instance && r.has_tag(key, value))
            .cloned()
            .collect())
    }

    async fn set_attribute(
        &self,
        logical_id: &str,
        key: &str,
        value: &str,
    ) -> Result<(), ProviderError> {
        let mut state = self.lock();

        let record = state
            .resources
            .get_mut(logical_id)
            .ok_or_else(|| ProviderError::NotFound(logical_id.to_string()))?;
        record.attributes.insert(key.to_string(), value.to_string());

        self.persist(&state)?;
        Ok(())
    }
}
