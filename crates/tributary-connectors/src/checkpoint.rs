//! Connector checkpoint types.
//!
//! Checkpoints capture how much of a stream has been read so an interrupted
//! sync can resume without re-reading consumed rows.
//!
//! - [`OpaqueState`]: a serialized checkpoint value, owned by the partition
//!   that produced it
//! - [`CheckpointStore`]: persists states per stream, keyed by the domain
//!   they describe
//! - [`InMemoryCheckpointStore`] / [`FileCheckpointStore`]: implementations

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConnectorError;
use crate::feed::StreamId;

/// A persisted checkpoint value.
///
/// Only the partition factory interprets the contents; everything else
/// stores and forwards it unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpaqueState(Value);

impl OpaqueState {
    /// Wraps a JSON value.
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Returns the JSON value.
    #[must_use]
    pub fn value(&self) -> &Value {
        &self.0
    }

    /// Unwraps the JSON value.
    #[must_use]
    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<Value> for OpaqueState {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Persistent storage for checkpoint states.
///
/// States are grouped by stream and keyed within a stream. Saving under an
/// existing key replaces the previous state.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Loads every state saved for `stream`, in key order.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::CheckpointError` if the states cannot be read.
    async fn load(&self, stream: &StreamId) -> Result<Vec<OpaqueState>, ConnectorError>;

    /// Saves `state` for `stream` under `key`.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::CheckpointError` if the state cannot be written.
    async fn save(
        &self,
        stream: &StreamId,
        key: &str,
        state: OpaqueState,
    ) -> Result<(), ConnectorError>;

    /// Replaces every state saved for `stream` with `state` under `key`,
    /// in one write.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::CheckpointError` if the state cannot be written.
    async fn replace(
        &self,
        stream: &StreamId,
        key: &str,
        state: OpaqueState,
    ) -> Result<(), ConnectorError>;

    /// Removes every state saved for `stream`.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::CheckpointError` if the states cannot be removed.
    async fn clear(&self, stream: &StreamId) -> Result<(), ConnectorError>;
}

/// Checkpoint store kept in memory.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    states: Mutex<HashMap<StreamId, BTreeMap<String, OpaqueState>>>,
    history: Mutex<Vec<(StreamId, String)>>,
}

impl InMemoryCheckpointStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `states` for `stream`.
    #[must_use]
    pub fn with_states(stream: &StreamId, states: Vec<(String, OpaqueState)>) -> Self {
        let store = Self::new();
        store
            .states
            .lock()
            .insert(stream.clone(), states.into_iter().collect());
        store
    }

    /// Returns the `(stream, key)` of every save, in call order.
    #[must_use]
    pub fn history(&self) -> Vec<(StreamId, String)> {
        self.history.lock().clone()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self, stream: &StreamId) -> Result<Vec<OpaqueState>, ConnectorError> {
        Ok(self
            .states
            .lock()
            .get(stream)
            .map(|states| states.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn save(
        &self,
        stream: &StreamId,
        key: &str,
        state: OpaqueState,
    ) -> Result<(), ConnectorError> {
        self.states
            .lock()
            .entry(stream.clone())
            .or_default()
            .insert(key.to_string(), state);
        self.history.lock().push((stream.clone(), key.to_string()));
        Ok(())
    }

    async fn replace(
        &self,
        stream: &StreamId,
        key: &str,
        state: OpaqueState,
    ) -> Result<(), ConnectorError> {
        self.states.lock().insert(
            stream.clone(),
            BTreeMap::from([(key.to_string(), state)]),
        );
        self.history.lock().push((stream.clone(), key.to_string()));
        Ok(())
    }

    async fn clear(&self, stream: &StreamId) -> Result<(), ConnectorError> {
        self.states.lock().remove(stream);
        Ok(())
    }
}

/// Checkpoint store writing one JSON file per stream.
///
/// Files are replaced atomically (write to a temporary file, then rename),
/// so a crash mid-save leaves the previous states intact.
#[derive(Debug)]
pub struct FileCheckpointStore {
    dir: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileCheckpointStore {
    /// Creates a store rooted at `dir`. The directory is created on first save.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, stream: &StreamId) -> PathBuf {
        let name: String = stream
            .to_string()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{name}.json"))
    }

    async fn read_states(
        &self,
        stream: &StreamId,
    ) -> Result<BTreeMap<String, OpaqueState>, ConnectorError> {
        let path = self.path_for(stream);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes).map_err(|e| {
            ConnectorError::CheckpointError(format!("corrupt state file {}: {e}", path.display()))
        })
    }

    async fn write_states(
        &self,
        stream: &StreamId,
        states: &BTreeMap<String, OpaqueState>,
    ) -> Result<(), ConnectorError> {
        let bytes = serde_json::to_vec_pretty(states)
            .map_err(|e| ConnectorError::CheckpointError(e.to_string()))?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(stream);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self, stream: &StreamId) -> Result<Vec<OpaqueState>, ConnectorError> {
        Ok(self.read_states(stream).await?.into_values().collect())
    }

    async fn save(
        &self,
        stream: &StreamId,
        key: &str,
        state: OpaqueState,
    ) -> Result<(), ConnectorError> {
        let _guard = self.write_lock.lock().await;
        let mut states = self.read_states(stream).await?;
        states.insert(key.to_string(), state);
        self.write_states(stream, &states).await
    }

    async fn replace(
        &self,
        stream: &StreamId,
        key: &str,
        state: OpaqueState,
    ) -> Result<(), ConnectorError> {
        let _guard = self.write_lock.lock().await;
        let states = BTreeMap::from([(key.to_string(), state)]);
        self.write_states(stream, &states).await
    }

    async fn clear(&self, stream: &StreamId) -> Result<(), ConnectorError> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(self.path_for(stream)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stream() -> StreamId {
        StreamId::new(Some("public"), "orders")
    }

    #[test]
    fn test_opaque_state_is_transparent() {
        let state = OpaqueState::new(json!({"cursor": 5}));
        assert_eq!(serde_json::to_value(&state).unwrap(), json!({"cursor": 5}));
        let back: OpaqueState = serde_json::from_value(json!({"cursor": 5})).unwrap();
        assert_eq!(back, state);
        assert_eq!(back.into_value()["cursor"], 5);
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = InMemoryCheckpointStore::new();
        assert!(store.load(&stream()).await.unwrap().is_empty());

        store.save(&stream(), "b", json!({"cursor": 2}).into()).await.unwrap();
        store.save(&stream(), "a", json!({"cursor": 1}).into()).await.unwrap();
        store.save(&stream(), "b", json!({"cursor": 3}).into()).await.unwrap();

        let states = store.load(&stream()).await.unwrap();
        assert_eq!(
            states,
            vec![
                OpaqueState::new(json!({"cursor": 1})),
                OpaqueState::new(json!({"cursor": 3}))
            ]
        );
        assert_eq!(store.history().len(), 3);

        store.replace(&stream(), "c", json!({"cursor": 9}).into()).await.unwrap();
        assert_eq!(
            store.load(&stream()).await.unwrap(),
            vec![OpaqueState::new(json!({"cursor": 9}))]
        );

        store.clear(&stream()).await.unwrap();
        assert!(store.load(&stream()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("state"));

        assert!(store.load(&stream()).await.unwrap().is_empty());
        store
            .save(&stream(), "id:(,5]", json!({"cursor": 5}).into())
            .await
            .unwrap();
        store
            .save(&stream(), "id:(5,10]", json!({"lower": 5, "cursor": 10}).into())
            .await
            .unwrap();

        let reopened = FileCheckpointStore::new(dir.path().join("state"));
        let states = reopened.load(&stream()).await.unwrap();
        assert_eq!(states.len(), 2);
        assert!(store.dir().join("public.orders.json").exists());

        reopened
            .replace(&stream(), "id:(,10]", json!({"cursor": 10}).into())
            .await
            .unwrap();
        assert_eq!(
            store.load(&stream()).await.unwrap(),
            vec![OpaqueState::new(json!({"cursor": 10}))]
        );

        reopened.clear(&stream()).await.unwrap();
        assert!(reopened.load(&stream()).await.unwrap().is_empty());
        reopened.clear(&stream()).await.unwrap();
    }

    #[tokio::test]
    async fn test_file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("orders.json"), b"not json").unwrap();

        let store = FileCheckpointStore::new(dir.path());
        let err = store.load(&StreamId::new(None, "orders")).await.unwrap_err();
        assert!(matches!(err, ConnectorError::CheckpointError(_)));
    }
}
