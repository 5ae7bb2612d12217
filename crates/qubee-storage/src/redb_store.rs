//! redb-backed session store
//!
//! One database file with two tables. Every save is its own write
//! transaction, committed before `save` returns, so an acknowledged save
//! survives a crash.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use qubee_core::PeerId;
use redb::{Database, ReadableTable, TableDefinition};
use tracing::{debug, info, instrument, warn};

use crate::error::{StorageError, StorageResult};
use crate::{IdentityStore, SessionStore};

// Key: peer_id bytes, Value: serialized ratchet session
pub const SESSIONS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("sessions");

// Key: fixed "local", Value: exported identity
pub const IDENTITY: TableDefinition<&[u8], &[u8]> = TableDefinition::new("identity");

const LOCAL_IDENTITY_KEY: &[u8] = b"local";

/// Configuration for the redb store
#[derive(Debug, Clone)]
pub struct RedbStoreConfig {
    /// Path to the database file
    pub db_path: PathBuf,
}

impl Default for RedbStoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/qubee-sessions.redb"),
        }
    }
}

/// Session and identity store in a single redb file
#[derive(Clone)]
pub struct RedbSessionStore {
    db: Arc<Database>,
    config: RedbStoreConfig,
}

impl RedbSessionStore {
    /// Open or create the database
    #[instrument(skip(config), fields(path = %config.db_path.display()))]
    pub fn open(config: RedbStoreConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(&config.db_path).map_err(|e| StorageError::database(e.to_string()))?;
        info!("Opened redb session store");

        let store = Self {
            db: Arc::new(db),
            config,
        };
        store.init_tables()?;
        Ok(store)
    }

    /// Create tables if they don't exist
    fn init_tables(&self) -> StorageResult<()> {
        let write_txn = self.db.begin_write().map_err(db_err)?;
        write_txn.open_table(SESSIONS).map_err(db_err)?;
        write_txn.open_table(IDENTITY).map_err(db_err)?;
        write_txn.commit().map_err(db_err)?;

        debug!("Initialized redb tables");
        Ok(())
    }

    pub fn config(&self) -> &RedbStoreConfig {
        &self.config
    }

    fn put_blocking(
        db: &Database,
        table: TableDefinition<&[u8], &[u8]>,
        key: &[u8],
        value: &[u8],
    ) -> StorageResult<()> {
        let write_txn = db.begin_write().map_err(db_err)?;
        {
            let mut table = write_txn.open_table(table).map_err(db_err)?;
            table.insert(key, value).map_err(db_err)?;
        }
        write_txn.commit().map_err(db_err)?;
        Ok(())
    }

    fn get_blocking(
        db: &Database,
        table: TableDefinition<&[u8], &[u8]>,
        key: &[u8],
    ) -> StorageResult<Option<Vec<u8>>> {
        let read_txn = db.begin_read().map_err(db_err)?;
        let table = read_txn.open_table(table).map_err(db_err)?;
        let value = table.get(key).map_err(db_err)?.map(|v| v.value().to_vec());
        Ok(value)
    }

    fn delete_blocking(db: &Database, key: &[u8]) -> StorageResult<bool> {
        let write_txn = db.begin_write().map_err(db_err)?;
        let removed = {
            let mut table = write_txn.open_table(SESSIONS).map_err(db_err)?;
            table.remove(key).map_err(db_err)?.is_some()
        };
        write_txn.commit().map_err(db_err)?;
        Ok(removed)
    }

    fn peers_blocking(db: &Database) -> StorageResult<Vec<PeerId>> {
        let read_txn = db.begin_read().map_err(db_err)?;
        let table = read_txn.open_table(SESSIONS).map_err(db_err)?;

        let mut peers = Vec::new();
        for entry in table.iter().map_err(db_err)? {
            let (key, _) = entry.map_err(db_err)?;
            match PeerId::from_bytes(key.value()) {
                Ok(peer) => peers.push(peer),
                Err(e) => warn!(error = %e, "Skipping session row with invalid peer id"),
            }
        }
        Ok(peers)
    }

    /// Run a blocking redb operation off the async executor
    async fn blocking<T, F>(&self, op: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> StorageResult<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || op(&db))
            .await
            .map_err(|e| StorageError::Io(format!("storage task failed: {}", e)))?
    }
}

impl std::fmt::Debug for RedbSessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbSessionStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn db_err(e: impl Into<redb::Error>) -> StorageError {
    StorageError::from(e.into())
}

#[async_trait]
impl SessionStore for RedbSessionStore {
    async fn load(&self, peer: &PeerId) -> StorageResult<Option<Vec<u8>>> {
        let key = peer.as_bytes().to_vec();
        self.blocking(move |db| Self::get_blocking(db, SESSIONS, &key)).await
    }

    #[instrument(skip(self, blob), fields(peer = %peer.short_id(), len = blob.len()))]
    async fn save(&self, peer: &PeerId, blob: &[u8]) -> StorageResult<()> {
        let key = peer.as_bytes().to_vec();
        let value = blob.to_vec();
        self.blocking(move |db| Self::put_blocking(db, SESSIONS, &key, &value)).await?;
        debug!("Committed session blob");
        Ok(())
    }

    async fn delete(&self, peer: &PeerId) -> StorageResult<bool> {
        let key = peer.as_bytes().to_vec();
        self.blocking(move |db| Self::delete_blocking(db, &key)).await
    }

    async fn peers(&self) -> StorageResult<Vec<PeerId>> {
        self.blocking(Self::peers_blocking).await
    }
}

#[async_trait]
impl IdentityStore for RedbSessionStore {
    async fn load_identity(&self) -> StorageResult<Option<Vec<u8>>> {
        self.blocking(|db| Self::get_blocking(db, IDENTITY, LOCAL_IDENTITY_KEY)).await
    }

    async fn save_identity(&self, blob: &[u8]) -> StorageResult<()> {
        let value = blob.to_vec();
        self.blocking(move |db| Self::put_blocking(db, IDENTITY, LOCAL_IDENTITY_KEY, &value))
            .await
    }
}
