use anyhow::{Context, Result};
use async_trait::async_trait;
use rocksdb::{DB, Options};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Key under which the last connected extension is remembered.
pub const STORED_WALLET_KEY: &str = "dapp:wallet";

/// Identity of the last connected wallet extension.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredExtension {
    pub extension_name: String,
    pub title: String,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save_active_extension(&self, record: &StoredExtension) -> Result<()>;
    async fn load_active_extension(&self) -> Result<Option<StoredExtension>>;
    async fn clear_active_extension(&self) -> Result<()>;
}

#[derive(Default)]
pub struct NoopSessionStore;

#[async_trait]
impl SessionStore for NoopSessionStore {
    async fn save_active_extension(&self, _record: &StoredExtension) -> Result<()> {
        Ok(())
    }

    async fn load_active_extension(&self) -> Result<Option<StoredExtension>> {
        Ok(None)
    }

    async fn clear_active_extension(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemorySessionStore {
    record: RwLock<Option<StoredExtension>>,
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn save_active_extension(&self, record: &StoredExtension) -> Result<()> {
        let mut guard = self.record.write().await;
        *guard = Some(record.clone());
        Ok(())
    }

    async fn load_active_extension(&self) -> Result<Option<StoredExtension>> {
        let guard = self.record.read().await;
        Ok(guard.clone())
    }

    async fn clear_active_extension(&self) -> Result<()> {
        let mut guard = self.record.write().await;
        *guard = None;
        Ok(())
    }
}

pub struct RocksDbSessionStore {
    db: Arc<DB>,
}

impl RocksDbSessionStore {
    pub fn open_default(path: &str) -> Result<Self> {
        let mut options = Options::default();
        options.create_if_missing(true);
        let db = DB::open(&options, path).with_context(|| format!("open session store at {path}"))?;
        Ok(Self { db: Arc::new(db) })
    }
}

#[async_trait]
impl SessionStore for RocksDbSessionStore {
    async fn save_active_extension(&self, record: &StoredExtension) -> Result<()> {
        let value = serde_json::to_vec(record)?;
        self.db.put(STORED_WALLET_KEY.as_bytes(), value)?;
        Ok(())
    }

    async fn load_active_extension(&self) -> Result<Option<StoredExtension>> {
        let value = self.db.get(STORED_WALLET_KEY.as_bytes())?;
        match value {
            Some(raw) => Ok(Some(serde_json::from_slice::<StoredExtension>(&raw)?)),
            None => Ok(None),
        }
    }

    async fn clear_active_extension(&self) -> Result<()> {
        self.db.delete(STORED_WALLET_KEY.as_bytes())?;
        Ok(())
    }
}

#[async_trait]
impl<S: SessionStore + ?Sized> SessionStore for Arc<S> {
    async fn save_active_extension(&self, record: &StoredExtension) -> Result<()> {
        (**self).save_active_extension(record).await
    }

    async fn load_active_extension(&self) -> Result<Option<StoredExtension>> {
        (**self).load_active_extension().await
    }

    async fn clear_active_extension(&self) -> Result<()> {
        (**self).clear_active_extension().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn talisman() -> StoredExtension {
        StoredExtension {
            extension_name: "talisman".to_owned(),
            title: "Talisman".to_owned(),
        }
    }

    #[tokio::test]
    async fn in_memory_store_roundtrip() -> Result<()> {
        let store = InMemorySessionStore::default();
        assert_eq!(store.load_active_extension().await?, None);

        store.save_active_extension(&talisman()).await?;
        assert_eq!(store.load_active_extension().await?, Some(talisman()));

        store.clear_active_extension().await?;
        assert_eq!(store.load_active_extension().await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn rocksdb_store_survives_reopen() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("session");
        let path = path.to_str().expect("utf-8 temp path");

        {
            let store = RocksDbSessionStore::open_default(path)?;
            store.save_active_extension(&talisman()).await?;
        }

        let store = RocksDbSessionStore::open_default(path)?;
        assert_eq!(store.load_active_extension().await?, Some(talisman()));

        store.clear_active_extension().await?;
        assert_eq!(store.load_active_extension().await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn noop_store_never_remembers() -> Result<()> {
        let store = NoopSessionStore;
        store.save_active_extension(&talisman()).await?;
        assert_eq!(store.load_active_extension().await?, None);
        Ok(())
    }
}
