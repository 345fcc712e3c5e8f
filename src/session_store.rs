use crate::error::StoreError;
use crate::game_state::GameSession;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

pub type SessionUpdate = Box<dyn FnOnce(&mut GameSession) + Send>;

/// Storage for game sessions keyed by game id.
///
/// Implementations must apply each [`SessionUpdate`] atomically with respect
/// to other updates of the same game, and must not block other games.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, game_id: &str) -> Result<Option<GameSession>, StoreError>;

    /// Returns the stored session untouched, or stores and returns a fresh one.
    async fn get_or_create(&self, game_id: &str) -> Result<GameSession, StoreError>;

    /// Runs `update` on the session (creating it first if needed) and returns
    /// the updated copy.
    async fn update(&self, game_id: &str, update: SessionUpdate)
    -> Result<GameSession, StoreError>;
}

// One async lock per key, created on first use.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Holders and waiters keep a clone, so a count of one means idle.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(key.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Number of keys currently tracked.
    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Arc<Mutex<GameSession>>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, game_id: &str) -> Arc<Mutex<GameSession>> {
        if let Some(slot) = self.sessions.read().await.get(game_id) {
            return slot.clone();
        }
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(game_id.to_string())
            .or_insert_with(|| {
                log::info!("Game {} created", game_id);
                Arc::new(Mutex::new(GameSession::new(game_id)))
            })
            .clone()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, game_id: &str) -> Result<Option<GameSession>, StoreError> {
        let slot = self.sessions.read().await.get(game_id).cloned();
        match slot {
            Some(slot) => Ok(Some(slot.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn get_or_create(&self, game_id: &str) -> Result<GameSession, StoreError> {
        let slot = self.slot(game_id).await;
        let session = slot.lock().await.clone();
        Ok(session)
    }

    async fn update(
        &self,
        game_id: &str,
        update: SessionUpdate,
    ) -> Result<GameSession, StoreError> {
        let slot = self.slot(game_id).await;
        let mut session = slot.lock().await;
        update(&mut *session);
        Ok(session.clone())
    }
}

/// Keeps every session as `<game_id>.json` in a directory.
#[derive(Debug)]
pub struct JsonFileSessionStore {
    dir: PathBuf,
    locks: KeyedLocks,
}

impl JsonFileSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            locks: KeyedLocks::new(),
        })
    }

    fn path_for(&self, game_id: &str) -> Result<PathBuf, StoreError> {
        let valid = !game_id.is_empty()
            && !game_id.starts_with('.')
            && game_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(StoreError::InvalidGameId(game_id.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", game_id)))
    }

    async fn read(&self, game_id: &str) -> Result<Option<GameSession>, StoreError> {
        let path = self.path_for(game_id)?;
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&data)?))
    }

    // Written next to the target first so a crash never leaves half a file.
    async fn write(&self, session: &GameSession) -> Result<(), StoreError> {
        let path = self.path_for(&session.game_id)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(session)?).await?;
        fs::rename(tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for JsonFileSessionStore {
    async fn get(&self, game_id: &str) -> Result<Option<GameSession>, StoreError> {
        let _guard = self.locks.acquire(game_id).await;
        self.read(game_id).await
    }

    async fn get_or_create(&self, game_id: &str) -> Result<GameSession, StoreError> {
        let _guard = self.locks.acquire(game_id).await;
        if let Some(session) = self.read(game_id).await? {
            return Ok(session);
        }
        let session = GameSession::new(game_id);
        self.write(&session).await?;
        log::info!("Game {} created in {}", game_id, self.dir.display());
        Ok(session)
    }

    async fn update(
        &self,
        game_id: &str,
        update: SessionUpdate,
    ) -> Result<GameSession, StoreError> {
        let _guard = self.locks.acquire(game_id).await;
        let mut session = match self.read(game_id).await? {
            Some(session) => session,
            None => GameSession::new(game_id),
        };
        update(&mut session);
        self.write(&session).await?;
        Ok(session)
    }
}
