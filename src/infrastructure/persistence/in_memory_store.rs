use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::domain::ports::connection::ConnectionEvent;
use crate::domain::ports::store::{KeyValueStore, StoreError};

use super::resolve_range;

#[derive(Debug, Clone)]
enum Entry {
    Str(String),
    Set(BTreeSet<String>),
    Hash(HashMap<String, String>),
    List(Vec<String>),
}

/// In-memory key-value store for tests and standalone runs.
///
/// Connection state can be driven from the outside to exercise the server
/// lifecycle transitions.
pub struct InMemoryStore {
    data: Mutex<HashMap<String, Entry>>,
    connected: AtomicBool,
    events: broadcast::Sender<ConnectionEvent>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            data: Mutex::new(HashMap::new()),
            connected: AtomicBool::new(true),
            events,
        }
    }

    /// Mark the connection lost and broadcast the error.
    pub fn fail_connection(&self, reason: &str) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.events.send(ConnectionEvent::Error(reason.to_string()));
    }

    /// Begin a simulated reconnect cycle.
    pub fn begin_reconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.events.send(ConnectionEvent::ReconnectStarted);
    }

    /// Complete a simulated reconnect cycle.
    pub fn complete_reconnect(&self) {
        self.connected.store(true, Ordering::SeqCst);
        let _ = self.events.send(ConnectionEvent::Reconnected);
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Entry>>, StoreError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(StoreError::Disconnected("in-memory store offline".into()));
        }
        self.data
            .lock()
            .map_err(|_| StoreError::ReadFailed("lock poisoned".into()))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let data = self.guard()?;
        match data.get(key) {
            None => Ok(None),
            Some(Entry::Str(value)) => Ok(Some(value.clone())),
            Some(_) => Err(StoreError::WrongType(key.into())),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut data = self.guard()?;
        data.insert(key.into(), Entry::Str(value.into()));
        Ok(())
    }

    async fn setnx(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let mut data = self.guard()?;
        if data.contains_key(key) {
            Ok(false)
        } else {
            data.insert(key.into(), Entry::Str(value.into()));
            Ok(true)
        }
    }

    async fn getset(&self, key: &str, value: &str) -> Result<Option<String>, StoreError> {
        let mut data = self.guard()?;
        let previous = match data.insert(key.into(), Entry::Str(value.into())) {
            None => None,
            Some(Entry::Str(old)) => Some(old),
            Some(_) => return Err(StoreError::WrongType(key.into())),
        };
        Ok(previous)
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        let mut data = self.guard()?;
        data.remove(key);
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut data = self.guard()?;
        match data
            .entry(key.into())
            .or_insert_with(|| Entry::Set(BTreeSet::new()))
        {
            Entry::Set(set) => {
                set.insert(member.into());
                Ok(())
            }
            _ => Err(StoreError::WrongType(key.into())),
        }
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut data = self.guard()?;
        let emptied = match data.get_mut(key) {
            None => return Ok(()),
            Some(Entry::Set(set)) => {
                set.remove(member);
                set.is_empty()
            }
            Some(_) => return Err(StoreError::WrongType(key.into())),
        };
        if emptied {
            data.remove(key);
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let data = self.guard()?;
        match data.get(key) {
            None => Ok(vec![]),
            Some(Entry::Set(set)) => Ok(set.iter().cloned().collect()),
            Some(_) => Err(StoreError::WrongType(key.into())),
        }
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let mut data = self.guard()?;
        match data
            .entry(key.into())
            .or_insert_with(|| Entry::Hash(HashMap::new()))
        {
            Entry::Hash(hash) => {
                hash.insert(field.into(), value.into());
                Ok(())
            }
            _ => Err(StoreError::WrongType(key.into())),
        }
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let data = self.guard()?;
        match data.get(key) {
            None => Ok(None),
            Some(Entry::Hash(hash)) => Ok(hash.get(field).cloned()),
            Some(_) => Err(StoreError::WrongType(key.into())),
        }
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<(), StoreError> {
        let mut data = self.guard()?;
        let emptied = match data.get_mut(key) {
            None => return Ok(()),
            Some(Entry::Hash(hash)) => {
                hash.remove(field);
                hash.is_empty()
            }
            Some(_) => return Err(StoreError::WrongType(key.into())),
        };
        if emptied {
            data.remove(key);
        }
        Ok(())
    }

    async fn hsetnx(&self, key: &str, field: &str, value: &str) -> Result<bool, StoreError> {
        let mut data = self.guard()?;
        match data
            .entry(key.into())
            .or_insert_with(|| Entry::Hash(HashMap::new()))
        {
            Entry::Hash(hash) => {
                if hash.contains_key(field) {
                    Ok(false)
                } else {
                    hash.insert(field.into(), value.into());
                    Ok(true)
                }
            }
            _ => Err(StoreError::WrongType(key.into())),
        }
    }

    async fn hexists(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        let data = self.guard()?;
        match data.get(key) {
            None => Ok(false),
            Some(Entry::Hash(hash)) => Ok(hash.contains_key(field)),
            Some(_) => Err(StoreError::WrongType(key.into())),
        }
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
        let mut data = self.guard()?;
        match data
            .entry(key.into())
            .or_insert_with(|| Entry::Hash(HashMap::new()))
        {
            Entry::Hash(hash) => {
                let current: i64 = match hash.get(field) {
                    None => 0,
                    Some(text) => text
                        .parse()
                        .map_err(|_| StoreError::WrongType(key.into()))?,
                };
                let next = current + delta;
                hash.insert(field.into(), next.to_string());
                Ok(next)
            }
            _ => Err(StoreError::WrongType(key.into())),
        }
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut data = self.guard()?;
        match data
            .entry(key.into())
            .or_insert_with(|| Entry::List(Vec::new()))
        {
            Entry::List(list) => {
                list.push(value.into());
                Ok(())
            }
            _ => Err(StoreError::WrongType(key.into())),
        }
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StoreError> {
        let data = self.guard()?;
        match data.get(key) {
            None => Ok(vec![]),
            Some(Entry::List(list)) => Ok(resolve_range(list.len(), start, stop)
                .map(|(from, to)| list[from..=to].to_vec())
                .unwrap_or_default()),
            Some(_) => Err(StoreError::WrongType(key.into())),
        }
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<(), StoreError> {
        let mut data = self.guard()?;
        match data.get_mut(key) {
            None => Ok(()),
            Some(Entry::List(list)) => {
                *list = resolve_range(list.len(), start, stop)
                    .map(|(from, to)| list[from..=to].to_vec())
                    .unwrap_or_default();
                Ok(())
            }
            Some(_) => Err(StoreError::WrongType(key.into())),
        }
    }

    fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }
}
