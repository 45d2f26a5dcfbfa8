//! In-memory CRUD service.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::{Map, Value};

use super::error::ServiceError;
use super::params::Params;
use super::service::{Service, ServiceOptions};

/// Record key: numeric ids sort numerically, others lexically after them.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum RecordId {
    Num(u64),
    Str(String),
}

impl RecordId {
    fn from_value(id: &Value) -> Option<Self> {
        match id {
            Value::Number(n) => n.as_u64().map(RecordId::Num),
            Value::String(s) => Some(match s.parse::<u64>() {
                Ok(n) => RecordId::Num(n),
                Err(_) => RecordId::Str(s.clone()),
            }),
            _ => None,
        }
    }

    fn to_value(&self) -> Value {
        match self {
            RecordId::Num(n) => Value::from(*n),
            RecordId::Str(s) => Value::from(s.clone()),
        }
    }
}

struct Store {
    records: BTreeMap<RecordId, Value>,
    next_id: u64,
}

/// A service keeping JSON records in memory, keyed by `id`.
///
/// `find` supports equality filtering through `params.query`.
pub struct MemoryService {
    store: Mutex<Store>,
    options: ServiceOptions,
}

impl Default for MemoryService {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryService {
    pub fn new() -> Self {
        Self {
            store: Mutex::new(Store {
                records: BTreeMap::new(),
                next_id: 0,
            }),
            options: ServiceOptions::default(),
        }
    }

    /// Seed the store. Records without a usable `id` are skipped.
    pub fn with_records(self, records: impl IntoIterator<Item = Value>) -> Self {
        {
            let mut store = self.lock();
            for record in records {
                if let Some(id) = record.get("id").and_then(RecordId::from_value) {
                    if let RecordId::Num(n) = &id {
                        store.next_id = store.next_id.max(n + 1);
                    }
                    store.records.insert(id, record);
                }
            }
        }
        self
    }

    /// First id handed out by `create`.
    pub fn with_start_id(self, start_id: u64) -> Self {
        self.lock().next_id = start_id;
        self
    }

    /// Replace the declared options (custom events, distributed sets...).
    pub fn with_options(mut self, options: ServiceOptions) -> Self {
        self.options = options;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn key(id: &Value) -> Result<RecordId, ServiceError> {
        RecordId::from_value(id).ok_or_else(|| ServiceError::BadRequest(format!("Invalid id {}", id)))
    }

    fn not_found(id: &Value) -> ServiceError {
        let shown = match id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        ServiceError::NotFound(format!("No record found for id '{}'", shown))
    }

    fn object(data: Value) -> Result<Map<String, Value>, ServiceError> {
        match data {
            Value::Object(map) => Ok(map),
            other => Err(ServiceError::BadRequest(format!(
                "Expected an object, got {}",
                other
            ))),
        }
    }

    fn matches(record: &Value, query: &Map<String, Value>) -> bool {
        query
            .iter()
            .filter(|(key, _)| !key.starts_with('$'))
            .all(|(key, expected)| record.get(key) == Some(expected))
    }
}

impl Service for MemoryService {
    fn find(&self, params: Params) -> Result<Value, ServiceError> {
        let store = self.lock();
        let found = store
            .records
            .values()
            .filter(|record| params.query().map_or(true, |q| Self::matches(record, q)))
            .cloned()
            .collect();
        Ok(Value::Array(found))
    }

    fn get(&self, id: Value, _params: Params) -> Result<Value, ServiceError> {
        let key = Self::key(&id)?;
        self.lock()
            .records
            .get(&key)
            .cloned()
            .ok_or_else(|| Self::not_found(&id))
    }

    fn create(&self, data: Value, _params: Params) -> Result<Value, ServiceError> {
        let mut record = Self::object(data)?;
        let mut store = self.lock();
        let key = match record.get("id").and_then(RecordId::from_value) {
            Some(key) => key,
            None => {
                let key = RecordId::Num(store.next_id);
                store.next_id += 1;
                key
            }
        };
        if let RecordId::Num(n) = &key {
            store.next_id = store.next_id.max(n + 1);
        }
        record.insert("id".to_string(), key.to_value());
        let record = Value::Object(record);
        store.records.insert(key, record.clone());
        Ok(record)
    }

    fn update(&self, id: Value, data: Value, _params: Params) -> Result<Value, ServiceError> {
        let key = Self::key(&id)?;
        let mut record = Self::object(data)?;
        let mut store = self.lock();
        if !store.records.contains_key(&key) {
            return Err(Self::not_found(&id));
        }
        record.insert("id".to_string(), key.to_value());
        let record = Value::Object(record);
        store.records.insert(key, record.clone());
        Ok(record)
    }

    fn patch(&self, id: Value, data: Value, _params: Params) -> Result<Value, ServiceError> {
        let key = Self::key(&id)?;
        let changes = Self::object(data)?;
        let mut store = self.lock();
        let record = store
            .records
            .get_mut(&key)
            .ok_or_else(|| Self::not_found(&id))?;
        if let Some(fields) = record.as_object_mut() {
            for (field, value) in changes {
                if field != "id" {
                    fields.insert(field, value);
                }
            }
        }
        Ok(record.clone())
    }

    fn remove(&self, id: Value, _params: Params) -> Result<Value, ServiceError> {
        let key = Self::key(&id)?;
        self.lock()
            .records
            .remove(&key)
            .ok_or_else(|| Self::not_found(&id))
    }

    fn options(&self) -> ServiceOptions {
        self.options.clone()
    }
}
