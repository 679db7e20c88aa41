//! Purpose: Define the keyed item-store contract and the in-memory backend.
//! Exports: `ItemStore`, `Change`, `Applied`, `MemoryStore`, `StoreResult`.
//! Role: Seam between the inventory controller and every storage backend.
//! Invariants: `put` replaces the whole record; `delete` of a missing key is a no-op.
//! Invariants: `Change::resolve` is the single home of the quantity merge rule.
//! Invariants: `apply` default is read-modify-write and NOT atomic; backends override it.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::core::error::{Error, ErrorKind};
use crate::core::item::Item;

pub type StoreResult<T> = Result<T, Error>;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Change {
    Increment { by: i64 },
    Decrement,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Applied {
    Stored { quantity: i64 },
    Deleted,
    Unchanged,
}

impl Change {
    /// Decide the write for a record currently holding `current`.
    pub fn resolve(self, current: Option<i64>) -> Applied {
        match (self, current) {
            (Change::Increment { by }, None) => Applied::Stored { quantity: by },
            (Change::Increment { by }, Some(quantity)) => Applied::Stored {
                quantity: quantity.saturating_add(by),
            },
            (Change::Decrement, None) => Applied::Unchanged,
            (Change::Decrement, Some(quantity)) if quantity <= 1 => Applied::Deleted,
            (Change::Decrement, Some(quantity)) => Applied::Stored {
                quantity: quantity - 1,
            },
        }
    }
}

pub trait ItemStore: Send + Sync {
    /// All records, in no particular order.
    fn list(&self) -> StoreResult<Vec<Item>>;

    fn get(&self, name: &str) -> StoreResult<Option<i64>>;

    fn put(&self, name: &str, quantity: i64) -> StoreResult<()>;

    fn delete(&self, name: &str) -> StoreResult<()>;

    fn apply(&self, name: &str, change: Change) -> StoreResult<Applied> {
        let applied = change.resolve(self.get(name)?);
        match applied {
            Applied::Stored { quantity } => self.put(name, quantity)?,
            Applied::Deleted => self.delete(name)?,
            Applied::Unchanged => {}
        }
        Ok(applied)
    }
}

impl<S: ItemStore + ?Sized> ItemStore for Arc<S> {
    fn list(&self) -> StoreResult<Vec<Item>> {
        (**self).list()
    }

    fn get(&self, name: &str) -> StoreResult<Option<i64>> {
        (**self).get(name)
    }

    fn put(&self, name: &str, quantity: i64) -> StoreResult<()> {
        (**self).put(name, quantity)
    }

    fn delete(&self, name: &str) -> StoreResult<()> {
        (**self).delete(name)
    }

    fn apply(&self, name: &str, change: Change) -> StoreResult<Applied> {
        (**self).apply(name, change)
    }
}

impl<S: ItemStore + ?Sized> ItemStore for Box<S> {
    fn list(&self) -> StoreResult<Vec<Item>> {
        (**self).list()
    }

    fn get(&self, name: &str) -> StoreResult<Option<i64>> {
        (**self).get(name)
    }

    fn put(&self, name: &str, quantity: i64) -> StoreResult<()> {
        (**self).put(name, quantity)
    }

    fn delete(&self, name: &str) -> StoreResult<()> {
        (**self).delete(name)
    }

    fn apply(&self, name: &str, change: Change) -> StoreResult<Applied> {
        (**self).apply(name, change)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    items: Mutex<BTreeMap<String, i64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Item>,
    {
        let map = items
            .into_iter()
            .map(|item| (item.name, item.quantity))
            .collect();
        Self {
            items: Mutex::new(map),
        }
    }

    fn guard(&self) -> StoreResult<MutexGuard<'_, BTreeMap<String, i64>>> {
        self.items.lock().map_err(|_| {
            Error::new(ErrorKind::Internal).with_message("memory store lock poisoned")
        })
    }
}

impl ItemStore for MemoryStore {
    fn list(&self) -> StoreResult<Vec<Item>> {
        let items = self.guard()?;
        Ok(items
            .iter()
            .map(|(name, quantity)| Item::new(name.clone(), *quantity))
            .collect())
    }

    fn get(&self, name: &str) -> StoreResult<Option<i64>> {
        Ok(self.guard()?.get(name).copied())
    }

    fn put(&self, name: &str, quantity: i64) -> StoreResult<()> {
        self.guard()?.insert(name.to_string(), quantity);
        Ok(())
    }

    fn delete(&self, name: &str) -> StoreResult<()> {
        self.guard()?.remove(name);
        Ok(())
    }

    fn apply(&self, name: &str, change: Change) -> StoreResult<Applied> {
        let mut items = self.guard()?;
        let applied = change.resolve(items.get(name).copied());
        match applied {
            Applied::Stored { quantity } => {
                items.insert(name.to_string(), quantity);
            }
            Applied::Deleted => {
                items.remove(name);
            }
            Applied::Unchanged => {}
        }
        Ok(applied)
    }
}
