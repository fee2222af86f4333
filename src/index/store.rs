//! redb-backed storage for the default and filtered indexes.
//!
//! The default index maps object path to a tagged value: a placeholder while
//! the object has been counted but not yet read, or its JSON. Filtered
//! indexes map a big-endian `u64` position to an object path, so key order
//! is position order.

use std::ops::{Bound, ControlFlow};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};

use super::IndexError;
use crate::object::ObjectData;

const OBJECTS: TableDefinition<&str, &[u8]> = TableDefinition::new("objects");
const POSITIONS: TableDefinition<&[u8], &str> = TableDefinition::new("positions");

const TAG_UNFILLED: u8 = 0;
const TAG_OBJECT: u8 = 1;

/// Encode a position so that byte order equals numeric order.
#[must_use]
pub const fn encode_position(position: u64) -> [u8; 8] {
    position.to_be_bytes()
}

/// Inverse of [`encode_position`]. `None` for keys of the wrong width.
#[must_use]
pub fn decode_position(key: &[u8]) -> Option<u64> {
    key.try_into().ok().map(u64::from_be_bytes)
}

/// A default index value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexedValue {
    /// Counted, not yet read.
    Unfilled,
    Object(ObjectData),
}

impl IndexedValue {
    fn encode(&self) -> Result<Vec<u8>, IndexError> {
        match self {
            Self::Unfilled => Ok(vec![TAG_UNFILLED]),
            Self::Object(object) => {
                let mut out = vec![TAG_OBJECT];
                serde_json::to_writer(&mut out, object).map_err(|e| IndexError::Corrupt {
                    key: String::new(),
                    message: e.to_string(),
                })?;
                Ok(out)
            }
        }
    }

    fn decode(key: &str, bytes: &[u8]) -> Result<Self, IndexError> {
        let corrupt = |message: String| IndexError::Corrupt {
            key: key.to_owned(),
            message,
        };
        match bytes.split_first() {
            Some((&TAG_UNFILLED, [])) => Ok(Self::Unfilled),
            Some((&TAG_OBJECT, json)) => serde_json::from_slice(json)
                .map(Self::Object)
                .map_err(|e| corrupt(e.to_string())),
            _ => Err(corrupt("unknown value tag".to_owned())),
        }
    }

    #[must_use]
    pub const fn as_object(&self) -> Option<&ObjectData> {
        match self {
            Self::Unfilled => None,
            Self::Object(object) => Some(object),
        }
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// An open database that can be closed out from under its users.
///
/// `close` flips a flag that running loops poll between items, then waits
/// for in-flight transactions and drops the database.
struct Handle {
    path: PathBuf,
    db: RwLock<Option<Database>>,
    closed: AtomicBool,
}

impl Handle {
    fn create_fresh(path: &Path) -> Result<Self, IndexError> {
        let io = |source| IndexError::Io {
            path: path.to_owned(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io)?;
        }
        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(io(e)),
        }
        let db = Database::create(path)?;
        Ok(Self {
            path: path.to_owned(),
            db: RwLock::new(Some(db)),
            closed: AtomicBool::new(false),
        })
    }

    fn closed_error(&self) -> IndexError {
        IndexError::Closed {
            path: self.path.clone(),
        }
    }

    fn check_open(&self) -> Result<(), IndexError> {
        if self.closed.load(Ordering::Acquire) {
            Err(self.closed_error())
        } else {
            Ok(())
        }
    }

    fn with_db<T, E>(&self, f: impl FnOnce(&Database) -> Result<T, E>) -> Result<T, E>
    where
        E: From<IndexError>,
    {
        self.check_open()?;
        let guard = self.db.read().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(db) => f(db),
            None => Err(self.closed_error().into()),
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let db = self
            .db
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if db.is_some() {
            tracing::debug!(path = %self.path.display(), "index closed");
        }
    }
}

// ---------------------------------------------------------------------------
// DefaultStore
// ---------------------------------------------------------------------------

/// Storage of the default index.
pub struct DefaultStore {
    handle: Handle,
}

impl DefaultStore {
    /// Create the store at `path`, discarding whatever was there.
    ///
    /// # Errors
    /// I/O and database failures.
    pub fn create(path: &Path) -> Result<Self, IndexError> {
        let handle = Handle::create_fresh(path)?;
        handle.with_db(|db| {
            let txn = db.begin_write()?;
            txn.open_table(OBJECTS)?;
            txn.commit()?;
            Ok::<_, IndexError>(())
        })?;
        Ok(Self { handle })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.handle.path
    }

    /// Fails with [`IndexError::Closed`] once [`close`](Self::close) ran.
    ///
    /// # Errors
    /// See above.
    pub fn check_open(&self) -> Result<(), IndexError> {
        self.handle.check_open()
    }

    pub fn close(&self) {
        self.handle.close();
    }

    /// Insert placeholders for keys not already present. Returns how many
    /// keys were new.
    ///
    /// # Errors
    /// Database failures, or [`IndexError::Closed`].
    pub fn insert_placeholders(&self, keys: &[String]) -> Result<u64, IndexError> {
        let placeholder = IndexedValue::Unfilled.encode()?;
        self.handle.with_db(|db| {
            let txn = db.begin_write()?;
            let mut added = 0;
            {
                let mut table = txn.open_table(OBJECTS)?;
                for key in keys {
                    if table.get(key.as_str())?.is_none() {
                        table.insert(key.as_str(), placeholder.as_slice())?;
                        added += 1;
                    }
                }
            }
            txn.commit()?;
            Ok(added)
        })
    }

    /// Write a batch of values in one transaction. `None` removes the key.
    ///
    /// # Errors
    /// Database failures, or [`IndexError::Closed`].
    pub fn write_batch(&self, entries: &[(String, Option<IndexedValue>)]) -> Result<(), IndexError> {
        let encoded = entries
            .iter()
            .map(|(key, value)| Ok((key, value.as_ref().map(IndexedValue::encode).transpose()?)))
            .collect::<Result<Vec<_>, IndexError>>()?;
        self.handle.with_db(|db| {
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(OBJECTS)?;
                for (key, value) in &encoded {
                    match value {
                        Some(bytes) => {
                            table.insert(key.as_str(), bytes.as_slice())?;
                        }
                        None => {
                            table.remove(key.as_str())?;
                        }
                    }
                }
            }
            txn.commit()?;
            Ok(())
        })
    }

    /// # Errors
    /// Database failures, a corrupt value, or [`IndexError::Closed`].
    pub fn get(&self, key: &str) -> Result<Option<IndexedValue>, IndexError> {
        self.handle.with_db(|db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(OBJECTS)?;
            let value = table.get(key)?;
            value
                .map(|guard| IndexedValue::decode(key, guard.value()))
                .transpose()
        })
    }

    /// # Errors
    /// Database failures, or [`IndexError::Closed`].
    pub fn len(&self) -> Result<u64, IndexError> {
        self.handle.with_db(|db| {
            let txn = db.begin_read()?;
            Ok(txn.open_table(OBJECTS)?.len()?)
        })
    }

    /// Up to `limit` keys strictly after `after`, in key order.
    ///
    /// # Errors
    /// Database failures, or [`IndexError::Closed`].
    pub fn keys_after(&self, after: Option<&str>, limit: usize) -> Result<Vec<String>, IndexError> {
        self.handle.with_db(|db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(OBJECTS)?;
            let start = after.map_or(Bound::Unbounded, Bound::Excluded);
            let mut out = Vec::with_capacity(limit);
            for item in table.range::<&str>((start, Bound::Unbounded))?.take(limit) {
                let (key, _) = item?;
                out.push(key.value().to_owned());
            }
            Ok(out)
        })
    }

    /// Visit every entry in key order inside one read transaction, so the
    /// visitor sees a single consistent snapshot. The closed flag is checked
    /// between entries.
    ///
    /// # Errors
    /// Whatever the visitor returns, database failures, and
    /// [`IndexError::Closed`].
    pub fn for_each<E>(
        &self,
        mut visit: impl FnMut(&str, IndexedValue) -> Result<ControlFlow<()>, E>,
    ) -> Result<(), E>
    where
        E: From<IndexError>,
    {
        self.handle.with_db(|db| {
            let txn = db.begin_read().map_err(IndexError::from)?;
            let table = txn.open_table(OBJECTS).map_err(IndexError::from)?;
            let iter = table.iter().map_err(IndexError::from)?;
            for item in iter {
                self.handle.check_open()?;
                let (key, value) = item.map_err(IndexError::from)?;
                let key = key.value();
                let value = IndexedValue::decode(key, value.value())?;
                if visit(key, value)?.is_break() {
                    break;
                }
            }
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// FilteredStore
// ---------------------------------------------------------------------------

/// Storage of one filtered index.
pub struct FilteredStore {
    handle: Handle,
}

impl FilteredStore {
    /// Create the store at `path`, discarding whatever was there.
    ///
    /// # Errors
    /// I/O and database failures.
    pub fn create(path: &Path) -> Result<Self, IndexError> {
        let handle = Handle::create_fresh(path)?;
        handle.with_db(|db| {
            let txn = db.begin_write()?;
            txn.open_table(POSITIONS)?;
            txn.commit()?;
            Ok::<_, IndexError>(())
        })?;
        Ok(Self { handle })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.handle.path
    }

    /// # Errors
    /// [`IndexError::Closed`] once closed.
    pub fn check_open(&self) -> Result<(), IndexError> {
        self.handle.check_open()
    }

    pub fn close(&self) {
        self.handle.close();
    }

    /// Close and delete the backing file.
    pub fn destroy(&self) {
        self.close();
        if let Err(e) = std::fs::remove_file(&self.handle.path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(path = %self.handle.path.display(), "could not remove index file: {e}");
        }
    }

    /// # Errors
    /// Database failures, or [`IndexError::Closed`].
    pub fn append(&self, entries: &[(u64, String)]) -> Result<(), IndexError> {
        self.handle.with_db(|db| {
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(POSITIONS)?;
                for (position, path) in entries {
                    table.insert(encode_position(*position).as_slice(), path.as_str())?;
                }
            }
            txn.commit()?;
            Ok(())
        })
    }

    /// # Errors
    /// Database failures, or [`IndexError::Closed`].
    pub fn get(&self, position: u64) -> Result<Option<String>, IndexError> {
        self.handle.with_db(|db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(POSITIONS)?;
            let key = encode_position(position);
            Ok(table.get(key.as_slice())?.map(|v| v.value().to_owned()))
        })
    }

    /// Every entry in position order.
    ///
    /// # Errors
    /// Database failures, a malformed key, or [`IndexError::Closed`].
    pub fn entries(&self) -> Result<Vec<(u64, String)>, IndexError> {
        self.handle.with_db(|db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(POSITIONS)?;
            let mut out = Vec::new();
            for item in table.iter()? {
                let (key, value) = item?;
                let position =
                    decode_position(key.value()).ok_or_else(|| IndexError::Corrupt {
                        key: format!("{:?}", key.value()),
                        message: "position keys are 8 bytes".to_owned(),
                    })?;
                out.push((position, value.value().to_owned()));
            }
            Ok(out)
        })
    }

    /// # Errors
    /// Database failures, or [`IndexError::Closed`].
    pub fn len(&self) -> Result<u64, IndexError> {
        self.handle.with_db(|db| {
            let txn = db.begin_read()?;
            Ok(txn.open_table(POSITIONS)?.len()?)
        })
    }
}
