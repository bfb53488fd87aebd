//! Versioned single-writer/multi-reader snapshot store
//!
//! Readers always receive a complete `Arc` snapshot; writers build a new
//! value, validate it, and swap it in. The previous snapshot is retained
//! so a bad publish can be rolled back.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{Error, Result};

/// Values that can be checked before they are published
pub trait Validate {
    /// # Errors
    ///
    /// Returns a validation error describing the first invalid field
    fn validate(&self) -> Result<()>;
}

/// One published snapshot
#[derive(Debug, Clone, Serialize)]
pub struct Versioned<T> {
    pub version: u64,
    pub published_at: DateTime<Utc>,
    pub value: T,
}

#[derive(Debug)]
struct Slots<T> {
    current: Arc<Versioned<T>>,
    previous: Option<Arc<Versioned<T>>>,
}

/// Atomic, versioned configuration store
#[derive(Debug)]
pub struct ConfigStore<T> {
    slots: RwLock<Slots<T>>,
}

impl<T: Validate + Clone> ConfigStore<T> {
    /// Create a store holding `initial` as version 1
    #[must_use]
    pub fn new(initial: T) -> Self {
        Self {
            slots: RwLock::new(Slots {
                current: Arc::new(Versioned {
                    version: 1,
                    published_at: Utc::now(),
                    value: initial,
                }),
                previous: None,
            }),
        }
    }

    /// Current snapshot
    #[must_use]
    pub fn current(&self) -> Arc<Versioned<T>> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .current
            .clone()
    }

    /// Snapshot that a rollback would restore, if any
    #[must_use]
    pub fn previous(&self) -> Option<Arc<Versioned<T>>> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .previous
            .clone()
    }

    /// Validate and publish a new value
    ///
    /// # Errors
    ///
    /// Returns the validation error; the current snapshot is left untouched
    pub fn publish(&self, value: T) -> Result<Arc<Versioned<T>>> {
        value.validate()?;

        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let next = Arc::new(Versioned {
            version: slots.current.version + 1,
            published_at: Utc::now(),
            value,
        });
        slots.previous = Some(std::mem::replace(&mut slots.current, next.clone()));

        tracing::info!(version = next.version, "published configuration snapshot");
        Ok(next)
    }

    /// Restore the previous snapshot under a new version number
    ///
    /// # Errors
    ///
    /// Returns a conflict if nothing has been published since startup
    pub fn rollback(&self) -> Result<Arc<Versioned<T>>> {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let Some(previous) = slots.previous.take() else {
            return Err(Error::Conflict(
                "no previous configuration to roll back to".to_string(),
            ));
        };

        let restored = Arc::new(Versioned {
            version: slots.current.version + 1,
            published_at: Utc::now(),
            value: previous.value.clone(),
        });
        slots.previous = Some(std::mem::replace(&mut slots.current, restored.clone()));

        tracing::info!(
            version = restored.version,
            restored_from = previous.version,
            "rolled back configuration snapshot"
        );
        Ok(restored)
    }
}
