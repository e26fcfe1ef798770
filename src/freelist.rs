/*!
 * Bounded pool of reusable values with blocking, cancellable acquisition
 *
 * Used to bound how far a producer may run ahead of its consumer: once every value has been handed out, `get` waits
 * until one is returned through `put`.
 */

use crate::error::{Error, Result};
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Fixed capacity free-list
pub struct FreeList<T> {
    items: Mutex<Vec<T>>,
    available: Semaphore,
    size: usize,
}

impl<T> FreeList<T> {
    /// Create a free-list holding `size` values produced by `factory`
    pub fn new<F>(size: usize, mut factory: F) -> Self
    where
        F: FnMut() -> T,
    {
        let items: Vec<T> = (0..size).map(|_| factory()).collect();

        Self {
            items: Mutex::new(items),
            available: Semaphore::new(size),
            size,
        }
    }

    /// Take a value, waiting until one is available or `cancel` fires
    pub async fn get(&self, cancel: &CancellationToken) -> Result<T> {
        let permit = tokio::select! {
            permit = self.available.acquire() => {
                permit.map_err(|_| Error::Cancelled)?
            }
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        };

        permit.forget();
        self.pop()
    }

    /// Take a value if one is immediately available
    pub fn try_get(&self) -> Option<T> {
        let permit = self.available.try_acquire().ok()?;
        permit.forget();
        self.pop().ok()
    }

    /// Return a value to the list
    pub fn put(&self, item: T) {
        self.items.lock().push(item);
        self.available.add_permits(1);
    }

    /// Number of values currently available
    pub fn count(&self) -> usize {
        self.available.available_permits()
    }

    /// Total capacity
    pub fn size(&self) -> usize {
        self.size
    }

    fn pop(&self) -> Result<T> {
        self.items
            .lock()
            .pop()
            .ok_or_else(|| Error::InvalidArgument("free-list permit without a value".to_string()))
    }
}
