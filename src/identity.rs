//! Recovering the wrapper for a device when only some interface view of it is at hand.
//!
//! The platform promises that querying any view of an object for its canonical identity
//! yields the same key. Wrappers register under that key when constructed. Third-party
//! layers sometimes break the promise, so views can also carry a pointer back to their
//! wrapper as attached private data, which serves as the last resort.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tracing::{error, info, warn};

use crate::error::PlatformError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdentityKey(pub u64);

/// One interface view of an underlying device object.
pub trait InterfaceView<W> {
    /// The wrapper itself, when this view already is one.
    fn as_wrapper(&self) -> Option<Arc<W>>;

    /// Canonical identity of the underlying object. Failure breaks a platform guarantee.
    fn canonicalize(&self) -> Result<IdentityKey, PlatformError>;

    /// The wrapper recorded in the object's private data at construction time.
    fn private_data(&self) -> Option<Arc<W>>;
}

/// Maps canonical identities to their single wrapper.
#[derive(Debug)]
pub struct DeviceIdentityMap<W> {
    map: Mutex<HashMap<IdentityKey, Weak<W>>>,
}

impl<W> Default for DeviceIdentityMap<W> {
    fn default() -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
        }
    }
}

impl<W> DeviceIdentityMap<W> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `wrapper` for the object behind `view` and returns the key.
    ///
    /// Keep the key: once the underlying object is gone it can no longer be queried, and
    /// [`Self::unregister`] needs it.
    pub fn register(&self, view: &dyn InterfaceView<W>, wrapper: &Arc<W>) -> IdentityKey {
        let key = canonical_key(view);
        info!(key = key.0, "registering device wrapper");
        self.lock().insert(key, Arc::downgrade(wrapper));
        key
    }

    /// Removes `key` only if it still maps to `wrapper`.
    pub fn unregister(&self, key: IdentityKey, wrapper: &Arc<W>) -> bool {
        let mut map = self.lock();
        match map.get(&key) {
            Some(current) if Weak::ptr_eq(current, &Arc::downgrade(wrapper)) => {
                info!(key = key.0, "unregistering device wrapper");
                map.remove(&key);
                true
            }
            Some(_) => {
                info!(
                    key = key.0,
                    "BUG: device identity maps to a different wrapper than the one being removed"
                );
                false
            }
            None => false,
        }
    }

    /// Finds the wrapper for `view`.
    ///
    /// Tries, in order: the view being a wrapper already, the canonical-key map, and the
    /// private data attached to the object.
    pub fn lookup(&self, view: &dyn InterfaceView<W>) -> Option<Arc<W>> {
        if let Some(wrapper) = view.as_wrapper() {
            return Some(wrapper);
        }

        let key = canonical_key(view);
        let found = self.lock().get(&key).and_then(Weak::upgrade);
        if found.is_some() {
            return found;
        }

        match view.private_data() {
            Some(wrapper) => {
                info!(
                    key = key.0,
                    "unwrapped device and identity violation, found wrapper via private data"
                );
                Some(wrapper)
            }
            None => {
                warn!(key = key.0, "no wrapper found for device view");
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<IdentityKey, Weak<W>>> {
        self.map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// Continuing with an unknown wrapper identity would corrupt every later lookup.
fn canonical_key<W>(view: &dyn InterfaceView<W>) -> IdentityKey {
    match view.canonicalize() {
        Ok(key) => key,
        Err(err) => {
            error!(%err, "canonical identity query failed");
            std::process::abort();
        }
    }
}
