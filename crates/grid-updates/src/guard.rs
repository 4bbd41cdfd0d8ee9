//! In-flight claims on `(image, field)` pairs.
//!
//! A claim without a field covers the whole image and conflicts with every
//! field-scoped claim on that image, and the other way around.
//!
//! Claim and release each run under a single mutex acquisition, so the
//! check-and-register step is indivisible even when workers run on several
//! runtime threads. Neither call suspends.

use grid_core::ImageId;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Claims held on a single image.
#[derive(Debug, Default)]
struct ImageClaims {
    whole_image: bool,
    fields: HashSet<String>,
}

impl ImageClaims {
    fn is_empty(&self) -> bool {
        !self.whole_image && self.fields.is_empty()
    }

    fn admits(&self, field: Option<&str>) -> bool {
        if self.whole_image {
            return false;
        }
        match field {
            Some(field) => !self.fields.contains(field),
            None => self.fields.is_empty(),
        }
    }
}

/// Tracks which image fields have a mutation in flight.
#[derive(Debug, Default)]
pub struct ConflictGuard {
    claims: Mutex<HashMap<ImageId, ImageClaims>>,
}

impl ConflictGuard {
    /// Creates an empty guard, shared between the coordinator and its claims.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ImageId, ImageClaims>> {
        self.claims.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim `(image_id, field)` if nothing overlapping is held.
    ///
    /// Returns `false` when an overlapping claim exists.
    pub fn claim(&self, image_id: &ImageId, field: Option<&str>) -> bool {
        let mut claims = self.lock();
        let entry = claims.entry(image_id.clone()).or_default();
        if !entry.admits(field) {
            return false;
        }
        match field {
            Some(field) => {
                entry.fields.insert(field.to_owned());
            }
            None => entry.whole_image = true,
        }
        true
    }

    /// Remove the claim on `(image_id, field)` unconditionally.
    pub fn release(&self, image_id: &ImageId, field: Option<&str>) {
        remove_claim(&mut self.lock(), image_id, field);
    }

    /// Like [`claim`](Self::claim), returning a guard that releases on drop.
    pub fn try_claim(self: &Arc<Self>, image_id: &ImageId, field: Option<&str>) -> Option<Claim> {
        self.claim(image_id, field).then(|| Claim {
            guard: Arc::clone(self),
            image_id: image_id.clone(),
            field: field.map(str::to_owned),
            released: false,
        })
    }

    /// Whether a claim overlapping `(image_id, field)` is currently held.
    pub fn is_claimed(&self, image_id: &ImageId, field: Option<&str>) -> bool {
        self.lock()
            .get(image_id)
            .is_some_and(|entry| !entry.admits(field))
    }

    /// Number of images with at least one claim.
    pub fn claimed_images(&self) -> usize {
        self.lock().len()
    }
}

fn remove_claim(
    claims: &mut HashMap<ImageId, ImageClaims>,
    image_id: &ImageId,
    field: Option<&str>,
) {
    if let Some(entry) = claims.get_mut(image_id) {
        match field {
            Some(field) => {
                entry.fields.remove(field);
            }
            None => entry.whole_image = false,
        }
        if entry.is_empty() {
            claims.remove(image_id);
        }
    }
}

/// RAII claim - released on drop
#[derive(Debug)]
pub struct Claim {
    guard: Arc<ConflictGuard>,
    image_id: ImageId,
    field: Option<String>,
    released: bool,
}

impl Claim {
    /// Image this claim covers.
    pub fn image_id(&self) -> &ImageId {
        &self.image_id
    }

    /// Field this claim covers, `None` for the whole image.
    pub fn field(&self) -> Option<&str> {
        self.field.as_deref()
    }

    /// Run `settle`, then release the claim, all under one guard lock.
    ///
    /// A concurrent [`ConflictGuard::claim`] either runs before `settle` or
    /// sees the claim already gone, never the state in between. `settle` must
    /// not call back into the guard.
    pub fn release_after<T>(mut self, settle: impl FnOnce() -> T) -> T {
        let guard = Arc::clone(&self.guard);
        let mut claims = guard.lock();
        let settled = settle();
        remove_claim(&mut claims, &self.image_id, self.field.as_deref());
        self.released = true;
        settled
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        if !self.released {
            self.guard.release(&self.image_id, self.field.as_deref());
        }
    }
}
