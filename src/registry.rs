// Copyright 2024 The nvdec-vaapi-driver Authors
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! The typed handle table behind every client-visible id.
//!
//! Ids are handed out monotonically starting at 1; id 0 is `VA_INVALID_ID`.
//! Lookups are linear scans under one mutex, matching the handful of live
//! objects a decode session ever has. Typed getters return `None` for a
//! wrong-type id so each entry point can map that to its own "invalid X"
//! status.

use std::sync::Arc;
use std::sync::Mutex;

use crate::context::NvContext;
use crate::driver::NvBuffer;
use crate::driver::NvConfig;
use crate::driver::NvImage;
use crate::surface::NvSurface;
use crate::va::VAGenericID;
use crate::va::VA_INVALID_ID;

#[derive(Clone)]
pub enum ObjectData {
    Config(Arc<NvConfig>),
    Context(Arc<NvContext>),
    Surface(Arc<NvSurface>),
    Buffer(Arc<NvBuffer>),
    Image(Arc<NvImage>),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ObjectKind {
    Config,
    Context,
    Surface,
    Buffer,
    Image,
}

impl ObjectData {
    pub fn kind(&self) -> ObjectKind {
        match self {
            ObjectData::Config(_) => ObjectKind::Config,
            ObjectData::Context(_) => ObjectKind::Context,
            ObjectData::Surface(_) => ObjectKind::Surface,
            ObjectData::Buffer(_) => ObjectKind::Buffer,
            ObjectData::Image(_) => ObjectKind::Image,
        }
    }
}

struct Object {
    id: VAGenericID,
    data: ObjectData,
}

#[derive(Default)]
struct RegistryInner {
    next_id: VAGenericID,
    objects: Vec<Object>,
}

#[derive(Default)]
pub struct Registry {
    inner: Mutex<RegistryInner>,
}

impl Registry {
    pub fn new() -> Self {
        Default::default()
    }

    /// Inserts a payload and returns its fresh id.
    pub fn insert(&self, data: ObjectData) -> VAGenericID {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.objects.push(Object { id, data });
        id
    }

    pub fn get(&self, id: VAGenericID) -> Option<ObjectData> {
        if id == VA_INVALID_ID {
            return None;
        }
        let inner = self.inner.lock().unwrap();
        inner.objects.iter().find(|o| o.id == id).map(|o| o.data.clone())
    }

    pub fn config(&self, id: VAGenericID) -> Option<Arc<NvConfig>> {
        match self.get(id) {
            Some(ObjectData::Config(c)) => Some(c),
            _ => None,
        }
    }

    pub fn context(&self, id: VAGenericID) -> Option<Arc<NvContext>> {
        match self.get(id) {
            Some(ObjectData::Context(c)) => Some(c),
            _ => None,
        }
    }

    pub fn surface(&self, id: VAGenericID) -> Option<Arc<NvSurface>> {
        match self.get(id) {
            Some(ObjectData::Surface(s)) => Some(s),
            _ => None,
        }
    }

    pub fn buffer(&self, id: VAGenericID) -> Option<Arc<NvBuffer>> {
        match self.get(id) {
            Some(ObjectData::Buffer(b)) => Some(b),
            _ => None,
        }
    }

    pub fn image(&self, id: VAGenericID) -> Option<Arc<NvImage>> {
        match self.get(id) {
            Some(ObjectData::Image(i)) => Some(i),
            _ => None,
        }
    }

    /// Removes the object; no-op for `VA_INVALID_ID` or an unknown id.
    pub fn remove(&self, id: VAGenericID) {
        if id == VA_INVALID_ID {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        inner.objects.retain(|o| o.id != id);
    }

    /// Snapshot of every live surface, for terminate-time detach.
    pub fn surfaces(&self) -> Vec<Arc<NvSurface>> {
        let inner = self.inner.lock().unwrap();
        inner
            .objects
            .iter()
            .filter_map(|o| match &o.data {
                ObjectData::Surface(s) => Some(Arc::clone(s)),
                _ => None,
            })
            .collect()
    }

    /// Removes and returns every context, so terminate can destroy them
    /// before the remaining objects are dropped.
    pub fn take_contexts(&self) -> Vec<(VAGenericID, Arc<NvContext>)> {
        let mut inner = self.inner.lock().unwrap();
        let mut contexts = Vec::new();
        inner.objects.retain(|o| match &o.data {
            ObjectData::Context(c) => {
                contexts.push((o.id, Arc::clone(c)));
                false
            }
            _ => true,
        });
        contexts
    }

    /// Drops every remaining object.
    pub fn clear(&self) {
        self.inner.lock().unwrap().objects.clear();
    }

    pub fn live_count(&self, kind: ObjectKind) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.objects.iter().filter(|o| o.data.kind() == kind).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sys::cuvid::cudaVideoChromaFormat;
    use crate::sys::cuvid::cudaVideoSurfaceFormat;
    use crate::va::VABufferType;

    fn surface() -> ObjectData {
        ObjectData::Surface(Arc::new(NvSurface::new(
            64,
            64,
            cudaVideoSurfaceFormat::NV12,
            cudaVideoChromaFormat::YUV420,
            8,
        )))
    }

    fn buffer() -> ObjectData {
        ObjectData::Buffer(Arc::new(NvBuffer::new(
            VABufferType::SliceData as i32,
            &[1, 2, 3],
            1,
            0,
        )))
    }

    #[test]
    fn test_ids_are_monotonic_and_start_past_invalid() {
        let registry = Registry::new();
        let a = registry.insert(surface());
        let b = registry.insert(buffer());
        assert!(a != VA_INVALID_ID);
        assert!(b > a);
    }

    #[test]
    fn test_lookup_preserves_type() {
        let registry = Registry::new();
        let id = registry.insert(surface());
        assert_eq!(registry.get(id).unwrap().kind(), ObjectKind::Surface);
        assert!(registry.surface(id).is_some());
        // The same id through a differently-typed getter must miss.
        assert!(registry.buffer(id).is_none());
        assert!(registry.context(id).is_none());
    }

    #[test]
    fn test_delete_then_lookup_misses() {
        let registry = Registry::new();
        let id = registry.insert(buffer());
        registry.remove(id);
        assert!(registry.get(id).is_none());
        // Deleting again (or deleting the invalid id) is a no-op.
        registry.remove(id);
        registry.remove(VA_INVALID_ID);
    }

    #[test]
    fn test_invalid_id_never_resolves() {
        let registry = Registry::new();
        registry.insert(surface());
        assert!(registry.get(VA_INVALID_ID).is_none());
    }

    #[test]
    fn test_live_count_tracks_inserts_and_removes() {
        let registry = Registry::new();
        let ids: Vec<_> = (0..4).map(|_| registry.insert(surface())).collect();
        assert_eq!(registry.live_count(ObjectKind::Surface), 4);
        registry.remove(ids[1]);
        registry.remove(ids[2]);
        assert_eq!(registry.live_count(ObjectKind::Surface), 2);
    }
}
