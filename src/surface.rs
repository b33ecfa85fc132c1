// Copyright 2024 The nvdec-vaapi-driver Authors
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! A decodable, exportable frame slot.

use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::MutexGuard;

use crate::backend::BackingImage;
use crate::format::FormatInfo;
use crate::sys::cuvid::cudaVideoChromaFormat;
use crate::sys::cuvid::cudaVideoSurfaceFormat;
use crate::va::VAContextID;
use crate::va::VA_INVALID_ID;

/// Mutable surface state, guarded by the surface mutex. The client thread
/// and the owning context's resolve thread both take it.
#[derive(Debug)]
pub struct SurfaceState {
    /// Slot in the decoder's internal picture pool, -1 while unbound.
    pub picture_idx: i32,
    /// Context that most recently began a picture against this surface;
    /// `VA_INVALID_ID` when none has.
    pub context_id: VAContextID,
    pub progressive_frame: bool,
    pub top_field_first: bool,
    pub second_field: bool,
    pub decode_failed: bool,
    /// Set between `BeginPicture` and the resolve thread finishing with the
    /// frame; `SyncSurface` waits for it to clear.
    pub resolving: bool,
}

pub struct NvSurface {
    pub width: u32,
    pub height: u32,
    pub format: cudaVideoSurfaceFormat,
    pub chroma: cudaVideoChromaFormat,
    pub bit_depth: u32,
    state: Mutex<SurfaceState>,
    cond: Condvar,
    /// Exportable image produced by the backend; owned by the backend, held
    /// here opaquely. Detaching through the backend is the only way to
    /// release it.
    pub backing: Mutex<Option<BackingImage>>,
}

impl NvSurface {
    pub fn new(
        width: u32,
        height: u32,
        format: cudaVideoSurfaceFormat,
        chroma: cudaVideoChromaFormat,
        bit_depth: u32,
    ) -> Self {
        Self {
            width,
            height,
            format,
            chroma,
            bit_depth,
            state: Mutex::new(SurfaceState {
                picture_idx: -1,
                context_id: VA_INVALID_ID,
                progressive_frame: true,
                top_field_first: false,
                second_field: false,
                decode_failed: false,
                resolving: false,
            }),
            cond: Condvar::new(),
            backing: Mutex::new(None),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, SurfaceState> {
        self.state.lock().unwrap()
    }

    /// Export layout of this surface's frames.
    pub fn format_info(&self) -> &'static FormatInfo {
        FormatInfo::from_surface_format(self.format, self.bit_depth)
    }

    /// Marks the surface in-flight; `SyncSurface` blocks until
    /// [`finish_resolve`](Self::finish_resolve).
    pub fn begin_resolve(&self) {
        self.state().resolving = true;
    }

    /// Clears the in-flight flag and wakes all `SyncSurface` waiters. Called
    /// by the resolve thread on success and on every failure path.
    pub fn finish_resolve(&self) {
        self.state().resolving = false;
        self.cond.notify_all();
    }

    /// Blocks until the resolve thread is done with the surface.
    pub fn wait_idle(&self) {
        let mut state = self.state();
        while state.resolving {
            state = self.cond.wait(state).unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn test_surface() -> NvSurface {
        NvSurface::new(
            1920,
            1080,
            cudaVideoSurfaceFormat::NV12,
            cudaVideoChromaFormat::YUV420,
            8,
        )
    }

    #[test]
    fn test_wait_idle_returns_once_resolved() {
        let surface = Arc::new(test_surface());
        surface.begin_resolve();

        let resolver = {
            let surface = Arc::clone(&surface);
            std::thread::spawn(move || {
                std::thread::sleep(std::time::Duration::from_millis(20));
                surface.finish_resolve();
            })
        };

        surface.wait_idle();
        assert!(!surface.state().resolving);
        resolver.join().unwrap();
    }

    #[test]
    fn test_wait_idle_on_idle_surface_does_not_block() {
        let surface = test_surface();
        surface.wait_idle();
    }
}
