// Copyright 2024 The nvdec-vaapi-driver Authors
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! Surface export backends.
//!
//! A backend turns a decoded picture's device memory into an externally
//! exportable GPU surface (the "backing image") and describes it as DMA-BUF
//! planes. Two real implementations exist: [`direct`] allocates exportable
//! device memory itself, [`egl`] goes through an EGLStream producer. The
//! core only talks to [`SurfaceExporter`].

use std::os::fd::AsRawFd;
use std::os::fd::OwnedFd;

use crate::format::NvFormat;
use crate::surface::NvSurface;
use crate::sys::cuda::CUdeviceptr;
use crate::sys::cuda::CUmemGenericAllocationHandle;
use crate::va::VADRMPRIMESurfaceDescriptor;

pub mod direct;
#[cfg(test)]
pub(crate) mod dummy;
pub mod egl;

/// What the exporter's device/driver introspection allows the driver to
/// advertise.
#[derive(Copy, Clone, Debug, Default)]
pub struct ExporterCaps {
    pub supports_16bit_surface: bool,
    pub supports_444_surface: bool,
}

/// One plane of a backing image.
pub struct BackingPlane {
    pub fd: OwnedFd,
    pub offset: u32,
    pub pitch: u32,
    pub size: u32,
    /// Device address of the plane, for decode-to-image copies and
    /// `GetImage` readback.
    pub device_ptr: CUdeviceptr,
}

/// Backend-private resources a backing image keeps alive.
pub enum BackingResource {
    /// CUDA VMM state of the direct backend: the reserved address ranges and
    /// the allocation handles mapped into them, one per plane.
    Vmm { ranges: Vec<(CUdeviceptr, usize)>, handles: Vec<CUmemGenericAllocationHandle> },
    /// EGLStream state of the EGL backend.
    Egl { stream: *mut std::ffi::c_void, image: *mut std::ffi::c_void },
    /// Nothing to free beyond the plane fds.
    None,
}

unsafe impl Send for BackingResource {}

/// The exportable image a backend realised for one surface. Owned by the
/// backend; surfaces hold it opaquely and release it only by detaching.
pub struct BackingImage {
    pub format: NvFormat,
    pub width: u32,
    pub height: u32,
    pub modifier: u64,
    pub planes: Vec<BackingPlane>,
    pub resource: BackingResource,
}

/// The seven operations the decode pipeline needs from an export backend.
pub trait SurfaceExporter: Send + Sync {
    /// One-shot setup; reports the capability flags the driver advertises.
    fn init(&self) -> anyhow::Result<ExporterCaps>;

    /// Ensures a backing image exists for the surface at its declared
    /// format and size. Idempotent.
    fn realise_surface(&self, surface: &NvSurface) -> anyhow::Result<()>;

    /// Copies one decoded picture out of the decoder into the surface's
    /// backing image. Called from the resolve thread with the device
    /// context current.
    fn export_cuda_ptr(
        &self,
        device_ptr: CUdeviceptr,
        surface: &NvSurface,
        pitch: u32,
    ) -> anyhow::Result<()>;

    /// Writes the DMA-PRIME-v2 separate-layer descriptor for the surface's
    /// backing image. The descriptor receives duplicated fds the caller
    /// owns.
    fn fill_export_descriptor(
        &self,
        surface: &NvSurface,
        desc: &mut VADRMPRIMESurfaceDescriptor,
    ) -> anyhow::Result<()> {
        let backing = surface.backing.lock().unwrap();
        let backing = backing
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("surface has no backing image"))?;
        let info = surface.format_info();

        *desc = Default::default();
        desc.fourcc = info.drm_format;
        desc.width = backing.width;
        desc.height = backing.height;
        desc.num_objects = backing.planes.len() as u32;
        desc.num_layers = backing.planes.len() as u32;
        for (i, plane) in backing.planes.iter().enumerate() {
            let dup = nix::unistd::dup(plane.fd.as_raw_fd())?;
            desc.objects[i].fd = dup;
            desc.objects[i].size = plane.size;
            desc.objects[i].drm_format_modifier = backing.modifier;
            desc.layers[i].drm_format = info.planes[i].drm_format;
            desc.layers[i].num_planes = 1;
            desc.layers[i].object_index[0] = i as u32;
            desc.layers[i].offset[0] = plane.offset;
            desc.layers[i].pitch[0] = plane.pitch;
        }
        Ok(())
    }

    /// Releases the surface's backing image; the surface becomes
    /// re-realisable.
    fn detach_backing_image(&self, surface: &NvSurface);

    /// Frees every backing resource the backend still tracks. Called at
    /// terminate after all surfaces have been detached.
    fn destroy_all_backing_images(&self);

    /// Final teardown of the exporter itself.
    fn release(&self);
}
