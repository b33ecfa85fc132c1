// Copyright 2024 The nvdec-vaapi-driver Authors
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! Direct DMA-BUF export backend.
//!
//! Backing images are plain device allocations made through the CUDA
//! virtual-memory API with POSIX-fd shareable handles, so every plane can be
//! handed out as a linear DMA-BUF without going through a windowing
//! interop. Decoded pictures are copied plane-by-plane from the decoder's
//! mapped frame into the backing allocation.

use std::os::fd::FromRawFd;
use std::os::fd::OwnedFd;
use std::sync::Arc;
use std::sync::Mutex;

use anyhow::Context as _;
use drm_fourcc::DrmModifier;

use crate::backend::BackingImage;
use crate::backend::BackingPlane;
use crate::backend::BackingResource;
use crate::backend::ExporterCaps;
use crate::backend::SurfaceExporter;
use crate::device::cuvid::CudaDevice;
use crate::round_up;
use crate::surface::NvSurface;
use crate::sys::cuda;
use crate::sys::cuda::CUdeviceptr;
use crate::sys::cuda::CUmemAccessDesc;
use crate::sys::cuda::CUmemAllocationProp;
use crate::sys::cuda::CUmemGenericAllocationHandle;
use crate::sys::cuda::CUmemLocation;

/// Pitch alignment for exported planes. Scanout and sampling engines are
/// happy with 256; NVDEC itself never maps these allocations.
const EXPORT_PITCH_ALIGN: u32 = 256;

pub struct DirectExporter {
    device: Arc<CudaDevice>,
    /// Resources detached outside a device-context scope, freed on the next
    /// opportunity that has one.
    retired: Mutex<Vec<BackingResource>>,
}

impl DirectExporter {
    pub fn new(device: Arc<CudaDevice>) -> Self {
        Self { device, retired: Mutex::new(Vec::new()) }
    }

    fn allocation_prop(&self) -> CUmemAllocationProp {
        CUmemAllocationProp {
            type_: cuda::CU_MEM_ALLOCATION_TYPE_PINNED,
            requestedHandleTypes: cuda::CU_MEM_HANDLE_TYPE_POSIX_FILE_DESCRIPTOR,
            location: CUmemLocation {
                type_: cuda::CU_MEM_LOCATION_TYPE_DEVICE,
                id: self.device.device_ordinal(),
            },
            ..Default::default()
        }
    }

    fn allocate_plane(
        &self,
        size: usize,
    ) -> anyhow::Result<(CUdeviceptr, CUmemGenericAllocationHandle, OwnedFd)> {
        let api = self.device.api();
        let prop = self.allocation_prop();

        let mut handle: CUmemGenericAllocationHandle = 0;
        cuda::check(api, unsafe { (api.cuMemCreate)(&mut handle, size, &prop, 0) }, "cuMemCreate")?;

        let mut ptr: CUdeviceptr = 0;
        let result = (|| {
            cuda::check(
                api,
                unsafe { (api.cuMemAddressReserve)(&mut ptr, size, 0, 0, 0) },
                "cuMemAddressReserve",
            )?;
            cuda::check(api, unsafe { (api.cuMemMap)(ptr, size, 0, handle, 0) }, "cuMemMap")?;
            let access = CUmemAccessDesc {
                location: prop.location,
                flags: cuda::CU_MEM_ACCESS_FLAGS_PROT_READWRITE,
            };
            cuda::check(
                api,
                unsafe { (api.cuMemSetAccess)(ptr, size, &access, 1) },
                "cuMemSetAccess",
            )?;
            let mut fd: i32 = -1;
            cuda::check(
                api,
                unsafe {
                    (api.cuMemExportToShareableHandle)(
                        (&mut fd as *mut i32).cast(),
                        handle,
                        cuda::CU_MEM_HANDLE_TYPE_POSIX_FILE_DESCRIPTOR,
                        0,
                    )
                },
                "cuMemExportToShareableHandle",
            )?;
            Ok(unsafe { OwnedFd::from_raw_fd(fd) })
        })();

        match result {
            Ok(fd) => Ok((ptr, handle, fd)),
            Err(e) => {
                if ptr != 0 {
                    unsafe {
                        (api.cuMemUnmap)(ptr, size);
                        (api.cuMemAddressFree)(ptr, size);
                    }
                }
                unsafe { (api.cuMemRelease)(handle) };
                Err(e)
            }
        }
    }

    fn free_resource(&self, resource: BackingResource) {
        let api = self.device.api();
        if let BackingResource::Vmm { ranges, handles } = resource {
            for (ptr, size) in ranges {
                unsafe {
                    (api.cuMemUnmap)(ptr, size);
                    (api.cuMemAddressFree)(ptr, size);
                }
            }
            for handle in handles {
                unsafe { (api.cuMemRelease)(handle) };
            }
        }
    }

    fn drain_retired(&self) {
        let retired = std::mem::take(&mut *self.retired.lock().unwrap());
        for resource in retired {
            self.free_resource(resource);
        }
    }
}

impl SurfaceExporter for DirectExporter {
    fn init(&self) -> anyhow::Result<ExporterCaps> {
        // The VMM path has no format restrictions, so everything NVDEC can
        // decode can also be exported.
        Ok(ExporterCaps { supports_16bit_surface: true, supports_444_surface: true })
    }

    fn realise_surface(&self, surface: &NvSurface) -> anyhow::Result<()> {
        let mut backing = surface.backing.lock().unwrap();
        if backing.is_some() {
            return Ok(());
        }
        self.drain_retired();

        let api = self.device.api();
        let info = surface.format_info();
        let prop = self.allocation_prop();
        let mut granularity: usize = 0;
        cuda::check(
            api,
            unsafe {
                (api.cuMemGetAllocationGranularity)(
                    &mut granularity,
                    &prop,
                    cuda::CU_MEM_ALLOC_GRANULARITY_MINIMUM,
                )
            },
            "cuMemGetAllocationGranularity",
        )?;
        let granularity = granularity.max(1);

        let mut planes = Vec::with_capacity(info.planes.len());
        let mut ranges = Vec::new();
        let mut handles = Vec::new();
        for plane in info.planes {
            let row_bytes = (surface.width >> plane.ss.x) * info.bpc * plane.channels;
            let rows = surface.height >> plane.ss.y;
            let pitch = round_up(row_bytes, EXPORT_PITCH_ALIGN);
            let size = (pitch as usize * rows as usize).div_ceil(granularity) * granularity;

            let (ptr, handle, fd) = self
                .allocate_plane(size)
                .with_context(|| format!("allocating {}x{rows} export plane", pitch))?;
            ranges.push((ptr, size));
            handles.push(handle);
            planes.push(BackingPlane {
                fd,
                offset: 0,
                pitch,
                size: size as u32,
                device_ptr: ptr,
            });
        }

        log::debug!(
            "Realised {}x{} backing image with {} planes for surface",
            surface.width,
            surface.height,
            planes.len()
        );
        *backing = Some(BackingImage {
            format: info.format,
            width: surface.width,
            height: surface.height,
            modifier: DrmModifier::Linear.into(),
            planes,
            resource: BackingResource::Vmm { ranges, handles },
        });
        Ok(())
    }

    fn export_cuda_ptr(
        &self,
        device_ptr: CUdeviceptr,
        surface: &NvSurface,
        pitch: u32,
    ) -> anyhow::Result<()> {
        self.realise_surface(surface)?;
        let api = self.device.api();
        let backing = surface.backing.lock().unwrap();
        let backing = backing.as_ref().unwrap();
        let info = surface.format_info();

        // The mapped frame is one pitched allocation with the planes stacked
        // in order; walk it with the same subsampling the format declares.
        let mut src_offset: u64 = 0;
        for (plane, dst) in info.planes.iter().zip(backing.planes.iter()) {
            let row_bytes = (surface.width >> plane.ss.x) * info.bpc * plane.channels;
            let rows = surface.height >> plane.ss.y;
            let copy = cuda::CUDA_MEMCPY2D {
                srcMemoryType: cuda::CU_MEMORYTYPE_DEVICE,
                srcDevice: device_ptr + src_offset,
                srcPitch: pitch as usize,
                dstMemoryType: cuda::CU_MEMORYTYPE_DEVICE,
                dstDevice: dst.device_ptr,
                dstPitch: dst.pitch as usize,
                WidthInBytes: row_bytes as usize,
                Height: rows as usize,
                ..Default::default()
            };
            cuda::check(api, unsafe { (api.cuMemcpy2D)(&copy) }, "cuMemcpy2D")?;
            src_offset += pitch as u64 * rows as u64;
        }
        Ok(())
    }

    fn detach_backing_image(&self, surface: &NvSurface) {
        if let Some(backing) = surface.backing.lock().unwrap().take() {
            // No device context is guaranteed to be current here; park the
            // device resources and free them under the next entered scope.
            self.retired.lock().unwrap().push(backing.resource);
        }
    }

    fn destroy_all_backing_images(&self) {
        self.drain_retired();
    }

    fn release(&self) {
        self.drain_retired();
    }
}
