// Copyright 2024 The nvdec-vaapi-driver Authors
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! A recording exporter for tests: backing images are made of memfd planes
//! and every `export_cuda_ptr` call is logged so resolve ordering can be
//! asserted.

use std::os::fd::OwnedFd;
use std::sync::Arc;
use std::sync::Mutex;

use crate::backend::BackingImage;
use crate::backend::BackingPlane;
use crate::backend::BackingResource;
use crate::backend::ExporterCaps;
use crate::backend::SurfaceExporter;
use crate::round_up;
use crate::surface::NvSurface;
use crate::sys::cuda::CUdeviceptr;

#[derive(Default)]
pub struct DummyExporter {
    /// Device pointers passed to `export_cuda_ptr`, in call order.
    pub export_order: Arc<Mutex<Vec<CUdeviceptr>>>,
    pub caps: ExporterCaps,
}

impl DummyExporter {
    pub fn new() -> Self {
        Self {
            export_order: Default::default(),
            caps: ExporterCaps { supports_16bit_surface: true, supports_444_surface: true },
        }
    }

    fn plane_fd() -> OwnedFd {
        nix::sys::memfd::memfd_create(
            c"nvd-test-plane",
            nix::sys::memfd::MemFdCreateFlag::empty(),
        )
        .expect("memfd_create failed")
    }
}

impl SurfaceExporter for DummyExporter {
    fn init(&self) -> anyhow::Result<ExporterCaps> {
        Ok(self.caps)
    }

    fn realise_surface(&self, surface: &NvSurface) -> anyhow::Result<()> {
        let mut backing = surface.backing.lock().unwrap();
        if backing.is_some() {
            return Ok(());
        }
        let info = surface.format_info();
        let planes = info
            .planes
            .iter()
            .map(|p| {
                let pitch = round_up((surface.width >> p.ss.x) * info.bpc * p.channels, 64);
                let rows = surface.height >> p.ss.y;
                BackingPlane {
                    fd: Self::plane_fd(),
                    offset: 0,
                    pitch,
                    size: pitch * rows,
                    device_ptr: 0,
                }
            })
            .collect();
        *backing = Some(BackingImage {
            format: info.format,
            width: surface.width,
            height: surface.height,
            modifier: 0,
            planes,
            resource: BackingResource::None,
        });
        Ok(())
    }

    fn export_cuda_ptr(
        &self,
        device_ptr: CUdeviceptr,
        surface: &NvSurface,
        _pitch: u32,
    ) -> anyhow::Result<()> {
        self.realise_surface(surface)?;
        self.export_order.lock().unwrap().push(device_ptr);
        Ok(())
    }

    fn detach_backing_image(&self, surface: &NvSurface) {
        surface.backing.lock().unwrap().take();
    }

    fn destroy_all_backing_images(&self) {}

    fn release(&self) {}
}
