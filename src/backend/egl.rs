// Copyright 2024 The nvdec-vaapi-driver Authors
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! EGL-image export backend.
//!
//! Backing images are produced by presenting decoded frames into an
//! EGLStream whose consumer side hands back an EGLImage, which is then
//! exported as DMA-BUF planes with `EGL_MESA_image_dma_buf_export`. This is
//! the fallback for driver stacks where the direct allocation path is not
//! usable; it supports the 16-bit formats but not the 4:4:4 layouts.

#![allow(non_snake_case)]

use std::ffi::c_void;
use std::os::fd::FromRawFd;
use std::os::fd::OwnedFd;
use std::sync::Arc;
use std::sync::Mutex;

use anyhow::anyhow;
use anyhow::Context as _;

use crate::backend::BackingImage;
use crate::backend::BackingPlane;
use crate::backend::BackingResource;
use crate::backend::ExporterCaps;
use crate::backend::SurfaceExporter;
use crate::device::cuvid::CudaDevice;
use crate::surface::NvSurface;
use crate::sys::cuda;
use crate::sys::cuda::CUdeviceptr;
use crate::sys::cuda::CUeglFrame;

type EGLDisplay = *mut c_void;
type EGLStreamKHR = *mut c_void;
type EGLImageKHR = *mut c_void;
type EGLBoolean = u32;
type EGLint = i32;

const EGL_NO_DISPLAY: EGLDisplay = std::ptr::null_mut();
const EGL_NO_STREAM: EGLStreamKHR = std::ptr::null_mut();
const EGL_NO_IMAGE: EGLImageKHR = std::ptr::null_mut();
const EGL_TRUE: EGLBoolean = 1;
const EGL_DEFAULT_DISPLAY: *mut c_void = std::ptr::null_mut();

struct EglApi {
    _lib: libloading::Library,
    eglGetDisplay: unsafe extern "C" fn(*mut c_void) -> EGLDisplay,
    eglInitialize: unsafe extern "C" fn(EGLDisplay, *mut EGLint, *mut EGLint) -> EGLBoolean,
    eglTerminate: unsafe extern "C" fn(EGLDisplay) -> EGLBoolean,
    // Extension entry points, resolved through eglGetProcAddress.
    eglCreateStreamKHR: unsafe extern "C" fn(EGLDisplay, *const EGLint) -> EGLStreamKHR,
    eglDestroyStreamKHR: unsafe extern "C" fn(EGLDisplay, EGLStreamKHR) -> EGLBoolean,
    eglStreamImageConsumerConnectNV:
        unsafe extern "C" fn(EGLDisplay, EGLStreamKHR, u64, *mut u64, *const i64) -> EGLBoolean,
    eglStreamAcquireImageNV:
        unsafe extern "C" fn(EGLDisplay, EGLStreamKHR, *mut EGLImageKHR, *mut c_void) -> EGLBoolean,
    eglStreamReleaseImageNV:
        unsafe extern "C" fn(EGLDisplay, EGLStreamKHR, EGLImageKHR, *mut c_void) -> EGLBoolean,
    eglDestroyImageKHR: unsafe extern "C" fn(EGLDisplay, EGLImageKHR) -> EGLBoolean,
    eglExportDMABUFImageQueryMESA: unsafe extern "C" fn(
        EGLDisplay,
        EGLImageKHR,
        *mut i32,
        *mut i32,
        *mut u64,
    ) -> EGLBoolean,
    eglExportDMABUFImageMESA: unsafe extern "C" fn(
        EGLDisplay,
        EGLImageKHR,
        *mut i32,
        *mut EGLint,
        *mut EGLint,
    ) -> EGLBoolean,
}

unsafe impl Send for EglApi {}
unsafe impl Sync for EglApi {}

impl EglApi {
    fn open() -> anyhow::Result<Self> {
        unsafe {
            let lib = libloading::Library::new("libEGL.so.1")
                .map_err(|e| anyhow!("failed to load libEGL.so.1: {e}"))?;
            let eglGetProcAddress: unsafe extern "C" fn(
                *const std::ffi::c_char,
            )
                -> Option<unsafe extern "C" fn()> = *lib
                .get(b"eglGetProcAddress\0")
                .context("missing symbol eglGetProcAddress")?;

            macro_rules! ext {
                ($name:literal) => {{
                    let f = eglGetProcAddress(concat!($name, "\0").as_ptr().cast())
                        .ok_or_else(|| anyhow!("missing EGL extension function {}", $name))?;
                    std::mem::transmute(f)
                }};
            }

            Ok(Self {
                eglGetDisplay: *lib.get(b"eglGetDisplay\0")?,
                eglInitialize: *lib.get(b"eglInitialize\0")?,
                eglTerminate: *lib.get(b"eglTerminate\0")?,
                eglCreateStreamKHR: ext!("eglCreateStreamKHR"),
                eglDestroyStreamKHR: ext!("eglDestroyStreamKHR"),
                eglStreamImageConsumerConnectNV: ext!("eglStreamImageConsumerConnectNV"),
                eglStreamAcquireImageNV: ext!("eglStreamAcquireImageNV"),
                eglStreamReleaseImageNV: ext!("eglStreamReleaseImageNV"),
                eglDestroyImageKHR: ext!("eglDestroyImageKHR"),
                eglExportDMABUFImageQueryMESA: ext!("eglExportDMABUFImageQueryMESA"),
                eglExportDMABUFImageMESA: ext!("eglExportDMABUFImageMESA"),
                _lib: lib,
            })
        }
    }
}

struct EglState {
    api: EglApi,
    display: EGLDisplay,
}

unsafe impl Send for EglState {}
unsafe impl Sync for EglState {}

pub struct EglExporter {
    device: Arc<CudaDevice>,
    state: Mutex<Option<EglState>>,
}

impl EglExporter {
    pub fn new(device: Arc<CudaDevice>) -> Self {
        Self { device, state: Mutex::new(None) }
    }

    /// Presents the mapped decode frame into a fresh stream and acquires
    /// the consumer image for the surface.
    fn produce_image(
        &self,
        state: &EglState,
        device_ptr: CUdeviceptr,
        surface: &NvSurface,
        pitch: u32,
    ) -> anyhow::Result<(EGLStreamKHR, EGLImageKHR)> {
        let api = self.device.api();
        let egl = &state.api;
        let info = surface.format_info();

        let stream = unsafe { (egl.eglCreateStreamKHR)(state.display, std::ptr::null()) };
        if stream == EGL_NO_STREAM {
            return Err(anyhow!("eglCreateStreamKHR failed"));
        }
        let ok = unsafe {
            (egl.eglStreamImageConsumerConnectNV)(
                state.display,
                stream,
                0,
                std::ptr::null_mut(),
                std::ptr::null(),
            )
        };
        if ok != EGL_TRUE {
            unsafe { (egl.eglDestroyStreamKHR)(state.display, stream) };
            return Err(anyhow!("eglStreamImageConsumerConnectNV failed"));
        }

        let mut conn: *mut c_void = std::ptr::null_mut();
        cuda::check(
            api,
            unsafe {
                (api.cuEGLStreamProducerConnect)(
                    conn,
                    stream,
                    surface.width,
                    surface.height,
                )
            },
            "cuEGLStreamProducerConnect",
        )?;

        let mut frame: CUeglFrame = unsafe { std::mem::zeroed() };
        frame.frame[0] = device_ptr as usize as *mut c_void;
        frame.frame[1] = (device_ptr + pitch as u64 * surface.height as u64) as usize as *mut c_void;
        frame.width = surface.width;
        frame.height = surface.height;
        frame.depth = 1;
        frame.pitch = pitch;
        frame.planeCount = info.planes.len() as u32;
        frame.numChannels = 1;
        frame.frameType = cuda::CU_EGL_FRAME_TYPE_PITCH;
        frame.eglColorFormat = cuda::CU_EGL_COLOR_FORMAT_YUV420_SEMIPLANAR;
        frame.cuFormat = if info.bpc == 2 {
            cuda::CU_AD_FORMAT_UNSIGNED_INT16
        } else {
            cuda::CU_AD_FORMAT_UNSIGNED_INT8
        };

        let present = cuda::check(
            api,
            unsafe {
                (api.cuEGLStreamProducerPresentFrame)(conn, frame, std::ptr::null_mut())
            },
            "cuEGLStreamProducerPresentFrame",
        );
        if let Err(e) = present {
            unsafe {
                (api.cuEGLStreamProducerDisconnect)(conn);
                (egl.eglDestroyStreamKHR)(state.display, stream);
            }
            return Err(e);
        }

        let mut image: EGLImageKHR = EGL_NO_IMAGE;
        let ok = unsafe {
            (egl.eglStreamAcquireImageNV)(
                state.display,
                stream,
                &mut image,
                std::ptr::null_mut(),
            )
        };
        unsafe { (api.cuEGLStreamProducerDisconnect)(conn) };
        if ok != EGL_TRUE || image == EGL_NO_IMAGE {
            unsafe { (egl.eglDestroyStreamKHR)(state.display, stream) };
            return Err(anyhow!("eglStreamAcquireImageNV failed"));
        }
        Ok((stream, image))
    }

    fn export_image(
        &self,
        state: &EglState,
        image: EGLImageKHR,
        surface: &NvSurface,
    ) -> anyhow::Result<(Vec<BackingPlane>, u64)> {
        let egl = &state.api;
        let info = surface.format_info();

        let mut fourcc: i32 = 0;
        let mut num_planes: i32 = 0;
        let mut modifier: u64 = 0;
        let ok = unsafe {
            (egl.eglExportDMABUFImageQueryMESA)(
                state.display,
                image,
                &mut fourcc,
                &mut num_planes,
                &mut modifier,
            )
        };
        if ok != EGL_TRUE || num_planes <= 0 || num_planes > 4 {
            return Err(anyhow!("eglExportDMABUFImageQueryMESA failed"));
        }

        let mut fds = [-1i32; 4];
        let mut strides = [0 as EGLint; 4];
        let mut offsets = [0 as EGLint; 4];
        let ok = unsafe {
            (egl.eglExportDMABUFImageMESA)(
                state.display,
                image,
                fds.as_mut_ptr(),
                strides.as_mut_ptr(),
                offsets.as_mut_ptr(),
            )
        };
        if ok != EGL_TRUE {
            return Err(anyhow!("eglExportDMABUFImageMESA failed"));
        }

        let mut planes = Vec::new();
        for i in 0..num_planes as usize {
            if fds[i] < 0 {
                return Err(anyhow!("exported plane {i} has no fd"));
            }
            let rows = surface.height >> info.planes.get(i).map(|p| p.ss.y).unwrap_or(0);
            planes.push(BackingPlane {
                fd: unsafe { OwnedFd::from_raw_fd(fds[i]) },
                offset: offsets[i] as u32,
                pitch: strides[i] as u32,
                size: strides[i] as u32 * rows,
                // EGL images are not device-addressable from here; GetImage
                // readback is a direct-backend feature.
                device_ptr: 0,
            });
        }
        Ok((planes, modifier))
    }
}

impl SurfaceExporter for EglExporter {
    fn init(&self) -> anyhow::Result<ExporterCaps> {
        let api = EglApi::open()?;
        let display = unsafe { (api.eglGetDisplay)(EGL_DEFAULT_DISPLAY) };
        if display == EGL_NO_DISPLAY {
            return Err(anyhow!("no EGL display"));
        }
        let mut major: EGLint = 0;
        let mut minor: EGLint = 0;
        if unsafe { (api.eglInitialize)(display, &mut major, &mut minor) } != EGL_TRUE {
            return Err(anyhow!("eglInitialize failed"));
        }
        log::info!("Initialised EGL {major}.{minor} exporter");
        *self.state.lock().unwrap() = Some(EglState { api, display });
        // The EGLStream consumer cannot represent the triple-plane 4:4:4
        // layouts.
        Ok(ExporterCaps { supports_16bit_surface: true, supports_444_surface: false })
    }

    fn realise_surface(&self, surface: &NvSurface) -> anyhow::Result<()> {
        // Images on this path only come into existence when a decoded frame
        // is presented; an empty slot is as realised as it gets.
        let _ = surface;
        Ok(())
    }

    fn export_cuda_ptr(
        &self,
        device_ptr: CUdeviceptr,
        surface: &NvSurface,
        pitch: u32,
    ) -> anyhow::Result<()> {
        let state = self.state.lock().unwrap();
        let state = state.as_ref().ok_or_else(|| anyhow!("EGL exporter not initialised"))?;

        self.detach_locked(state, surface);
        let (stream, image) = self.produce_image(state, device_ptr, surface, pitch)?;
        let exported = self.export_image(state, image, surface);
        match exported {
            Ok((planes, modifier)) => {
                let info = surface.format_info();
                *surface.backing.lock().unwrap() = Some(BackingImage {
                    format: info.format,
                    width: surface.width,
                    height: surface.height,
                    modifier,
                    planes,
                    resource: BackingResource::Egl { stream, image },
                });
                Ok(())
            }
            Err(e) => {
                let egl = &state.api;
                unsafe {
                    (egl.eglDestroyImageKHR)(state.display, image);
                    (egl.eglDestroyStreamKHR)(state.display, stream);
                }
                Err(e)
            }
        }
    }

    fn detach_backing_image(&self, surface: &NvSurface) {
        let state = self.state.lock().unwrap();
        if let Some(state) = state.as_ref() {
            self.detach_locked(state, surface);
        } else {
            surface.backing.lock().unwrap().take();
        }
    }

    fn destroy_all_backing_images(&self) {}

    fn release(&self) {
        if let Some(state) = self.state.lock().unwrap().take() {
            unsafe { (state.api.eglTerminate)(state.display) };
        }
        // Keep `device` alive until here so producer teardown has a context.
        let _ = &self.device;
    }
}

impl EglExporter {
    fn detach_locked(&self, state: &EglState, surface: &NvSurface) {
        if let Some(backing) = surface.backing.lock().unwrap().take() {
            if let BackingResource::Egl { stream, image } = backing.resource {
                let egl = &state.api;
                unsafe {
                    (egl.eglStreamReleaseImageNV)(
                        state.display,
                        stream,
                        image,
                        std::ptr::null_mut(),
                    );
                    (egl.eglDestroyImageKHR)(state.display, image);
                    (egl.eglDestroyStreamKHR)(state.display, stream);
                }
            }
        }
    }
}
