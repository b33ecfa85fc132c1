// Copyright 2024 The nvdec-vaapi-driver Authors
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! [`VideoDevice`] backed by the CUDA driver API and NVDEC.

use std::ffi::CString;
use std::os::fd::RawFd;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use anyhow::anyhow;
use anyhow::Context as _;

use crate::device::DecoderCaps;
use crate::device::MappedFrame;
use crate::device::VideoDecoder;
use crate::device::VideoDevice;
use crate::sys::cuda;
use crate::sys::cuda::CUcontext;
use crate::sys::cuda::CUdevice;
use crate::sys::cuda::CUdeviceptr;
use crate::sys::cuda::CudaApi;
use crate::sys::cuda::CUDA_MEMCPY2D;
use crate::sys::cuvid::cudaVideoChromaFormat;
use crate::sys::cuvid::cudaVideoCodec;
use crate::sys::cuvid::CUvideoctxlock;
use crate::sys::cuvid::CUvideodecoder;
use crate::sys::cuvid::CuvidApi;
use crate::sys::cuvid::CUVIDDECODECAPS;
use crate::sys::cuvid::CUVIDDECODECREATEINFO;
use crate::sys::cuvid::CUVIDPICPARAMS;
use crate::sys::cuvid::CUVIDPROCPARAMS;

/// Resolves the CUDA device to use: an explicit `NVD_GPU` index wins, then
/// the PCI bus id of the DRM node the client handed us, then device 0.
fn select_device(cuda: &'static CudaApi, gpu_id: i32, drm_fd: Option<RawFd>) -> CUdevice {
    if gpu_id >= 0 {
        return gpu_id;
    }
    if let Some(fd) = drm_fd {
        if let Some(bus_id) = pci_bus_id_of_drm_fd(fd) {
            let mut dev: CUdevice = 0;
            let c_bus_id = CString::new(bus_id.clone()).unwrap();
            let ret = unsafe { (cuda.cuDeviceGetByPCIBusId)(&mut dev, c_bus_id.as_ptr()) };
            if ret == cuda::CUDA_SUCCESS {
                log::info!("Using CUDA device {dev} for DRM device at {bus_id}");
                return dev;
            }
            log::warn!("No CUDA device at PCI bus id {bus_id}, using device 0");
        }
    }
    0
}

/// PCI bus id ("0000:2d:00.0" style) of the device backing a DRM fd, via
/// the sysfs device link of its character node.
fn pci_bus_id_of_drm_fd(fd: RawFd) -> Option<String> {
    let stat = nix::sys::stat::fstat(fd).ok()?;
    let major = nix::sys::stat::major(stat.st_rdev);
    let minor = nix::sys::stat::minor(stat.st_rdev);
    let link = std::fs::read_link(format!("/sys/dev/char/{major}:{minor}/device")).ok()?;
    Some(link.file_name()?.to_str()?.to_owned())
}

pub struct CudaDevice {
    cuda: &'static CudaApi,
    cuvid: &'static CuvidApi,
    context: CUcontext,
    device: CUdevice,
}

// CUcontext is an opaque handle the CUDA driver shares freely between
// threads; current-ness is per-thread via push/pop.
unsafe impl Send for CudaDevice {}
unsafe impl Sync for CudaDevice {}

impl CudaDevice {
    /// Loads the vendor libraries if necessary and creates the device
    /// context every vendor call of this instance runs under.
    pub fn new(gpu_id: i32, drm_fd: Option<RawFd>) -> anyhow::Result<Self> {
        let cuda = CudaApi::get()?;
        let cuvid = CuvidApi::get()?;
        cuda::check(cuda, unsafe { (cuda.cuInit)(0) }, "cuInit")?;

        let device = select_device(cuda, gpu_id, drm_fd);
        let mut context: CUcontext = std::ptr::null_mut();
        cuda::check(
            cuda,
            unsafe { (cuda.cuCtxCreate)(&mut context, cuda::CU_CTX_SCHED_BLOCKING_SYNC, device) },
            "cuCtxCreate",
        )?;
        // cuCtxCreate leaves the new context current; keep the caller's
        // thread state clean.
        unsafe { (cuda.cuCtxPopCurrent)(std::ptr::null_mut()) };
        Ok(Self { cuda, cuvid, context, device })
    }

    pub fn api(&self) -> &'static CudaApi {
        self.cuda
    }

    /// CUDA device ordinal the context was created on.
    pub fn device_ordinal(&self) -> CUdevice {
        self.device
    }
}

impl VideoDevice for CudaDevice {
    fn push_context(&self) -> anyhow::Result<()> {
        cuda::check(
            self.cuda,
            unsafe { (self.cuda.cuCtxPushCurrent)(self.context) },
            "cuCtxPushCurrent",
        )
    }

    fn pop_context(&self) {
        let ret = unsafe { (self.cuda.cuCtxPopCurrent)(std::ptr::null_mut()) };
        if ret != cuda::CUDA_SUCCESS {
            log::error!("cuCtxPopCurrent failed: {}", self.cuda.error_string(ret));
        }
    }

    fn decoder_caps(
        &self,
        codec: cudaVideoCodec,
        chroma: cudaVideoChromaFormat,
        bit_depth: u32,
    ) -> anyhow::Result<DecoderCaps> {
        let mut caps: CUVIDDECODECAPS = unsafe { std::mem::zeroed() };
        caps.eCodecType = codec;
        caps.eChromaFormat = chroma;
        caps.nBitDepthMinus8 = bit_depth - 8;
        cuda::check(
            self.cuda,
            unsafe { (self.cuvid.cuvidGetDecoderCaps)(&mut caps) },
            "cuvidGetDecoderCaps",
        )?;
        Ok(DecoderCaps {
            supported: caps.bIsSupported == 1,
            min_width: caps.nMinWidth.into(),
            min_height: caps.nMinHeight.into(),
            max_width: caps.nMaxWidth,
            max_height: caps.nMaxHeight,
        })
    }

    fn create_decoder(
        &self,
        info: &mut CUVIDDECODECREATEINFO,
    ) -> anyhow::Result<Box<dyn VideoDecoder>> {
        let mut lock: CUvideoctxlock = std::ptr::null_mut();
        cuda::check(
            self.cuda,
            unsafe { (self.cuvid.cuvidCtxLockCreate)(&mut lock, self.context) },
            "cuvidCtxLockCreate",
        )?;
        info.vidLock = lock;
        let mut decoder: CUvideodecoder = std::ptr::null_mut();
        let ret = unsafe { (self.cuvid.cuvidCreateDecoder)(&mut decoder, info) };
        if ret != cuda::CUDA_SUCCESS {
            unsafe { (self.cuvid.cuvidCtxLockDestroy)(lock) };
            return Err(anyhow!("cuvidCreateDecoder: {}", self.cuda.error_string(ret)))
                .context("creating NVDEC decoder");
        }
        Ok(Box::new(CuvidDecoder {
            cuda: self.cuda,
            cuvid: self.cuvid,
            decoder,
            lock,
            destroyed: AtomicBool::new(false),
        }))
    }

    fn copy_plane_to_host(
        &self,
        src: CUdeviceptr,
        src_pitch: usize,
        dst: &mut [u8],
        row_bytes: usize,
        rows: usize,
    ) -> anyhow::Result<()> {
        let copy = CUDA_MEMCPY2D {
            srcMemoryType: cuda::CU_MEMORYTYPE_DEVICE,
            srcDevice: src,
            srcPitch: src_pitch,
            dstMemoryType: cuda::CU_MEMORYTYPE_HOST,
            dstHost: dst.as_mut_ptr().cast(),
            dstPitch: row_bytes,
            WidthInBytes: row_bytes,
            Height: rows,
            ..Default::default()
        };
        cuda::check(self.cuda, unsafe { (self.cuda.cuMemcpy2D)(&copy) }, "cuMemcpy2D")
    }
}

impl Drop for CudaDevice {
    fn drop(&mut self) {
        let ret = unsafe { (self.cuda.cuCtxDestroy)(self.context) };
        if ret != cuda::CUDA_SUCCESS {
            log::error!("cuCtxDestroy failed: {}", self.cuda.error_string(ret));
        }
    }
}

struct CuvidDecoder {
    cuda: &'static CudaApi,
    cuvid: &'static CuvidApi,
    decoder: CUvideodecoder,
    lock: CUvideoctxlock,
    destroyed: AtomicBool,
}

unsafe impl Send for CuvidDecoder {}
unsafe impl Sync for CuvidDecoder {}

impl CuvidDecoder {
    fn teardown(&self) -> anyhow::Result<()> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let ret = unsafe { (self.cuvid.cuvidDestroyDecoder)(self.decoder) };
        unsafe { (self.cuvid.cuvidCtxLockDestroy)(self.lock) };
        cuda::check(self.cuda, ret, "cuvidDestroyDecoder")
    }
}

impl VideoDecoder for CuvidDecoder {
    fn decode_picture(&self, params: &mut CUVIDPICPARAMS) -> anyhow::Result<()> {
        cuda::check(
            self.cuda,
            unsafe { (self.cuvid.cuvidDecodePicture)(self.decoder, params) },
            "cuvidDecodePicture",
        )
    }

    fn map_video_frame(
        &self,
        picture_idx: i32,
        proc_params: &mut CUVIDPROCPARAMS,
    ) -> anyhow::Result<MappedFrame> {
        let mut device_ptr: CUdeviceptr = 0;
        let mut pitch: u32 = 0;
        cuda::check(
            self.cuda,
            unsafe {
                (self.cuvid.cuvidMapVideoFrame)(
                    self.decoder,
                    picture_idx,
                    &mut device_ptr,
                    &mut pitch,
                    proc_params,
                )
            },
            "cuvidMapVideoFrame",
        )?;
        Ok(MappedFrame { device_ptr, pitch })
    }

    fn unmap_video_frame(&self, frame: CUdeviceptr) -> anyhow::Result<()> {
        cuda::check(
            self.cuda,
            unsafe { (self.cuvid.cuvidUnmapVideoFrame)(self.decoder, frame) },
            "cuvidUnmapVideoFrame",
        )
    }

    fn destroy(&self) -> anyhow::Result<()> {
        self.teardown()
    }
}

impl Drop for CuvidDecoder {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            log::error!("decoder teardown failed: {e:#}");
        }
    }
}
