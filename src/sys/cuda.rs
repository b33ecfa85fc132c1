// Copyright 2024 The nvdec-vaapi-driver Authors
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! CUDA driver API subset, matching `cuda.h` from CUDA 11+.

#![allow(non_camel_case_types, non_snake_case)]

use std::ffi::c_char;
use std::ffi::c_int;
use std::ffi::c_uint;
use std::ffi::c_void;
use std::sync::OnceLock;

use anyhow::anyhow;
use anyhow::Context as _;

pub type CUresult = c_int;
pub type CUdevice = c_int;
pub type CUcontext = *mut c_void;
pub type CUstream = *mut c_void;
pub type CUarray = *mut c_void;
pub type CUdeviceptr = u64;
pub type CUmemGenericAllocationHandle = u64;

pub const CUDA_SUCCESS: CUresult = 0;

pub const CU_CTX_SCHED_BLOCKING_SYNC: c_uint = 0x04;

pub const CU_MEMORYTYPE_HOST: c_uint = 0x01;
pub const CU_MEMORYTYPE_DEVICE: c_uint = 0x02;
pub const CU_MEMORYTYPE_ARRAY: c_uint = 0x03;

pub const CU_MEM_ALLOCATION_TYPE_PINNED: c_uint = 0x1;
pub const CU_MEM_HANDLE_TYPE_POSIX_FILE_DESCRIPTOR: c_uint = 0x1;
pub const CU_MEM_LOCATION_TYPE_DEVICE: c_uint = 0x1;
pub const CU_MEM_ACCESS_FLAGS_PROT_READWRITE: c_uint = 0x3;
pub const CU_MEM_ALLOC_GRANULARITY_MINIMUM: c_uint = 0x0;

/// `CUDA_MEMCPY2D`, used for plane copies both between device allocations
/// and out to host images.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct CUDA_MEMCPY2D {
    pub srcXInBytes: usize,
    pub srcY: usize,
    pub srcMemoryType: c_uint,
    pub srcHost: *const c_void,
    pub srcDevice: CUdeviceptr,
    pub srcArray: CUarray,
    pub srcPitch: usize,
    pub dstXInBytes: usize,
    pub dstY: usize,
    pub dstMemoryType: c_uint,
    pub dstHost: *mut c_void,
    pub dstDevice: CUdeviceptr,
    pub dstArray: CUarray,
    pub dstPitch: usize,
    pub WidthInBytes: usize,
    pub Height: usize,
}

impl Default for CUDA_MEMCPY2D {
    fn default() -> Self {
        // All-zero is the documented "unused field" state for this struct.
        unsafe { std::mem::zeroed() }
    }
}

#[repr(C)]
#[derive(Copy, Clone, Default)]
pub struct CUmemLocation {
    pub type_: c_uint,
    pub id: c_int,
}

#[repr(C)]
#[derive(Copy, Clone, Default)]
pub struct CUmemAllocationProp {
    pub type_: c_uint,
    pub requestedHandleTypes: c_uint,
    pub location: CUmemLocation,
    pub win32HandleMetaData: usize,
    pub allocFlags: [u8; 8],
}

#[repr(C)]
#[derive(Copy, Clone, Default)]
pub struct CUmemAccessDesc {
    pub location: CUmemLocation,
    pub flags: c_uint,
}

/// `CUeglFrame` as consumed by the EGLStream producer path. Only the pitched
/// layout is ever produced by this driver.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct CUeglFrame {
    pub frame: [*mut c_void; 3],
    pub width: c_uint,
    pub height: c_uint,
    pub depth: c_uint,
    pub pitch: c_uint,
    pub planeCount: c_uint,
    pub numChannels: c_uint,
    pub frameType: c_uint,
    pub eglColorFormat: c_uint,
    pub cuFormat: c_uint,
}

pub const CU_EGL_FRAME_TYPE_PITCH: c_uint = 1;
pub const CU_EGL_COLOR_FORMAT_YUV420_SEMIPLANAR: c_uint = 0x01;
pub const CU_AD_FORMAT_UNSIGNED_INT8: c_uint = 0x01;
pub const CU_AD_FORMAT_UNSIGNED_INT16: c_uint = 0x02;

/// The CUDA driver entry points this driver calls, resolved once per
/// process. `_v2` symbols are preferred where they exist; that is what
/// `cuda.h` aliases the unsuffixed names to.
pub struct CudaApi {
    _lib: libloading::Library,

    pub cuInit: unsafe extern "C" fn(c_uint) -> CUresult,
    pub cuGetErrorString: unsafe extern "C" fn(CUresult, *mut *const c_char) -> CUresult,
    pub cuDeviceGet: unsafe extern "C" fn(*mut CUdevice, c_int) -> CUresult,
    pub cuDeviceGetCount: unsafe extern "C" fn(*mut c_int) -> CUresult,
    pub cuDeviceGetByPCIBusId: unsafe extern "C" fn(*mut CUdevice, *const c_char) -> CUresult,
    pub cuCtxCreate: unsafe extern "C" fn(*mut CUcontext, c_uint, CUdevice) -> CUresult,
    pub cuCtxDestroy: unsafe extern "C" fn(CUcontext) -> CUresult,
    pub cuCtxPushCurrent: unsafe extern "C" fn(CUcontext) -> CUresult,
    pub cuCtxPopCurrent: unsafe extern "C" fn(*mut CUcontext) -> CUresult,
    pub cuMemcpy2D: unsafe extern "C" fn(*const CUDA_MEMCPY2D) -> CUresult,
    pub cuMemAddressReserve:
        unsafe extern "C" fn(*mut CUdeviceptr, usize, usize, CUdeviceptr, u64) -> CUresult,
    pub cuMemAddressFree: unsafe extern "C" fn(CUdeviceptr, usize) -> CUresult,
    pub cuMemCreate: unsafe extern "C" fn(
        *mut CUmemGenericAllocationHandle,
        usize,
        *const CUmemAllocationProp,
        u64,
    ) -> CUresult,
    pub cuMemRelease: unsafe extern "C" fn(CUmemGenericAllocationHandle) -> CUresult,
    pub cuMemMap: unsafe extern "C" fn(
        CUdeviceptr,
        usize,
        usize,
        CUmemGenericAllocationHandle,
        u64,
    ) -> CUresult,
    pub cuMemUnmap: unsafe extern "C" fn(CUdeviceptr, usize) -> CUresult,
    pub cuMemSetAccess:
        unsafe extern "C" fn(CUdeviceptr, usize, *const CUmemAccessDesc, usize) -> CUresult,
    pub cuMemGetAllocationGranularity:
        unsafe extern "C" fn(*mut usize, *const CUmemAllocationProp, c_uint) -> CUresult,
    pub cuMemExportToShareableHandle: unsafe extern "C" fn(
        *mut c_void,
        CUmemGenericAllocationHandle,
        c_uint,
        u64,
    ) -> CUresult,
    pub cuEGLStreamProducerConnect:
        unsafe extern "C" fn(*mut c_void, *mut c_void, c_uint, c_uint) -> CUresult,
    pub cuEGLStreamProducerDisconnect: unsafe extern "C" fn(*mut c_void) -> CUresult,
    pub cuEGLStreamProducerPresentFrame:
        unsafe extern "C" fn(*mut c_void, CUeglFrame, *mut CUstream) -> CUresult,
    pub cuEGLStreamProducerReturnFrame:
        unsafe extern "C" fn(*mut c_void, *mut CUeglFrame, *mut CUstream) -> CUresult,
}

// The table holds plain fn pointers plus the library that backs them.
unsafe impl Send for CudaApi {}
unsafe impl Sync for CudaApi {}

macro_rules! symbol {
    ($lib:expr, $name:literal) => {
        *$lib
            .get(concat!($name, "\0").as_bytes())
            .with_context(|| format!("missing symbol {}", $name))?
    };
    ($lib:expr, $name:literal, $fallback:literal) => {
        *$lib
            .get(concat!($name, "\0").as_bytes())
            .or_else(|_| $lib.get(concat!($fallback, "\0").as_bytes()))
            .with_context(|| format!("missing symbol {}", $fallback))?
    };
}

pub(crate) use symbol;

impl CudaApi {
    fn open() -> anyhow::Result<Self> {
        unsafe {
            let lib = libloading::Library::new("libcuda.so.1")
                .map_err(|e| anyhow!("failed to load libcuda.so.1: {e}"))?;
            Ok(Self {
                cuInit: symbol!(lib, "cuInit"),
                cuGetErrorString: symbol!(lib, "cuGetErrorString"),
                cuDeviceGet: symbol!(lib, "cuDeviceGet"),
                cuDeviceGetCount: symbol!(lib, "cuDeviceGetCount"),
                cuDeviceGetByPCIBusId: symbol!(lib, "cuDeviceGetByPCIBusId"),
                cuCtxCreate: symbol!(lib, "cuCtxCreate_v2", "cuCtxCreate"),
                cuCtxDestroy: symbol!(lib, "cuCtxDestroy_v2", "cuCtxDestroy"),
                cuCtxPushCurrent: symbol!(lib, "cuCtxPushCurrent_v2", "cuCtxPushCurrent"),
                cuCtxPopCurrent: symbol!(lib, "cuCtxPopCurrent_v2", "cuCtxPopCurrent"),
                cuMemcpy2D: symbol!(lib, "cuMemcpy2D_v2", "cuMemcpy2D"),
                cuMemAddressReserve: symbol!(lib, "cuMemAddressReserve"),
                cuMemAddressFree: symbol!(lib, "cuMemAddressFree"),
                cuMemCreate: symbol!(lib, "cuMemCreate"),
                cuMemRelease: symbol!(lib, "cuMemRelease"),
                cuMemMap: symbol!(lib, "cuMemMap"),
                cuMemUnmap: symbol!(lib, "cuMemUnmap"),
                cuMemSetAccess: symbol!(lib, "cuMemSetAccess"),
                cuMemGetAllocationGranularity: symbol!(lib, "cuMemGetAllocationGranularity"),
                cuMemExportToShareableHandle: symbol!(lib, "cuMemExportToShareableHandle"),
                cuEGLStreamProducerConnect: symbol!(lib, "cuEGLStreamProducerConnect"),
                cuEGLStreamProducerDisconnect: symbol!(lib, "cuEGLStreamProducerDisconnect"),
                cuEGLStreamProducerPresentFrame: symbol!(lib, "cuEGLStreamProducerPresentFrame"),
                cuEGLStreamProducerReturnFrame: symbol!(lib, "cuEGLStreamProducerReturnFrame"),
                _lib: lib,
            })
        }
    }

    /// Returns the process-wide function table, loading the library on first
    /// use. Failure is sticky: once loading fails, every caller sees the
    /// error until the process restarts, same as a failed `dlopen`.
    pub fn get() -> anyhow::Result<&'static Self> {
        static API: OnceLock<Option<CudaApi>> = OnceLock::new();
        API.get_or_init(|| match Self::open() {
            Ok(api) => Some(api),
            Err(e) => {
                log::error!("failed to load CUDA functions: {e:#}");
                None
            }
        })
        .as_ref()
        .ok_or_else(|| anyhow!("CUDA driver library is not available"))
    }

    pub fn error_string(&self, result: CUresult) -> String {
        let mut ptr: *const c_char = std::ptr::null();
        unsafe {
            if (self.cuGetErrorString)(result, &mut ptr) != CUDA_SUCCESS || ptr.is_null() {
                return format!("CUDA error {result}");
            }
            std::ffi::CStr::from_ptr(ptr).to_string_lossy().into_owned()
        }
    }
}

/// Converts a `CUresult` into a `Result`, attaching the driver's error
/// string on failure.
pub fn check(api: &CudaApi, result: CUresult, what: &str) -> anyhow::Result<()> {
    if result == CUDA_SUCCESS {
        Ok(())
    } else {
        Err(anyhow!("{what}: {} ({result})", api.error_string(result)))
    }
}
