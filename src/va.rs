// Copyright 2024 The nvdec-vaapi-driver Authors
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! The VA-API ABI surface this driver implements.
//!
//! Everything in this module mirrors the layouts and values fixed by the
//! libva headers (`va.h`, `va_backend.h`, `va_drmcommon.h`). Nothing here is
//! negotiable: libva hands us a [`VADriverContext`], reads the vtable we
//! install into it, and both sides exchange the `#[repr(C)]` types below by
//! pointer.

use std::ffi::c_char;
use std::ffi::c_int;
use std::ffi::c_uint;
use std::ffi::c_void;

use enumn::N;

pub type VAStatus = c_int;
pub type VAGenericID = u32;
pub type VAConfigID = VAGenericID;
pub type VAContextID = VAGenericID;
pub type VASurfaceID = VAGenericID;
pub type VABufferID = VAGenericID;
pub type VAImageID = VAGenericID;
pub type VASubpictureID = VAGenericID;
pub type VAMFContextID = VAGenericID;

pub const VA_INVALID_ID: VAGenericID = 0;

pub const VA_STATUS_SUCCESS: VAStatus = 0x0000_0000;
pub const VA_STATUS_ERROR_OPERATION_FAILED: VAStatus = 0x0000_0001;
pub const VA_STATUS_ERROR_ALLOCATION_FAILED: VAStatus = 0x0000_0002;
pub const VA_STATUS_ERROR_INVALID_DISPLAY: VAStatus = 0x0000_0003;
pub const VA_STATUS_ERROR_INVALID_CONFIG: VAStatus = 0x0000_0004;
pub const VA_STATUS_ERROR_INVALID_CONTEXT: VAStatus = 0x0000_0005;
pub const VA_STATUS_ERROR_INVALID_SURFACE: VAStatus = 0x0000_0006;
pub const VA_STATUS_ERROR_INVALID_BUFFER: VAStatus = 0x0000_0007;
pub const VA_STATUS_ERROR_INVALID_IMAGE: VAStatus = 0x0000_0008;
pub const VA_STATUS_ERROR_INVALID_SUBPICTURE: VAStatus = 0x0000_0009;
pub const VA_STATUS_ERROR_ATTR_NOT_SUPPORTED: VAStatus = 0x0000_000a;
pub const VA_STATUS_ERROR_MAX_NUM_EXCEEDED: VAStatus = 0x0000_000b;
pub const VA_STATUS_ERROR_UNSUPPORTED_PROFILE: VAStatus = 0x0000_000c;
pub const VA_STATUS_ERROR_UNSUPPORTED_ENTRYPOINT: VAStatus = 0x0000_000d;
pub const VA_STATUS_ERROR_UNSUPPORTED_RT_FORMAT: VAStatus = 0x0000_000e;
pub const VA_STATUS_ERROR_UNSUPPORTED_BUFFERTYPE: VAStatus = 0x0000_000f;
pub const VA_STATUS_ERROR_SURFACE_BUSY: VAStatus = 0x0000_0010;
pub const VA_STATUS_ERROR_INVALID_PARAMETER: VAStatus = 0x0000_0012;
pub const VA_STATUS_ERROR_UNIMPLEMENTED: VAStatus = 0x0000_0014;
pub const VA_STATUS_ERROR_INVALID_IMAGE_FORMAT: VAStatus = 0x0000_0016;
pub const VA_STATUS_ERROR_DECODING_ERROR: VAStatus = 0x0000_0017;
pub const VA_STATUS_ERROR_ENCODING_ERROR: VAStatus = 0x0000_0018;
pub const VA_STATUS_ERROR_INVALID_VALUE: VAStatus = 0x0000_0019;
pub const VA_STATUS_ERROR_HW_BUSY: VAStatus = 0x0000_0023;
pub const VA_STATUS_ERROR_UNSUPPORTED_MEMORY_TYPE: VAStatus = 0x0000_0025;

pub const VA_RT_FORMAT_YUV420: u32 = 0x0000_0001;
pub const VA_RT_FORMAT_YUV422: u32 = 0x0000_0002;
pub const VA_RT_FORMAT_YUV444: u32 = 0x0000_0004;
pub const VA_RT_FORMAT_YUV420_10: u32 = 0x0000_0100;
pub const VA_RT_FORMAT_YUV422_10: u32 = 0x0000_0200;
pub const VA_RT_FORMAT_YUV444_10: u32 = 0x0000_0400;
pub const VA_RT_FORMAT_YUV420_12: u32 = 0x0000_1000;
pub const VA_RT_FORMAT_YUV422_12: u32 = 0x0000_2000;
pub const VA_RT_FORMAT_YUV444_12: u32 = 0x0000_4000;

pub const VA_LSB_FIRST: u32 = 1;
pub const VA_MSB_FIRST: u32 = 2;

pub const VA_ATTRIB_NOT_SUPPORTED: u32 = 0x8000_0000;

pub const VA_SURFACE_ATTRIB_MEM_TYPE_VA: u32 = 0x0000_0001;
pub const VA_SURFACE_ATTRIB_MEM_TYPE_CPU: u32 = 0x0000_0002;
pub const VA_SURFACE_ATTRIB_MEM_TYPE_USER_PTR: u32 = 0x0000_0004;
pub const VA_SURFACE_ATTRIB_MEM_TYPE_KERNEL_DRM: u32 = 0x1000_0000;
pub const VA_SURFACE_ATTRIB_MEM_TYPE_DRM_PRIME: u32 = 0x2000_0000;
pub const VA_SURFACE_ATTRIB_MEM_TYPE_DRM_PRIME_2: u32 = 0x4000_0000;

pub const VA_EXPORT_SURFACE_READ_ONLY: u32 = 0x0001;
pub const VA_EXPORT_SURFACE_WRITE_ONLY: u32 = 0x0002;
pub const VA_EXPORT_SURFACE_READ_WRITE: u32 = 0x0003;
pub const VA_EXPORT_SURFACE_SEPARATE_LAYERS: u32 = 0x0004;
pub const VA_EXPORT_SURFACE_COMPOSED_LAYERS: u32 = 0x0008;

/// Builds a fourcc the way the `VA_FOURCC` macro does.
pub const fn va_fourcc(a: u8, b: u8, c: u8, d: u8) -> u32 {
    (a as u32) | (b as u32) << 8 | (c as u32) << 16 | (d as u32) << 24
}

pub const VA_FOURCC_NV12: u32 = va_fourcc(b'N', b'V', b'1', b'2');
pub const VA_FOURCC_P010: u32 = va_fourcc(b'P', b'0', b'1', b'0');
pub const VA_FOURCC_P012: u32 = va_fourcc(b'P', b'0', b'1', b'2');
pub const VA_FOURCC_P016: u32 = va_fourcc(b'P', b'0', b'1', b'6');
pub const VA_FOURCC_444P: u32 = va_fourcc(b'4', b'4', b'4', b'P');
pub const VA_FOURCC_Q416: u32 = va_fourcc(b'Q', b'4', b'1', b'6');

/// `VAProfile` with the discriminants of `va.h`.
#[repr(i32)]
#[derive(N, Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum VAProfile {
    None = -1,
    MPEG2Simple = 0,
    MPEG2Main = 1,
    MPEG4Simple = 2,
    MPEG4AdvancedSimple = 3,
    MPEG4Main = 4,
    H264Baseline = 5,
    H264Main = 6,
    H264High = 7,
    VC1Simple = 8,
    VC1Main = 9,
    VC1Advanced = 10,
    H263Baseline = 11,
    JPEGBaseline = 12,
    H264ConstrainedBaseline = 13,
    VP8Version0_3 = 14,
    H264MultiviewHigh = 15,
    H264StereoHigh = 16,
    HEVCMain = 17,
    HEVCMain10 = 18,
    VP9Profile0 = 19,
    VP9Profile1 = 20,
    VP9Profile2 = 21,
    VP9Profile3 = 22,
    HEVCMain12 = 23,
    HEVCMain422_10 = 24,
    HEVCMain422_12 = 25,
    HEVCMain444 = 26,
    HEVCMain444_10 = 27,
    HEVCMain444_12 = 28,
    HEVCSccMain = 29,
    HEVCSccMain10 = 30,
    HEVCSccMain444 = 31,
    AV1Profile0 = 32,
    AV1Profile1 = 33,
    HEVCSccMain444_10 = 34,
    Protected = 35,
    H264High10 = 36,
}

/// `VAEntrypoint`. Only VLD is ever accepted by this driver.
#[repr(i32)]
#[derive(N, Copy, Clone, Debug, PartialEq, Eq)]
pub enum VAEntrypoint {
    VLD = 1,
    IZZ = 2,
    IDCT = 3,
    MoComp = 4,
    Deblocking = 5,
    EncSlice = 6,
    EncPicture = 7,
    EncSliceLP = 8,
    VideoProc = 10,
    ProtectedTEEComm = 11,
    ProtectedContent = 12,
}

/// `VABufferType`. The decode-side subset carries its `va.h` values; the
/// handlers index the codec dispatch tables with these.
#[repr(i32)]
#[derive(N, Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum VABufferType {
    PictureParameter = 0,
    IQMatrix = 1,
    BitPlane = 2,
    SliceGroupMap = 3,
    SliceParameter = 4,
    SliceData = 5,
    MacroblockParameter = 6,
    ResidualData = 7,
    DeblockingParameter = 8,
    Image = 9,
    ProtectedSliceData = 10,
    QMatrix = 11,
    HuffmanTable = 12,
    Probability = 13,
}

#[repr(i32)]
#[derive(N, Copy, Clone, Debug, PartialEq, Eq)]
pub enum VAConfigAttribType {
    RTFormat = 0,
    SpatialResidual = 1,
    SpatialClipping = 2,
    IntraResidual = 3,
    Encryption = 4,
    RateControl = 5,
    DecSliceMode = 6,
    DecJPEG = 7,
    DecProcessing = 8,
    EncPackedHeaders = 10,
    EncInterlaced = 11,
    EncMaxRefFrames = 13,
    EncMaxSlices = 14,
    EncSliceStructure = 15,
    EncMacroblockInfo = 16,
    MaxPictureWidth = 18,
    MaxPictureHeight = 19,
}

#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct VAConfigAttrib {
    pub type_: i32,
    pub value: u32,
}

#[repr(i32)]
#[derive(N, Copy, Clone, Debug, PartialEq, Eq)]
pub enum VASurfaceAttribType {
    None = 0,
    PixelFormat = 1,
    MinWidth = 2,
    MaxWidth = 3,
    MinHeight = 4,
    MaxHeight = 5,
    MemoryType = 6,
    ExternalBufferDescriptor = 7,
    UsageHint = 8,
    DRMFormatModifiers = 9,
}

pub const VA_SURFACE_ATTRIB_NOT_SUPPORTED: u32 = 0x0000_0000;
pub const VA_SURFACE_ATTRIB_GETTABLE: u32 = 0x0000_0001;
pub const VA_SURFACE_ATTRIB_SETTABLE: u32 = 0x0000_0002;

#[repr(i32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VAGenericValueType {
    Integer = 1,
    Float = 2,
    Pointer = 3,
    Func = 4,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub union VAGenericValueUnion {
    pub i: i32,
    pub f: f32,
    pub p: *mut c_void,
    pub func: Option<unsafe extern "C" fn()>,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct VAGenericValue {
    pub type_: VAGenericValueType,
    pub value: VAGenericValueUnion,
}

impl VAGenericValue {
    pub fn integer(i: i32) -> Self {
        Self {
            type_: VAGenericValueType::Integer,
            value: VAGenericValueUnion { i },
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct VASurfaceAttrib {
    pub type_: i32,
    pub flags: u32,
    pub value: VAGenericValue,
}

impl VASurfaceAttrib {
    /// A gettable integer attribute, which is the only kind this driver
    /// reports.
    pub fn gettable(type_: VASurfaceAttribType, i: i32) -> Self {
        Self {
            type_: type_ as i32,
            flags: VA_SURFACE_ATTRIB_GETTABLE,
            value: VAGenericValue::integer(i),
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct VAImageFormat {
    pub fourcc: u32,
    pub byte_order: u32,
    pub bits_per_pixel: u32,
    pub depth: u32,
    pub red_mask: u32,
    pub green_mask: u32,
    pub blue_mask: u32,
    pub alpha_mask: u32,
    pub va_reserved: [u32; 4],
}

#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct VAImage {
    pub image_id: VAImageID,
    pub format: VAImageFormat,
    pub buf: VABufferID,
    pub width: u16,
    pub height: u16,
    pub data_size: u32,
    pub num_planes: u32,
    pub pitches: [u32; 3],
    pub offsets: [u32; 3],
    pub num_palette_entries: i32,
    pub entry_bytes: i32,
    pub component_order: [c_char; 4],
    pub va_reserved: [u32; 4],
}

#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct VARectangle {
    pub x: i16,
    pub y: i16,
    pub width: u16,
    pub height: u16,
}

/// `VADRMPRIMESurfaceDescriptor` from `va_drmcommon.h`: one DMA-BUF object
/// per plane plus the layer table describing how they compose a frame.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct VADRMPRIMESurfaceDescriptor {
    pub fourcc: u32,
    pub width: u32,
    pub height: u32,
    pub num_objects: u32,
    pub objects: [VADRMPRIMESurfaceDescriptorObject; 4],
    pub num_layers: u32,
    pub layers: [VADRMPRIMESurfaceDescriptorLayer; 4],
}

#[repr(C)]
#[derive(Copy, Clone, Default)]
pub struct VADRMPRIMESurfaceDescriptorObject {
    pub fd: c_int,
    pub size: u32,
    pub drm_format_modifier: u64,
}

#[repr(C)]
#[derive(Copy, Clone, Default)]
pub struct VADRMPRIMESurfaceDescriptorLayer {
    pub drm_format: u32,
    pub num_planes: u32,
    pub object_index: [u32; 4],
    pub offset: [u32; 4],
    pub pitch: [u32; 4],
}

impl Default for VADRMPRIMESurfaceDescriptor {
    fn default() -> Self {
        Self {
            fourcc: 0,
            width: 0,
            height: 0,
            num_objects: 0,
            objects: [Default::default(); 4],
            num_layers: 0,
            layers: [Default::default(); 4],
        }
    }
}

/// `drm_state` from `va_drmcommon.h`, reachable through
/// [`VADriverContext::drm_state`] when the display is DRM-backed.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct VADrmState {
    pub fd: c_int,
    pub auth_type: c_int,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct VADisplayAttribute {
    pub type_: i32,
    pub min_value: i32,
    pub max_value: i32,
    pub value: i32,
    pub flags: u32,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct VABufferInfo {
    pub handle: usize,
    pub type_: u32,
    pub mem_type: u32,
    pub mem_size: usize,
    pub va_reserved: [u32; 4],
}

pub type VADriverContextP = *mut VADriverContext;

/// `struct VADriverContext` from `va_backend.h`. libva owns this allocation;
/// the driver fills `pDriverData`, the vtable and the `max_*`/`str_vendor`
/// fields during `__vaDriverInit_1_0`.
#[repr(C)]
pub struct VADriverContext {
    pub pDriverData: *mut c_void,
    pub vtable: *mut VADriverVTable,
    pub vtable_glx: *mut c_void,
    pub vtable_egl: *mut c_void,
    pub vtable_tpi: *mut c_void,
    pub native_dpy: *mut c_void,
    pub x11_screen: c_int,
    pub version_major: c_int,
    pub version_minor: c_int,
    pub max_profiles: c_int,
    pub max_entrypoints: c_int,
    pub max_attributes: c_int,
    pub max_image_formats: c_int,
    pub max_subpic_formats: c_int,
    pub max_display_attributes: c_int,
    pub str_vendor: *const c_char,
    pub handle: *mut c_void,
    pub pDriverContext: *mut c_void,
    pub vtable_vpp: *mut c_void,
    pub override_driver_name: *mut c_char,
    pub pDisplayContext: *mut c_void,
    pub error_callback: Option<unsafe extern "C" fn(VADriverContextP, *const c_char)>,
    pub error_callback_user_context: *mut c_void,
    pub info_callback: Option<unsafe extern "C" fn(VADriverContextP, *const c_char)>,
    pub info_callback_user_context: *mut c_void,
    pub drm_state: *mut VADrmState,
    pub glx: *mut c_void,
    pub egl: *mut c_void,
    pub vtable_prot: *mut c_void,
    pub reserved: [usize; 40],
}

/// `struct VADriverVTable` from `va_backend.h`, in header order. Populated
/// by [`crate::ffi`]; entries the driver does not provide at all stay null
/// and libva reports them as unimplemented itself.
#[repr(C)]
pub struct VADriverVTable {
    pub vaTerminate: Option<unsafe extern "C" fn(VADriverContextP) -> VAStatus>,
    pub vaQueryConfigProfiles:
        Option<unsafe extern "C" fn(VADriverContextP, *mut i32, *mut c_int) -> VAStatus>,
    pub vaQueryConfigEntrypoints:
        Option<unsafe extern "C" fn(VADriverContextP, i32, *mut i32, *mut c_int) -> VAStatus>,
    pub vaGetConfigAttributes: Option<
        unsafe extern "C" fn(VADriverContextP, i32, i32, *mut VAConfigAttrib, c_int) -> VAStatus,
    >,
    pub vaCreateConfig: Option<
        unsafe extern "C" fn(
            VADriverContextP,
            i32,
            i32,
            *mut VAConfigAttrib,
            c_int,
            *mut VAConfigID,
        ) -> VAStatus,
    >,
    pub vaDestroyConfig: Option<unsafe extern "C" fn(VADriverContextP, VAConfigID) -> VAStatus>,
    pub vaQueryConfigAttributes: Option<
        unsafe extern "C" fn(
            VADriverContextP,
            VAConfigID,
            *mut i32,
            *mut i32,
            *mut VAConfigAttrib,
            *mut c_int,
        ) -> VAStatus,
    >,
    pub vaCreateSurfaces: Option<
        unsafe extern "C" fn(
            VADriverContextP,
            c_int,
            c_int,
            c_int,
            c_int,
            *mut VASurfaceID,
        ) -> VAStatus,
    >,
    pub vaDestroySurfaces:
        Option<unsafe extern "C" fn(VADriverContextP, *mut VASurfaceID, c_int) -> VAStatus>,
    pub vaCreateContext: Option<
        unsafe extern "C" fn(
            VADriverContextP,
            VAConfigID,
            c_int,
            c_int,
            c_int,
            *mut VASurfaceID,
            c_int,
            *mut VAContextID,
        ) -> VAStatus,
    >,
    pub vaDestroyContext: Option<unsafe extern "C" fn(VADriverContextP, VAContextID) -> VAStatus>,
    pub vaCreateBuffer: Option<
        unsafe extern "C" fn(
            VADriverContextP,
            VAContextID,
            i32,
            c_uint,
            c_uint,
            *mut c_void,
            *mut VABufferID,
        ) -> VAStatus,
    >,
    pub vaBufferSetNumElements:
        Option<unsafe extern "C" fn(VADriverContextP, VABufferID, c_uint) -> VAStatus>,
    pub vaMapBuffer:
        Option<unsafe extern "C" fn(VADriverContextP, VABufferID, *mut *mut c_void) -> VAStatus>,
    pub vaUnmapBuffer: Option<unsafe extern "C" fn(VADriverContextP, VABufferID) -> VAStatus>,
    pub vaDestroyBuffer: Option<unsafe extern "C" fn(VADriverContextP, VABufferID) -> VAStatus>,
    pub vaBeginPicture:
        Option<unsafe extern "C" fn(VADriverContextP, VAContextID, VASurfaceID) -> VAStatus>,
    pub vaRenderPicture: Option<
        unsafe extern "C" fn(VADriverContextP, VAContextID, *mut VABufferID, c_int) -> VAStatus,
    >,
    pub vaEndPicture: Option<unsafe extern "C" fn(VADriverContextP, VAContextID) -> VAStatus>,
    pub vaSyncSurface: Option<unsafe extern "C" fn(VADriverContextP, VASurfaceID) -> VAStatus>,
    pub vaQuerySurfaceStatus:
        Option<unsafe extern "C" fn(VADriverContextP, VASurfaceID, *mut i32) -> VAStatus>,
    pub vaQuerySurfaceError: Option<
        unsafe extern "C" fn(VADriverContextP, VASurfaceID, VAStatus, *mut *mut c_void) -> VAStatus,
    >,
    pub vaPutSurface: Option<
        unsafe extern "C" fn(
            VADriverContextP,
            VASurfaceID,
            *mut c_void,
            i16,
            i16,
            u16,
            u16,
            i16,
            i16,
            u16,
            u16,
            *mut VARectangle,
            c_uint,
            c_uint,
        ) -> VAStatus,
    >,
    pub vaQueryImageFormats:
        Option<unsafe extern "C" fn(VADriverContextP, *mut VAImageFormat, *mut c_int) -> VAStatus>,
    pub vaCreateImage: Option<
        unsafe extern "C" fn(
            VADriverContextP,
            *mut VAImageFormat,
            c_int,
            c_int,
            *mut VAImage,
        ) -> VAStatus,
    >,
    pub vaDeriveImage:
        Option<unsafe extern "C" fn(VADriverContextP, VASurfaceID, *mut VAImage) -> VAStatus>,
    pub vaDestroyImage: Option<unsafe extern "C" fn(VADriverContextP, VAImageID) -> VAStatus>,
    pub vaSetImagePalette:
        Option<unsafe extern "C" fn(VADriverContextP, VAImageID, *mut u8) -> VAStatus>,
    pub vaGetImage: Option<
        unsafe extern "C" fn(
            VADriverContextP,
            VASurfaceID,
            c_int,
            c_int,
            c_uint,
            c_uint,
            VAImageID,
        ) -> VAStatus,
    >,
    pub vaPutImage: Option<
        unsafe extern "C" fn(
            VADriverContextP,
            VASurfaceID,
            VAImageID,
            c_int,
            c_int,
            c_uint,
            c_uint,
            c_int,
            c_int,
            c_uint,
            c_uint,
        ) -> VAStatus,
    >,
    pub vaQuerySubpictureFormats: Option<
        unsafe extern "C" fn(
            VADriverContextP,
            *mut VAImageFormat,
            *mut c_uint,
            *mut c_uint,
        ) -> VAStatus,
    >,
    pub vaCreateSubpicture:
        Option<unsafe extern "C" fn(VADriverContextP, VAImageID, *mut VASubpictureID) -> VAStatus>,
    pub vaDestroySubpicture:
        Option<unsafe extern "C" fn(VADriverContextP, VASubpictureID) -> VAStatus>,
    pub vaSetSubpictureImage:
        Option<unsafe extern "C" fn(VADriverContextP, VASubpictureID, VAImageID) -> VAStatus>,
    pub vaSetSubpictureChromakey: Option<
        unsafe extern "C" fn(VADriverContextP, VASubpictureID, c_uint, c_uint, c_uint) -> VAStatus,
    >,
    pub vaSetSubpictureGlobalAlpha:
        Option<unsafe extern "C" fn(VADriverContextP, VASubpictureID, f32) -> VAStatus>,
    pub vaAssociateSubpicture: Option<
        unsafe extern "C" fn(
            VADriverContextP,
            VASubpictureID,
            *mut VASurfaceID,
            c_int,
            i16,
            i16,
            u16,
            u16,
            i16,
            i16,
            u16,
            u16,
            c_uint,
        ) -> VAStatus,
    >,
    pub vaDeassociateSubpicture: Option<
        unsafe extern "C" fn(VADriverContextP, VASubpictureID, *mut VASurfaceID, c_int) -> VAStatus,
    >,
    pub vaQueryDisplayAttributes: Option<
        unsafe extern "C" fn(VADriverContextP, *mut VADisplayAttribute, *mut c_int) -> VAStatus,
    >,
    pub vaGetDisplayAttributes: Option<
        unsafe extern "C" fn(VADriverContextP, *mut VADisplayAttribute, c_int) -> VAStatus,
    >,
    pub vaSetDisplayAttributes: Option<
        unsafe extern "C" fn(VADriverContextP, *mut VADisplayAttribute, c_int) -> VAStatus,
    >,
    pub vaBufferInfo: Option<
        unsafe extern "C" fn(
            VADriverContextP,
            VABufferID,
            *mut i32,
            *mut c_uint,
            *mut c_uint,
        ) -> VAStatus,
    >,
    pub vaLockSurface: Option<
        unsafe extern "C" fn(
            VADriverContextP,
            VASurfaceID,
            *mut c_uint,
            *mut c_uint,
            *mut c_uint,
            *mut c_uint,
            *mut c_uint,
            *mut c_uint,
            *mut c_uint,
            *mut c_uint,
            *mut *mut c_void,
        ) -> VAStatus,
    >,
    pub vaUnlockSurface: Option<unsafe extern "C" fn(VADriverContextP, VASurfaceID) -> VAStatus>,
    pub vaGetSurfaceAttributes: Option<
        unsafe extern "C" fn(VADriverContextP, VAConfigID, *mut VASurfaceAttrib, c_uint) -> VAStatus,
    >,
    pub vaCreateSurfaces2: Option<
        unsafe extern "C" fn(
            VADriverContextP,
            c_uint,
            c_uint,
            c_uint,
            *mut VASurfaceID,
            c_uint,
            *mut VASurfaceAttrib,
            c_uint,
        ) -> VAStatus,
    >,
    pub vaQuerySurfaceAttributes: Option<
        unsafe extern "C" fn(
            VADriverContextP,
            VAConfigID,
            *mut VASurfaceAttrib,
            *mut c_uint,
        ) -> VAStatus,
    >,
    pub vaAcquireBufferHandle: Option<
        unsafe extern "C" fn(VADriverContextP, VABufferID, *mut VABufferInfo) -> VAStatus,
    >,
    pub vaReleaseBufferHandle:
        Option<unsafe extern "C" fn(VADriverContextP, VABufferID) -> VAStatus>,
    pub vaCreateMFContext:
        Option<unsafe extern "C" fn(VADriverContextP, *mut VAMFContextID) -> VAStatus>,
    pub vaMFAddContext:
        Option<unsafe extern "C" fn(VADriverContextP, VAMFContextID, VAContextID) -> VAStatus>,
    pub vaMFReleaseContext:
        Option<unsafe extern "C" fn(VADriverContextP, VAMFContextID, VAContextID) -> VAStatus>,
    pub vaMFSubmit: Option<
        unsafe extern "C" fn(VADriverContextP, VAMFContextID, *mut VAContextID, c_int) -> VAStatus,
    >,
    pub vaCreateBuffer2: Option<
        unsafe extern "C" fn(
            VADriverContextP,
            VAContextID,
            i32,
            c_uint,
            c_uint,
            *mut c_uint,
            *mut c_uint,
            *mut VABufferID,
        ) -> VAStatus,
    >,
    pub vaQueryProcessingRate: Option<
        unsafe extern "C" fn(VADriverContextP, VAConfigID, *mut c_void, *mut c_uint) -> VAStatus,
    >,
    pub vaExportSurfaceHandle: Option<
        unsafe extern "C" fn(VADriverContextP, VASurfaceID, u32, u32, *mut c_void) -> VAStatus,
    >,
    pub reserved: [*mut c_void; 58],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fourcc_packing() {
        assert_eq!(VA_FOURCC_NV12, 0x3231564e);
        assert_eq!(VA_FOURCC_P010, 0x30313050);
    }

    #[test]
    fn test_profile_values_match_header() {
        assert_eq!(VAProfile::n(17), Some(VAProfile::HEVCMain));
        assert_eq!(VAProfile::n(32), Some(VAProfile::AV1Profile0));
        assert_eq!(VAProfile::n(-1), Some(VAProfile::None));
        assert_eq!(VAProfile::n(1000), None);
    }

    #[test]
    fn test_buffer_type_values_match_header() {
        assert_eq!(VABufferType::n(5), Some(VABufferType::SliceData));
        assert_eq!(VABufferType::n(13), Some(VABufferType::Probability));
    }
}
