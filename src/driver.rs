// Copyright 2024 The nvdec-vaapi-driver Authors
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! The driver instance: configuration negotiation, object lifecycles, the
//! capability-gated query paths, and terminate.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::OnceLock;

use thiserror::Error;

use crate::backend::SurfaceExporter;
use crate::bitstream::AppendableBuffer;
use crate::codec;
use crate::codec::PictureIndexLookup;
use crate::context::NvContext;
use crate::device::VideoDevice;
use crate::format::surface_format_from_rt_format;
use crate::format::FormatInfo;
use crate::registry::ObjectData;
use crate::registry::Registry;
use crate::surface::NvSurface;
use crate::sys::cuvid::cudaVideoChromaFormat;
use crate::sys::cuvid::cudaVideoCodec;
use crate::sys::cuvid::cudaVideoDeinterlaceMode;
use crate::sys::cuvid::cudaVideoSurfaceFormat;
use crate::sys::cuvid::cudaVideoCreate_PreferCUVID;
use crate::sys::cuvid::CUVIDDECODECREATEINFO;
use crate::va;
use crate::va::VABufferID;
use crate::va::VABufferType;
use crate::va::VAConfigAttrib;
use crate::va::VAConfigAttribType;
use crate::va::VAConfigID;
use crate::va::VAContextID;
use crate::va::VADRMPRIMESurfaceDescriptor;
use crate::va::VAEntrypoint;
use crate::va::VAImage;
use crate::va::VAImageFormat;
use crate::va::VAImageID;
use crate::va::VAProfile;
use crate::va::VAStatus;
use crate::va::VASurfaceAttrib;
use crate::va::VASurfaceAttribType;
use crate::va::VASurfaceID;
use crate::Resolution;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("invalid config")]
    InvalidConfig,
    #[error("invalid context")]
    InvalidContext,
    #[error("invalid surface")]
    InvalidSurface,
    #[error("invalid buffer")]
    InvalidBuffer,
    #[error("invalid image")]
    InvalidImage,
    #[error("invalid image format")]
    InvalidImageFormat,
    #[error("invalid parameter")]
    InvalidParameter,
    #[error("unsupported profile")]
    UnsupportedProfile,
    #[error("unsupported entrypoint")]
    UnsupportedEntrypoint,
    #[error("unsupported RT format")]
    UnsupportedRtFormat,
    #[error("unsupported memory type")]
    UnsupportedMemoryType,
    #[error("no free picture slot")]
    MaxNumExceeded,
    #[error("allocation failed")]
    AllocationFailed,
    #[error("hardware busy")]
    HwBusy,
    #[error("decoding error")]
    DecodingError,
    #[error("operation failed")]
    OperationFailed,
    #[error("unimplemented")]
    Unimplemented,
    #[error(transparent)]
    Device(#[from] anyhow::Error),
}

impl DriverError {
    /// The VA status code this error reports over the ABI.
    pub fn status(&self) -> VAStatus {
        match self {
            DriverError::InvalidConfig => va::VA_STATUS_ERROR_INVALID_CONFIG,
            DriverError::InvalidContext => va::VA_STATUS_ERROR_INVALID_CONTEXT,
            DriverError::InvalidSurface => va::VA_STATUS_ERROR_INVALID_SURFACE,
            DriverError::InvalidBuffer => va::VA_STATUS_ERROR_INVALID_BUFFER,
            DriverError::InvalidImage => va::VA_STATUS_ERROR_INVALID_IMAGE,
            DriverError::InvalidImageFormat => va::VA_STATUS_ERROR_INVALID_IMAGE_FORMAT,
            DriverError::InvalidParameter => va::VA_STATUS_ERROR_INVALID_PARAMETER,
            DriverError::UnsupportedProfile => va::VA_STATUS_ERROR_UNSUPPORTED_PROFILE,
            DriverError::UnsupportedEntrypoint => va::VA_STATUS_ERROR_UNSUPPORTED_ENTRYPOINT,
            DriverError::UnsupportedRtFormat => va::VA_STATUS_ERROR_UNSUPPORTED_RT_FORMAT,
            DriverError::UnsupportedMemoryType => va::VA_STATUS_ERROR_UNSUPPORTED_MEMORY_TYPE,
            DriverError::MaxNumExceeded => va::VA_STATUS_ERROR_MAX_NUM_EXCEEDED,
            DriverError::AllocationFailed => va::VA_STATUS_ERROR_ALLOCATION_FAILED,
            DriverError::HwBusy => va::VA_STATUS_ERROR_HW_BUSY,
            DriverError::DecodingError => va::VA_STATUS_ERROR_DECODING_ERROR,
            DriverError::OperationFailed | DriverError::Device(_) => {
                va::VA_STATUS_ERROR_OPERATION_FAILED
            }
            DriverError::Unimplemented => va::VA_STATUS_ERROR_UNIMPLEMENTED,
        }
    }
}

pub type DriverResult<T> = Result<T, DriverError>;

/// Which export backend to use, from `NVD_BACKEND`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Direct,
    Egl,
}

impl BackendKind {
    pub fn vendor_string(&self) -> &'static std::ffi::CStr {
        match self {
            BackendKind::Direct => c"VA-API NVDEC driver [direct backend]",
            BackendKind::Egl => c"VA-API NVDEC driver [egl backend]",
        }
    }
}

/// Process configuration read from the environment once at first init.
#[derive(Clone, Debug)]
pub struct DriverOptions {
    /// `NVD_GPU`; -1 means "pick from the DRM fd if any".
    pub gpu: i32,
    /// `NVD_MAX_INSTANCES`; 0 means unbounded.
    pub max_instances: u32,
    pub backend: BackendKind,
    /// `NVD_FORCE_INIT` overrides the sandbox probe.
    pub force_init: bool,
}

impl DriverOptions {
    pub fn from_env() -> Self {
        let parse = |name: &str| -> Option<i64> {
            std::env::var(name).ok().and_then(|v| v.parse().ok())
        };
        let backend = if std::env::var("NVD_BACKEND").as_deref() == Ok("egl") {
            BackendKind::Egl
        } else {
            BackendKind::Direct
        };
        Self {
            gpu: parse("NVD_GPU").unwrap_or(-1) as i32,
            max_instances: parse("NVD_MAX_INSTANCES").unwrap_or(0).max(0) as u32,
            backend,
            force_init: std::env::var_os("NVD_FORCE_INIT").is_some(),
        }
    }

    /// An unreadable `/proc/version` is how a browser sandbox looks from
    /// inside; initializing the vendor stack there would crash the host.
    pub fn sandbox_detected() -> bool {
        std::fs::File::open("/proc/version").is_err()
    }
}

/// Caps the number of live driver instances in the process.
pub struct InstanceLimiter {
    max_instances: u32,
    instances: Mutex<u32>,
}

impl InstanceLimiter {
    pub fn new(max_instances: u32) -> Self {
        Self { max_instances, instances: Mutex::new(0) }
    }

    /// The process-wide limiter, configured from `NVD_MAX_INSTANCES` on
    /// first use.
    pub fn global() -> &'static Arc<InstanceLimiter> {
        static LIMITER: OnceLock<Arc<InstanceLimiter>> = OnceLock::new();
        LIMITER.get_or_init(|| Arc::new(InstanceLimiter::new(DriverOptions::from_env().max_instances)))
    }

    pub fn try_acquire(&self) -> bool {
        let mut instances = self.instances.lock().unwrap();
        log::info!("Now have {} ({} max) instances", *instances, self.max_instances);
        if self.max_instances > 0 && *instances >= self.max_instances {
            return false;
        }
        *instances += 1;
        true
    }

    pub fn release(&self) {
        let mut instances = self.instances.lock().unwrap();
        *instances = instances.saturating_sub(1);
        log::info!("Now have {} ({} max) instances", *instances, self.max_instances);
    }
}

/// Negotiated codec parameters. The format half is mutable because client
/// render targets override it at context creation.
pub struct NvConfig {
    pub profile: VAProfile,
    pub entrypoint: VAEntrypoint,
    pub cuda_codec: cudaVideoCodec,
    pub format: Mutex<ConfigFormat>,
}

#[derive(Copy, Clone, Debug)]
pub struct ConfigFormat {
    pub chroma: cudaVideoChromaFormat,
    pub surface_format: cudaVideoSurfaceFormat,
    pub bit_depth: u32,
}

/// A typed client payload. The storage is 16-byte aligned and its address is
/// stable, since clients keep writing through the `MapBuffer` pointer until
/// `RenderPicture` consumes it.
pub struct NvBuffer {
    buffer_type: i32,
    elements: u32,
    data: AppendableBuffer,
    offset: usize,
}

impl NvBuffer {
    pub fn new(buffer_type: i32, data: &[u8], elements: u32, offset: usize) -> Self {
        let mut storage = AppendableBuffer::new();
        storage.append(data);
        Self { buffer_type, elements, data: storage, offset }
    }

    pub fn with_size(buffer_type: i32, size: usize, elements: u32) -> Self {
        let mut storage = AppendableBuffer::new();
        storage.append(&vec![0u8; size]);
        Self { buffer_type, elements, data: storage, offset: 0 }
    }

    pub fn buffer_type(&self) -> i32 {
        self.buffer_type
    }

    pub fn typed(&self) -> Option<VABufferType> {
        VABufferType::n(self.buffer_type)
    }

    pub fn num_elements(&self) -> u32 {
        self.elements
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[u8] {
        self.data.as_slice()
    }

    /// Bytes of leading padding recorded for unaligned VP8 slice data.
    pub fn unalignment_offset(&self) -> usize {
        self.offset
    }

    /// The pointer handed out by `MapBuffer`.
    pub fn host_ptr(&self) -> *mut std::ffi::c_void {
        self.data.as_ptr() as *mut std::ffi::c_void
    }

    /// Reinterprets the payload as one parameter struct.
    pub fn param<T>(&self) -> Option<&T> {
        if self.data.len() < std::mem::size_of::<T>() {
            log::warn!(
                "buffer of {} bytes too small for {} parameter bytes",
                self.data.len(),
                std::mem::size_of::<T>()
            );
            return None;
        }
        Some(unsafe { &*self.data.as_ptr().cast::<T>() })
    }

    /// Iterates the payload as `elements` packed structs, the layout VA uses
    /// for multi-element parameter buffers.
    pub fn elements<'a, T: 'a>(&'a self) -> impl Iterator<Item = &'a T> {
        let stride = if self.elements > 0 {
            self.data.len() / self.elements as usize
        } else {
            0
        };
        let count = if stride >= std::mem::size_of::<T>() { self.elements as usize } else { 0 };
        let base = self.data.as_ptr();
        (0..count).map(move |i| unsafe { &*base.add(i * stride).cast::<T>() })
    }
}

/// Host-visible copy target; its backing buffer lives in the registry and
/// dies with the image.
pub struct NvImage {
    pub format: &'static FormatInfo,
    pub width: u32,
    pub height: u32,
    pub buffer_id: VABufferID,
    pub data_size: u32,
}

pub struct NvDriver {
    pub device: Arc<dyn VideoDevice>,
    pub exporter: Arc<dyn SurfaceExporter>,
    pub registry: Registry,
    pub supports_16bit_surface: bool,
    pub supports_444_surface: bool,
    surface_count: Mutex<u32>,
    limiter: Arc<InstanceLimiter>,
}

impl NvDriver {
    /// Builds a driver instance: counts it against the limiter, initializes
    /// the exporter and takes its capability flags.
    pub fn new(
        device: Arc<dyn VideoDevice>,
        exporter: Arc<dyn SurfaceExporter>,
        limiter: Arc<InstanceLimiter>,
    ) -> DriverResult<Self> {
        if !limiter.try_acquire() {
            return Err(DriverError::HwBusy);
        }
        let caps = match exporter.init() {
            Ok(caps) => caps,
            Err(e) => {
                log::error!("Exporter failed: {e:#}");
                limiter.release();
                return Err(DriverError::OperationFailed);
            }
        };
        Ok(Self {
            device,
            exporter,
            registry: Registry::new(),
            supports_16bit_surface: caps.supports_16bit_surface,
            supports_444_surface: caps.supports_444_surface,
            surface_count: Mutex::new(0),
            limiter,
        })
    }

    fn device_supports(
        &self,
        codec: cudaVideoCodec,
        bit_depth: u32,
        chroma: cudaVideoChromaFormat,
    ) -> bool {
        self.device
            .decoder_caps(codec, chroma, bit_depth)
            .map(|caps| caps.supported)
            .unwrap_or(false)
    }

    /// `QueryConfigProfiles`: the intersection of what the codec table
    /// translates and what the device decodes, with the high-bit-depth and
    /// 4:4:4 extensions gated on the exporter caps.
    pub fn query_config_profiles(&self) -> DriverResult<Vec<VAProfile>> {
        use cudaVideoChromaFormat::YUV420;
        use cudaVideoChromaFormat::YUV444;
        use cudaVideoCodec::*;

        let _current = self.device.enter()?;
        let mut profiles = Vec::new();
        if self.device_supports(MPEG2, 8, YUV420) {
            profiles.push(VAProfile::MPEG2Simple);
            profiles.push(VAProfile::MPEG2Main);
        }
        if self.device_supports(MPEG4, 8, YUV420) {
            profiles.push(VAProfile::MPEG4Simple);
            profiles.push(VAProfile::MPEG4AdvancedSimple);
            profiles.push(VAProfile::MPEG4Main);
        }
        if self.device_supports(VC1, 8, YUV420) {
            profiles.push(VAProfile::VC1Simple);
            profiles.push(VAProfile::VC1Main);
            profiles.push(VAProfile::VC1Advanced);
        }
        if self.device_supports(H264, 8, YUV420) {
            profiles.push(VAProfile::H264Main);
            profiles.push(VAProfile::H264High);
            profiles.push(VAProfile::H264ConstrainedBaseline);
        }
        if self.device_supports(JPEG, 8, YUV420) {
            profiles.push(VAProfile::JPEGBaseline);
        }
        if self.device_supports(H264_SVC, 8, YUV420) {
            profiles.push(VAProfile::H264StereoHigh);
        }
        if self.device_supports(H264_MVC, 8, YUV420) {
            profiles.push(VAProfile::H264MultiviewHigh);
        }
        if self.device_supports(HEVC, 8, YUV420) {
            profiles.push(VAProfile::HEVCMain);
        }
        if self.device_supports(VP8, 8, YUV420) {
            profiles.push(VAProfile::VP8Version0_3);
        }
        if self.device_supports(VP9, 8, YUV420) {
            profiles.push(VAProfile::VP9Profile0);
        }
        if self.device_supports(AV1, 8, YUV420) {
            profiles.push(VAProfile::AV1Profile0);
        }
        if self.supports_16bit_surface {
            if self.device_supports(HEVC, 10, YUV420) {
                profiles.push(VAProfile::HEVCMain10);
            }
            if self.device_supports(HEVC, 12, YUV420) {
                profiles.push(VAProfile::HEVCMain12);
            }
            if self.device_supports(VP9, 10, YUV420) {
                profiles.push(VAProfile::VP9Profile2);
            }
        }
        if self.supports_444_surface {
            if self.device_supports(HEVC, 8, YUV444) {
                profiles.push(VAProfile::HEVCMain444);
            }
            if self.device_supports(VP9, 8, YUV444) {
                profiles.push(VAProfile::VP9Profile1);
            }
            if self.device_supports(AV1, 8, YUV444) {
                profiles.push(VAProfile::AV1Profile1);
            }
            if self.supports_16bit_surface {
                if self.device_supports(HEVC, 10, YUV444) {
                    profiles.push(VAProfile::HEVCMain444_10);
                }
                if self.device_supports(HEVC, 12, YUV444) {
                    profiles.push(VAProfile::HEVCMain444_12);
                }
                if self.device_supports(VP9, 10, YUV444) {
                    profiles.push(VAProfile::VP9Profile3);
                }
            }
        }
        // Drop anything no codec entry can actually translate.
        profiles.retain(|p| codec::cuda_codec_for_profile(*p).is_some());
        Ok(profiles)
    }

    /// RT-format bit set for a profile: everything the config could decode
    /// into, minus what the caps flags rule out.
    fn rt_format_bits(&self, profile: VAProfile) -> u32 {
        let mut value = va::VA_RT_FORMAT_YUV420;
        match profile {
            VAProfile::HEVCMain12 | VAProfile::VP9Profile2 => {
                value |= va::VA_RT_FORMAT_YUV420_12 | va::VA_RT_FORMAT_YUV420_10;
            }
            VAProfile::HEVCMain10 | VAProfile::AV1Profile0 => {
                value |= va::VA_RT_FORMAT_YUV420_10;
            }
            VAProfile::HEVCMain444_12 | VAProfile::VP9Profile3 => {
                value |= va::VA_RT_FORMAT_YUV444_12
                    | va::VA_RT_FORMAT_YUV420_12
                    | va::VA_RT_FORMAT_YUV444_10
                    | va::VA_RT_FORMAT_YUV420_10
                    | va::VA_RT_FORMAT_YUV444;
            }
            VAProfile::HEVCMain444_10 | VAProfile::AV1Profile1 => {
                value |= va::VA_RT_FORMAT_YUV444_10
                    | va::VA_RT_FORMAT_YUV420_10
                    | va::VA_RT_FORMAT_YUV444;
            }
            VAProfile::HEVCMain444 | VAProfile::VP9Profile1 => {
                value |= va::VA_RT_FORMAT_YUV444;
            }
            _ => {}
        }
        if !self.supports_16bit_surface {
            value &= !(va::VA_RT_FORMAT_YUV420_10
                | va::VA_RT_FORMAT_YUV420_12
                | va::VA_RT_FORMAT_YUV444_10
                | va::VA_RT_FORMAT_YUV444_12);
        }
        if !self.supports_444_surface {
            value &= !(va::VA_RT_FORMAT_YUV444
                | va::VA_RT_FORMAT_YUV444_10
                | va::VA_RT_FORMAT_YUV444_12);
        }
        value
    }

    /// `GetConfigAttributes`.
    pub fn get_config_attributes(
        &self,
        profile_raw: i32,
        _entrypoint_raw: i32,
        attribs: &mut [VAConfigAttrib],
    ) -> DriverResult<()> {
        let profile = VAProfile::n(profile_raw).ok_or(DriverError::UnsupportedProfile)?;
        let cuda_codec =
            codec::cuda_codec_for_profile(profile).ok_or(DriverError::UnsupportedProfile)?;
        for attrib in attribs {
            match VAConfigAttribType::n(attrib.type_) {
                Some(VAConfigAttribType::RTFormat) => {
                    attrib.value = self.rt_format_bits(profile);
                }
                Some(VAConfigAttribType::MaxPictureWidth) => {
                    let _current = self.device.enter()?;
                    attrib.value = self
                        .device
                        .decoder_caps(cuda_codec, cudaVideoChromaFormat::YUV420, 8)
                        .map(|caps| caps.max_width)
                        .unwrap_or(0);
                }
                Some(VAConfigAttribType::MaxPictureHeight) => {
                    let _current = self.device.enter()?;
                    attrib.value = self
                        .device
                        .decoder_caps(cuda_codec, cudaVideoChromaFormat::YUV420, 8)
                        .map(|caps| caps.max_height)
                        .unwrap_or(0);
                }
                _ => {
                    log::info!("unhandled config attribute: {}", attrib.type_);
                }
            }
        }
        Ok(())
    }

    /// `CreateConfig` (sequence S1).
    pub fn create_config(
        &self,
        profile_raw: i32,
        entrypoint_raw: i32,
        attribs: &[VAConfigAttrib],
    ) -> DriverResult<VAConfigID> {
        log::debug!("got profile: {profile_raw} with {} attributes", attribs.len());
        let profile = VAProfile::n(profile_raw).ok_or(DriverError::UnsupportedProfile)?;
        let cuda_codec = codec::cuda_codec_for_profile(profile).ok_or_else(|| {
            log::info!("Profile not supported: {profile_raw}");
            DriverError::UnsupportedProfile
        })?;
        if VAEntrypoint::n(entrypoint_raw) != Some(VAEntrypoint::VLD) {
            log::info!("Entrypoint not supported: {entrypoint_raw}");
            return Err(DriverError::UnsupportedEntrypoint);
        }

        let mut format = ConfigFormat {
            chroma: cudaVideoChromaFormat::YUV420,
            surface_format: cudaVideoSurfaceFormat::NV12,
            bit_depth: 8,
        };
        let rt_format = attribs
            .first()
            .filter(|a| VAConfigAttribType::n(a.type_) == Some(VAConfigAttribType::RTFormat))
            .map(|a| a.value);

        if self.supports_16bit_surface {
            match profile {
                VAProfile::HEVCMain10 => {
                    format.surface_format = cudaVideoSurfaceFormat::P016;
                    format.bit_depth = 10;
                }
                VAProfile::HEVCMain12 => {
                    format.surface_format = cudaVideoSurfaceFormat::P016;
                    format.bit_depth = 12;
                }
                VAProfile::VP9Profile2 | VAProfile::AV1Profile0 => match rt_format {
                    Some(va::VA_RT_FORMAT_YUV420_12) => {
                        format.surface_format = cudaVideoSurfaceFormat::P016;
                        format.bit_depth = 12;
                    }
                    Some(va::VA_RT_FORMAT_YUV420_10) => {
                        format.surface_format = cudaVideoSurfaceFormat::P016;
                        format.bit_depth = 10;
                    }
                    Some(_) => {}
                    None => {
                        if profile == VAProfile::VP9Profile2 {
                            format.surface_format = cudaVideoSurfaceFormat::P016;
                            format.bit_depth = 10;
                        } else {
                            log::info!(
                                "Unable to determine surface type for VP9/AV1 codec due to no RTFormat specified."
                            );
                        }
                    }
                },
                _ => {}
            }
        }
        if self.supports_444_surface {
            match profile {
                VAProfile::HEVCMain444 | VAProfile::VP9Profile1 | VAProfile::AV1Profile1 => {
                    format.surface_format = cudaVideoSurfaceFormat::YUV444;
                    format.chroma = cudaVideoChromaFormat::YUV444;
                    format.bit_depth = 8;
                }
                _ => {}
            }
        }
        if self.supports_444_surface && self.supports_16bit_surface {
            match profile {
                VAProfile::HEVCMain444_10 => {
                    format.surface_format = cudaVideoSurfaceFormat::YUV444_16Bit;
                    format.chroma = cudaVideoChromaFormat::YUV444;
                    format.bit_depth = 10;
                }
                VAProfile::HEVCMain444_12 => {
                    format.surface_format = cudaVideoSurfaceFormat::YUV444_16Bit;
                    format.chroma = cudaVideoChromaFormat::YUV444;
                    format.bit_depth = 12;
                }
                VAProfile::VP9Profile3 | VAProfile::AV1Profile1 => match rt_format {
                    Some(va::VA_RT_FORMAT_YUV444_12) => {
                        format.surface_format = cudaVideoSurfaceFormat::YUV444_16Bit;
                        format.chroma = cudaVideoChromaFormat::YUV444;
                        format.bit_depth = 12;
                    }
                    Some(va::VA_RT_FORMAT_YUV444_10) => {
                        format.surface_format = cudaVideoSurfaceFormat::YUV444_16Bit;
                        format.chroma = cudaVideoChromaFormat::YUV444;
                        format.bit_depth = 10;
                    }
                    Some(va::VA_RT_FORMAT_YUV444) => {
                        format.surface_format = cudaVideoSurfaceFormat::YUV444;
                        format.chroma = cudaVideoChromaFormat::YUV444;
                        format.bit_depth = 8;
                    }
                    Some(_) => {}
                    None => {
                        if profile == VAProfile::VP9Profile3 {
                            format.surface_format = cudaVideoSurfaceFormat::YUV444_16Bit;
                            format.chroma = cudaVideoChromaFormat::YUV444;
                            format.bit_depth = 10;
                        }
                    }
                },
                _ => {}
            }
        }

        let config = NvConfig {
            profile,
            entrypoint: VAEntrypoint::VLD,
            cuda_codec,
            format: Mutex::new(format),
        };
        Ok(self.registry.insert(ObjectData::Config(Arc::new(config))))
    }

    pub fn destroy_config(&self, config_id: VAConfigID) {
        self.registry.remove(config_id);
    }

    /// `QueryConfigAttributes`: reports back the profile, entrypoint and the
    /// same cumulative RT-format set `GetConfigAttributes` computes.
    pub fn query_config_attributes(
        &self,
        config_id: VAConfigID,
    ) -> DriverResult<(VAProfile, VAEntrypoint, Vec<VAConfigAttrib>)> {
        let config = self.registry.config(config_id).ok_or(DriverError::InvalidConfig)?;
        let attrib = VAConfigAttrib {
            type_: VAConfigAttribType::RTFormat as i32,
            value: self.rt_format_bits(config.profile),
        };
        Ok((config.profile, config.entrypoint, vec![attrib]))
    }

    /// `CreateSurfaces2` (sequence S2).
    pub fn create_surfaces(
        &self,
        rt_format: u32,
        width: u32,
        height: u32,
        count: u32,
    ) -> DriverResult<Vec<VASurfaceID>> {
        let Some((surface_format, chroma, bit_depth)) = surface_format_from_rt_format(rt_format)
        else {
            log::info!("Unknown format: {rt_format:#x}");
            return Err(DriverError::UnsupportedRtFormat);
        };
        let size = Resolution { width, height }.round_up_for_chroma(chroma);

        let _current = self.device.enter()?;
        let mut ids = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let surface = Arc::new(NvSurface::new(
                size.width,
                size.height,
                surface_format,
                chroma,
                bit_depth,
            ));
            log::debug!(
                "Creating surface {}x{}, format {rt_format:#x}",
                size.width,
                size.height
            );
            ids.push(self.registry.insert(ObjectData::Surface(surface)));
        }
        *self.surface_count.lock().unwrap() += count;
        Ok(ids)
    }

    pub fn destroy_surfaces(&self, surface_ids: &[VASurfaceID]) -> DriverResult<()> {
        let mut surfaces = Vec::with_capacity(surface_ids.len());
        for id in surface_ids {
            surfaces.push(self.registry.surface(*id).ok_or(DriverError::InvalidSurface)?);
        }
        for (surface, id) in surfaces.iter().zip(surface_ids) {
            log::debug!("Destroying surface {} ({id})", surface.state().picture_idx);
            self.exporter.detach_backing_image(surface);
            self.registry.remove(*id);
        }
        let mut count = self.surface_count.lock().unwrap();
        *count = count.saturating_sub(surface_ids.len() as u32);
        Ok(())
    }

    pub fn surface_count(&self) -> u32 {
        *self.surface_count.lock().unwrap()
    }

    /// `CreateContext` (sequence S3).
    pub fn create_context(
        &self,
        config_id: VAConfigID,
        picture_width: u32,
        picture_height: u32,
        render_targets: &[VASurfaceID],
    ) -> DriverResult<VAContextID> {
        let config = self.registry.config(config_id).ok_or(DriverError::InvalidConfig)?;
        log::debug!(
            "creating context with {} render targets at {picture_width}x{picture_height}",
            render_targets.len()
        );
        let selected_codec =
            codec::codec_for_profile(config.profile).ok_or_else(|| {
                log::info!("Unable to find codec for profile: {:?}", config.profile);
                DriverError::UnsupportedProfile
            })?;

        if let Some(first) = render_targets.first() {
            // Client surfaces are authoritative for the decode format.
            let surface = self.registry.surface(*first).ok_or(DriverError::InvalidParameter)?;
            let mut format = config.format.lock().unwrap();
            format.surface_format = surface.format;
            format.chroma = surface.chroma;
            format.bit_depth = surface.bit_depth;
        }
        let format = *config.format.lock().unwrap();

        let mut surface_count = if render_targets.is_empty() {
            32
        } else {
            render_targets.len() as u32
        };
        if surface_count > 32 {
            log::warn!(
                "Application requested {surface_count} surface(s), limiting to 32. This may cause issues."
            );
            surface_count = 32;
        }

        let display_area =
            Resolution { width: picture_width, height: picture_height }
                .round_up_for_chroma(format.chroma);

        let mut info: CUVIDDECODECREATEINFO = unsafe { std::mem::zeroed() };
        info.ulWidth = picture_width as _;
        info.ulHeight = picture_height as _;
        info.ulMaxWidth = picture_width as _;
        info.ulMaxHeight = picture_height as _;
        info.ulTargetWidth = picture_width as _;
        info.ulTargetHeight = picture_height as _;
        info.CodecType = config.cuda_codec;
        info.ulCreationFlags = cudaVideoCreate_PreferCUVID;
        info.ulIntraDecodeOnly = 0;
        info.display_area.right = display_area.width as i16;
        info.display_area.bottom = display_area.height as i16;
        info.ChromaFormat = format.chroma;
        info.OutputFormat = format.surface_format;
        info.bitDepthMinus8 = (format.bit_depth - 8) as _;
        info.DeinterlaceMode = cudaVideoDeinterlaceMode::Weave;
        info.ulNumOutputSurfaces = 1;
        info.ulNumDecodeSurfaces = surface_count as _;

        let decoder = {
            let _current = self.device.enter()?;
            self.device.create_decoder(&mut info).map_err(|e| {
                log::error!("decoder creation failed: {e:#}");
                DriverError::AllocationFailed
            })?
        };

        let context = NvContext::new(
            selected_codec,
            config.profile,
            picture_width,
            picture_height,
            surface_count,
            Arc::clone(&self.device),
            decoder,
            Arc::clone(&self.exporter),
        )?;
        let context = Arc::new(context);
        let id = self.registry.insert(ObjectData::Context(Arc::clone(&context)));
        context.set_id(id);
        Ok(id)
    }

    pub fn destroy_context(&self, context_id: VAContextID) -> DriverResult<()> {
        log::debug!("Destroying context: {context_id}");
        let context = self.registry.context(context_id).ok_or(DriverError::InvalidContext)?;
        let successful = context.destroy();
        self.registry.remove(context_id);
        if successful {
            Ok(())
        } else {
            Err(DriverError::OperationFailed)
        }
    }

    /// `CreateBuffer`. `data` may be null; `size` is per-element.
    ///
    /// # Safety
    /// When non-null, `data` must point at `size * num_elements` readable
    /// bytes.
    pub unsafe fn create_buffer(
        &self,
        context_id: VAContextID,
        buffer_type: i32,
        size: u32,
        num_elements: u32,
        data: *const u8,
    ) -> DriverResult<VABufferID> {
        let context = self.registry.context(context_id).ok_or(DriverError::InvalidContext)?;

        let mut data = data;
        let mut total = size as usize * num_elements as usize;
        let mut offset = 0usize;
        // VP8 slice data arrives at whatever alignment the demuxer left it;
        // keep the low nibble of the address so the handler can find the
        // frame tag again.
        if context.profile == VAProfile::VP8Version0_3
            && VABufferType::n(buffer_type) == Some(VABufferType::SliceData)
            && !data.is_null()
        {
            offset = data as usize & 0xf;
            data = data.sub(offset);
            total += offset;
        }

        let buffer = if data.is_null() {
            NvBuffer::with_size(buffer_type, total, num_elements)
        } else {
            NvBuffer::new(
                buffer_type,
                std::slice::from_raw_parts(data, total),
                num_elements,
                offset,
            )
        };
        Ok(self.registry.insert(ObjectData::Buffer(Arc::new(buffer))))
    }

    pub fn map_buffer(&self, buffer_id: VABufferID) -> DriverResult<*mut std::ffi::c_void> {
        let buffer = self.registry.buffer(buffer_id).ok_or(DriverError::InvalidBuffer)?;
        Ok(buffer.host_ptr())
    }

    pub fn destroy_buffer(&self, buffer_id: VABufferID) -> DriverResult<()> {
        self.registry.buffer(buffer_id).ok_or(DriverError::InvalidBuffer)?;
        self.registry.remove(buffer_id);
        Ok(())
    }

    /// `BeginPicture` (sequence S4).
    pub fn begin_picture(
        &self,
        context_id: VAContextID,
        render_target: VASurfaceID,
    ) -> DriverResult<()> {
        let context = self.registry.context(context_id).ok_or(DriverError::InvalidContext)?;
        let surface =
            self.registry.surface(render_target).ok_or(DriverError::InvalidSurface)?;
        context.begin_picture(&surface)
    }

    /// `RenderPicture`: feed each buffer to the codec handler; null or
    /// unknown buffers are logged and skipped.
    pub fn render_picture(
        &self,
        context_id: VAContextID,
        buffer_ids: &[VABufferID],
    ) -> DriverResult<()> {
        let context = self.registry.context(context_id).ok_or(DriverError::InvalidContext)?;
        for id in buffer_ids {
            let Some(buffer) = self.registry.buffer(*id) else {
                log::info!("Invalid buffer detected, skipping: {id}");
                continue;
            };
            if buffer.size() == 0 {
                log::info!("Invalid buffer detected, skipping: {id}");
                continue;
            }
            context.render_buffer(self, &buffer);
        }
        Ok(())
    }

    /// `EndPicture` (sequence S4 tail).
    pub fn end_picture(&self, context_id: VAContextID) -> DriverResult<()> {
        let context = self.registry.context(context_id).ok_or(DriverError::InvalidContext)?;
        context.end_picture()
    }

    pub fn sync_surface(&self, render_target: VASurfaceID) -> DriverResult<()> {
        let surface =
            self.registry.surface(render_target).ok_or(DriverError::InvalidSurface)?;
        surface.wait_idle();
        Ok(())
    }

    /// `QueryImageFormats`, filtered by the caps flags.
    pub fn query_image_formats(&self) -> Vec<VAImageFormat> {
        crate::format::FORMATS
            .iter()
            .filter(|f| !(f.is_16bit && !self.supports_16bit_surface))
            .filter(|f| !(f.is_yuv444 && !self.supports_444_surface))
            .map(|f| f.va_format)
            .collect()
    }

    /// `CreateImage`: allocates the image record plus its implicit buffer.
    pub fn create_image(
        &self,
        va_format: &VAImageFormat,
        width: u32,
        height: u32,
    ) -> DriverResult<VAImage> {
        let format = FormatInfo::from_va_fourcc(va_format.fourcc)
            .ok_or(DriverError::InvalidImageFormat)?;
        let data_size = format.frame_size(width, height) as u32;
        let buffer = NvBuffer::with_size(VABufferType::Image as i32, data_size as usize, 1);
        let buffer_id = self.registry.insert(ObjectData::Buffer(Arc::new(buffer)));

        let image = NvImage { format, width, height, buffer_id, data_size };
        let image_id = self.registry.insert(ObjectData::Image(Arc::new(image)));
        log::debug!("created image id: {image_id}");

        let mut pitches = [0u32; 3];
        let mut offsets = [0u32; 3];
        let mut offset = 0u32;
        for (i, plane) in format.planes.iter().enumerate() {
            pitches[i] = width * format.bpc;
            offsets[i] = offset;
            offset += ((width * height) >> (plane.ss.x + plane.ss.y)) * format.bpc * plane.channels;
        }

        Ok(VAImage {
            image_id,
            format: *va_format,
            buf: buffer_id,
            width: width as u16,
            height: height as u16,
            data_size,
            num_planes: format.planes.len() as u32,
            pitches,
            offsets,
            num_palette_entries: 0,
            entry_bytes: 0,
            component_order: [0; 4],
            va_reserved: [0; 4],
        })
    }

    /// `DestroyImage` deletes the image and its implicit buffer.
    pub fn destroy_image(&self, image_id: VAImageID) -> DriverResult<()> {
        let image = self.registry.image(image_id).ok_or(DriverError::InvalidImage)?;
        self.registry.remove(image.buffer_id);
        self.registry.remove(image_id);
        Ok(())
    }

    /// `GetImage`: sync the surface, then copy each backing plane to the
    /// image's host buffer.
    pub fn get_image(
        &self,
        surface_id: VASurfaceID,
        image_id: VAImageID,
        width: u32,
        height: u32,
    ) -> DriverResult<()> {
        let surface = self.registry.surface(surface_id).ok_or(DriverError::InvalidSurface)?;
        let image = self.registry.image(image_id).ok_or(DriverError::InvalidImage)?;
        let buffer = self.registry.buffer(image.buffer_id).ok_or(DriverError::InvalidBuffer)?;
        if surface.state().context_id == va::VA_INVALID_ID {
            return Err(DriverError::InvalidContext);
        }
        surface.wait_idle();

        let _current = self.device.enter()?;
        let backing = surface.backing.lock().unwrap();
        let backing = backing.as_ref().ok_or(DriverError::OperationFailed)?;
        let format = image.format;
        let dst = unsafe {
            std::slice::from_raw_parts_mut(buffer.host_ptr().cast::<u8>(), buffer.size())
        };
        let mut offset = 0usize;
        for (plane, backing_plane) in format.planes.iter().zip(backing.planes.iter()) {
            let row_bytes = ((width >> plane.ss.x) * format.bpc * plane.channels) as usize;
            let rows = (height >> plane.ss.y) as usize;
            let plane_size = row_bytes * rows;
            if offset + plane_size > dst.len() {
                return Err(DriverError::OperationFailed);
            }
            self.device.copy_plane_to_host(
                backing_plane.device_ptr,
                backing_plane.pitch as usize,
                &mut dst[offset..offset + plane_size],
                row_bytes,
                rows,
            )?;
            offset += plane_size;
        }
        Ok(())
    }

    /// `QuerySurfaceAttributes` (on the config, per VA-API).
    pub fn query_surface_attributes(
        &self,
        config_id: VAConfigID,
    ) -> DriverResult<Vec<VASurfaceAttrib>> {
        let config = self.registry.config(config_id).ok_or(DriverError::InvalidConfig)?;
        let format = *config.format.lock().unwrap();
        if format.chroma != cudaVideoChromaFormat::YUV420
            && format.chroma != cudaVideoChromaFormat::YUV444
        {
            log::info!("Unknown chroma format: {:?}", format.chroma);
            return Err(DriverError::InvalidConfig);
        }
        if (format.chroma == cudaVideoChromaFormat::YUV444
            || format.surface_format == cudaVideoSurfaceFormat::YUV444_16Bit)
            && !self.supports_444_surface
        {
            log::info!("YUV444 surfaces not supported");
            return Err(DriverError::InvalidConfig);
        }
        if format.surface_format == cudaVideoSurfaceFormat::P016 && !self.supports_16bit_surface {
            log::info!("16 bit surfaces not supported");
            return Err(DriverError::InvalidConfig);
        }

        let caps = {
            let _current = self.device.enter()?;
            self.device
                .decoder_caps(config.cuda_codec, format.chroma, format.bit_depth)?
        };
        log::debug!(
            "Returning constraints: width: {} - {}, height: {} - {}",
            caps.min_width,
            caps.max_width,
            caps.min_height,
            caps.max_height
        );

        let mut attribs = vec![
            VASurfaceAttrib::gettable(VASurfaceAttribType::MinWidth, caps.min_width as i32),
            VASurfaceAttrib::gettable(VASurfaceAttribType::MinHeight, caps.min_height as i32),
            VASurfaceAttrib::gettable(VASurfaceAttribType::MaxWidth, caps.max_width as i32),
            VASurfaceAttrib::gettable(VASurfaceAttribType::MaxHeight, caps.max_height as i32),
        ];
        if format.chroma == cudaVideoChromaFormat::YUV444 {
            attribs.push(VASurfaceAttrib::gettable(
                VASurfaceAttribType::PixelFormat,
                va::VA_FOURCC_444P as i32,
            ));
            attribs.push(VASurfaceAttrib::gettable(
                VASurfaceAttribType::PixelFormat,
                va::VA_FOURCC_Q416 as i32,
            ));
        } else {
            attribs.push(VASurfaceAttrib::gettable(
                VASurfaceAttribType::PixelFormat,
                va::VA_FOURCC_NV12 as i32,
            ));
            if self.supports_16bit_surface {
                for fourcc in [va::VA_FOURCC_P010, va::VA_FOURCC_P012, va::VA_FOURCC_P016] {
                    attribs.push(VASurfaceAttrib::gettable(
                        VASurfaceAttribType::PixelFormat,
                        fourcc as i32,
                    ));
                }
            }
        }
        Ok(attribs)
    }

    /// `ExportSurfaceHandle` with the fixed memory-type and layout guards.
    pub fn export_surface_handle(
        &self,
        surface_id: VASurfaceID,
        mem_type: u32,
        flags: u32,
    ) -> DriverResult<VADRMPRIMESurfaceDescriptor> {
        if mem_type & va::VA_SURFACE_ATTRIB_MEM_TYPE_DRM_PRIME_2 == 0 {
            return Err(DriverError::UnsupportedMemoryType);
        }
        if flags & va::VA_EXPORT_SURFACE_SEPARATE_LAYERS == 0 {
            return Err(DriverError::InvalidSurface);
        }
        let surface = self.registry.surface(surface_id).ok_or(DriverError::InvalidSurface)?;

        let _current = self.device.enter()?;
        if let Err(e) = self.exporter.realise_surface(&surface) {
            log::error!("Unable to export surface: {e:#}");
            return Err(DriverError::AllocationFailed);
        }
        let mut descriptor = VADRMPRIMESurfaceDescriptor::default();
        self.exporter.fill_export_descriptor(&surface, &mut descriptor)?;
        Ok(descriptor)
    }

    /// `Terminate`: contexts first (their resolve threads reference
    /// surfaces), then backing images, then everything else.
    pub fn terminate(&self) {
        log::debug!("Terminating driver instance");
        let current = self.device.enter();
        for (id, context) in self.registry.take_contexts() {
            log::debug!("Found context {id} at terminate");
            context.destroy();
        }
        for surface in self.registry.surfaces() {
            self.exporter.detach_backing_image(&surface);
        }
        self.exporter.destroy_all_backing_images();
        self.registry.clear();
        self.exporter.release();
        drop(current);
        self.limiter.release();
    }
}

impl PictureIndexLookup for NvDriver {
    fn picture_index(&self, surface: VASurfaceID) -> i32 {
        match self.registry.surface(surface) {
            Some(surface) => surface.state().picture_idx,
            None => -1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyExporter;
    use crate::backend::ExporterCaps;
    use crate::device::dummy::DummyDevice;

    fn driver_with_caps(supports_16bit: bool, supports_444: bool) -> NvDriver {
        let device: Arc<dyn VideoDevice> = Arc::new(DummyDevice::new());
        let mut exporter = DummyExporter::new();
        exporter.caps = ExporterCaps {
            supports_16bit_surface: supports_16bit,
            supports_444_surface: supports_444,
        };
        let exporter: Arc<dyn SurfaceExporter> = Arc::new(exporter);
        NvDriver::new(device, exporter, Arc::new(InstanceLimiter::new(0))).unwrap()
    }

    fn driver() -> NvDriver {
        driver_with_caps(true, true)
    }

    #[test]
    fn test_instance_cap() {
        let limiter = Arc::new(InstanceLimiter::new(1));
        let make = |limiter: &Arc<InstanceLimiter>| {
            let device: Arc<dyn VideoDevice> = Arc::new(DummyDevice::new());
            let exporter: Arc<dyn SurfaceExporter> = Arc::new(DummyExporter::new());
            NvDriver::new(device, exporter, Arc::clone(limiter))
        };
        let first = make(&limiter).unwrap();
        assert!(matches!(make(&limiter), Err(DriverError::HwBusy)));
        first.terminate();
        let third = make(&limiter).unwrap();
        third.terminate();
    }

    #[test]
    fn test_profile_filtering_by_caps() {
        let gated = [
            VAProfile::HEVCMain10,
            VAProfile::HEVCMain12,
            VAProfile::HEVCMain444,
            VAProfile::VP9Profile1,
            VAProfile::VP9Profile2,
            VAProfile::AV1Profile1,
        ];

        let plain = driver_with_caps(false, false);
        let profiles = plain.query_config_profiles().unwrap();
        for profile in gated {
            assert!(!profiles.contains(&profile), "{profile:?} must be gated off");
        }
        assert!(profiles.contains(&VAProfile::HEVCMain));
        assert!(profiles.contains(&VAProfile::H264High));

        let full = driver();
        let profiles = full.query_config_profiles().unwrap();
        for profile in gated {
            assert!(profiles.contains(&profile), "{profile:?} must be advertised");
        }
        // Profiles no codec translates stay hidden no matter what the
        // device claims.
        assert!(!profiles.contains(&VAProfile::H263Baseline));
    }

    #[test]
    fn test_create_config_defaults_and_overrides() {
        let drv = driver();

        let id = drv
            .create_config(VAProfile::H264Main as i32, VAEntrypoint::VLD as i32, &[])
            .unwrap();
        let config = drv.registry.config(id).unwrap();
        let format = *config.format.lock().unwrap();
        assert_eq!(format.surface_format, cudaVideoSurfaceFormat::NV12);
        assert_eq!(format.bit_depth, 8);

        let id = drv
            .create_config(VAProfile::HEVCMain10 as i32, VAEntrypoint::VLD as i32, &[])
            .unwrap();
        let format = *drv.registry.config(id).unwrap().format.lock().unwrap();
        assert_eq!(format.surface_format, cudaVideoSurfaceFormat::P016);
        assert_eq!(format.bit_depth, 10);

        let attribs = [VAConfigAttrib {
            type_: VAConfigAttribType::RTFormat as i32,
            value: va::VA_RT_FORMAT_YUV420_12,
        }];
        let id = drv
            .create_config(VAProfile::VP9Profile2 as i32, VAEntrypoint::VLD as i32, &attribs)
            .unwrap();
        let format = *drv.registry.config(id).unwrap().format.lock().unwrap();
        assert_eq!(format.bit_depth, 12);

        let id = drv
            .create_config(VAProfile::HEVCMain444 as i32, VAEntrypoint::VLD as i32, &[])
            .unwrap();
        let format = *drv.registry.config(id).unwrap().format.lock().unwrap();
        assert_eq!(format.chroma, cudaVideoChromaFormat::YUV444);

        assert!(matches!(
            drv.create_config(VAProfile::H264Main as i32, VAEntrypoint::EncSlice as i32, &[]),
            Err(DriverError::UnsupportedEntrypoint)
        ));
        assert!(matches!(
            drv.create_config(VAProfile::H263Baseline as i32, VAEntrypoint::VLD as i32, &[]),
            Err(DriverError::UnsupportedProfile)
        ));
    }

    #[test]
    fn test_caps_off_leaves_defaults() {
        // With the 16-bit path off, a 10-bit profile keeps the 8-bit
        // defaults and is rejected downstream rather than here.
        let drv = driver_with_caps(false, false);
        let id = drv
            .create_config(VAProfile::HEVCMain10 as i32, VAEntrypoint::VLD as i32, &[])
            .unwrap();
        let format = *drv.registry.config(id).unwrap().format.lock().unwrap();
        assert_eq!(format.surface_format, cudaVideoSurfaceFormat::NV12);
        assert_eq!(format.bit_depth, 8);
    }

    #[test]
    fn test_surface_rounding_and_count() {
        let drv = driver();
        let ids = drv.create_surfaces(va::VA_RT_FORMAT_YUV420, 1919, 1079, 3).unwrap();
        assert_eq!(ids.len(), 3);
        assert_eq!(drv.surface_count(), 3);
        let surface = drv.registry.surface(ids[0]).unwrap();
        assert_eq!((surface.width, surface.height), (1920, 1080));

        drv.destroy_surfaces(&ids).unwrap();
        assert_eq!(drv.surface_count(), 0);
        assert!(drv.registry.surface(ids[0]).is_none());
        // Count never goes negative even if the client double-destroys.
        assert!(drv.destroy_surfaces(&ids).is_err());
        assert_eq!(drv.surface_count(), 0);
    }

    #[test]
    fn test_unknown_rt_format_is_rejected() {
        let drv = driver();
        assert!(matches!(
            drv.create_surfaces(0x42, 640, 480, 1),
            Err(DriverError::UnsupportedRtFormat)
        ));
    }

    #[test]
    fn test_context_inherits_render_target_format() {
        let drv = driver();
        let config_id = drv
            .create_config(VAProfile::HEVCMain as i32, VAEntrypoint::VLD as i32, &[])
            .unwrap();
        let surfaces = drv
            .create_surfaces(va::VA_RT_FORMAT_YUV420_10, 1920, 1080, 1)
            .unwrap();

        let context_id = drv.create_context(config_id, 1920, 1080, &surfaces).unwrap();
        let format = *drv.registry.config(config_id).unwrap().format.lock().unwrap();
        assert_eq!(format.bit_depth, 10);
        assert_eq!(format.surface_format, cudaVideoSurfaceFormat::P016);
        drv.destroy_context(context_id).unwrap();
    }

    #[test]
    fn test_render_picture_skips_unknown_buffer_types() {
        let drv = driver();
        let config_id = drv
            .create_config(VAProfile::H264Main as i32, VAEntrypoint::VLD as i32, &[])
            .unwrap();
        let surfaces = drv.create_surfaces(va::VA_RT_FORMAT_YUV420, 320, 240, 2).unwrap();
        let context_id = drv.create_context(config_id, 320, 240, &surfaces).unwrap();

        let params = [0u8; 1024];
        let good = unsafe {
            drv.create_buffer(
                context_id,
                VABufferType::PictureParameter as i32,
                params.len() as u32,
                1,
                params.as_ptr(),
            )
        }
        .unwrap();
        let bogus = unsafe {
            drv.create_buffer(context_id, 0x1234, params.len() as u32, 1, params.as_ptr())
        }
        .unwrap();

        drv.begin_picture(context_id, surfaces[0]).unwrap();
        drv.render_picture(context_id, &[good, bogus, 0xdead]).unwrap();
        drv.end_picture(context_id).unwrap();
        drv.sync_surface(surfaces[0]).unwrap();
        drv.destroy_context(context_id).unwrap();
    }

    #[test]
    fn test_export_guards() {
        let drv = driver();
        let surfaces = drv.create_surfaces(va::VA_RT_FORMAT_YUV420, 640, 480, 1).unwrap();

        assert!(matches!(
            drv.export_surface_handle(
                surfaces[0],
                va::VA_SURFACE_ATTRIB_MEM_TYPE_DRM_PRIME,
                va::VA_EXPORT_SURFACE_SEPARATE_LAYERS
            ),
            Err(DriverError::UnsupportedMemoryType)
        ));
        assert!(matches!(
            drv.export_surface_handle(
                surfaces[0],
                va::VA_SURFACE_ATTRIB_MEM_TYPE_DRM_PRIME_2,
                va::VA_EXPORT_SURFACE_COMPOSED_LAYERS
            ),
            Err(DriverError::InvalidSurface)
        ));

        let descriptor = drv
            .export_surface_handle(
                surfaces[0],
                va::VA_SURFACE_ATTRIB_MEM_TYPE_DRM_PRIME_2,
                va::VA_EXPORT_SURFACE_SEPARATE_LAYERS,
            )
            .unwrap();
        assert_eq!(descriptor.num_layers, descriptor.num_objects);
        assert_eq!(descriptor.num_layers, 2);
        assert_eq!(descriptor.width, 640);
        // The caller owns the duplicated fds.
        for object in &descriptor.objects[..descriptor.num_objects as usize] {
            assert!(object.fd >= 0);
            let _ = nix::unistd::close(object.fd);
        }
    }

    #[test]
    fn test_image_formats_filtered_by_caps() {
        let plain = driver_with_caps(false, false);
        let formats = plain.query_image_formats();
        assert_eq!(formats.len(), 1);
        assert_eq!(formats[0].fourcc, va::VA_FOURCC_NV12);

        let full = driver();
        let formats = full.query_image_formats();
        assert_eq!(formats.len(), crate::format::FORMATS.len());
    }

    #[test]
    fn test_create_image_layout() {
        let drv = driver();
        let format = crate::format::FORMATS[0].va_format;
        let image = drv.create_image(&format, 64, 48).unwrap();
        assert_eq!(image.num_planes, 2);
        assert_eq!(image.data_size, 64 * 48 * 3 / 2);
        assert_eq!(image.offsets[0], 0);
        assert_eq!(image.offsets[1], 64 * 48);
        assert!(drv.registry.buffer(image.buf).is_some());

        drv.destroy_image(image.image_id).unwrap();
        assert!(drv.registry.buffer(image.buf).is_none());
        assert!(drv.registry.image(image.image_id).is_none());
    }

    #[test]
    fn test_query_surface_attributes_by_chroma() {
        let drv = driver();
        let id = drv
            .create_config(VAProfile::H264Main as i32, VAEntrypoint::VLD as i32, &[])
            .unwrap();
        let attribs = drv.query_surface_attributes(id).unwrap();
        // Min/max bounds plus NV12, P010, P012, P016.
        assert_eq!(attribs.len(), 8);

        let id = drv
            .create_config(VAProfile::HEVCMain444 as i32, VAEntrypoint::VLD as i32, &[])
            .unwrap();
        let attribs = drv.query_surface_attributes(id).unwrap();
        // Min/max bounds plus 444P and Q416.
        assert_eq!(attribs.len(), 6);
    }
}
