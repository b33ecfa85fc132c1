// Copyright 2024 The nvdec-vaapi-driver Authors
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! The fixed table of pixel formats the driver can hand out, and the
//! mappings between VA RT formats, VA fourccs and the NVDEC surface types.

use drm_fourcc::DrmFourcc;

use crate::sys::cuvid::cudaVideoChromaFormat;
use crate::sys::cuvid::cudaVideoSurfaceFormat;
use crate::va;
use crate::va::VAImageFormat;

/// Subsampling of one plane, as right-shifts of the luma dimensions.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Subsampling {
    pub x: u32,
    pub y: u32,
}

#[derive(Copy, Clone, Debug)]
pub struct PlaneInfo {
    /// Number of interleaved channels in the plane (2 for NV12's UV plane).
    pub channels: u32,
    pub drm_format: u32,
    pub ss: Subsampling,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum NvFormat {
    NV12,
    P010,
    P012,
    P016,
    Yuv444P,
    Q416,
}

pub struct FormatInfo {
    pub format: NvFormat,
    /// Bytes per channel sample.
    pub bpc: u32,
    pub planes: &'static [PlaneInfo],
    /// Primary DRM fourcc of the whole frame; 0 when DRM has no single-frame
    /// format for it (Q416).
    pub drm_format: u32,
    pub is_16bit: bool,
    pub is_yuv444: bool,
    pub va_format: VAImageFormat,
}

const fn va_image_format(fourcc: u32, bits_per_pixel: u32) -> VAImageFormat {
    VAImageFormat {
        fourcc,
        byte_order: va::VA_LSB_FIRST,
        bits_per_pixel,
        depth: 0,
        red_mask: 0,
        green_mask: 0,
        blue_mask: 0,
        alpha_mask: 0,
        va_reserved: [0; 4],
    }
}

const SS_FULL: Subsampling = Subsampling { x: 0, y: 0 };
const SS_HALF: Subsampling = Subsampling { x: 1, y: 1 };

/// Every format the driver can expose, in the order `QueryImageFormats`
/// reports them.
pub const FORMATS: [FormatInfo; 6] = [
    FormatInfo {
        format: NvFormat::NV12,
        bpc: 1,
        planes: &[
            PlaneInfo { channels: 1, drm_format: DrmFourcc::R8 as u32, ss: SS_FULL },
            PlaneInfo { channels: 2, drm_format: DrmFourcc::Rg88 as u32, ss: SS_HALF },
        ],
        drm_format: DrmFourcc::Nv12 as u32,
        is_16bit: false,
        is_yuv444: false,
        va_format: va_image_format(va::VA_FOURCC_NV12, 12),
    },
    FormatInfo {
        format: NvFormat::P010,
        bpc: 2,
        planes: &[
            PlaneInfo { channels: 1, drm_format: DrmFourcc::R16 as u32, ss: SS_FULL },
            PlaneInfo { channels: 2, drm_format: DrmFourcc::Rg1616 as u32, ss: SS_HALF },
        ],
        drm_format: DrmFourcc::P010 as u32,
        is_16bit: true,
        is_yuv444: false,
        va_format: va_image_format(va::VA_FOURCC_P010, 24),
    },
    FormatInfo {
        format: NvFormat::P012,
        bpc: 2,
        planes: &[
            PlaneInfo { channels: 1, drm_format: DrmFourcc::R16 as u32, ss: SS_FULL },
            PlaneInfo { channels: 2, drm_format: DrmFourcc::Rg1616 as u32, ss: SS_HALF },
        ],
        drm_format: DrmFourcc::P012 as u32,
        is_16bit: true,
        is_yuv444: false,
        va_format: va_image_format(va::VA_FOURCC_P012, 24),
    },
    FormatInfo {
        format: NvFormat::P016,
        bpc: 2,
        planes: &[
            PlaneInfo { channels: 1, drm_format: DrmFourcc::R16 as u32, ss: SS_FULL },
            PlaneInfo { channels: 2, drm_format: DrmFourcc::Rg1616 as u32, ss: SS_HALF },
        ],
        drm_format: DrmFourcc::P016 as u32,
        is_16bit: true,
        is_yuv444: false,
        va_format: va_image_format(va::VA_FOURCC_P016, 24),
    },
    FormatInfo {
        format: NvFormat::Yuv444P,
        bpc: 1,
        planes: &[
            PlaneInfo { channels: 1, drm_format: DrmFourcc::R8 as u32, ss: SS_FULL },
            PlaneInfo { channels: 1, drm_format: DrmFourcc::R8 as u32, ss: SS_FULL },
            PlaneInfo { channels: 1, drm_format: DrmFourcc::R8 as u32, ss: SS_FULL },
        ],
        drm_format: DrmFourcc::Yuv444 as u32,
        is_16bit: false,
        is_yuv444: true,
        va_format: va_image_format(va::VA_FOURCC_444P, 24),
    },
    FormatInfo {
        format: NvFormat::Q416,
        bpc: 2,
        planes: &[
            PlaneInfo { channels: 1, drm_format: DrmFourcc::R16 as u32, ss: SS_FULL },
            PlaneInfo { channels: 1, drm_format: DrmFourcc::R16 as u32, ss: SS_FULL },
            PlaneInfo { channels: 1, drm_format: DrmFourcc::R16 as u32, ss: SS_FULL },
        ],
        // DRM has no fourcc for 3-plane 16-bit 4:4:4; the frame is only
        // addressable through its per-plane R16 layers.
        drm_format: 0,
        is_16bit: true,
        is_yuv444: true,
        va_format: va_image_format(va::VA_FOURCC_Q416, 48),
    },
];

impl FormatInfo {
    pub fn from_nv_format(format: NvFormat) -> &'static FormatInfo {
        FORMATS.iter().find(|f| f.format == format).unwrap()
    }

    pub fn from_va_fourcc(fourcc: u32) -> Option<&'static FormatInfo> {
        FORMATS.iter().find(|f| f.va_format.fourcc == fourcc)
    }

    /// The format a decoded surface of the given NVDEC output type and bit
    /// depth exports as.
    pub fn from_surface_format(
        format: cudaVideoSurfaceFormat,
        bit_depth: u32,
    ) -> &'static FormatInfo {
        let format = match format {
            cudaVideoSurfaceFormat::NV12 => NvFormat::NV12,
            cudaVideoSurfaceFormat::P016 => match bit_depth {
                10 => NvFormat::P010,
                12 => NvFormat::P012,
                _ => NvFormat::P016,
            },
            cudaVideoSurfaceFormat::YUV444 => NvFormat::Yuv444P,
            cudaVideoSurfaceFormat::YUV444_16Bit => NvFormat::Q416,
        };
        Self::from_nv_format(format)
    }

    /// Unpadded size in bytes of one frame of this format.
    pub fn frame_size(&self, width: u32, height: u32) -> usize {
        self.planes
            .iter()
            .map(|p| ((width * height) >> (p.ss.x + p.ss.y)) * self.bpc * p.channels)
            .sum::<u32>() as usize
    }
}

/// Maps a VA RT format onto the NVDEC surface type it decodes into.
pub fn surface_format_from_rt_format(
    rt_format: u32,
) -> Option<(cudaVideoSurfaceFormat, cudaVideoChromaFormat, u32)> {
    match rt_format {
        va::VA_RT_FORMAT_YUV420 => {
            Some((cudaVideoSurfaceFormat::NV12, cudaVideoChromaFormat::YUV420, 8))
        }
        va::VA_RT_FORMAT_YUV420_10 => {
            Some((cudaVideoSurfaceFormat::P016, cudaVideoChromaFormat::YUV420, 10))
        }
        va::VA_RT_FORMAT_YUV420_12 => {
            Some((cudaVideoSurfaceFormat::P016, cudaVideoChromaFormat::YUV420, 12))
        }
        va::VA_RT_FORMAT_YUV444 => {
            Some((cudaVideoSurfaceFormat::YUV444, cudaVideoChromaFormat::YUV444, 8))
        }
        va::VA_RT_FORMAT_YUV444_10 => {
            Some((cudaVideoSurfaceFormat::YUV444_16Bit, cudaVideoChromaFormat::YUV444, 10))
        }
        va::VA_RT_FORMAT_YUV444_12 => {
            Some((cudaVideoSurfaceFormat::YUV444_16Bit, cudaVideoChromaFormat::YUV444, 12))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_sizes() {
        let nv12 = FormatInfo::from_nv_format(NvFormat::NV12);
        assert_eq!(nv12.frame_size(1920, 1080), 1920 * 1080 * 3 / 2);

        let p010 = FormatInfo::from_nv_format(NvFormat::P010);
        assert_eq!(p010.frame_size(1920, 1080), 1920 * 1080 * 3);

        let yuv444 = FormatInfo::from_nv_format(NvFormat::Yuv444P);
        assert_eq!(yuv444.frame_size(640, 480), 640 * 480 * 3);
    }

    #[test]
    fn test_surface_format_mapping() {
        assert_eq!(
            surface_format_from_rt_format(va::VA_RT_FORMAT_YUV420_10),
            Some((cudaVideoSurfaceFormat::P016, cudaVideoChromaFormat::YUV420, 10))
        );
        assert_eq!(surface_format_from_rt_format(0xdead_beef), None);
    }

    #[test]
    fn test_sixteen_bit_and_444_gating_flags() {
        assert!(!FormatInfo::from_va_fourcc(va::VA_FOURCC_NV12).unwrap().is_16bit);
        assert!(FormatInfo::from_va_fourcc(va::VA_FOURCC_Q416).unwrap().is_16bit);
        assert!(FormatInfo::from_va_fourcc(va::VA_FOURCC_Q416).unwrap().is_yuv444);
    }
}
