// Copyright 2024 The nvdec-vaapi-driver Authors
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! VP9 buffer translation.

use crate::codec::append_slice_data;
use crate::codec::bit;
use crate::codec::bits;
use crate::codec::Codec;
use crate::codec::HandlerFn;
use crate::codec::PictureContext;
use crate::driver::NvBuffer;
use crate::sys::cuvid::cudaVideoCodec;
use crate::va::VABufferType;
use crate::va::VAProfile;
use crate::va::VASurfaceID;

/// `VADecPictureParameterBufferVP9` from `va_dec_vp9.h`.
#[repr(C)]
pub struct VADecPictureParameterBufferVP9 {
    pub frame_width: u16,
    pub frame_height: u16,
    pub reference_frames: [VASurfaceID; 8],
    /// Packed: subsampling_x:1, subsampling_y:1, frame_type:1, show_frame:1,
    /// error_resilient_mode:1, intra_only:1, allow_high_precision_mv:1,
    /// mcomp_filter_type:3, frame_parallel_decoding_mode:1,
    /// reset_frame_context:2, refresh_frame_context:1, frame_context_idx:2,
    /// segmentation_enabled:1, segmentation_temporal_update:1,
    /// segmentation_update_map:1, last_ref_frame:3,
    /// last_ref_frame_sign_bias:1, golden_ref_frame:3,
    /// golden_ref_frame_sign_bias:1, alt_ref_frame:3,
    /// alt_ref_frame_sign_bias:1, lossless_flag:1.
    pub pic_fields: u32,
    pub filter_level: u8,
    pub sharpness_level: u8,
    pub log2_tile_rows: u8,
    pub log2_tile_columns: u8,
    pub frame_header_length_in_bytes: u8,
    pub first_partition_size: u16,
    pub mb_segment_tree_probs: [u8; 7],
    pub segment_pred_probs: [u8; 3],
    pub profile: u8,
    pub bit_depth: u8,
    pub va_reserved: [u32; 8],
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct VASegmentParameterVP9 {
    /// Packed: segment_reference_enabled:1, segment_reference:2,
    /// segment_reference_skipped:1.
    pub segment_flags: u16,
    pub filter_level: [[u8; 2]; 4],
    pub luma_ac_quant_scale: i16,
    pub luma_dc_quant_scale: i16,
    pub chroma_ac_quant_scale: i16,
    pub chroma_dc_quant_scale: i16,
    pub va_reserved: [u32; 4],
}

#[repr(C)]
pub struct VASliceParameterBufferVP9 {
    pub slice_data_size: u32,
    pub slice_data_offset: u32,
    pub slice_data_flag: u32,
    pub seg_param: [VASegmentParameterVP9; 8],
    pub va_reserved: [u32; 4],
}

fn picture_params(pic: &mut PictureContext, buf: &NvBuffer) {
    let Some(params) = buf.param::<VADecPictureParameterBufferVP9>() else {
        return;
    };
    let fields = params.pic_fields;

    {
        let pp = &mut *pic.pic_params;
        pp.PicWidthInMbs = (params.frame_width as i32 + 15) / 16;
        pp.FrameHeightInMbs = (params.frame_height as i32 + 15) / 16;
        pp.intra_pic_flag = (bit(fields, 2) == 0 || bit(fields, 5) != 0) as i32;
        pp.ref_pic_flag = 1;
    }

    let vp9 = unsafe { &mut pic.pic_params.CodecSpecific.vp9 };
    vp9.width = params.frame_width as u32;
    vp9.height = params.frame_height as u32;
    let reference_idx = |slot: u32| -> u8 {
        let surface = params.reference_frames[(slot & 0x7) as usize];
        pic.surfaces.picture_index(surface).max(0) as u8
    };
    vp9.LastRefIdx = reference_idx(bits(fields, 19, 3));
    vp9.GoldenRefIdx = reference_idx(bits(fields, 23, 3));
    vp9.AltRefIdx = reference_idx(bits(fields, 27, 3));
    vp9.colorSpace = 0;

    // profile:3 | frameContextIdx:2 | frameType:1 | showFrame:1 |
    // errorResilient:1 | frameParallelDecoding:1 | subSamplingX:1 |
    // subSamplingY:1 | intraOnly:1 | allow_high_precision_mv:1 |
    // refreshEntropyProbs:1
    let mut flags: u16 = (params.profile & 0x7) as u16;
    flags |= (bits(fields, 14, 2) as u16) << 3;
    flags |= (bit(fields, 2) as u16) << 5;
    flags |= (bit(fields, 3) as u16) << 6;
    flags |= (bit(fields, 4) as u16) << 7;
    flags |= (bit(fields, 10) as u16) << 8;
    flags |= (bit(fields, 0) as u16) << 9;
    flags |= (bit(fields, 1) as u16) << 10;
    flags |= (bit(fields, 5) as u16) << 11;
    flags |= (bit(fields, 6) as u16) << 12;
    flags |= (bit(fields, 13) as u16) << 13;
    vp9.frameFlags = flags;

    vp9.refFrameSignBias[0] = 0;
    vp9.refFrameSignBias[1] = bit(fields, 22) as u8;
    vp9.refFrameSignBias[2] = bit(fields, 26) as u8;
    vp9.refFrameSignBias[3] = bit(fields, 30) as u8;
    vp9.loopFilterLevel = params.filter_level;
    vp9.loopFilterSharpness = params.sharpness_level;
    vp9.log2_tile_columns = params.log2_tile_columns;
    vp9.log2_tile_rows = params.log2_tile_rows;
    // segmentEnabled:1 | segmentMapUpdate:1 | segmentMapTemporalUpdate:1
    vp9.segmentFlags = (bit(fields, 16)
        | (bit(fields, 18) << 1)
        | (bit(fields, 17) << 2)) as u8;
    vp9.mb_segment_tree_probs = params.mb_segment_tree_probs;
    vp9.segment_pred_probs = params.segment_pred_probs;
    vp9.resetFrameContext = bits(fields, 11, 2);
    vp9.mcomp_filter_type = bits(fields, 7, 3);
    vp9.frameTagSize = params.frame_header_length_in_bytes as u32;
    vp9.offsetToDctParts = params.first_partition_size as u32;
}

fn slice_params(pic: &mut PictureContext, buf: &NvBuffer) {
    for params in buf.elements::<VASliceParameterBufferVP9>() {
        let vp9 = unsafe { &mut pic.pic_params.CodecSpecific.vp9 };
        // NVDEC takes one set of quantizer deltas; VA spreads them across
        // segments with segment 0 carrying the base values.
        let seg0 = &params.seg_param[0];
        vp9.qpYAc = seg0.luma_ac_quant_scale as i32;
        vp9.qpYDc = seg0.luma_dc_quant_scale as i32;
        vp9.qpChAc = seg0.chroma_ac_quant_scale as i32;
        vp9.qpChDc = seg0.chroma_dc_quant_scale as i32;
        for (i, seg) in params.seg_param.iter().enumerate() {
            vp9.segmentFeatureEnable[i][0] = (seg.segment_flags & 1) as u8;
            vp9.segmentFeatureData[i][0] = (seg.segment_flags >> 1 & 0x3) as i16;
        }
        pic.pending_slices
            .push((params.slice_data_offset, params.slice_data_size));
    }
}

fn compute_cuda_codec(profile: VAProfile) -> Option<cudaVideoCodec> {
    match profile {
        VAProfile::VP9Profile0
        | VAProfile::VP9Profile1
        | VAProfile::VP9Profile2
        | VAProfile::VP9Profile3 => Some(cudaVideoCodec::VP9),
        _ => None,
    }
}

fn handler(buffer_type: VABufferType) -> Option<HandlerFn> {
    match buffer_type {
        VABufferType::PictureParameter => Some(picture_params),
        VABufferType::SliceParameter => Some(slice_params),
        VABufferType::SliceData => Some(append_slice_data),
        _ => None,
    }
}

pub static CODEC: Codec = Codec {
    name: "vp9",
    supported_profiles: &[
        VAProfile::VP9Profile0,
        VAProfile::VP9Profile1,
        VAProfile::VP9Profile2,
        VAProfile::VP9Profile3,
    ],
    compute_cuda_codec,
    handler,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::tests_support::TestPicture;

    /// Packs a `pic_fields` word the way `va_dec_vp9.h` declares it: by
    /// accumulating field widths in declaration order, independently of the
    /// bit offsets the translator hardcodes.
    #[derive(Default)]
    struct PicFields {
        value: u32,
        shift: u32,
    }

    impl PicFields {
        fn field(mut self, width: u32, value: u32) -> Self {
            assert!(value < (1 << width));
            self.value |= value << self.shift;
            self.shift += width;
            self
        }
    }

    fn pic_fields_1080p_inter() -> u32 {
        PicFields::default()
            .field(1, 1) // subsampling_x
            .field(1, 1) // subsampling_y
            .field(1, 1) // frame_type (inter)
            .field(1, 1) // show_frame
            .field(1, 0) // error_resilient_mode
            .field(1, 0) // intra_only
            .field(1, 1) // allow_high_precision_mv
            .field(3, 4) // mcomp_filter_type
            .field(1, 0) // frame_parallel_decoding_mode
            .field(2, 2) // reset_frame_context
            .field(1, 1) // refresh_frame_context
            .field(2, 3) // frame_context_idx
            .field(1, 1) // segmentation_enabled
            .field(1, 1) // segmentation_temporal_update
            .field(1, 0) // segmentation_update_map
            .field(3, 0) // last_ref_frame
            .field(1, 0) // last_ref_frame_sign_bias
            .field(3, 1) // golden_ref_frame
            .field(1, 1) // golden_ref_frame_sign_bias
            .field(3, 2) // alt_ref_frame
            .field(1, 0) // alt_ref_frame_sign_bias
            .field(1, 0) // lossless_flag
            .value
    }

    #[test]
    fn test_pic_fields_unpacking_matches_declaration_order() {
        let mut picture = TestPicture::new(&CODEC);
        for (id, idx) in [(100, 0), (101, 1), (102, 2)] {
            picture.bind_surface(id, idx);
        }
        let mut params: VADecPictureParameterBufferVP9 = unsafe { std::mem::zeroed() };
        params.frame_width = 1280;
        params.frame_height = 720;
        params.profile = 0;
        params.bit_depth = 8;
        params.reference_frames = [100, 101, 102, 100, 100, 100, 100, 100];
        params.pic_fields = pic_fields_1080p_inter();
        picture.submit(VABufferType::PictureParameter, &params);

        let vp9 = unsafe { &picture.params().CodecSpecific.vp9 };
        // Reference slots 0/1/2 resolve through the surface lookup.
        assert_eq!(vp9.LastRefIdx, 0);
        assert_eq!(vp9.GoldenRefIdx, 1);
        assert_eq!(vp9.AltRefIdx, 2);
        assert_eq!(vp9.refFrameSignBias, [0, 0, 1, 0]);
        assert_eq!(picture.params().intra_pic_flag, 0);

        // frameFlags: frameContextIdx:2 at bit 3, then the one-bit flags.
        assert_eq!((vp9.frameFlags >> 3) & 0x3, 3, "frameContextIdx");
        assert_eq!((vp9.frameFlags >> 5) & 1, 1, "frameType");
        assert_eq!((vp9.frameFlags >> 6) & 1, 1, "showFrame");
        assert_eq!((vp9.frameFlags >> 7) & 1, 0, "errorResilient");
        assert_eq!((vp9.frameFlags >> 9) & 1, 1, "subSamplingX");
        assert_eq!((vp9.frameFlags >> 10) & 1, 1, "subSamplingY");
        assert_eq!((vp9.frameFlags >> 12) & 1, 1, "allow_high_precision_mv");
        assert_eq!((vp9.frameFlags >> 13) & 1, 1, "refreshEntropyProbs");

        assert_eq!(vp9.mcomp_filter_type, 4);
        assert_eq!(vp9.resetFrameContext, 2);
        // segmentEnabled | segmentMapUpdate << 1 | segmentMapTemporalUpdate << 2
        assert_eq!(vp9.segmentFlags, 0b101);
    }
}
