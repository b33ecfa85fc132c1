// Copyright 2024 The nvdec-vaapi-driver Authors
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! AV1 buffer translation.

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
use crate::va::VA_INVALID_ID;

#[repr(C)]
#[derive(Copy, Clone)]
pub struct VASegmentationStructAV1 {
    /// Packed: enabled:1, update_map:1, temporal_update:1, update_data:1.
    pub segment_info_fields: u32,
    pub feature_data: [[i16; 8]; 8],
    pub feature_mask: [u8; 8],
    pub va_reserved: [u32; 4],
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct VAFilmGrainStructAV1 {
    /// Packed: apply_grain:1, chroma_scaling_from_luma:1, grain_scaling_minus_8:2,
    /// ar_coeff_lag:2, ar_coeff_shift_minus_6:2, grain_scale_shift:2,
    /// overlap_flag:1, clip_to_restricted_range:1.
    pub film_grain_info_fields: u32,
    pub grain_seed: u16,
    pub num_y_points: u8,
    pub point_y_value: [u8; 14],
    pub point_y_scaling: [u8; 14],
    pub num_cb_points: u8,
    pub point_cb_value: [u8; 10],
    pub point_cb_scaling: [u8; 10],
    pub num_cr_points: u8,
    pub point_cr_value: [u8; 10],
    pub point_cr_scaling: [u8; 10],
    pub ar_coeffs_y: [i8; 24],
    pub ar_coeffs_cb: [i8; 25],
    pub ar_coeffs_cr: [i8; 25],
    pub cb_mult: u8,
    pub cb_luma_mult: u8,
    pub cb_offset: u16,
    pub cr_mult: u8,
    pub cr_luma_mult: u8,
    pub cr_offset: u16,
    pub va_reserved: [u32; 4],
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct VAWarpedMotionParamsAV1 {
    pub wmtype: u32,
    pub wmmat: [i32; 8],
    pub invalid: u8,
    pub va_reserved: [u32; 4],
}

/// `VADecPictureParameterBufferAV1` from `va_dec_av1.h`, down to the fields
/// the NVDEC struct consumes.
#[repr(C)]
pub struct VADecPictureParameterBufferAV1 {
    pub profile: u8,
    pub order_hint_bits_minus_1: u8,
    pub bit_depth_idx: u8,
    pub matrix_coefficients: u8,
    /// Packed: still_picture:1, use_128x128_superblock:1, enable_filter_intra:1,
    /// enable_intra_edge_filter:1, enable_interintra_compound:1,
    /// enable_masked_compound:1, enable_dual_filter:1, enable_order_hint:1,
    /// enable_jnt_comp:1, enable_cdef:1, mono_chrome:1, color_range:1,
    /// subsampling_x:1, subsampling_y:1, chroma_sample_position:1,
    /// film_grain_params_present:1.
    pub seq_info_fields: u32,
    pub current_frame: VASurfaceID,
    pub current_display_picture: VASurfaceID,
    pub anchor_frames_num: u8,
    pub anchor_frames_list: *mut VASurfaceID,
    pub frame_width_minus1: u16,
    pub frame_height_minus1: u16,
    pub output_frame_width_in_tiles_minus_1: u16,
    pub output_frame_height_in_tiles_minus_1: u16,
    pub ref_frame_map: [VASurfaceID; 8],
    pub ref_frame_idx: [u8; 7],
    pub primary_ref_frame: u8,
    pub order_hint: u8,
    pub seg_info: VASegmentationStructAV1,
    pub film_grain_info: VAFilmGrainStructAV1,
    pub tile_cols: u8,
    pub tile_rows: u8,
    pub width_in_sbs_minus_1: [u16; 63],
    pub height_in_sbs_minus_1: [u16; 63],
    pub tile_count_minus_1: u16,
    pub context_update_tile_id: u16,
    /// Packed: frame_type:2, show_frame:1, showable_frame:1,
    /// error_resilient_mode:1, disable_cdf_update:1,
    /// allow_screen_content_tools:1, force_integer_mv:1, allow_intrabc:1,
    /// use_superres:1, allow_high_precision_mv:1, is_motion_mode_switchable:1,
    /// use_ref_frame_mvs:1, disable_frame_end_update_cdf:1,
    /// uniform_tile_spacing_flag:1, allow_warped_motion:1, large_scale_tile:1.
    pub pic_info_fields: u32,
    pub superres_scale_denominator: u8,
    pub interp_filter: u8,
    pub filter_level: [u8; 2],
    pub filter_level_u: u8,
    pub filter_level_v: u8,
    /// Packed: sharpness_level:3, mode_ref_delta_enabled:1,
    /// mode_ref_delta_update:1.
    pub loop_filter_info_fields: u32,
    pub ref_deltas: [i8; 8],
    pub mode_deltas: [i8; 2],
    pub base_qindex: u8,
    pub y_dc_delta_q: i8,
    pub u_dc_delta_q: i8,
    pub u_ac_delta_q: i8,
    pub v_dc_delta_q: i8,
    pub v_ac_delta_q: i8,
    /// Packed: using_qmatrix:1, qm_y:4, qm_u:4, qm_v:4.
    pub qmatrix_fields: u32,
    /// Packed: delta_q_present_flag:1, log2_delta_q_res:2,
    /// delta_lf_present_flag:1, log2_delta_lf_res:2, delta_lf_multi:1,
    /// tx_mode:2, reference_select:1, reduced_tx_set_used:1,
    /// skip_mode_present:1.
    pub mode_control_fields: u32,
    pub cdef_damping_minus_3: u8,
    pub cdef_bits: u8,
    pub cdef_y_strengths: [u8; 8],
    pub cdef_uv_strengths: [u8; 8],
    /// Packed: yframe_restoration_type:2, cbframe_restoration_type:2,
    /// crframe_restoration_type:2, lr_unit_shift:2, lr_uv_shift:1.
    pub loop_restoration_fields: u32,
    pub wm: [VAWarpedMotionParamsAV1; 7],
    pub va_reserved: [u32; 8],
}

#[repr(C)]
pub struct VASliceParameterBufferAV1 {
    pub slice_data_size: u32,
    pub slice_data_offset: u32,
    pub slice_data_flag: u32,
    pub tile_row: u16,
    pub tile_column: u16,
    pub tg_start: u16,
    pub tg_end: u16,
    pub anchor_frame_idx: u8,
    pub tile_idx_in_tile_list: u16,
    pub va_reserved: [u32; 4],
}

fn picture_params(pic: &mut PictureContext, buf: &NvBuffer) {
    let Some(params) = buf.param::<VADecPictureParameterBufferAV1>() else {
        return;
    };
    let seq = params.seq_info_fields;
    let info = params.pic_info_fields;
    let frame_type = bits(info, 0, 2);

    {
        let pp = &mut *pic.pic_params;
        pp.PicWidthInMbs = (params.frame_width_minus1 as i32 + 16) / 16;
        pp.FrameHeightInMbs = (params.frame_height_minus1 as i32 + 16) / 16;
        // 0 = KEY, 2 = INTRA_ONLY.
        pp.intra_pic_flag = (frame_type == 0 || frame_type == 2) as i32;
        pp.ref_pic_flag = 1;
    }

    let av1 = unsafe { &mut pic.pic_params.CodecSpecific.av1 };
    av1.width = params.frame_width_minus1 as u32 + 1;
    av1.height = params.frame_height_minus1 as u32 + 1;
    av1.frame_offset = params.order_hint as u32;
    av1.decodePicIdx = pic.surfaces.picture_index(params.current_frame);

    av1.profile = params.profile as u32;
    av1.use_128x128_superblock = bit(seq, 1);
    av1.subsampling_x = bit(seq, 12);
    av1.subsampling_y = bit(seq, 13);
    av1.mono_chrome = bit(seq, 10);
    av1.bit_depth_minus8 = params.bit_depth_idx as u32 * 2;
    av1.enable_filter_intra = bit(seq, 2);
    av1.enable_intra_edge_filter = bit(seq, 3);
    av1.enable_interintra_compound = bit(seq, 4);
    av1.enable_masked_compound = bit(seq, 5);
    av1.enable_dual_filter = bit(seq, 6);
    av1.enable_order_hint = bit(seq, 7);
    av1.order_hint_bits_minus1 = params.order_hint_bits_minus_1 as u32;
    av1.enable_jnt_comp = bit(seq, 8);
    av1.enable_cdef = bit(seq, 9);
    av1.enable_fgs = bit(seq, 15);

    av1.frame_type = frame_type;
    av1.show_frame = bit(info, 2);
    av1.disable_cdf_update = bit(info, 5);
    av1.allow_screen_content_tools = bit(info, 6);
    av1.force_integer_mv = bit(info, 7) | (frame_type == 0 || frame_type == 2) as u32;
    av1.allow_intrabc = bit(info, 8);
    av1.use_superres = bit(info, 9);
    av1.coded_denom = params.superres_scale_denominator as u32;
    av1.allow_high_precision_mv = bit(info, 10);
    av1.interp_filter = params.interp_filter as u32;
    av1.switchable_motion_mode = bit(info, 11);
    av1.use_ref_frame_mvs = bit(info, 12);
    av1.disable_frame_end_update_cdf = bit(info, 13);
    av1.allow_warped_motion = bit(info, 14);

    av1.delta_q_present = bit(params.mode_control_fields, 0);
    av1.delta_q_res = bits(params.mode_control_fields, 1, 2);
    av1.delta_lf_present = bit(params.mode_control_fields, 3);
    av1.delta_lf_res = bits(params.mode_control_fields, 4, 2);
    av1.delta_lf_multi = bit(params.mode_control_fields, 6);
    av1.tx_mode = bits(params.mode_control_fields, 7, 2);
    av1.reference_mode = bit(params.mode_control_fields, 9);
    av1.reduced_tx_set = bit(params.mode_control_fields, 10);
    av1.skip_mode = bit(params.mode_control_fields, 11);

    av1.num_tile_cols = params.tile_cols as u32;
    av1.num_tile_rows = params.tile_rows as u32;
    av1.context_update_tile_id = params.context_update_tile_id as u32;
    for i in 0..(params.tile_cols as usize).min(64) {
        av1.tile_widths[i] = params.width_in_sbs_minus_1[i.min(62)] + 1;
    }
    for i in 0..(params.tile_rows as usize).min(64) {
        av1.tile_heights[i] = params.height_in_sbs_minus_1[i.min(62)] + 1;
    }

    av1.cdef_damping_minus_3 = params.cdef_damping_minus_3 as u32;
    av1.cdef_bits = params.cdef_bits as u32;
    av1.cdef_y_strength = params.cdef_y_strengths;
    av1.cdef_uv_strength = params.cdef_uv_strengths;

    av1.base_qindex = params.base_qindex as u32;
    av1.qp_y_dc_delta_q = params.y_dc_delta_q as i32;
    av1.qp_u_dc_delta_q = params.u_dc_delta_q as i32;
    av1.qp_v_dc_delta_q = params.v_dc_delta_q as i32;
    av1.qp_u_ac_delta_q = params.u_ac_delta_q as i32;
    av1.qp_v_ac_delta_q = params.v_ac_delta_q as i32;
    av1.using_qmatrix = bit(params.qmatrix_fields, 0);
    av1.qm_y = bits(params.qmatrix_fields, 1, 4);
    av1.qm_u = bits(params.qmatrix_fields, 5, 4);
    av1.qm_v = bits(params.qmatrix_fields, 9, 4);
    av1.coded_lossless = (params.base_qindex == 0
        && params.y_dc_delta_q == 0
        && params.u_dc_delta_q == 0
        && params.u_ac_delta_q == 0
        && params.v_dc_delta_q == 0
        && params.v_ac_delta_q == 0) as u32;

    let seg = &params.seg_info;
    av1.segmentation_enabled = bit(seg.segment_info_fields, 0);
    av1.segmentation_update_map = bit(seg.segment_info_fields, 1);
    av1.segmentation_temporal_update = bit(seg.segment_info_fields, 2);
    av1.segmentation_update_data = bit(seg.segment_info_fields, 3);
    av1.segmentation_feature_data = seg.feature_data;
    av1.segmentation_feature_mask = seg.feature_mask;

    av1.loop_filter_level = [params.filter_level[0] as u32, params.filter_level[1] as u32];
    av1.loop_filter_level_u = params.filter_level_u as u32;
    av1.loop_filter_level_v = params.filter_level_v as u32;
    av1.loop_filter_sharpness = bits(params.loop_filter_info_fields, 0, 3);
    av1.loop_filter_delta_enabled = bit(params.loop_filter_info_fields, 3);
    av1.loop_filter_delta_update = bit(params.loop_filter_info_fields, 4);
    av1.loop_filter_ref_deltas = params.ref_deltas;
    av1.loop_filter_mode_deltas = params.mode_deltas;

    av1.lr_type = [
        bits(params.loop_restoration_fields, 0, 2) as u8,
        bits(params.loop_restoration_fields, 2, 2) as u8,
        bits(params.loop_restoration_fields, 4, 2) as u8,
    ];
    av1.lr_unit_size = [
        1 << (6 + bits(params.loop_restoration_fields, 6, 2)),
        1 << (6 + bits(params.loop_restoration_fields, 6, 2)),
        1 << (6 + bits(params.loop_restoration_fields, 6, 2)),
    ];

    av1.primary_ref_frame = params.primary_ref_frame as i32;
    for (i, surface) in params.ref_frame_map.iter().enumerate() {
        av1.ref_frame_map[i] = if *surface == VA_INVALID_ID {
            0
        } else {
            pic.surfaces.picture_index(*surface).max(0) as u8
        };
    }
    for (i, &slot) in params.ref_frame_idx.iter().enumerate() {
        let surface = params.ref_frame_map[(slot & 0x7) as usize];
        av1.ref_frame[i].index = if surface == VA_INVALID_ID {
            0
        } else {
            pic.surfaces.picture_index(surface).max(0) as u8
        };
        av1.ref_frame[i].width = av1.width;
        av1.ref_frame[i].height = av1.height;
    }
    for (i, wm) in params.wm.iter().enumerate() {
        av1.global_motion[i].invalid = wm.invalid;
        av1.global_motion[i].wmtype = wm.wmtype as u8;
        for j in 0..6 {
            av1.global_motion[i].wmmat[j] = wm.wmmat[j];
        }
    }

    av1.apply_grain =
        (bit(params.film_grain_info.film_grain_info_fields, 0) != 0 && bit(seq, 15) != 0) as u32;
}

fn slice_params(pic: &mut PictureContext, buf: &NvBuffer) {
    for params in buf.elements::<VASliceParameterBufferAV1>() {
        pic.pending_slices
            .push((params.slice_data_offset, params.slice_data_size));
    }
}

fn compute_cuda_codec(profile: VAProfile) -> Option<cudaVideoCodec> {
    match profile {
        VAProfile::AV1Profile0 | VAProfile::AV1Profile1 => Some(cudaVideoCodec::AV1),
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
    name: "av1",
    supported_profiles: &[VAProfile::AV1Profile0, VAProfile::AV1Profile1],
    compute_cuda_codec,
    handler,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::tests_support::TestPicture;

    #[test]
    fn test_key_frame_translation() {
        let mut picture = TestPicture::new(&CODEC);
        picture.bind_surface(5, 2);
        let mut params: VADecPictureParameterBufferAV1 = unsafe { std::mem::zeroed() };
        params.profile = 0;
        params.bit_depth_idx = 1; // 10-bit
        params.frame_width_minus1 = 1919;
        params.frame_height_minus1 = 1079;
        params.current_frame = 5;
        params.base_qindex = 80;
        params.tile_cols = 2;
        params.tile_rows = 1;
        params.width_in_sbs_minus_1[0] = 7;
        params.width_in_sbs_minus_1[1] = 7;
        params.height_in_sbs_minus_1[0] = 8;
        // use_128x128_superblock + enable_order_hint + subsampling x/y.
        params.seq_info_fields = (1 << 1) | (1 << 7) | (1 << 12) | (1 << 13);
        params.pic_info_fields = 0; // KEY frame, not shown
        for r in params.ref_frame_map.iter_mut() {
            *r = crate::va::VA_INVALID_ID;
        }
        picture.submit(VABufferType::PictureParameter, &params);

        let av1 = unsafe { &picture.params().CodecSpecific.av1 };
        assert_eq!(av1.width, 1920);
        assert_eq!(av1.height, 1080);
        assert_eq!(av1.decodePicIdx, 2);
        assert_eq!(av1.bit_depth_minus8, 2);
        assert_eq!(av1.use_128x128_superblock, 1);
        assert_eq!(av1.subsampling_x, 1);
        assert_eq!(av1.num_tile_cols, 2);
        assert_eq!(av1.tile_widths[0], 8);
        assert_eq!(av1.base_qindex, 80);
        assert_eq!(picture.params().intra_pic_flag, 1);
    }
}
