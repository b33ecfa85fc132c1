// Copyright 2024 The nvdec-vaapi-driver Authors
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! HEVC buffer translation.

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

pub const VA_PICTURE_HEVC_INVALID: u32 = 0x0000_0001;
pub const VA_PICTURE_HEVC_FIELD_PIC: u32 = 0x0000_0002;
pub const VA_PICTURE_HEVC_BOTTOM_FIELD: u32 = 0x0000_0004;
pub const VA_PICTURE_HEVC_LONG_TERM_REFERENCE: u32 = 0x0000_0008;
pub const VA_PICTURE_HEVC_RPS_ST_CURR_BEFORE: u32 = 0x0000_0010;
pub const VA_PICTURE_HEVC_RPS_ST_CURR_AFTER: u32 = 0x0000_0020;
pub const VA_PICTURE_HEVC_RPS_LT_CURR: u32 = 0x0000_0040;

#[repr(C)]
#[derive(Copy, Clone)]
pub struct VAPictureHEVC {
    pub picture_id: VASurfaceID,
    pub pic_order_cnt: i32,
    pub flags: u32,
    pub va_reserved: [u32; 4],
}

/// `VAPictureParameterBufferHEVC` from `va_dec_hevc.h`.
#[repr(C)]
pub struct VAPictureParameterBufferHEVC {
    pub CurrPic: VAPictureHEVC,
    pub ReferenceFrames: [VAPictureHEVC; 15],
    pub pic_width_in_luma_samples: u16,
    pub pic_height_in_luma_samples: u16,
    /// Packed: chroma_format_idc:2, separate_colour_plane_flag:1,
    /// pcm_enabled_flag:1, scaling_list_enabled_flag:1,
    /// transform_skip_enabled_flag:1, amp_enabled_flag:1,
    /// strong_intra_smoothing_enabled_flag:1, sign_data_hiding_enabled_flag:1,
    /// constrained_intra_pred_flag:1, cu_qp_delta_enabled_flag:1,
    /// weighted_pred_flag:1, weighted_bipred_flag:1,
    /// transquant_bypass_enabled_flag:1, tiles_enabled_flag:1,
    /// entropy_coding_sync_enabled_flag:1,
    /// pps_loop_filter_across_slices_enabled_flag:1,
    /// loop_filter_across_tiles_enabled_flag:1,
    /// pcm_loop_filter_disabled_flag:1, NoPicReorderingFlag:1,
    /// NoBiPredFlag:1.
    pub pic_fields: u32,
    pub sps_max_dec_pic_buffering_minus1: u8,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
    pub pcm_sample_bit_depth_luma_minus1: u8,
    pub pcm_sample_bit_depth_chroma_minus1: u8,
    pub log2_min_luma_coding_block_size_minus3: u8,
    pub log2_diff_max_min_luma_coding_block_size: u8,
    pub log2_min_transform_block_size_minus2: u8,
    pub log2_diff_max_min_transform_block_size: u8,
    pub log2_min_pcm_luma_coding_block_size_minus3: u8,
    pub log2_diff_max_min_pcm_luma_coding_block_size: u8,
    pub max_transform_hierarchy_depth_intra: u8,
    pub max_transform_hierarchy_depth_inter: u8,
    pub init_qp_minus26: i8,
    pub diff_cu_qp_delta_depth: u8,
    pub pps_cb_qp_offset: i8,
    pub pps_cr_qp_offset: i8,
    pub log2_parallel_merge_level_minus2: u8,
    pub num_tile_columns_minus1: u8,
    pub num_tile_rows_minus1: u8,
    pub column_width_minus1: [u16; 19],
    pub row_height_minus1: [u16; 21],
    /// Packed: pps_deblocking_filter_disabled_flag:1,
    /// deblocking_filter_override_enabled_flag:1,
    /// output_flag_present_flag:1, num_extra_slice_header_bits:3,
    /// lists_modification_present_flag:1, cabac_init_present_flag:1,
    /// pps_slice_chroma_qp_offsets_present_flag:1,
    /// deblocking_filter_control_present_flag:1? (see header),
    /// dependent_slice_segments_enabled_flag:1,
    /// slice_segment_header_extension_present_flag:1, RapPicFlag:1,
    /// IdrPicFlag:1, IntraPicFlag:1.
    pub slice_parsing_fields: u32,
    pub log2_max_pic_order_cnt_lsb_minus4: u8,
    pub num_short_term_ref_pic_sets: u8,
    pub num_long_term_ref_pic_sps: u8,
    pub num_ref_idx_l0_default_active_minus1: u8,
    pub num_ref_idx_l1_default_active_minus1: u8,
    pub pps_beta_offset_div2: i8,
    pub pps_tc_offset_div2: i8,
    pub num_extra_slice_header_bits: u8,
    pub st_rps_bits: u32,
    pub va_reserved: [u32; 8],
}

#[repr(C)]
pub struct VAIQMatrixBufferHEVC {
    pub ScalingList4x4: [[u8; 16]; 6],
    pub ScalingList8x8: [[u8; 64]; 6],
    pub ScalingList16x16: [[u8; 64]; 6],
    pub ScalingList32x32: [[u8; 64]; 2],
    pub ScalingListDC16x16: [u8; 6],
    pub ScalingListDC32x32: [u8; 2],
    pub va_reserved: [u32; 4],
}

#[repr(C)]
pub struct VASliceParameterBufferHEVC {
    pub slice_data_size: u32,
    pub slice_data_offset: u32,
    pub slice_data_flag: u32,
    pub slice_data_byte_offset: u32,
    pub slice_segment_address: u32,
    pub RefPicList: [[u8; 15]; 2],
    pub LongSliceFlags: u32,
    pub collocated_ref_idx: u8,
    pub num_ref_idx_l0_active_minus1: u8,
    pub num_ref_idx_l1_active_minus1: u8,
    pub slice_qp_delta: i8,
    pub slice_cb_qp_offset: i8,
    pub slice_cr_qp_offset: i8,
    pub slice_beta_offset_div2: i8,
    pub slice_tc_offset_div2: i8,
    pub luma_log2_weight_denom: u8,
    pub delta_chroma_log2_weight_denom: i8,
    pub va_reserved: [u32; 4],
}

fn picture_params(pic: &mut PictureContext, buf: &NvBuffer) {
    let Some(params) = buf.param::<VAPictureParameterBufferHEVC>() else {
        return;
    };

    {
        let pp = &mut *pic.pic_params;
        // HEVC has no macroblocks; the driver passes CTU-aligned sizes in
        // 16-pixel units the way the SDK samples do.
        pp.PicWidthInMbs = (params.pic_width_in_luma_samples as i32 + 15) / 16;
        pp.FrameHeightInMbs = (params.pic_height_in_luma_samples as i32 + 15) / 16;
        pp.intra_pic_flag = bit(params.slice_parsing_fields, 14) as i32;
        pp.ref_pic_flag = 1;
    }

    let hevc = unsafe { &mut pic.pic_params.CodecSpecific.hevc };
    hevc.pic_width_in_luma_samples = params.pic_width_in_luma_samples as i32;
    hevc.pic_height_in_luma_samples = params.pic_height_in_luma_samples as i32;
    hevc.log2_min_luma_coding_block_size_minus3 = params.log2_min_luma_coding_block_size_minus3;
    hevc.log2_diff_max_min_luma_coding_block_size =
        params.log2_diff_max_min_luma_coding_block_size;
    hevc.log2_min_transform_block_size_minus2 = params.log2_min_transform_block_size_minus2;
    hevc.log2_diff_max_min_transform_block_size = params.log2_diff_max_min_transform_block_size;
    hevc.pcm_enabled_flag = bit(params.pic_fields, 3) as u8;
    hevc.log2_min_pcm_luma_coding_block_size_minus3 =
        params.log2_min_pcm_luma_coding_block_size_minus3;
    hevc.log2_diff_max_min_pcm_luma_coding_block_size =
        params.log2_diff_max_min_pcm_luma_coding_block_size;
    hevc.pcm_sample_bit_depth_luma_minus1 = params.pcm_sample_bit_depth_luma_minus1;
    hevc.pcm_sample_bit_depth_chroma_minus1 = params.pcm_sample_bit_depth_chroma_minus1;
    hevc.pcm_loop_filter_disabled_flag = bit(params.pic_fields, 18) as u8;
    hevc.strong_intra_smoothing_enabled_flag = bit(params.pic_fields, 7) as u8;
    hevc.max_transform_hierarchy_depth_intra = params.max_transform_hierarchy_depth_intra;
    hevc.max_transform_hierarchy_depth_inter = params.max_transform_hierarchy_depth_inter;
    hevc.amp_enabled_flag = bit(params.pic_fields, 6) as u8;
    hevc.separate_colour_plane_flag = bit(params.pic_fields, 2) as u8;
    hevc.log2_max_pic_order_cnt_lsb_minus4 = params.log2_max_pic_order_cnt_lsb_minus4;
    hevc.num_short_term_ref_pic_sets = params.num_short_term_ref_pic_sets;
    hevc.long_term_ref_pics_present_flag = (params.num_long_term_ref_pic_sps > 0) as u8;
    hevc.num_long_term_ref_pics_sps = params.num_long_term_ref_pic_sps;
    hevc.sps_temporal_mvp_enabled_flag = 1;
    hevc.sample_adaptive_offset_enabled_flag = 1;
    hevc.scaling_list_enable_flag = bit(params.pic_fields, 4) as u8;
    hevc.IrapPicFlag = bit(params.slice_parsing_fields, 12) as u8;
    hevc.IdrPicFlag = bit(params.slice_parsing_fields, 13) as u8;
    hevc.bit_depth_luma_minus8 = params.bit_depth_luma_minus8;
    hevc.bit_depth_chroma_minus8 = params.bit_depth_chroma_minus8;

    hevc.dependent_slice_segments_enabled_flag = bit(params.slice_parsing_fields, 9) as u8;
    hevc.slice_segment_header_extension_present_flag =
        bit(params.slice_parsing_fields, 10) as u8;
    hevc.sign_data_hiding_enabled_flag = bit(params.pic_fields, 8) as u8;
    hevc.cu_qp_delta_enabled_flag = bit(params.pic_fields, 10) as u8;
    hevc.diff_cu_qp_delta_depth = params.diff_cu_qp_delta_depth;
    hevc.init_qp_minus26 = params.init_qp_minus26;
    hevc.pps_cb_qp_offset = params.pps_cb_qp_offset;
    hevc.pps_cr_qp_offset = params.pps_cr_qp_offset;
    hevc.constrained_intra_pred_flag = bit(params.pic_fields, 9) as u8;
    hevc.weighted_pred_flag = bit(params.pic_fields, 11) as u8;
    hevc.weighted_bipred_flag = bit(params.pic_fields, 12) as u8;
    hevc.transform_skip_enabled_flag = bit(params.pic_fields, 5) as u8;
    hevc.transquant_bypass_enabled_flag = bit(params.pic_fields, 13) as u8;
    hevc.entropy_coding_sync_enabled_flag = bit(params.pic_fields, 15) as u8;
    hevc.log2_parallel_merge_level_minus2 = params.log2_parallel_merge_level_minus2;
    hevc.num_extra_slice_header_bits = bits(params.slice_parsing_fields, 3, 3) as u8;
    hevc.loop_filter_across_tiles_enabled_flag = bit(params.pic_fields, 17) as u8;
    hevc.loop_filter_across_slices_enabled_flag = bit(params.pic_fields, 16) as u8;
    hevc.output_flag_present_flag = bit(params.slice_parsing_fields, 2) as u8;
    hevc.num_ref_idx_l0_default_active_minus1 = params.num_ref_idx_l0_default_active_minus1;
    hevc.num_ref_idx_l1_default_active_minus1 = params.num_ref_idx_l1_default_active_minus1;
    hevc.lists_modification_present_flag = bit(params.slice_parsing_fields, 6) as u8;
    hevc.cabac_init_present_flag = bit(params.slice_parsing_fields, 7) as u8;
    hevc.pps_slice_chroma_qp_offsets_present_flag = bit(params.slice_parsing_fields, 8) as u8;
    hevc.deblocking_filter_override_enabled_flag = bit(params.slice_parsing_fields, 1) as u8;
    hevc.pps_deblocking_filter_disabled_flag = bit(params.slice_parsing_fields, 0) as u8;
    hevc.pps_beta_offset_div2 = params.pps_beta_offset_div2;
    hevc.pps_tc_offset_div2 = params.pps_tc_offset_div2;
    hevc.tiles_enabled_flag = bit(params.pic_fields, 14) as u8;
    hevc.uniform_spacing_flag = 1;
    hevc.num_tile_columns_minus1 = params.num_tile_columns_minus1;
    hevc.num_tile_rows_minus1 = params.num_tile_rows_minus1;
    for (dst, src) in hevc
        .column_width_minus1
        .iter_mut()
        .zip(params.column_width_minus1.iter())
    {
        *dst = *src;
    }
    for (dst, src) in hevc.row_height_minus1.iter_mut().zip(params.row_height_minus1.iter()) {
        *dst = *src;
    }
    hevc.NumBitsForShortTermRPSInSlice = params.st_rps_bits as i32;
    hevc.CurrPicOrderCntVal = params.CurrPic.pic_order_cnt;

    let mut st_before = 0;
    let mut st_after = 0;
    let mut lt_curr = 0;
    for (i, reference) in params.ReferenceFrames.iter().enumerate() {
        if reference.picture_id == VA_INVALID_ID
            || reference.flags & VA_PICTURE_HEVC_INVALID != 0
        {
            hevc.RefPicIdx[i] = -1;
            continue;
        }
        hevc.RefPicIdx[i] = pic.surfaces.picture_index(reference.picture_id);
        hevc.PicOrderCntVal[i] = reference.pic_order_cnt;
        hevc.IsLongTerm[i] = (reference.flags & VA_PICTURE_HEVC_LONG_TERM_REFERENCE != 0) as u8;
        if reference.flags & VA_PICTURE_HEVC_RPS_ST_CURR_BEFORE != 0 && st_before < 8 {
            hevc.RefPicSetStCurrBefore[st_before] = i as u8;
            st_before += 1;
        }
        if reference.flags & VA_PICTURE_HEVC_RPS_ST_CURR_AFTER != 0 && st_after < 8 {
            hevc.RefPicSetStCurrAfter[st_after] = i as u8;
            st_after += 1;
        }
        if reference.flags & VA_PICTURE_HEVC_RPS_LT_CURR != 0 && lt_curr < 8 {
            hevc.RefPicSetLtCurr[lt_curr] = i as u8;
            lt_curr += 1;
        }
    }
    hevc.RefPicIdx[15] = -1;
    hevc.NumPocStCurrBefore = st_before as i32;
    hevc.NumPocStCurrAfter = st_after as i32;
    hevc.NumPocLtCurr = lt_curr as i32;
    hevc.NumPocTotalCurr = (st_before + st_after + lt_curr) as i32;
}

fn iq_matrix(pic: &mut PictureContext, buf: &NvBuffer) {
    let Some(iq) = buf.param::<VAIQMatrixBufferHEVC>() else {
        return;
    };
    let hevc = unsafe { &mut pic.pic_params.CodecSpecific.hevc };
    hevc.ScalingList4x4 = iq.ScalingList4x4;
    hevc.ScalingList8x8 = iq.ScalingList8x8;
    hevc.ScalingList16x16 = iq.ScalingList16x16;
    hevc.ScalingList32x32 = iq.ScalingList32x32;
    hevc.ScalingListDCCoeff16x16 = iq.ScalingListDC16x16;
    hevc.ScalingListDCCoeff32x32 = iq.ScalingListDC32x32;
}

fn slice_params(pic: &mut PictureContext, buf: &NvBuffer) {
    for params in buf.elements::<VASliceParameterBufferHEVC>() {
        pic.pending_slices
            .push((params.slice_data_offset, params.slice_data_size));
    }
}

fn slice_data(pic: &mut PictureContext, buf: &NvBuffer) {
    // Same Annex B restoration as H.264.
    const START_CODE: [u8; 3] = [0, 0, 1];
    let data = buf.data();
    let pending = std::mem::take(pic.pending_slices);
    let ranges = if pending.is_empty() {
        vec![(0u32, data.len() as u32)]
    } else {
        pending
    };
    for (offset, size) in ranges {
        let start = offset as usize;
        let end = (start + size as usize).min(data.len());
        if start >= end {
            continue;
        }
        pic.slice_offsets.append(&(pic.bitstream.len() as u32).to_ne_bytes());
        pic.bitstream.append(&START_CODE);
        pic.bitstream.append(&data[start..end]);
        pic.pic_params.nNumSlices += 1;
        pic.pic_params.nBitstreamDataLen = pic.bitstream.len() as u32;
    }
}

fn compute_cuda_codec(profile: VAProfile) -> Option<cudaVideoCodec> {
    match profile {
        VAProfile::HEVCMain
        | VAProfile::HEVCMain10
        | VAProfile::HEVCMain12
        | VAProfile::HEVCMain444
        | VAProfile::HEVCMain444_10
        | VAProfile::HEVCMain444_12 => Some(cudaVideoCodec::HEVC),
        _ => None,
    }
}

fn handler(buffer_type: VABufferType) -> Option<HandlerFn> {
    match buffer_type {
        VABufferType::PictureParameter => Some(picture_params),
        VABufferType::IQMatrix => Some(iq_matrix),
        VABufferType::SliceParameter => Some(slice_params),
        VABufferType::SliceData => Some(slice_data),
        _ => None,
    }
}

pub static CODEC: Codec = Codec {
    name: "hevc",
    supported_profiles: &[
        VAProfile::HEVCMain,
        VAProfile::HEVCMain10,
        VAProfile::HEVCMain12,
        VAProfile::HEVCMain444,
        VAProfile::HEVCMain444_10,
        VAProfile::HEVCMain444_12,
    ],
    compute_cuda_codec,
    handler,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::tests_support::TestPicture;

    #[test]
    fn test_reference_sets_partition_by_rps_flags() {
        let mut picture = TestPicture::new(&CODEC);
        picture.bind_surface(10, 0);
        picture.bind_surface(11, 1);
        picture.bind_surface(12, 2);

        let mut params: VAPictureParameterBufferHEVC = unsafe { std::mem::zeroed() };
        params.pic_width_in_luma_samples = 1920;
        params.pic_height_in_luma_samples = 1080;
        params.CurrPic = VAPictureHEVC {
            picture_id: 9,
            pic_order_cnt: 4,
            flags: 0,
            va_reserved: [0; 4],
        };
        for reference in params.ReferenceFrames.iter_mut() {
            reference.picture_id = crate::va::VA_INVALID_ID;
            reference.flags = VA_PICTURE_HEVC_INVALID;
        }
        params.ReferenceFrames[0] = VAPictureHEVC {
            picture_id: 10,
            pic_order_cnt: 2,
            flags: VA_PICTURE_HEVC_RPS_ST_CURR_BEFORE,
            va_reserved: [0; 4],
        };
        params.ReferenceFrames[1] = VAPictureHEVC {
            picture_id: 11,
            pic_order_cnt: 6,
            flags: VA_PICTURE_HEVC_RPS_ST_CURR_AFTER,
            va_reserved: [0; 4],
        };
        params.ReferenceFrames[2] = VAPictureHEVC {
            picture_id: 12,
            pic_order_cnt: 0,
            flags: VA_PICTURE_HEVC_LONG_TERM_REFERENCE | VA_PICTURE_HEVC_RPS_LT_CURR,
            va_reserved: [0; 4],
        };
        picture.submit(VABufferType::PictureParameter, &params);

        let hevc = unsafe { &picture.params().CodecSpecific.hevc };
        assert_eq!(hevc.pic_width_in_luma_samples, 1920);
        assert_eq!(hevc.RefPicIdx[0], 0);
        assert_eq!(hevc.RefPicIdx[1], 1);
        assert_eq!(hevc.RefPicIdx[2], 2);
        assert_eq!(hevc.RefPicIdx[3], -1);
        assert_eq!(hevc.NumPocStCurrBefore, 1);
        assert_eq!(hevc.NumPocStCurrAfter, 1);
        assert_eq!(hevc.NumPocLtCurr, 1);
        assert_eq!(hevc.NumPocTotalCurr, 3);
        assert_eq!(hevc.IsLongTerm[2], 1);
        assert_eq!(hevc.CurrPicOrderCntVal, 4);
    }
}
