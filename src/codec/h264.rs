// Copyright 2024 The nvdec-vaapi-driver Authors
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! H.264 buffer translation, covering AVC plus the SVC (StereoHigh) and MVC
//! (MultiviewHigh) profile mappings.

use crate::codec::bit;
use crate::codec::bits;
use crate::codec::Codec;
use crate::codec::HandlerFn;
use crate::codec::PictureContext;
use crate::codec::PictureIndexLookup;
use crate::driver::NvBuffer;
use crate::sys::cuvid::cudaVideoCodec;
use crate::va::VABufferType;
use crate::va::VAProfile;
use crate::va::VASurfaceID;
use crate::va::VA_INVALID_ID;

pub const VA_PICTURE_H264_INVALID: u32 = 0x0000_0001;
pub const VA_PICTURE_H264_TOP_FIELD: u32 = 0x0000_0002;
pub const VA_PICTURE_H264_BOTTOM_FIELD: u32 = 0x0000_0004;
pub const VA_PICTURE_H264_SHORT_TERM_REFERENCE: u32 = 0x0000_0008;
pub const VA_PICTURE_H264_LONG_TERM_REFERENCE: u32 = 0x0000_0010;

#[repr(C)]
#[derive(Copy, Clone)]
pub struct VAPictureH264 {
    pub picture_id: VASurfaceID,
    pub frame_idx: u32,
    pub flags: u32,
    pub TopFieldOrderCnt: i32,
    pub BottomFieldOrderCnt: i32,
    pub va_reserved: [u32; 4],
}

/// `VAPictureParameterBufferH264` from `va_dec_h264.h`.
#[repr(C)]
pub struct VAPictureParameterBufferH264 {
    pub CurrPic: VAPictureH264,
    pub ReferenceFrames: [VAPictureH264; 16],
    pub picture_width_in_mbs_minus1: u16,
    pub picture_height_in_mbs_minus1: u16,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
    pub num_ref_frames: u8,
    /// Packed: chroma_format_idc:2, residual_colour_transform_flag:1,
    /// gaps_in_frame_num_value_allowed_flag:1, frame_mbs_only_flag:1,
    /// mb_adaptive_frame_field_flag:1, direct_8x8_inference_flag:1,
    /// MinLumaBiPredSize8x8:1, log2_max_frame_num_minus4:4,
    /// pic_order_cnt_type:2, log2_max_pic_order_cnt_lsb_minus4:4,
    /// delta_pic_order_always_zero_flag:1.
    pub seq_fields: u32,
    pub num_slice_groups_minus1: u8,
    pub slice_group_map_type: u8,
    pub slice_group_change_rate_minus1: u16,
    pub pic_init_qp_minus26: i8,
    pub pic_init_qs_minus26: i8,
    pub chroma_qp_index_offset: i8,
    pub second_chroma_qp_index_offset: i8,
    /// Packed: entropy_coding_mode_flag:1, weighted_pred_flag:1,
    /// weighted_bipred_idc:2, transform_8x8_mode_flag:1, field_pic_flag:1,
    /// constrained_intra_pred_flag:1, pic_order_present_flag:1,
    /// deblocking_filter_control_present_flag:1,
    /// redundant_pic_cnt_present_flag:1, reference_pic_flag:1.
    pub pic_fields: u32,
    pub frame_num: u16,
    pub va_reserved: [u32; 4],
}

#[repr(C)]
pub struct VAIQMatrixBufferH264 {
    pub ScalingList4x4: [[u8; 16]; 6],
    pub ScalingList8x8: [[u8; 64]; 2],
    pub va_reserved: [u32; 4],
}

/// `VASliceParameterBufferH264`, down to the reference list lengths.
#[repr(C)]
pub struct VASliceParameterBufferH264 {
    pub slice_data_size: u32,
    pub slice_data_offset: u32,
    pub slice_data_flag: u32,
    pub slice_data_bit_offset: u16,
    pub first_mb_in_slice: u16,
    pub slice_type: u8,
    pub direct_spatial_mv_pred_flag: u8,
    pub num_ref_idx_l0_active_minus1: u8,
    pub num_ref_idx_l1_active_minus1: u8,
    pub cabac_init_idc: u8,
    pub slice_qp_delta: i8,
    pub disable_deblocking_filter_idc: u8,
    pub slice_alpha_c0_offset_div2: i8,
    pub slice_beta_offset_div2: i8,
}

fn fill_dpb_entry(
    surfaces: &dyn PictureIndexLookup,
    entry: &mut crate::sys::cuvid::CUVIDH264DPBENTRY,
    reference: &VAPictureH264,
) {
    if reference.picture_id == VA_INVALID_ID || reference.flags & VA_PICTURE_H264_INVALID != 0 {
        entry.PicIdx = -1;
        entry.not_existing = 1;
        return;
    }
    entry.PicIdx = surfaces.picture_index(reference.picture_id);
    entry.FrameIdx = reference.frame_idx as i32;
    entry.is_long_term = (reference.flags & VA_PICTURE_H264_LONG_TERM_REFERENCE != 0) as i32;
    entry.not_existing = 0;
    // Bit 0 marks the top field used for reference, bit 1 the bottom one; a
    // frame reference uses both.
    entry.used_for_reference = match reference.flags
        & (VA_PICTURE_H264_TOP_FIELD | VA_PICTURE_H264_BOTTOM_FIELD)
    {
        VA_PICTURE_H264_TOP_FIELD => 1,
        VA_PICTURE_H264_BOTTOM_FIELD => 2,
        _ => 3,
    };
    entry.FieldOrderCnt = [reference.TopFieldOrderCnt, reference.BottomFieldOrderCnt];
}

fn picture_params(pic: &mut PictureContext, buf: &NvBuffer) {
    let Some(params) = buf.param::<VAPictureParameterBufferH264>() else {
        return;
    };

    let field_pic_flag = bit(params.pic_fields, 5);
    let bottom_field = params.CurrPic.flags & VA_PICTURE_H264_BOTTOM_FIELD != 0;
    {
        let pp = &mut *pic.pic_params;
        pp.PicWidthInMbs = params.picture_width_in_mbs_minus1 as i32 + 1;
        pp.FrameHeightInMbs = (params.picture_height_in_mbs_minus1 as i32 + 1)
            * if bit(params.seq_fields, 4) != 0 { 1 } else { 2 };
        pp.field_pic_flag = field_pic_flag as i32;
        pp.bottom_field_flag = (field_pic_flag != 0 && bottom_field) as i32;
        pp.second_field = pp.bottom_field_flag;
        pp.ref_pic_flag = bit(params.pic_fields, 10) as i32;
        // No valid reference means this can only be an intra picture.
        pp.intra_pic_flag = params
            .ReferenceFrames
            .iter()
            .all(|r| r.flags & VA_PICTURE_H264_INVALID != 0 || r.picture_id == VA_INVALID_ID)
            as i32;
    }

    let h264 = unsafe { &mut pic.pic_params.CodecSpecific.h264 };
    h264.log2_max_frame_num_minus4 = bits(params.seq_fields, 8, 4) as i32;
    h264.pic_order_cnt_type = bits(params.seq_fields, 12, 2) as i32;
    h264.log2_max_pic_order_cnt_lsb_minus4 = bits(params.seq_fields, 14, 4) as i32;
    h264.delta_pic_order_always_zero_flag = bit(params.seq_fields, 18) as i32;
    h264.frame_mbs_only_flag = bit(params.seq_fields, 4) as i32;
    h264.direct_8x8_inference_flag = bit(params.seq_fields, 6) as i32;
    h264.num_ref_frames = params.num_ref_frames as i32;
    h264.residual_colour_transform_flag = bit(params.seq_fields, 2) as u8;
    h264.bit_depth_luma_minus8 = params.bit_depth_luma_minus8;
    h264.bit_depth_chroma_minus8 = params.bit_depth_chroma_minus8;
    h264.entropy_coding_mode_flag = bit(params.pic_fields, 0) as i32;
    h264.pic_order_present_flag = bit(params.pic_fields, 7) as i32;
    h264.weighted_pred_flag = bit(params.pic_fields, 1) as i32;
    h264.weighted_bipred_idc = bits(params.pic_fields, 2, 2) as i32;
    h264.pic_init_qp_minus26 = params.pic_init_qp_minus26 as i32;
    h264.pic_init_qs_minus26 = params.pic_init_qs_minus26;
    h264.deblocking_filter_control_present_flag = bit(params.pic_fields, 8) as i32;
    h264.redundant_pic_cnt_present_flag = bit(params.pic_fields, 9) as i32;
    h264.transform_8x8_mode_flag = bit(params.pic_fields, 4) as i32;
    h264.MbaffFrameFlag = (bit(params.seq_fields, 5) != 0 && field_pic_flag == 0) as i32;
    h264.constrained_intra_pred_flag = bit(params.pic_fields, 6) as i32;
    h264.chroma_qp_index_offset = params.chroma_qp_index_offset as i32;
    h264.second_chroma_qp_index_offset = params.second_chroma_qp_index_offset as i32;
    h264.ref_pic_flag = bit(params.pic_fields, 10) as i32;
    h264.frame_num = params.frame_num as i32;
    h264.CurrFieldOrderCnt = [
        params.CurrPic.TopFieldOrderCnt,
        params.CurrPic.BottomFieldOrderCnt,
    ];
    h264.num_slice_groups_minus1 = params.num_slice_groups_minus1;
    h264.slice_group_map_type = params.slice_group_map_type;
    h264.slice_group_change_rate_minus1 = params.slice_group_change_rate_minus1 as u32;

    for (entry, reference) in h264.dpb.iter_mut().zip(params.ReferenceFrames.iter()) {
        fill_dpb_entry(pic.surfaces, entry, reference);
    }
}

fn iq_matrix(pic: &mut PictureContext, buf: &NvBuffer) {
    let Some(iq) = buf.param::<VAIQMatrixBufferH264>() else {
        return;
    };
    let h264 = unsafe { &mut pic.pic_params.CodecSpecific.h264 };
    h264.WeightScale4x4 = iq.ScalingList4x4;
    h264.WeightScale8x8 = iq.ScalingList8x8;
}

fn slice_params(pic: &mut PictureContext, buf: &NvBuffer) {
    for params in buf.elements::<VASliceParameterBufferH264>() {
        pic.pending_slices
            .push((params.slice_data_offset, params.slice_data_size));
    }
}

fn slice_data(pic: &mut PictureContext, buf: &NvBuffer) {
    // NVDEC expects Annex B slices; the VA layer strips the start codes, so
    // put one back in front of each slice.
    const START_CODE: [u8; 3] = [0, 0, 1];
    let data = buf.data();
    let pending = std::mem::take(pic.pending_slices);
    if pending.is_empty() {
        pic.slice_offsets.append(&(pic.bitstream.len() as u32).to_ne_bytes());
        pic.bitstream.append(&START_CODE);
        pic.bitstream.append(data);
        pic.pic_params.nNumSlices += 1;
        pic.pic_params.nBitstreamDataLen = pic.bitstream.len() as u32;
        return;
    }
    for (offset, size) in pending {
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
        VAProfile::H264Main | VAProfile::H264High | VAProfile::H264ConstrainedBaseline => {
            Some(cudaVideoCodec::H264)
        }
        VAProfile::H264StereoHigh => Some(cudaVideoCodec::H264_SVC),
        VAProfile::H264MultiviewHigh => Some(cudaVideoCodec::H264_MVC),
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
    name: "h264",
    supported_profiles: &[
        VAProfile::H264Main,
        VAProfile::H264High,
        VAProfile::H264ConstrainedBaseline,
        VAProfile::H264StereoHigh,
        VAProfile::H264MultiviewHigh,
    ],
    compute_cuda_codec,
    handler,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::tests_support::TestPicture;

    fn invalid_picture() -> VAPictureH264 {
        VAPictureH264 {
            picture_id: VA_INVALID_ID,
            frame_idx: 0,
            flags: VA_PICTURE_H264_INVALID,
            TopFieldOrderCnt: 0,
            BottomFieldOrderCnt: 0,
            va_reserved: [0; 4],
        }
    }

    fn picture_params_1080p() -> VAPictureParameterBufferH264 {
        VAPictureParameterBufferH264 {
            CurrPic: VAPictureH264 {
                picture_id: 1,
                frame_idx: 0,
                flags: 0,
                TopFieldOrderCnt: 2,
                BottomFieldOrderCnt: 2,
                va_reserved: [0; 4],
            },
            ReferenceFrames: [invalid_picture(); 16],
            picture_width_in_mbs_minus1: 119,
            picture_height_in_mbs_minus1: 67,
            bit_depth_luma_minus8: 0,
            bit_depth_chroma_minus8: 0,
            num_ref_frames: 4,
            // frame_mbs_only, direct_8x8, log2_max_frame_num_minus4 = 4,
            // pic_order_cnt_type = 0, log2_max_poc_lsb_minus4 = 6.
            seq_fields: (1 << 4) | (1 << 6) | (4 << 8) | (6 << 14),
            num_slice_groups_minus1: 0,
            slice_group_map_type: 0,
            slice_group_change_rate_minus1: 0,
            pic_init_qp_minus26: -3,
            pic_init_qs_minus26: 0,
            chroma_qp_index_offset: 2,
            second_chroma_qp_index_offset: 2,
            // entropy_coding (CABAC) + transform_8x8 + reference_pic_flag.
            pic_fields: 1 | (1 << 4) | (1 << 10),
            frame_num: 0,
            va_reserved: [0; 4],
        }
    }

    #[test]
    fn test_picture_translation() {
        let mut picture = TestPicture::new(&CODEC);
        picture.submit(VABufferType::PictureParameter, &picture_params_1080p());

        let pp = picture.params();
        assert_eq!(pp.PicWidthInMbs, 120);
        assert_eq!(pp.FrameHeightInMbs, 68);
        assert_eq!(pp.field_pic_flag, 0);
        assert_eq!(pp.intra_pic_flag, 1);

        let h264 = unsafe { &pp.CodecSpecific.h264 };
        assert_eq!(h264.log2_max_frame_num_minus4, 4);
        assert_eq!(h264.log2_max_pic_order_cnt_lsb_minus4, 6);
        assert_eq!(h264.entropy_coding_mode_flag, 1);
        assert_eq!(h264.transform_8x8_mode_flag, 1);
        assert_eq!(h264.pic_init_qp_minus26, -3);
        assert!(h264.dpb.iter().all(|e| e.PicIdx == -1));
    }

    #[test]
    fn test_dpb_references_resolve_to_picture_indices() {
        let mut picture = TestPicture::new(&CODEC);
        picture.bind_surface(42, 3);
        let mut params = picture_params_1080p();
        params.ReferenceFrames[0] = VAPictureH264 {
            picture_id: 42,
            frame_idx: 7,
            flags: VA_PICTURE_H264_SHORT_TERM_REFERENCE,
            TopFieldOrderCnt: 8,
            BottomFieldOrderCnt: 9,
            va_reserved: [0; 4],
        };
        picture.submit(VABufferType::PictureParameter, &params);

        let h264 = unsafe { &picture.params().CodecSpecific.h264 };
        assert_eq!(h264.dpb[0].PicIdx, 3);
        assert_eq!(h264.dpb[0].FrameIdx, 7);
        assert_eq!(h264.dpb[0].is_long_term, 0);
        assert_eq!(h264.dpb[0].used_for_reference, 3);
        assert_eq!(h264.dpb[0].FieldOrderCnt, [8, 9]);
        assert_eq!(picture.params().intra_pic_flag, 0);
    }

    #[test]
    fn test_slice_data_gets_start_codes() {
        let mut picture = TestPicture::new(&CODEC);
        let slice = VASliceParameterBufferH264 {
            slice_data_size: 4,
            slice_data_offset: 0,
            slice_data_flag: 0,
            slice_data_bit_offset: 0,
            first_mb_in_slice: 0,
            slice_type: 2,
            direct_spatial_mv_pred_flag: 0,
            num_ref_idx_l0_active_minus1: 0,
            num_ref_idx_l1_active_minus1: 0,
            cabac_init_idc: 0,
            slice_qp_delta: 0,
            disable_deblocking_filter_idc: 0,
            slice_alpha_c0_offset_div2: 0,
            slice_beta_offset_div2: 0,
        };
        picture.submit(VABufferType::SliceParameter, &slice);
        picture.submit_bytes(VABufferType::SliceData, &[0x65, 0x88, 0x84, 0x00]);

        assert_eq!(picture.params().nNumSlices, 1);
        assert_eq!(picture.bitstream(), &[0, 0, 1, 0x65, 0x88, 0x84, 0x00]);
        assert_eq!(picture.slice_offsets(), &[0]);
    }
}
