// Copyright 2024 The nvdec-vaapi-driver Authors
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! VC-1 buffer translation.

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

/// `VAPictureParameterBufferVC1` from `va_dec_vc1.h`, down to the fields the
/// decoder consumes.
#[repr(C)]
pub struct VAPictureParameterBufferVC1 {
    pub forward_reference_picture: VASurfaceID,
    pub backward_reference_picture: VASurfaceID,
    pub inloop_decoded_picture: VASurfaceID,
    /// Packed: pulldown:1, interlace:1, tfcntrflag:1, finterpflag:1, psf:1,
    /// multires:1, overlap:1, syncmarker:1, rangered:1, max_b_frames:3,
    /// profile:2.
    pub sequence_fields: u32,
    pub coded_width: u16,
    pub coded_height: u16,
    /// Packed: broken_link:1, closed_entry:1, panscan_flag:1, loopfilter:1.
    pub entrypoint_fields: u32,
    pub conditional_overlap_flag: u8,
    pub fast_uvmc_flag: u8,
    /// Packed: luma_flag:1, luma:3, chroma_flag:1, chroma:3.
    pub range_mapping_fields: u32,
    pub b_picture_fraction: u8,
    pub cbp_table: u8,
    pub mb_mode_table: u8,
    pub range_reduction_frame: u8,
    pub rounding_control: u8,
    pub post_processing: u8,
    pub picture_resolution_index: u8,
    pub luma_scale: u8,
    pub luma_shift: u8,
    /// Packed: picture_type:3, frame_coding_mode:3, top_field_first:1,
    /// is_first_field:1, intensity_compensation:1.
    pub picture_fields: u32,
    /// Packed raw-coding flags.
    pub raw_coding: u32,
    pub bitplane_present: u32,
    pub reference_fields: u32,
    pub mv_fields: u32,
    /// Packed: dquant:2, quantizer:2, half_qp:1, pic_quantizer_scale:5,
    /// pic_quantizer_type:1, dq_frame:1, dq_profile:2, dq_sb_edge:2,
    /// dq_db_edge:2, dq_binary_level:1, alt_pic_quantizer:5.
    pub pic_quantizer_fields: u32,
    /// Packed: variable_sized_transform_flag:1, mb_level_transform_type_flag:1,
    /// frame_level_transform_type:2, transform_ac_codingset_idx1:2,
    /// transform_ac_codingset_idx2:2, intra_transform_dc_table:1.
    pub transform_fields: u32,
    pub luma_scale2: u8,
    pub luma_shift2: u8,
    pub intensity_compensation_field: u8,
    pub va_reserved: [u32; 4],
}

#[repr(C)]
pub struct VASliceParameterBufferVC1 {
    pub slice_data_size: u32,
    pub slice_data_offset: u32,
    pub slice_data_flag: u32,
    pub macroblock_offset: u32,
    pub slice_vertical_position: u32,
    pub va_reserved: [u32; 4],
}

fn picture_params(pic: &mut PictureContext, buf: &NvBuffer) {
    let Some(params) = buf.param::<VAPictureParameterBufferVC1>() else {
        return;
    };
    let pp = &mut *pic.pic_params;

    pp.PicWidthInMbs = (params.coded_width as i32 + 15) / 16;
    pp.FrameHeightInMbs = (params.coded_height as i32 + 15) / 16;
    let picture_type = bits(params.picture_fields, 0, 3);
    // 0 = I, 1 = P, 2 = B, 3 = BI, 4 = skipped.
    pp.intra_pic_flag = (picture_type == 0 || picture_type == 3) as i32;
    pp.ref_pic_flag = (picture_type <= 1) as i32;
    pp.second_field = (bit(params.picture_fields, 7) == 0) as i32 & pp.field_pic_flag;

    let vc1 = unsafe { &mut pp.CodecSpecific.vc1 };
    vc1.ForwardRefIdx = pic.surfaces.picture_index(params.forward_reference_picture);
    vc1.BackwardRefIdx = pic.surfaces.picture_index(params.backward_reference_picture);
    vc1.FrameWidth = params.coded_width as i32;
    vc1.FrameHeight = params.coded_height as i32;
    vc1.intra_pic_flag = pp.intra_pic_flag;
    vc1.ref_pic_flag = pp.ref_pic_flag;
    vc1.progressive_fcm = (bits(params.picture_fields, 3, 3) == 0) as i32;
    vc1.profile = bits(params.sequence_fields, 12, 2) as i32;
    vc1.postprocflag = params.post_processing as i32;
    vc1.pulldown = bit(params.sequence_fields, 0) as i32;
    vc1.interlace = bit(params.sequence_fields, 1) as i32;
    vc1.tfcntrflag = bit(params.sequence_fields, 2) as i32;
    vc1.finterpflag = bit(params.sequence_fields, 3) as i32;
    vc1.psf = bit(params.sequence_fields, 4) as i32;
    vc1.multires = bit(params.sequence_fields, 5) as i32;
    vc1.overlap = bit(params.sequence_fields, 6) as i32;
    vc1.syncmarker = bit(params.sequence_fields, 7) as i32;
    vc1.rangered = bit(params.sequence_fields, 8) as i32;
    vc1.maxbframes = bits(params.sequence_fields, 9, 3) as i32;
    vc1.panscan_flag = bit(params.entrypoint_fields, 2) as i32;
    vc1.loopfilter = bit(params.entrypoint_fields, 3) as i32;
    vc1.fastuvmc = params.fast_uvmc_flag as i32;
    vc1.extended_mv = bit(params.mv_fields, 0) as i32;
    vc1.extended_dmv = bit(params.mv_fields, 1) as i32;
    vc1.dquant = bits(params.pic_quantizer_fields, 0, 2) as i32;
    vc1.quantizer = bits(params.pic_quantizer_fields, 2, 2) as i32;
    vc1.vstransform = bit(params.transform_fields, 0) as i32;
    vc1.refdist_flag = bit(params.reference_fields, 0) as i32;
    vc1.range_mapy_flag = bit(params.range_mapping_fields, 0) as i32;
    vc1.range_mapy = bits(params.range_mapping_fields, 1, 3) as i32;
    vc1.range_mapuv_flag = bit(params.range_mapping_fields, 4) as i32;
    vc1.range_mapuv = bits(params.range_mapping_fields, 5, 3) as i32;
    vc1.rangeredfrm = params.range_reduction_frame as i32;
}

fn slice_params(pic: &mut PictureContext, buf: &NvBuffer) {
    for params in buf.elements::<VASliceParameterBufferVC1>() {
        pic.pending_slices
            .push((params.slice_data_offset, params.slice_data_size));
    }
}

fn compute_cuda_codec(profile: VAProfile) -> Option<cudaVideoCodec> {
    match profile {
        VAProfile::VC1Simple | VAProfile::VC1Main | VAProfile::VC1Advanced => {
            Some(cudaVideoCodec::VC1)
        }
        _ => None,
    }
}

fn handler(buffer_type: VABufferType) -> Option<HandlerFn> {
    match buffer_type {
        VABufferType::PictureParameter => Some(picture_params),
        VABufferType::SliceParameter => Some(slice_params),
        VABufferType::SliceData => Some(append_slice_data),
        VABufferType::BitPlane => None,
        _ => None,
    }
}

pub static CODEC: Codec = Codec {
    name: "vc1",
    supported_profiles: &[VAProfile::VC1Simple, VAProfile::VC1Main, VAProfile::VC1Advanced],
    compute_cuda_codec,
    handler,
};
