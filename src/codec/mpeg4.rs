// Copyright 2024 The nvdec-vaapi-driver Authors
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! MPEG-4 part 2 buffer translation.

use crate::codec::append_slice_data;
use crate::codec::bit;
use crate::codec::Codec;
use crate::codec::HandlerFn;
use crate::codec::PictureContext;
use crate::driver::NvBuffer;
use crate::sys::cuvid::cudaVideoCodec;
use crate::va::VABufferType;
use crate::va::VAProfile;
use crate::va::VASurfaceID;

/// `VAPictureParameterBufferMPEG4` from `va_dec_mpeg4.h`.
#[repr(C)]
pub struct VAPictureParameterBufferMPEG4 {
    pub vop_width: u16,
    pub vop_height: u16,
    pub forward_reference_picture: VASurfaceID,
    pub backward_reference_picture: VASurfaceID,
    /// Packed: short_video_header:1, chroma_format:2, interlaced:1,
    /// obmc_disable:1, sprite_enable:2, sprite_warping_accuracy:2,
    /// quant_type:1, quarter_sample:1, data_partitioned:1, reversible_vlc:1,
    /// resync_marker_disable:1.
    pub vol_fields: u32,
    pub no_of_sprite_warping_points: u8,
    pub sprite_trajectory_du: [i16; 3],
    pub sprite_trajectory_dv: [i16; 3],
    pub quant_precision: u8,
    /// Packed: vop_coding_type:2, backward_reference_vop_coding_type:2,
    /// vop_rounding_type:1, intra_dc_vlc_thr:3, top_field_first:1,
    /// alternate_vertical_scan_flag:1.
    pub vop_fields: u32,
    pub vop_fcode_forward: u8,
    pub vop_fcode_backward: u8,
    pub vop_time_increment_resolution: u16,
    pub num_gobs_in_vop: u8,
    pub num_macroblocks_in_gob: u8,
    pub TRB: [i16; 2],
    pub TRD: [i16; 2],
    pub va_reserved: [u32; 4],
}

#[repr(C)]
pub struct VAIQMatrixBufferMPEG4 {
    pub load_intra_quant_mat: i32,
    pub load_non_intra_quant_mat: i32,
    pub intra_quant_mat: [u8; 64],
    pub non_intra_quant_mat: [u8; 64],
    pub va_reserved: [u32; 4],
}

#[repr(C)]
pub struct VASliceParameterBufferMPEG4 {
    pub slice_data_size: u32,
    pub slice_data_offset: u32,
    pub slice_data_flag: u32,
    pub macroblock_offset: u32,
    pub macroblock_number: u32,
    pub quant_scale: i32,
    pub va_reserved: [u32; 4],
}

fn picture_params(pic: &mut PictureContext, buf: &NvBuffer) {
    let Some(params) = buf.param::<VAPictureParameterBufferMPEG4>() else {
        return;
    };
    let pp = &mut *pic.pic_params;

    pp.PicWidthInMbs = (params.vop_width as i32 + 15) / 16;
    pp.FrameHeightInMbs = (params.vop_height as i32 + 15) / 16;
    let vop_coding_type = params.vop_fields & 0x3;
    pp.intra_pic_flag = (vop_coding_type == 0) as i32;
    pp.ref_pic_flag = (vop_coding_type <= 1) as i32;

    let mpeg4 = unsafe { &mut pp.CodecSpecific.mpeg4 };
    mpeg4.ForwardRefIdx = pic.surfaces.picture_index(params.forward_reference_picture);
    mpeg4.BackwardRefIdx = pic.surfaces.picture_index(params.backward_reference_picture);
    mpeg4.video_object_layer_width = params.vop_width as i32;
    mpeg4.video_object_layer_height = params.vop_height as i32;
    mpeg4.vop_time_increment_bitcount = (16 - params.vop_time_increment_resolution.leading_zeros())
        .max(1) as i32;
    mpeg4.top_field_first = bit(params.vop_fields, 7) as i32;
    mpeg4.resync_marker_disable = bit(params.vol_fields, 12) as i32;
    mpeg4.quant_type = bit(params.vol_fields, 8) as i32;
    mpeg4.quarter_sample = bit(params.vol_fields, 9) as i32;
    mpeg4.short_video_header = bit(params.vol_fields, 0) as i32;
    mpeg4.vop_coding_type = vop_coding_type as i32;
    mpeg4.vop_coded = 1;
    mpeg4.vop_rounding_type = bit(params.vop_fields, 4) as i32;
    mpeg4.alternate_vertical_scan_flag = bit(params.vop_fields, 8) as i32;
    mpeg4.interlaced = bit(params.vol_fields, 3) as i32;
    mpeg4.vop_fcode_forward = params.vop_fcode_forward as i32;
    mpeg4.vop_fcode_backward = params.vop_fcode_backward as i32;
    mpeg4.trd = [params.TRD[0] as i32, params.TRD[1] as i32];
    mpeg4.trb = [params.TRB[0] as i32, params.TRB[1] as i32];
    mpeg4.gmc_enabled =
        (params.no_of_sprite_warping_points > 0 && (params.vol_fields >> 5) & 0x3 == 2) as i32;
}

fn iq_matrix(pic: &mut PictureContext, buf: &NvBuffer) {
    let Some(iq) = buf.param::<VAIQMatrixBufferMPEG4>() else {
        return;
    };
    let mpeg4 = unsafe { &mut pic.pic_params.CodecSpecific.mpeg4 };
    if iq.load_intra_quant_mat != 0 {
        mpeg4.QuantMatrixIntra = iq.intra_quant_mat;
    }
    if iq.load_non_intra_quant_mat != 0 {
        mpeg4.QuantMatrixInter = iq.non_intra_quant_mat;
    }
}

fn slice_params(pic: &mut PictureContext, buf: &NvBuffer) {
    for params in buf.elements::<VASliceParameterBufferMPEG4>() {
        pic.pending_slices
            .push((params.slice_data_offset, params.slice_data_size));
    }
}

fn compute_cuda_codec(profile: VAProfile) -> Option<cudaVideoCodec> {
    match profile {
        VAProfile::MPEG4Simple | VAProfile::MPEG4AdvancedSimple | VAProfile::MPEG4Main => {
            Some(cudaVideoCodec::MPEG4)
        }
        _ => None,
    }
}

fn handler(buffer_type: VABufferType) -> Option<HandlerFn> {
    match buffer_type {
        VABufferType::PictureParameter => Some(picture_params),
        VABufferType::IQMatrix => Some(iq_matrix),
        VABufferType::SliceParameter => Some(slice_params),
        VABufferType::SliceData => Some(append_slice_data),
        _ => None,
    }
}

pub static CODEC: Codec = Codec {
    name: "mpeg4",
    supported_profiles: &[
        VAProfile::MPEG4Simple,
        VAProfile::MPEG4AdvancedSimple,
        VAProfile::MPEG4Main,
    ],
    compute_cuda_codec,
    handler,
};
