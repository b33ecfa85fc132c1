// Copyright 2024 The nvdec-vaapi-driver Authors
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! MPEG-2 buffer translation.

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

/// `VAPictureParameterBufferMPEG2` from `va_dec_mpeg2.h`.
#[repr(C)]
pub struct VAPictureParameterBufferMPEG2 {
    pub horizontal_size: u16,
    pub vertical_size: u16,
    pub forward_reference_picture: VASurfaceID,
    pub backward_reference_picture: VASurfaceID,
    pub picture_coding_type: i32,
    pub f_code: i32,
    /// Packed: intra_dc_precision:2, picture_structure:2, top_field_first:1,
    /// frame_pred_frame_dct:1, concealment_motion_vectors:1, q_scale_type:1,
    /// intra_vlc_format:1, alternate_scan:1, repeat_first_field:1,
    /// progressive_frame:1, is_first_field:1.
    pub picture_coding_extension: u32,
    pub va_reserved: [u32; 4],
}

#[repr(C)]
pub struct VAIQMatrixBufferMPEG2 {
    pub load_intra_quantiser_matrix: i32,
    pub load_non_intra_quantiser_matrix: i32,
    pub load_chroma_intra_quantiser_matrix: i32,
    pub load_chroma_non_intra_quantiser_matrix: i32,
    pub intra_quantiser_matrix: [u8; 64],
    pub non_intra_quantiser_matrix: [u8; 64],
    pub chroma_intra_quantiser_matrix: [u8; 64],
    pub chroma_non_intra_quantiser_matrix: [u8; 64],
    pub va_reserved: [u32; 4],
}

#[repr(C)]
pub struct VASliceParameterBufferMPEG2 {
    pub slice_data_size: u32,
    pub slice_data_offset: u32,
    pub slice_data_flag: u32,
    pub macroblock_offset: u32,
    pub slice_horizontal_position: u32,
    pub slice_vertical_position: u32,
    pub quantiser_scale_code: i32,
    pub intra_slice_flag: i32,
    pub va_reserved: [u32; 4],
}

const PICTURE_STRUCTURE_TOP_FIELD: u32 = 1;
const PICTURE_STRUCTURE_FRAME: u32 = 3;

fn picture_params(pic: &mut PictureContext, buf: &NvBuffer) {
    let Some(params) = buf.param::<VAPictureParameterBufferMPEG2>() else {
        return;
    };
    let pp = &mut *pic.pic_params;

    pp.PicWidthInMbs = (params.horizontal_size as i32 + 15) / 16;
    pp.FrameHeightInMbs = (params.vertical_size as i32 + 15) / 16;
    pp.intra_pic_flag = (params.picture_coding_type == 1) as i32;
    pp.ref_pic_flag = (params.picture_coding_type <= 2) as i32;

    let ext = params.picture_coding_extension;
    let structure = bits(ext, 2, 2);
    pp.field_pic_flag = (structure != PICTURE_STRUCTURE_FRAME) as i32;
    pp.bottom_field_flag =
        (pp.field_pic_flag != 0 && structure != PICTURE_STRUCTURE_TOP_FIELD) as i32;
    pp.second_field = (pp.field_pic_flag != 0 && bit(ext, 14) == 0) as i32;

    let mpeg2 = unsafe { &mut pp.CodecSpecific.mpeg2 };
    mpeg2.ForwardRefIdx = pic.surfaces.picture_index(params.forward_reference_picture);
    mpeg2.BackwardRefIdx = pic.surfaces.picture_index(params.backward_reference_picture);
    mpeg2.picture_coding_type = params.picture_coding_type;
    mpeg2.full_pel_forward_vector = 0;
    mpeg2.full_pel_backward_vector = 0;
    mpeg2.f_code[0][0] = (params.f_code >> 12) & 0xf;
    mpeg2.f_code[0][1] = (params.f_code >> 8) & 0xf;
    mpeg2.f_code[1][0] = (params.f_code >> 4) & 0xf;
    mpeg2.f_code[1][1] = params.f_code & 0xf;
    mpeg2.intra_dc_precision = bits(ext, 0, 2) as i32;
    mpeg2.frame_pred_frame_dct = bit(ext, 5) as i32;
    mpeg2.concealment_motion_vectors = bit(ext, 6) as i32;
    mpeg2.q_scale_type = bit(ext, 7) as i32;
    mpeg2.intra_vlc_format = bit(ext, 8) as i32;
    mpeg2.alternate_scan = bit(ext, 9) as i32;
    mpeg2.top_field_first = bit(ext, 4) as i32;
}

fn iq_matrix(pic: &mut PictureContext, buf: &NvBuffer) {
    let Some(iq) = buf.param::<VAIQMatrixBufferMPEG2>() else {
        return;
    };
    let mpeg2 = unsafe { &mut pic.pic_params.CodecSpecific.mpeg2 };
    if iq.load_intra_quantiser_matrix != 0 {
        mpeg2.QuantMatrixIntra = iq.intra_quantiser_matrix;
    }
    if iq.load_non_intra_quantiser_matrix != 0 {
        mpeg2.QuantMatrixInter = iq.non_intra_quantiser_matrix;
    }
}

fn slice_params(pic: &mut PictureContext, buf: &NvBuffer) {
    for params in buf.elements::<VASliceParameterBufferMPEG2>() {
        pic.pending_slices
            .push((params.slice_data_offset, params.slice_data_size));
    }
}

fn compute_cuda_codec(profile: VAProfile) -> Option<cudaVideoCodec> {
    match profile {
        VAProfile::MPEG2Simple | VAProfile::MPEG2Main => Some(cudaVideoCodec::MPEG2),
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
    name: "mpeg2",
    supported_profiles: &[VAProfile::MPEG2Simple, VAProfile::MPEG2Main],
    compute_cuda_codec,
    handler,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::tests_support::run_picture;

    #[test]
    fn test_picture_translation() {
        let params = VAPictureParameterBufferMPEG2 {
            horizontal_size: 720,
            vertical_size: 576,
            forward_reference_picture: crate::va::VA_INVALID_ID,
            backward_reference_picture: crate::va::VA_INVALID_ID,
            picture_coding_type: 1,
            f_code: 0xffff,
            // Frame picture, top field first, q_scale_type.
            picture_coding_extension: (3 << 2) | (1 << 4) | (1 << 7),
            va_reserved: [0; 4],
        };
        let pp = run_picture(&CODEC, VABufferType::PictureParameter, &params);
        assert_eq!(pp.PicWidthInMbs, 45);
        assert_eq!(pp.FrameHeightInMbs, 36);
        assert_eq!(pp.intra_pic_flag, 1);
        assert_eq!(pp.field_pic_flag, 0);
        let mpeg2 = unsafe { &pp.CodecSpecific.mpeg2 };
        assert_eq!(mpeg2.ForwardRefIdx, -1);
        assert_eq!(mpeg2.top_field_first, 1);
        assert_eq!(mpeg2.q_scale_type, 1);
        assert_eq!(mpeg2.f_code, [[15, 15], [15, 15]]);
    }
}
