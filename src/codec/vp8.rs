// Copyright 2024 The nvdec-vaapi-driver Authors
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! VP8 buffer translation.
//!
//! The slice-data buffer for VP8 includes the uncompressed frame tag, and
//! clients hand it over at an arbitrary alignment; `CreateBuffer` records
//! the unalignment offset so the handler can reconstruct the original
//! stream position.

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

/// `VAPictureParameterBufferVP8` from `va_dec_vp8.h`.
#[repr(C)]
pub struct VAPictureParameterBufferVP8 {
    pub frame_width: u32,
    pub frame_height: u32,
    pub last_ref_frame: VASurfaceID,
    pub golden_ref_frame: VASurfaceID,
    pub alt_ref_frame: VASurfaceID,
    pub out_of_loop_frame: VASurfaceID,
    /// Packed: key_frame:1 (0 means key frame), version:3,
    /// segmentation_enabled:1, update_mb_segmentation_map:1,
    /// update_segment_feature_data:1, filter_type:1, sharpness_level:3,
    /// loop_filter_adj_enable:1, mode_ref_lf_delta_update:1,
    /// sign_bias_golden:1, sign_bias_alternate:1, mb_no_coeff_skip:1,
    /// loop_filter_disable:1.
    pub pic_fields: u32,
    pub mb_segment_tree_probs: [u8; 3],
    pub loop_filter_level: [u8; 4],
    pub loop_filter_deltas_ref_frame: [i8; 4],
    pub loop_filter_deltas_mode: [i8; 4],
    pub prob_skip_false: u8,
    pub prob_intra: u8,
    pub prob_last: u8,
    pub prob_gf: u8,
    pub y_mode_probs: [u8; 4],
    pub uv_mode_probs: [u8; 3],
    pub mv_probs: [[u8; 19]; 2],
    pub bool_coder_ctx: [u8; 3],
    pub va_reserved: [u32; 4],
}

#[repr(C)]
pub struct VASliceParameterBufferVP8 {
    pub slice_data_size: u32,
    pub slice_data_offset: u32,
    pub slice_data_flag: u32,
    pub macroblock_offset: u32,
    pub num_of_partitions: u8,
    pub partition_size: [u32; 9],
    pub va_reserved: [u32; 4],
}

fn picture_params(pic: &mut PictureContext, buf: &NvBuffer) {
    let Some(params) = buf.param::<VAPictureParameterBufferVP8>() else {
        return;
    };
    let key_frame = bit(params.pic_fields, 0) == 0;

    {
        let pp = &mut *pic.pic_params;
        pp.PicWidthInMbs = (params.frame_width as i32 + 15) / 16;
        pp.FrameHeightInMbs = (params.frame_height as i32 + 15) / 16;
        pp.intra_pic_flag = key_frame as i32;
        pp.ref_pic_flag = 1;
    }

    let vp8 = unsafe { &mut pic.pic_params.CodecSpecific.vp8 };
    vp8.width = params.frame_width as i32;
    vp8.height = params.frame_height as i32;
    vp8.LastRefIdx = pic.surfaces.picture_index(params.last_ref_frame).max(0) as u8;
    vp8.GoldenRefIdx = pic.surfaces.picture_index(params.golden_ref_frame).max(0) as u8;
    vp8.AltRefIdx = pic.surfaces.picture_index(params.alt_ref_frame).max(0) as u8;
    // frame_type:1 | version:3 | show_frame:1 | update_mb_segmentation_data:1
    let frame_type = !key_frame as u8;
    let version = bits(params.pic_fields, 1, 3) as u8;
    let update_seg = (bit(params.pic_fields, 4) != 0 && bit(params.pic_fields, 6) != 0) as u8;
    vp8.wFrameTagFlags = frame_type | (version << 1) | (1 << 4) | (update_seg << 5);
}

fn slice_params(pic: &mut PictureContext, buf: &NvBuffer) {
    for params in buf.elements::<VASliceParameterBufferVP8>() {
        // The first partition length plus the bool-decoder spill gives the
        // header size NVDEC wants up front.
        let vp8 = unsafe { &mut pic.pic_params.CodecSpecific.vp8 };
        vp8.first_partition_size =
            params.partition_size[0] + (params.macroblock_offset + 7) / 8;
        pic.pending_slices
            .push((params.slice_data_offset, params.slice_data_size));
    }
}

fn slice_data(pic: &mut PictureContext, buf: &NvBuffer) {
    // The whole frame (tag included) goes to the decoder in one piece,
    // starting at the client's original, possibly unaligned, offset.
    let data = buf.data();
    let base = buf.unalignment_offset();
    pic.pending_slices.clear();
    pic.push_slice(&data[base..]);
}

fn compute_cuda_codec(profile: VAProfile) -> Option<cudaVideoCodec> {
    match profile {
        VAProfile::VP8Version0_3 => Some(cudaVideoCodec::VP8),
        _ => None,
    }
}

fn handler(buffer_type: VABufferType) -> Option<HandlerFn> {
    match buffer_type {
        VABufferType::PictureParameter => Some(picture_params),
        VABufferType::SliceParameter => Some(slice_params),
        VABufferType::SliceData => Some(slice_data),
        // The probability table updates travel inside the bitstream for
        // NVDEC; nothing to translate.
        VABufferType::Probability => Some(|_, _| ()),
        VABufferType::IQMatrix => Some(|_, _| ()),
        _ => None,
    }
}

pub static CODEC: Codec = Codec {
    name: "vp8",
    supported_profiles: &[VAProfile::VP8Version0_3],
    compute_cuda_codec,
    handler,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::tests_support::TestPicture;

    #[test]
    fn test_key_frame_flags() {
        let mut picture = TestPicture::new(&CODEC);
        let mut params: VAPictureParameterBufferVP8 = unsafe { std::mem::zeroed() };
        params.frame_width = 640;
        params.frame_height = 480;
        params.last_ref_frame = crate::va::VA_INVALID_ID;
        params.golden_ref_frame = crate::va::VA_INVALID_ID;
        params.alt_ref_frame = crate::va::VA_INVALID_ID;
        // key_frame bit clear means key frame; version 2.
        params.pic_fields = 2 << 1;
        picture.submit(VABufferType::PictureParameter, &params);

        assert_eq!(picture.params().intra_pic_flag, 1);
        let vp8 = unsafe { &picture.params().CodecSpecific.vp8 };
        assert_eq!(vp8.wFrameTagFlags & 1, 0);
        assert_eq!((vp8.wFrameTagFlags >> 1) & 0x7, 2);
    }

    #[test]
    fn test_unaligned_slice_data_restores_offset() {
        let mut picture = TestPicture::new(&CODEC);
        let frame = [0x9du8, 0x01, 0x2a, 0x80, 0x02, 0xe0, 0x01];
        picture.submit_unaligned(VABufferType::SliceData, &frame, 3);
        assert_eq!(picture.bitstream(), &frame[..]);
        assert_eq!(picture.params().nNumSlices, 1);
    }
}
