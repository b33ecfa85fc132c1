// Copyright 2024 The nvdec-vaapi-driver Authors
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! NVDEC (CUVID) subset, matching `cuviddec.h`/`nvcuvid.h` from the Video
//! Codec SDK. Field names are kept as the SDK spells them so the codec
//! translation code reads against the NVIDIA documentation.

#![allow(non_camel_case_types, non_snake_case)]

use std::ffi::c_int;
use std::ffi::c_uint;
use std::ffi::c_ulong;
use std::ffi::c_void;
use std::sync::OnceLock;

use anyhow::anyhow;
use anyhow::Context as _;

use crate::sys::cuda::symbol;
use crate::sys::cuda::CUcontext;
use crate::sys::cuda::CUdeviceptr;
use crate::sys::cuda::CUresult;

pub type CUvideodecoder = *mut c_void;
pub type CUvideoctxlock = *mut c_void;

#[repr(i32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum cudaVideoCodec {
    MPEG1 = 0,
    MPEG2 = 1,
    MPEG4 = 2,
    VC1 = 3,
    H264 = 4,
    JPEG = 5,
    H264_SVC = 6,
    H264_MVC = 7,
    HEVC = 8,
    VP8 = 9,
    VP9 = 10,
    AV1 = 11,
}

#[repr(i32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum cudaVideoChromaFormat {
    Monochrome = 0,
    YUV420 = 1,
    YUV422 = 2,
    YUV444 = 3,
}

#[repr(i32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum cudaVideoSurfaceFormat {
    NV12 = 0,
    P016 = 1,
    YUV444 = 2,
    YUV444_16Bit = 3,
}

#[repr(i32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum cudaVideoDeinterlaceMode {
    Weave = 0,
    Bob = 1,
    Adaptive = 2,
}

pub const cudaVideoCreate_PreferCUVID: c_ulong = 0x04;

#[repr(C)]
#[derive(Copy, Clone)]
pub struct CUVIDDECODECAPS {
    pub eCodecType: cudaVideoCodec,
    pub eChromaFormat: cudaVideoChromaFormat,
    pub nBitDepthMinus8: c_uint,
    pub reserved1: [c_uint; 3],
    pub bIsSupported: u8,
    pub nNumNVDECs: u8,
    pub nOutputFormatMask: u16,
    pub nMaxWidth: c_uint,
    pub nMaxHeight: c_uint,
    pub nMaxMBCount: c_uint,
    pub nMinWidth: u16,
    pub nMinHeight: u16,
    pub bIsHistogramSupported: u8,
    pub nCounterBitDepth: u8,
    pub nMaxHistogramBins: u16,
    pub reserved3: [c_uint; 10],
}

#[repr(C)]
#[derive(Copy, Clone, Default)]
pub struct CUVIDRECT {
    pub left: i16,
    pub top: i16,
    pub right: i16,
    pub bottom: i16,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct CUVIDDECODECREATEINFO {
    pub ulWidth: c_ulong,
    pub ulHeight: c_ulong,
    pub ulNumDecodeSurfaces: c_ulong,
    pub CodecType: cudaVideoCodec,
    pub ChromaFormat: cudaVideoChromaFormat,
    pub ulCreationFlags: c_ulong,
    pub bitDepthMinus8: c_ulong,
    pub ulIntraDecodeOnly: c_ulong,
    pub ulMaxWidth: c_ulong,
    pub ulMaxHeight: c_ulong,
    pub Reserved1: c_ulong,
    pub display_area: CUVIDRECT,
    pub OutputFormat: cudaVideoSurfaceFormat,
    pub DeinterlaceMode: cudaVideoDeinterlaceMode,
    pub ulTargetWidth: c_ulong,
    pub ulTargetHeight: c_ulong,
    pub ulNumOutputSurfaces: c_ulong,
    pub vidLock: CUvideoctxlock,
    pub target_rect: CUVIDRECT,
    pub enableHistogram: c_ulong,
    pub Reserved2: [c_ulong; 4],
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct CUVIDPROCPARAMS {
    pub progressive_frame: c_int,
    pub second_field: c_int,
    pub top_field_first: c_int,
    pub unpaired_field: c_int,
    pub reserved_flags: c_uint,
    pub reserved_zero: c_uint,
    pub raw_input_dptr: u64,
    pub raw_input_pitch: c_uint,
    pub raw_input_format: c_uint,
    pub raw_output_dptr: u64,
    pub raw_output_pitch: c_uint,
    pub Reserved1: c_uint,
    pub output_stream: *mut c_void,
    pub Reserved: [c_uint; 46],
    pub histogram_dptr: *mut u64,
    pub Reserved2: [*mut c_void; 1],
}

impl Default for CUVIDPROCPARAMS {
    fn default() -> Self {
        unsafe { std::mem::zeroed() }
    }
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct CUVIDMPEG2PICPARAMS {
    pub ForwardRefIdx: c_int,
    pub BackwardRefIdx: c_int,
    pub picture_coding_type: c_int,
    pub full_pel_forward_vector: c_int,
    pub full_pel_backward_vector: c_int,
    pub f_code: [[c_int; 2]; 2],
    pub intra_dc_precision: c_int,
    pub frame_pred_frame_dct: c_int,
    pub concealment_motion_vectors: c_int,
    pub q_scale_type: c_int,
    pub intra_vlc_format: c_int,
    pub alternate_scan: c_int,
    pub top_field_first: c_int,
    pub QuantMatrixIntra: [u8; 64],
    pub QuantMatrixInter: [u8; 64],
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct CUVIDMPEG4PICPARAMS {
    pub ForwardRefIdx: c_int,
    pub BackwardRefIdx: c_int,
    pub video_object_layer_width: c_int,
    pub video_object_layer_height: c_int,
    pub vop_time_increment_bitcount: c_int,
    pub top_field_first: c_int,
    pub resync_marker_disable: c_int,
    pub quant_type: c_int,
    pub quarter_sample: c_int,
    pub short_video_header: c_int,
    pub divx_flags: c_int,
    pub vop_coding_type: c_int,
    pub vop_coded: c_int,
    pub vop_rounding_type: c_int,
    pub alternate_vertical_scan_flag: c_int,
    pub interlaced: c_int,
    pub vop_fcode_forward: c_int,
    pub vop_fcode_backward: c_int,
    pub trd: [c_int; 2],
    pub trb: [c_int; 2],
    pub QuantMatrixIntra: [u8; 64],
    pub QuantMatrixInter: [u8; 64],
    pub gmc_enabled: c_int,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct CUVIDVC1PICPARAMS {
    pub ForwardRefIdx: c_int,
    pub BackwardRefIdx: c_int,
    pub FrameWidth: c_int,
    pub FrameHeight: c_int,
    pub intra_pic_flag: c_int,
    pub ref_pic_flag: c_int,
    pub progressive_fcm: c_int,
    pub profile: c_int,
    pub postprocflag: c_int,
    pub pulldown: c_int,
    pub interlace: c_int,
    pub tfcntrflag: c_int,
    pub finterpflag: c_int,
    pub psf: c_int,
    pub multires: c_int,
    pub syncmarker: c_int,
    pub rangered: c_int,
    pub maxbframes: c_int,
    pub panscan_flag: c_int,
    pub refdist_flag: c_int,
    pub extended_mv: c_int,
    pub dquant: c_int,
    pub vstransform: c_int,
    pub loopfilter: c_int,
    pub fastuvmc: c_int,
    pub overlap: c_int,
    pub quantizer: c_int,
    pub extended_dmv: c_int,
    pub range_mapy_flag: c_int,
    pub range_mapy: c_int,
    pub range_mapuv_flag: c_int,
    pub range_mapuv: c_int,
    pub rangeredfrm: c_int,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct CUVIDJPEGPICPARAMS {
    pub Reserved: c_int,
}

#[repr(C)]
#[derive(Copy, Clone, Default)]
pub struct CUVIDH264DPBENTRY {
    pub PicIdx: c_int,
    pub FrameIdx: c_int,
    pub is_long_term: c_int,
    pub not_existing: c_int,
    pub used_for_reference: c_int,
    pub FieldOrderCnt: [c_int; 2],
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct CUVIDH264PICPARAMS {
    pub log2_max_frame_num_minus4: c_int,
    pub pic_order_cnt_type: c_int,
    pub log2_max_pic_order_cnt_lsb_minus4: c_int,
    pub delta_pic_order_always_zero_flag: c_int,
    pub frame_mbs_only_flag: c_int,
    pub direct_8x8_inference_flag: c_int,
    pub num_ref_frames: c_int,
    pub residual_colour_transform_flag: u8,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
    pub qpprime_y_zero_transform_bypass_flag: u8,
    pub entropy_coding_mode_flag: c_int,
    pub pic_order_present_flag: c_int,
    pub num_ref_idx_l0_active_minus1: c_int,
    pub num_ref_idx_l1_active_minus1: c_int,
    pub weighted_pred_flag: c_int,
    pub weighted_bipred_idc: c_int,
    pub pic_init_qp_minus26: c_int,
    pub deblocking_filter_control_present_flag: c_int,
    pub redundant_pic_cnt_present_flag: c_int,
    pub transform_8x8_mode_flag: c_int,
    pub MbaffFrameFlag: c_int,
    pub constrained_intra_pred_flag: c_int,
    pub chroma_qp_index_offset: c_int,
    pub second_chroma_qp_index_offset: c_int,
    pub ref_pic_flag: c_int,
    pub frame_num: c_int,
    pub CurrFieldOrderCnt: [c_int; 2],
    pub dpb: [CUVIDH264DPBENTRY; 16],
    pub WeightScale4x4: [[u8; 16]; 6],
    pub WeightScale8x8: [[u8; 64]; 2],
    pub fmo_aso_enable: u8,
    pub num_slice_groups_minus1: u8,
    pub slice_group_map_type: u8,
    pub pic_init_qs_minus26: i8,
    pub slice_group_change_rate_minus1: c_uint,
    pub slice_group_map_addr: u64,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct CUVIDHEVCPICPARAMS {
    // sps
    pub pic_width_in_luma_samples: c_int,
    pub pic_height_in_luma_samples: c_int,
    pub log2_min_luma_coding_block_size_minus3: u8,
    pub log2_diff_max_min_luma_coding_block_size: u8,
    pub log2_min_transform_block_size_minus2: u8,
    pub log2_diff_max_min_transform_block_size: u8,
    pub pcm_enabled_flag: u8,
    pub log2_min_pcm_luma_coding_block_size_minus3: u8,
    pub log2_diff_max_min_pcm_luma_coding_block_size: u8,
    pub pcm_sample_bit_depth_luma_minus1: u8,
    pub pcm_sample_bit_depth_chroma_minus1: u8,
    pub pcm_loop_filter_disabled_flag: u8,
    pub strong_intra_smoothing_enabled_flag: u8,
    pub max_transform_hierarchy_depth_intra: u8,
    pub max_transform_hierarchy_depth_inter: u8,
    pub amp_enabled_flag: u8,
    pub separate_colour_plane_flag: u8,
    pub log2_max_pic_order_cnt_lsb_minus4: u8,
    pub num_short_term_ref_pic_sets: u8,
    pub long_term_ref_pics_present_flag: u8,
    pub num_long_term_ref_pics_sps: u8,
    pub sps_temporal_mvp_enabled_flag: u8,
    pub sample_adaptive_offset_enabled_flag: u8,
    pub scaling_list_enable_flag: u8,
    pub IrapPicFlag: u8,
    pub IdrPicFlag: u8,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
    pub log2_max_transform_skip_block_size_minus2: u8,
    pub log2_sao_offset_scale_luma: u8,
    pub log2_sao_offset_scale_chroma: u8,
    pub high_precision_offsets_enabled_flag: u8,
    pub reserved1: [u8; 10],
    // pps
    pub dependent_slice_segments_enabled_flag: u8,
    pub slice_segment_header_extension_present_flag: u8,
    pub sign_data_hiding_enabled_flag: u8,
    pub cu_qp_delta_enabled_flag: u8,
    pub diff_cu_qp_delta_depth: u8,
    pub init_qp_minus26: i8,
    pub pps_cb_qp_offset: i8,
    pub pps_cr_qp_offset: i8,
    pub constrained_intra_pred_flag: u8,
    pub weighted_pred_flag: u8,
    pub weighted_bipred_flag: u8,
    pub transform_skip_enabled_flag: u8,
    pub transquant_bypass_enabled_flag: u8,
    pub entropy_coding_sync_enabled_flag: u8,
    pub log2_parallel_merge_level_minus2: u8,
    pub num_extra_slice_header_bits: u8,
    pub loop_filter_across_tiles_enabled_flag: u8,
    pub loop_filter_across_slices_enabled_flag: u8,
    pub output_flag_present_flag: u8,
    pub num_ref_idx_l0_default_active_minus1: u8,
    pub num_ref_idx_l1_default_active_minus1: u8,
    pub lists_modification_present_flag: u8,
    pub cabac_init_present_flag: u8,
    pub pps_slice_chroma_qp_offsets_present_flag: u8,
    pub deblocking_filter_override_enabled_flag: u8,
    pub pps_deblocking_filter_disabled_flag: u8,
    pub pps_beta_offset_div2: i8,
    pub pps_tc_offset_div2: i8,
    pub tiles_enabled_flag: u8,
    pub uniform_spacing_flag: u8,
    pub num_tile_columns_minus1: u8,
    pub num_tile_rows_minus1: u8,
    pub column_width_minus1: [u16; 21],
    pub row_height_minus1: [u16; 21],
    // pps range extension
    pub cross_component_prediction_enabled_flag: u8,
    pub chroma_qp_offset_list_enabled_flag: u8,
    pub diff_cu_chroma_qp_offset_depth: u8,
    pub chroma_qp_offset_list_len_minus1: u8,
    pub cb_qp_offset_list: [i8; 6],
    pub cr_qp_offset_list: [i8; 6],
    pub reserved2: [u8; 2],
    pub reserved3: [c_uint; 8],
    // reference picture set
    pub NumBitsForShortTermRPSInSlice: c_int,
    pub NumDeltaPocsOfRefRpsIdx: c_int,
    pub NumPocTotalCurr: c_int,
    pub NumPocStCurrBefore: c_int,
    pub NumPocStCurrAfter: c_int,
    pub NumPocLtCurr: c_int,
    pub CurrPicOrderCntVal: c_int,
    pub RefPicIdx: [c_int; 16],
    pub PicOrderCntVal: [c_int; 16],
    pub IsLongTerm: [u8; 16],
    pub RefPicSetStCurrBefore: [u8; 8],
    pub RefPicSetStCurrAfter: [u8; 8],
    pub RefPicSetLtCurr: [u8; 8],
    pub RefPicSetInterLayer0: [u8; 8],
    pub RefPicSetInterLayer1: [u8; 8],
    pub reserved4: [c_uint; 12],
    // scaling lists (raster order)
    pub ScalingList4x4: [[u8; 16]; 6],
    pub ScalingList8x8: [[u8; 64]; 6],
    pub ScalingList16x16: [[u8; 64]; 6],
    pub ScalingList32x32: [[u8; 64]; 2],
    pub ScalingListDCCoeff16x16: [u8; 6],
    pub ScalingListDCCoeff32x32: [u8; 2],
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct CUVIDVP8PICPARAMS {
    pub width: c_int,
    pub height: c_int,
    pub first_partition_size: c_uint,
    pub LastRefIdx: u8,
    pub GoldenRefIdx: u8,
    pub AltRefIdx: u8,
    /// Packed frame tag: bit 0 `frame_type`, bits 1..3 `version`, bit 4
    /// `show_frame`, bit 5 `update_mb_segmentation_data`.
    pub wFrameTagFlags: u8,
    pub Reserved1: [u8; 4],
    pub Reserved2: [c_uint; 3],
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct CUVIDVP9PICPARAMS {
    pub width: c_uint,
    pub height: c_uint,
    pub LastRefIdx: u8,
    pub GoldenRefIdx: u8,
    pub AltRefIdx: u8,
    pub colorSpace: u8,
    /// Packed: profile:3, frameContextIdx:2, frameType:1, showFrame:1,
    /// errorResilient:1, frameParallelDecoding:1, subSamplingX:1,
    /// subSamplingY:1, intraOnly:1, allow_high_precision_mv:1,
    /// refreshEntropyProbs:1.
    pub frameFlags: u16,
    pub reserved16Bits: u16,
    pub refFrameSignBias: [u8; 4],
    pub loopFilterLevel: u8,
    pub loopFilterSharpness: u8,
    pub modeRefLfEnabled: u8,
    pub log2_tile_columns: u8,
    pub log2_tile_rows: u8,
    /// Packed: segmentEnabled:1, segmentMapUpdate:1,
    /// segmentMapTemporalUpdate:1, segmentFeatureMode:1.
    pub segmentFlags: u8,
    pub mb_segment_tree_probs: [u8; 7],
    pub segment_pred_probs: [u8; 3],
    pub reservedSegment16Bits: [u8; 2],
    pub segmentFeatureData: [[i16; 4]; 8],
    pub segmentFeatureEnable: [[u8; 4]; 8],
    pub qpYAc: c_int,
    pub qpYDc: c_int,
    pub qpChDc: c_int,
    pub qpChAc: c_int,
    pub activeRefIdx: [c_uint; 3],
    pub resetFrameContext: c_uint,
    pub mcomp_filter_type: c_uint,
    pub mbRefLfDelta: [c_uint; 4],
    pub mbModeLfDelta: [c_uint; 2],
    pub frameTagSize: c_uint,
    pub offsetToDctParts: c_uint,
    pub reserved128Bits: [c_uint; 4],
}

#[repr(C)]
#[derive(Copy, Clone, Default)]
pub struct CUVIDAV1GLOBALMOTION {
    pub invalid: u8,
    pub wmtype: u8,
    pub reserved: [u8; 2],
    pub wmmat: [c_int; 6],
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct CUVIDAV1PICPARAMS {
    pub width: c_uint,
    pub height: c_uint,
    pub frame_offset: c_uint,
    pub decodePicIdx: c_int,
    // sequence header
    pub profile: c_uint,
    pub use_128x128_superblock: c_uint,
    pub subsampling_x: c_uint,
    pub subsampling_y: c_uint,
    pub mono_chrome: c_uint,
    pub bit_depth_minus8: c_uint,
    pub enable_filter_intra: c_uint,
    pub enable_intra_edge_filter: c_uint,
    pub enable_interintra_compound: c_uint,
    pub enable_masked_compound: c_uint,
    pub enable_dual_filter: c_uint,
    pub enable_order_hint: c_uint,
    pub order_hint_bits_minus1: c_uint,
    pub enable_jnt_comp: c_uint,
    pub enable_superres: c_uint,
    pub enable_cdef: c_uint,
    pub enable_restoration: c_uint,
    pub enable_fgs: c_uint,
    pub reserved0_7bits: c_uint,
    // frame header
    pub frame_type: c_uint,
    pub show_frame: c_uint,
    pub disable_cdf_update: c_uint,
    pub allow_screen_content_tools: c_uint,
    pub force_integer_mv: c_uint,
    pub coded_denom: c_uint,
    pub allow_intrabc: c_uint,
    pub allow_high_precision_mv: c_uint,
    pub interp_filter: c_uint,
    pub switchable_motion_mode: c_uint,
    pub use_ref_frame_mvs: c_uint,
    pub disable_frame_end_update_cdf: c_uint,
    pub delta_q_present: c_uint,
    pub delta_q_res: c_uint,
    pub using_qmatrix: c_uint,
    pub coded_lossless: c_uint,
    pub use_superres: c_uint,
    pub tx_mode: c_uint,
    pub reference_mode: c_uint,
    pub allow_warped_motion: c_uint,
    pub reduced_tx_set: c_uint,
    pub skip_mode: c_uint,
    pub reserved1_3bits: c_uint,
    // tiling
    pub num_tile_cols: c_uint,
    pub num_tile_rows: c_uint,
    pub context_update_tile_id: c_uint,
    pub tile_widths: [u16; 64],
    pub tile_heights: [u16; 64],
    // cdef
    pub cdef_damping_minus_3: c_uint,
    pub cdef_bits: c_uint,
    pub cdef_y_strength: [u8; 8],
    pub cdef_uv_strength: [u8; 8],
    // skip mode
    pub SkipModeFrame0: c_uint,
    pub SkipModeFrame1: c_uint,
    // quantization
    pub base_qindex: c_uint,
    pub qp_y_dc_delta_q: c_int,
    pub qp_u_dc_delta_q: c_int,
    pub qp_v_dc_delta_q: c_int,
    pub qp_u_ac_delta_q: c_int,
    pub qp_v_ac_delta_q: c_int,
    pub qm_y: c_uint,
    pub qm_u: c_uint,
    pub qm_v: c_uint,
    // segmentation
    pub segmentation_enabled: c_uint,
    pub segmentation_update_map: c_uint,
    pub segmentation_update_data: c_uint,
    pub segmentation_temporal_update: c_uint,
    pub segmentation_feature_data: [[i16; 8]; 8],
    pub segmentation_feature_mask: [u8; 8],
    // loop filter
    pub loop_filter_level: [c_uint; 2],
    pub loop_filter_level_u: c_uint,
    pub loop_filter_level_v: c_uint,
    pub loop_filter_sharpness: c_uint,
    pub loop_filter_delta_enabled: c_uint,
    pub loop_filter_delta_update: c_uint,
    pub loop_filter_ref_deltas: [i8; 8],
    pub loop_filter_mode_deltas: [i8; 2],
    pub delta_lf_present: c_uint,
    pub delta_lf_res: c_uint,
    pub delta_lf_multi: c_uint,
    // restoration
    pub lr_unit_size: [c_uint; 3],
    pub lr_type: [u8; 3],
    pub reserved2: u8,
    // references
    pub temporal_layer_id: c_uint,
    pub spatial_layer_id: c_uint,
    pub ref_frame_map: [u8; 8],
    pub primary_ref_frame: c_int,
    pub ref_frame: [CUVIDAV1REFFRAME; 7],
    pub global_motion: [CUVIDAV1GLOBALMOTION; 7],
    // film grain
    pub apply_grain: c_uint,
    pub reserved3: [c_uint; 15],
}

#[repr(C)]
#[derive(Copy, Clone, Default)]
pub struct CUVIDAV1REFFRAME {
    pub index: u8,
    pub reserved: [u8; 3],
    pub width: c_uint,
    pub height: c_uint,
}

/// The per-codec member of [`CUVIDPICPARAMS`].
#[repr(C)]
#[derive(Copy, Clone)]
pub union CUVIDCodecSpecific {
    pub mpeg2: CUVIDMPEG2PICPARAMS,
    pub mpeg4: CUVIDMPEG4PICPARAMS,
    pub vc1: CUVIDVC1PICPARAMS,
    pub h264: CUVIDH264PICPARAMS,
    pub jpeg: CUVIDJPEGPICPARAMS,
    pub hevc: CUVIDHEVCPICPARAMS,
    pub vp8: CUVIDVP8PICPARAMS,
    pub vp9: CUVIDVP9PICPARAMS,
    pub av1: CUVIDAV1PICPARAMS,
    pub CodecReserved: [c_uint; 1024],
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct CUVIDPICPARAMS {
    pub PicWidthInMbs: c_int,
    pub FrameHeightInMbs: c_int,
    pub CurrPicIdx: c_int,
    pub field_pic_flag: c_int,
    pub bottom_field_flag: c_int,
    pub second_field: c_int,
    pub nBitstreamDataLen: c_uint,
    pub pBitstreamData: *const u8,
    pub nNumSlices: c_uint,
    pub pSliceDataOffsets: *const c_uint,
    pub ref_pic_flag: c_int,
    pub intra_pic_flag: c_int,
    pub Reserved: [c_uint; 30],
    pub CodecSpecific: CUVIDCodecSpecific,
}

impl CUVIDPICPARAMS {
    /// Clears the scratch struct between pictures. An all-zero struct is the
    /// baseline every handler fills from.
    pub fn clear(&mut self) {
        *self = unsafe { std::mem::zeroed() };
    }
}

impl Default for CUVIDPICPARAMS {
    fn default() -> Self {
        unsafe { std::mem::zeroed() }
    }
}

/// The NVDEC entry points this driver calls.
pub struct CuvidApi {
    _lib: libloading::Library,

    pub cuvidGetDecoderCaps: unsafe extern "C" fn(*mut CUVIDDECODECAPS) -> CUresult,
    pub cuvidCreateDecoder:
        unsafe extern "C" fn(*mut CUvideodecoder, *mut CUVIDDECODECREATEINFO) -> CUresult,
    pub cuvidDestroyDecoder: unsafe extern "C" fn(CUvideodecoder) -> CUresult,
    pub cuvidDecodePicture: unsafe extern "C" fn(CUvideodecoder, *mut CUVIDPICPARAMS) -> CUresult,
    pub cuvidMapVideoFrame: unsafe extern "C" fn(
        CUvideodecoder,
        c_int,
        *mut CUdeviceptr,
        *mut c_uint,
        *mut CUVIDPROCPARAMS,
    ) -> CUresult,
    pub cuvidUnmapVideoFrame: unsafe extern "C" fn(CUvideodecoder, CUdeviceptr) -> CUresult,
    pub cuvidCtxLockCreate: unsafe extern "C" fn(*mut CUvideoctxlock, CUcontext) -> CUresult,
    pub cuvidCtxLockDestroy: unsafe extern "C" fn(CUvideoctxlock) -> CUresult,
}

unsafe impl Send for CuvidApi {}
unsafe impl Sync for CuvidApi {}

impl CuvidApi {
    fn open() -> anyhow::Result<Self> {
        unsafe {
            let lib = libloading::Library::new("libnvcuvid.so.1")
                .map_err(|e| anyhow!("failed to load libnvcuvid.so.1: {e}"))?;
            Ok(Self {
                cuvidGetDecoderCaps: symbol!(lib, "cuvidGetDecoderCaps"),
                cuvidCreateDecoder: symbol!(lib, "cuvidCreateDecoder"),
                cuvidDestroyDecoder: symbol!(lib, "cuvidDestroyDecoder"),
                cuvidDecodePicture: symbol!(lib, "cuvidDecodePicture"),
                cuvidMapVideoFrame: symbol!(lib, "cuvidMapVideoFrame64", "cuvidMapVideoFrame"),
                cuvidUnmapVideoFrame: symbol!(
                    lib,
                    "cuvidUnmapVideoFrame64",
                    "cuvidUnmapVideoFrame"
                ),
                cuvidCtxLockCreate: symbol!(lib, "cuvidCtxLockCreate"),
                cuvidCtxLockDestroy: symbol!(lib, "cuvidCtxLockDestroy"),
                _lib: lib,
            })
        }
    }

    /// Process-wide function table, loaded on first use.
    pub fn get() -> anyhow::Result<&'static Self> {
        static API: OnceLock<Option<CuvidApi>> = OnceLock::new();
        API.get_or_init(|| match Self::open() {
            Ok(api) => Some(api),
            Err(e) => {
                log::error!("failed to load NVDEC functions: {e:#}");
                None
            }
        })
        .as_ref()
        .ok_or_else(|| anyhow!("NVDEC library is not available"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pic_params_clear() {
        let mut params = CUVIDPICPARAMS::default();
        params.CurrPicIdx = 7;
        params.nNumSlices = 3;
        params.clear();
        assert_eq!(params.CurrPicIdx, 0);
        assert_eq!(params.nNumSlices, 0);
        assert!(params.pBitstreamData.is_null());
    }

    #[test]
    fn test_codec_specific_fits_reserved_blob() {
        // The union must never outgrow the blob the SDK sizes it with.
        assert!(std::mem::size_of::<CUVIDCodecSpecific>() <= 4096 + 8);
    }
}
