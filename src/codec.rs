// Copyright 2024 The nvdec-vaapi-driver Authors
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! The codec dispatch table.
//!
//! Each codec module contributes one [`Codec`] descriptor: the VA profiles
//! it translates, the NVDEC codec id they map to, and a handler per VA
//! buffer type. `RenderPicture` walks the submitted buffers and feeds each
//! one to its handler, which fills the matching member of the
//! `CUVIDPICPARAMS` union or appends to the picture's scratch buffers.

use crate::bitstream::AppendableBuffer;
use crate::driver::NvBuffer;
use crate::sys::cuvid::cudaVideoCodec;
use crate::sys::cuvid::CUVIDPICPARAMS;
use crate::va::VABufferType;
use crate::va::VAProfile;
use crate::va::VASurfaceID;

pub mod av1;
pub mod h264;
pub mod hevc;
pub mod jpeg;
pub mod mpeg2;
pub mod mpeg4;
pub mod vc1;
pub mod vp8;
pub mod vp9;

/// Resolves a render-target surface id to its decoder picture index.
/// Implemented by the driver; reference frames are named by surface id in
/// the VA parameter buffers but by picture index in the vendor structs.
pub trait PictureIndexLookup {
    /// Picture index of the surface, or -1 when the id is unknown or the
    /// surface was never bound.
    fn picture_index(&self, surface: VASurfaceID) -> i32;
}

/// Everything a buffer handler may touch while assembling one picture.
pub struct PictureContext<'a> {
    pub pic_params: &'a mut CUVIDPICPARAMS,
    pub bitstream: &'a mut AppendableBuffer,
    pub slice_offsets: &'a mut AppendableBuffer,
    /// `(offset, size)` ranges announced by slice-parameter buffers, waiting
    /// for their slice-data buffer.
    pub pending_slices: &'a mut Vec<(u32, u32)>,
    pub surfaces: &'a dyn PictureIndexLookup,
    pub width: u32,
    pub height: u32,
    pub profile: VAProfile,
}

impl PictureContext<'_> {
    /// Appends one slice to the bitstream and records where it starts.
    pub fn push_slice(&mut self, data: &[u8]) {
        self.slice_offsets.append(&(self.bitstream.len() as u32).to_ne_bytes());
        self.bitstream.append(data);
        self.pic_params.nNumSlices += 1;
        self.pic_params.nBitstreamDataLen = self.bitstream.len() as u32;
    }
}

pub type HandlerFn = fn(&mut PictureContext, &NvBuffer);

/// One registered codec.
pub struct Codec {
    pub name: &'static str,
    pub supported_profiles: &'static [VAProfile],
    /// NVDEC codec id for a profile this codec translates, `None` otherwise.
    pub compute_cuda_codec: fn(VAProfile) -> Option<cudaVideoCodec>,
    /// Handler for a VA buffer type, `None` for types the codec ignores.
    pub handler: fn(VABufferType) -> Option<HandlerFn>,
}

/// All codecs this driver translates. Order matters only for profile
/// queries, which report codecs in this sequence.
pub const CODECS: &[&Codec] = &[
    &mpeg2::CODEC,
    &mpeg4::CODEC,
    &vc1::CODEC,
    &h264::CODEC,
    &jpeg::CODEC,
    &hevc::CODEC,
    &vp8::CODEC,
    &vp9::CODEC,
    &av1::CODEC,
];

/// First registered codec claiming the profile.
pub fn codec_for_profile(profile: VAProfile) -> Option<&'static Codec> {
    CODECS
        .iter()
        .copied()
        .find(|c| c.supported_profiles.contains(&profile))
}

/// NVDEC codec id for the profile, scanning every registered codec.
pub fn cuda_codec_for_profile(profile: VAProfile) -> Option<cudaVideoCodec> {
    CODECS.iter().find_map(|c| (c.compute_cuda_codec)(profile))
}

/// Bit `n` of a packed VA bitfield word.
pub(crate) fn bit(v: u32, n: u32) -> u32 {
    (v >> n) & 1
}

/// `len` bits of a packed VA bitfield word starting at `lo`.
pub(crate) fn bits(v: u32, lo: u32, len: u32) -> u32 {
    (v >> lo) & ((1 << len) - 1)
}

/// Shared slice-data handler: drains the ranges the slice-parameter
/// handler queued, or takes the whole buffer as one slice when none were.
pub(crate) fn append_slice_data(pic: &mut PictureContext, buf: &NvBuffer) {
    let data = buf.data();
    let base = buf.unalignment_offset();
    let pending = std::mem::take(pic.pending_slices);
    if pending.is_empty() {
        pic.push_slice(&data[base..]);
        return;
    }
    for (offset, size) in pending {
        let start = base + offset as usize;
        let end = (start + size as usize).min(data.len());
        if start >= end {
            log::warn!("slice range {offset}+{size} outside buffer of {} bytes", data.len());
            continue;
        }
        pic.push_slice(&data[start..end]);
    }
}

#[cfg(test)]
pub(crate) mod tests_support {
    use std::collections::HashMap;

    use super::*;
    use crate::sys::cuvid::CUVIDPICPARAMS;

    #[derive(Default)]
    struct MapLookup(HashMap<VASurfaceID, i32>);

    impl PictureIndexLookup for MapLookup {
        fn picture_index(&self, surface: VASurfaceID) -> i32 {
            self.0.get(&surface).copied().unwrap_or(-1)
        }
    }

    /// Drives one codec's handlers the way `RenderPicture` would, without a
    /// driver instance.
    pub(crate) struct TestPicture {
        codec: &'static Codec,
        pic_params: Box<CUVIDPICPARAMS>,
        bitstream: AppendableBuffer,
        slice_offsets: AppendableBuffer,
        pending_slices: Vec<(u32, u32)>,
        surfaces: MapLookup,
    }

    impl TestPicture {
        pub(crate) fn new(codec: &'static Codec) -> Self {
            Self {
                codec,
                pic_params: Box::default(),
                bitstream: AppendableBuffer::new(),
                slice_offsets: AppendableBuffer::new(),
                pending_slices: Vec::new(),
                surfaces: MapLookup::default(),
            }
        }

        /// Registers a surface id -> picture index mapping for reference
        /// resolution.
        pub(crate) fn bind_surface(&mut self, id: VASurfaceID, picture_idx: i32) {
            self.surfaces.0.insert(id, picture_idx);
        }

        pub(crate) fn submit<T>(&mut self, buffer_type: VABufferType, value: &T) {
            let bytes = unsafe {
                std::slice::from_raw_parts(
                    (value as *const T).cast::<u8>(),
                    std::mem::size_of::<T>(),
                )
            };
            self.submit_buffer(NvBuffer::new(buffer_type as i32, bytes, 1, 0));
        }

        pub(crate) fn submit_bytes(&mut self, buffer_type: VABufferType, data: &[u8]) {
            self.submit_buffer(NvBuffer::new(buffer_type as i32, data, 1, 0));
        }

        /// Submits slice data the way `CreateBuffer` stores it for an
        /// unaligned VP8 payload: `offset` junk bytes precede the data.
        pub(crate) fn submit_unaligned(
            &mut self,
            buffer_type: VABufferType,
            data: &[u8],
            offset: usize,
        ) {
            let mut padded = vec![0u8; offset];
            padded.extend_from_slice(data);
            self.submit_buffer(NvBuffer::new(buffer_type as i32, &padded, 1, offset));
        }

        fn submit_buffer(&mut self, buf: NvBuffer) {
            let buffer_type = buf.typed().expect("unknown buffer type in test");
            let handler = (self.codec.handler)(buffer_type)
                .unwrap_or_else(|| panic!("{} has no handler for {buffer_type:?}", self.codec.name));
            let mut pic = PictureContext {
                pic_params: &mut self.pic_params,
                bitstream: &mut self.bitstream,
                slice_offsets: &mut self.slice_offsets,
                pending_slices: &mut self.pending_slices,
                surfaces: &self.surfaces,
                width: 1920,
                height: 1080,
                profile: self.codec.supported_profiles[0],
            };
            handler(&mut pic, &buf);
        }

        pub(crate) fn params(&self) -> &CUVIDPICPARAMS {
            &self.pic_params
        }

        pub(crate) fn bitstream(&self) -> &[u8] {
            self.bitstream.as_slice()
        }

        pub(crate) fn slice_offsets(&self) -> Vec<u32> {
            self.slice_offsets
                .as_slice()
                .chunks_exact(4)
                .map(|c| u32::from_ne_bytes(c.try_into().unwrap()))
                .collect()
        }
    }

    pub(crate) fn run_picture<T>(
        codec: &'static Codec,
        buffer_type: VABufferType,
        value: &T,
    ) -> Box<CUVIDPICPARAMS> {
        let mut picture = TestPicture::new(codec);
        picture.submit(buffer_type, value);
        picture.pic_params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_profile_maps_to_its_codec() {
        for codec in CODECS {
            for profile in codec.supported_profiles {
                assert!(
                    (codec.compute_cuda_codec)(*profile).is_some(),
                    "{} does not map profile {:?}",
                    codec.name,
                    profile
                );
            }
        }
    }

    #[test]
    fn test_codec_selection_scans_in_registration_order() {
        assert_eq!(
            codec_for_profile(VAProfile::HEVCMain).unwrap().name,
            "hevc"
        );
        assert_eq!(
            codec_for_profile(VAProfile::MPEG2Main).unwrap().name,
            "mpeg2"
        );
        assert!(codec_for_profile(VAProfile::H263Baseline).is_none());
    }

    #[test]
    fn test_bitfield_helpers() {
        assert_eq!(bit(0b1010, 1), 1);
        assert_eq!(bit(0b1010, 2), 0);
        assert_eq!(bits(0xabcd, 4, 8), 0xbc);
    }
}
