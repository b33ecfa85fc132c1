// Copyright 2024 The nvdec-vaapi-driver Authors
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! The seam between the driver core and the vendor decoder.
//!
//! The decode pipeline only ever talks to [`VideoDevice`] and
//! [`VideoDecoder`]; the CUVID-backed implementation lives in
//! [`cuvid`](self::cuvid) and a dummy lives behind `cfg(test)` so the
//! pipeline can be driven without a GPU.

use crate::sys::cuda::CUdeviceptr;
use crate::sys::cuvid::cudaVideoChromaFormat;
use crate::sys::cuvid::cudaVideoCodec;
use crate::sys::cuvid::CUVIDDECODECREATEINFO;
use crate::sys::cuvid::CUVIDPICPARAMS;
use crate::sys::cuvid::CUVIDPROCPARAMS;

pub mod cuvid;
#[cfg(test)]
pub(crate) mod dummy;

/// What the device reports for one (codec, chroma, bit depth) triple.
#[derive(Copy, Clone, Debug, Default)]
pub struct DecoderCaps {
    pub supported: bool,
    pub min_width: u32,
    pub min_height: u32,
    pub max_width: u32,
    pub max_height: u32,
}

/// One decoded picture mapped out of the decoder's pool.
#[derive(Copy, Clone, Debug)]
pub struct MappedFrame {
    pub device_ptr: CUdeviceptr,
    pub pitch: u32,
}

/// A decode session created from a [`VideoDevice`].
///
/// Implementations are called from both the client thread (`decode_picture`)
/// and the context's resolve thread (`map`/`unmap`); the vendor serializes
/// internally through the context lock established at creation.
pub trait VideoDecoder: Send + Sync {
    fn decode_picture(&self, params: &mut CUVIDPICPARAMS) -> anyhow::Result<()>;

    fn map_video_frame(
        &self,
        picture_idx: i32,
        proc_params: &mut CUVIDPROCPARAMS,
    ) -> anyhow::Result<MappedFrame>;

    fn unmap_video_frame(&self, frame: CUdeviceptr) -> anyhow::Result<()>;

    /// Tears the session down, reporting the vendor's verdict. Called once
    /// from context destruction; dropping afterwards is a no-op.
    fn destroy(&self) -> anyhow::Result<()>;
}

/// A GPU able to decode, addressed through a thread-current device context.
pub trait VideoDevice: Send + Sync {
    /// Makes the device context current on the calling thread. Prefer
    /// [`enter`](dyn VideoDevice::enter), which pops on scope exit.
    fn push_context(&self) -> anyhow::Result<()>;

    fn pop_context(&self);

    fn decoder_caps(
        &self,
        codec: cudaVideoCodec,
        chroma: cudaVideoChromaFormat,
        bit_depth: u32,
    ) -> anyhow::Result<DecoderCaps>;

    fn create_decoder(
        &self,
        info: &mut CUVIDDECODECREATEINFO,
    ) -> anyhow::Result<Box<dyn VideoDecoder>>;

    /// Device-to-host copy of one tightly packed plane, used by `GetImage`.
    fn copy_plane_to_host(
        &self,
        src: CUdeviceptr,
        src_pitch: usize,
        dst: &mut [u8],
        row_bytes: usize,
        rows: usize,
    ) -> anyhow::Result<()>;
}

impl dyn VideoDevice + '_ {
    /// Pushes the device context and returns a guard that pops it again on
    /// every exit path.
    pub fn enter(&self) -> anyhow::Result<CurrentDeviceContext<'_>> {
        self.push_context()?;
        Ok(CurrentDeviceContext(self))
    }
}

pub struct CurrentDeviceContext<'a>(&'a dyn VideoDevice);

impl Drop for CurrentDeviceContext<'_> {
    fn drop(&mut self) {
        self.0.pop_context();
    }
}
