// Copyright 2024 The nvdec-vaapi-driver Authors
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! A dummy device whose only purpose is to let the decode pipeline run so it
//! can be tested in isolation.

use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

use anyhow::anyhow;

use crate::device::DecoderCaps;
use crate::device::MappedFrame;
use crate::device::VideoDecoder;
use crate::device::VideoDevice;
use crate::sys::cuda::CUdeviceptr;
use crate::sys::cuvid::cudaVideoChromaFormat;
use crate::sys::cuvid::cudaVideoCodec;
use crate::sys::cuvid::CUVIDDECODECREATEINFO;
use crate::sys::cuvid::CUVIDPICPARAMS;
use crate::sys::cuvid::CUVIDPROCPARAMS;

#[derive(Default)]
pub struct DummyDevice {
    /// Triples reported as unsupported by `decoder_caps`.
    pub unsupported: HashSet<(cudaVideoCodec, cudaVideoChromaFormat, u32)>,
    /// When set, every `decode_picture` on decoders of this device fails.
    pub fail_decode: Arc<AtomicBool>,
    /// Picture indices in the order the resolve thread mapped them.
    pub map_order: Arc<Mutex<Vec<i32>>>,
}

impl DummyDevice {
    pub fn new() -> Self {
        Default::default()
    }
}

impl VideoDevice for DummyDevice {
    fn push_context(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn pop_context(&self) {}

    fn decoder_caps(
        &self,
        codec: cudaVideoCodec,
        chroma: cudaVideoChromaFormat,
        bit_depth: u32,
    ) -> anyhow::Result<DecoderCaps> {
        let supported = !self.unsupported.contains(&(codec, chroma, bit_depth));
        Ok(DecoderCaps {
            supported,
            min_width: 48,
            min_height: 16,
            max_width: 8192,
            max_height: 8192,
        })
    }

    fn create_decoder(
        &self,
        info: &mut CUVIDDECODECREATEINFO,
    ) -> anyhow::Result<Box<dyn VideoDecoder>> {
        Ok(Box::new(DummyDecoder {
            num_decode_surfaces: info.ulNumDecodeSurfaces as i32,
            fail_decode: Arc::clone(&self.fail_decode),
            map_order: Arc::clone(&self.map_order),
        }))
    }

    fn copy_plane_to_host(
        &self,
        _src: CUdeviceptr,
        _src_pitch: usize,
        dst: &mut [u8],
        _row_bytes: usize,
        _rows: usize,
    ) -> anyhow::Result<()> {
        dst.fill(0);
        Ok(())
    }
}

pub struct DummyDecoder {
    num_decode_surfaces: i32,
    fail_decode: Arc<AtomicBool>,
    map_order: Arc<Mutex<Vec<i32>>>,
}

impl VideoDecoder for DummyDecoder {
    fn decode_picture(&self, params: &mut CUVIDPICPARAMS) -> anyhow::Result<()> {
        if self.fail_decode.load(Ordering::SeqCst) {
            return Err(anyhow!("injected decode failure"));
        }
        if params.CurrPicIdx < 0 || params.CurrPicIdx >= self.num_decode_surfaces {
            return Err(anyhow!("picture index {} out of range", params.CurrPicIdx));
        }
        Ok(())
    }

    fn map_video_frame(
        &self,
        picture_idx: i32,
        _proc_params: &mut CUVIDPROCPARAMS,
    ) -> anyhow::Result<MappedFrame> {
        self.map_order.lock().unwrap().push(picture_idx);
        Ok(MappedFrame { device_ptr: 0x1000 + picture_idx as u64 * 0x100, pitch: 256 })
    }

    fn unmap_video_frame(&self, _frame: CUdeviceptr) -> anyhow::Result<()> {
        Ok(())
    }

    fn destroy(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
