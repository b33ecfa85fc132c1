// Copyright 2024 The nvdec-vaapi-driver Authors
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! Experimental NVENC side-branch.
//!
//! Only the availability probe and the session-configuration shape exist.
//! Submitting frames is not wired up: the encode path has no way to hand a
//! VA surface's device memory to NVENC yet, and reporting unsupported beats
//! encoding garbage from a null pointer.

use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

use anyhow::anyhow;

use crate::sys::cuda;
use crate::sys::cuda::CudaApi;

/// Whether the machine has an NVENC-capable stack: the encode library must
/// load and a CUDA device must exist.
pub fn is_available() -> bool {
    if unsafe { libloading::Library::new("libnvidia-encode.so.1") }.is_err() {
        return false;
    }
    let Ok(api) = CudaApi::get() else {
        return false;
    };
    if unsafe { (api.cuInit)(0) } != cuda::CUDA_SUCCESS {
        return false;
    }
    let mut count = 0;
    (unsafe { (api.cuDeviceGetCount)(&mut count) } == cuda::CUDA_SUCCESS) && count > 0
}

/// H.264 session shape mirroring the decode-side configuration objects:
/// dimensions plus VBR rate control around the requested bitrate.
#[derive(Clone, Debug)]
pub struct EncodeSessionConfig {
    pub width: u32,
    pub height: u32,
    pub framerate: (u32, u32),
    pub average_bitrate: u32,
    pub max_bitrate: u32,
}

impl EncodeSessionConfig {
    pub fn new(width: u32, height: u32, bitrate: u32) -> Self {
        Self {
            width,
            height,
            framerate: (30, 1),
            average_bitrate: bitrate,
            max_bitrate: bitrate + bitrate / 5,
        }
    }
}

pub struct EncodeSession {
    pub config: EncodeSessionConfig,
    frames_submitted: AtomicU32,
}

impl EncodeSession {
    pub fn open(config: EncodeSessionConfig) -> anyhow::Result<Self> {
        if !is_available() {
            return Err(anyhow!("NVENC is not available on this system"));
        }
        log::info!(
            "Opening NVENC session shape {}x{} @ {} bps",
            config.width,
            config.height,
            config.average_bitrate
        );
        Ok(Self { config, frames_submitted: AtomicU32::new(0) })
    }

    /// Frame submission is not implemented; see the module documentation.
    pub fn encode_frame(&self, _surface_id: crate::va::VASurfaceID) -> anyhow::Result<()> {
        self.frames_submitted.fetch_add(1, Ordering::Relaxed);
        Err(anyhow!("NVENC frame submission is not supported"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_config_rate_control_shape() {
        let config = EncodeSessionConfig::new(1920, 1080, 5_000_000);
        assert_eq!(config.max_bitrate, 6_000_000);
        assert_eq!(config.framerate, (30, 1));
    }
}
