// Copyright 2024 The nvdec-vaapi-driver Authors
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! Raw bindings to the NVIDIA driver libraries.
//!
//! Nothing links at build time: `libcuda.so.1` and `libnvcuvid.so.1` are
//! opened with `libloading` the first time a driver instance initializes and
//! the resolved symbols are kept in process-wide function tables for the
//! lifetime of the process.

pub mod cuda;
pub mod cuvid;
