// Copyright 2024 The nvdec-vaapi-driver Authors
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! The VA-API dispatch shim: `__vaDriverInit_1_0`, the vtable libva reads,
//! and the `unsafe extern "C"` wrappers that translate between the ABI and
//! the typed driver core.

use std::ffi::c_char;
use std::ffi::c_int;
use std::ffi::c_uint;
use std::ffi::c_void;
use std::os::fd::RawFd;
use std::sync::Arc;

use crate::backend::SurfaceExporter;
use crate::device::cuvid::CudaDevice;
use crate::device::VideoDevice;
use crate::driver::BackendKind;
use crate::driver::DriverError;
use crate::driver::DriverOptions;
use crate::driver::DriverResult;
use crate::driver::InstanceLimiter;
use crate::driver::NvDriver;
use crate::logging;
use crate::va::*;

/// Recovers the driver instance stashed in the libva context.
fn driver<'a>(ctx: VADriverContextP) -> Option<&'a NvDriver> {
    if ctx.is_null() {
        return None;
    }
    unsafe { ((*ctx).pDriverData as *const NvDriver).as_ref() }
}

fn status_only(result: DriverResult<()>) -> VAStatus {
    match result {
        Ok(()) => VA_STATUS_SUCCESS,
        Err(e) => e.status(),
    }
}

mod drm {
    use super::*;

    /// `struct drm_version` from `drm.h`, used with the two-call idiom to
    /// fetch the driver name.
    #[repr(C)]
    pub struct DrmVersion {
        pub version_major: c_int,
        pub version_minor: c_int,
        pub version_patchlevel: c_int,
        pub name_len: usize,
        pub name: *mut c_char,
        pub date_len: usize,
        pub date: *mut c_char,
        pub desc_len: usize,
        pub desc: *mut c_char,
    }

    nix::ioctl_readwrite!(drm_get_version, b'd', 0x00, DrmVersion);

    /// Whether the fd belongs to the `nvidia-drm` kernel driver.
    pub fn is_nvidia_drm_fd(fd: RawFd) -> bool {
        let mut version: DrmVersion = unsafe { std::mem::zeroed() };
        if unsafe { drm_get_version(fd, &mut version) }.is_err() {
            return false;
        }
        let mut name = vec![0u8; version.name_len + 1];
        version.name = name.as_mut_ptr().cast();
        version.date_len = 0;
        version.desc_len = 0;
        if unsafe { drm_get_version(fd, &mut version) }.is_err() {
            return false;
        }
        &name[..version.name_len] == b"nvidia-drm"
    }

    /// nvidia-drm only produces usable DMA-BUFs with modesetting on.
    pub fn modeset_enabled() -> bool {
        std::fs::read_to_string("/sys/module/nvidia_drm/parameters/modeset")
            .map(|v| v.trim() == "Y")
            .unwrap_or(false)
    }
}

unsafe extern "C" fn nv_terminate(ctx: VADriverContextP) -> VAStatus {
    let Some(ctx) = ctx.as_mut() else {
        return VA_STATUS_ERROR_INVALID_DISPLAY;
    };
    if ctx.pDriverData.is_null() {
        return VA_STATUS_ERROR_INVALID_DISPLAY;
    }
    log::debug!("Terminating {:p}", ctx);
    let drv = Box::from_raw(ctx.pDriverData as *mut NvDriver);
    ctx.pDriverData = std::ptr::null_mut();
    drv.terminate();
    VA_STATUS_SUCCESS
}

unsafe extern "C" fn nv_query_config_profiles(
    ctx: VADriverContextP,
    profile_list: *mut i32,
    num_profiles: *mut c_int,
) -> VAStatus {
    let Some(drv) = driver(ctx) else {
        return VA_STATUS_ERROR_INVALID_DISPLAY;
    };
    if profile_list.is_null() || num_profiles.is_null() {
        return VA_STATUS_ERROR_INVALID_PARAMETER;
    }
    match drv.query_config_profiles() {
        Ok(profiles) => {
            let out = std::slice::from_raw_parts_mut(profile_list, MAX_PROFILES);
            let count = profiles.len().min(MAX_PROFILES);
            for (slot, profile) in out.iter_mut().zip(profiles.iter().take(count)) {
                *slot = *profile as i32;
            }
            *num_profiles = count as c_int;
            VA_STATUS_SUCCESS
        }
        Err(e) => e.status(),
    }
}

unsafe extern "C" fn nv_query_config_entrypoints(
    _ctx: VADriverContextP,
    _profile: i32,
    entrypoint_list: *mut i32,
    num_entrypoints: *mut c_int,
) -> VAStatus {
    if entrypoint_list.is_null() || num_entrypoints.is_null() {
        return VA_STATUS_ERROR_INVALID_PARAMETER;
    }
    *entrypoint_list = VAEntrypoint::VLD as i32;
    *num_entrypoints = 1;
    VA_STATUS_SUCCESS
}

unsafe extern "C" fn nv_get_config_attributes(
    ctx: VADriverContextP,
    profile: i32,
    entrypoint: i32,
    attrib_list: *mut VAConfigAttrib,
    num_attribs: c_int,
) -> VAStatus {
    let Some(drv) = driver(ctx) else {
        return VA_STATUS_ERROR_INVALID_DISPLAY;
    };
    let attribs = if attrib_list.is_null() {
        &mut [][..]
    } else {
        std::slice::from_raw_parts_mut(attrib_list, num_attribs.max(0) as usize)
    };
    status_only(drv.get_config_attributes(profile, entrypoint, attribs))
}

unsafe extern "C" fn nv_create_config(
    ctx: VADriverContextP,
    profile: i32,
    entrypoint: i32,
    attrib_list: *mut VAConfigAttrib,
    num_attribs: c_int,
    config_id: *mut VAConfigID,
) -> VAStatus {
    let Some(drv) = driver(ctx) else {
        return VA_STATUS_ERROR_INVALID_DISPLAY;
    };
    if config_id.is_null() {
        return VA_STATUS_ERROR_INVALID_PARAMETER;
    }
    let attribs = if attrib_list.is_null() {
        &[][..]
    } else {
        std::slice::from_raw_parts(attrib_list, num_attribs.max(0) as usize)
    };
    match drv.create_config(profile, entrypoint, attribs) {
        Ok(id) => {
            *config_id = id;
            VA_STATUS_SUCCESS
        }
        Err(e) => e.status(),
    }
}

unsafe extern "C" fn nv_destroy_config(ctx: VADriverContextP, config_id: VAConfigID) -> VAStatus {
    let Some(drv) = driver(ctx) else {
        return VA_STATUS_ERROR_INVALID_DISPLAY;
    };
    drv.destroy_config(config_id);
    VA_STATUS_SUCCESS
}

unsafe extern "C" fn nv_query_config_attributes(
    ctx: VADriverContextP,
    config_id: VAConfigID,
    profile: *mut i32,
    entrypoint: *mut i32,
    attrib_list: *mut VAConfigAttrib,
    num_attribs: *mut c_int,
) -> VAStatus {
    let Some(drv) = driver(ctx) else {
        return VA_STATUS_ERROR_INVALID_DISPLAY;
    };
    if profile.is_null() || entrypoint.is_null() || attrib_list.is_null() || num_attribs.is_null()
    {
        return VA_STATUS_ERROR_INVALID_PARAMETER;
    }
    match drv.query_config_attributes(config_id) {
        Ok((va_profile, va_entrypoint, attribs)) => {
            *profile = va_profile as i32;
            *entrypoint = va_entrypoint as i32;
            let out = std::slice::from_raw_parts_mut(attrib_list, attribs.len());
            out.copy_from_slice(&attribs);
            *num_attribs = attribs.len() as c_int;
            VA_STATUS_SUCCESS
        }
        Err(e) => e.status(),
    }
}

unsafe extern "C" fn nv_create_surfaces2(
    ctx: VADriverContextP,
    format: c_uint,
    width: c_uint,
    height: c_uint,
    surfaces: *mut VASurfaceID,
    num_surfaces: c_uint,
    _attrib_list: *mut VASurfaceAttrib,
    _num_attribs: c_uint,
) -> VAStatus {
    let Some(drv) = driver(ctx) else {
        return VA_STATUS_ERROR_INVALID_DISPLAY;
    };
    if surfaces.is_null() {
        return VA_STATUS_ERROR_INVALID_PARAMETER;
    }
    match drv.create_surfaces(format, width, height, num_surfaces) {
        Ok(ids) => {
            let out = std::slice::from_raw_parts_mut(surfaces, ids.len());
            out.copy_from_slice(&ids);
            VA_STATUS_SUCCESS
        }
        Err(e) => e.status(),
    }
}

unsafe extern "C" fn nv_create_surfaces(
    ctx: VADriverContextP,
    width: c_int,
    height: c_int,
    format: c_int,
    num_surfaces: c_int,
    surfaces: *mut VASurfaceID,
) -> VAStatus {
    nv_create_surfaces2(
        ctx,
        format as c_uint,
        width as c_uint,
        height as c_uint,
        surfaces,
        num_surfaces.max(0) as c_uint,
        std::ptr::null_mut(),
        0,
    )
}

unsafe extern "C" fn nv_destroy_surfaces(
    ctx: VADriverContextP,
    surface_list: *mut VASurfaceID,
    num_surfaces: c_int,
) -> VAStatus {
    let Some(drv) = driver(ctx) else {
        return VA_STATUS_ERROR_INVALID_DISPLAY;
    };
    if surface_list.is_null() {
        return VA_STATUS_ERROR_INVALID_PARAMETER;
    }
    let ids = std::slice::from_raw_parts(surface_list, num_surfaces.max(0) as usize);
    status_only(drv.destroy_surfaces(ids))
}

unsafe extern "C" fn nv_create_context(
    ctx: VADriverContextP,
    config_id: VAConfigID,
    picture_width: c_int,
    picture_height: c_int,
    _flag: c_int,
    render_targets: *mut VASurfaceID,
    num_render_targets: c_int,
    context: *mut VAContextID,
) -> VAStatus {
    let Some(drv) = driver(ctx) else {
        return VA_STATUS_ERROR_INVALID_DISPLAY;
    };
    if context.is_null() {
        return VA_STATUS_ERROR_INVALID_PARAMETER;
    }
    let targets = if render_targets.is_null() {
        &[][..]
    } else {
        std::slice::from_raw_parts(render_targets, num_render_targets.max(0) as usize)
    };
    match drv.create_context(
        config_id,
        picture_width.max(0) as u32,
        picture_height.max(0) as u32,
        targets,
    ) {
        Ok(id) => {
            *context = id;
            VA_STATUS_SUCCESS
        }
        Err(e) => e.status(),
    }
}

unsafe extern "C" fn nv_destroy_context(ctx: VADriverContextP, context: VAContextID) -> VAStatus {
    let Some(drv) = driver(ctx) else {
        return VA_STATUS_ERROR_INVALID_DISPLAY;
    };
    status_only(drv.destroy_context(context))
}

unsafe extern "C" fn nv_create_buffer(
    ctx: VADriverContextP,
    context: VAContextID,
    buffer_type: i32,
    size: c_uint,
    num_elements: c_uint,
    data: *mut c_void,
    buf_id: *mut VABufferID,
) -> VAStatus {
    let Some(drv) = driver(ctx) else {
        return VA_STATUS_ERROR_INVALID_DISPLAY;
    };
    if buf_id.is_null() {
        return VA_STATUS_ERROR_INVALID_PARAMETER;
    }
    match drv.create_buffer(context, buffer_type, size, num_elements, data as *const u8) {
        Ok(id) => {
            *buf_id = id;
            VA_STATUS_SUCCESS
        }
        Err(e) => e.status(),
    }
}

unsafe extern "C" fn nv_buffer_set_num_elements(
    _ctx: VADriverContextP,
    _buf_id: VABufferID,
    _num_elements: c_uint,
) -> VAStatus {
    VA_STATUS_ERROR_UNIMPLEMENTED
}

unsafe extern "C" fn nv_map_buffer(
    ctx: VADriverContextP,
    buf_id: VABufferID,
    pbuf: *mut *mut c_void,
) -> VAStatus {
    let Some(drv) = driver(ctx) else {
        return VA_STATUS_ERROR_INVALID_DISPLAY;
    };
    if pbuf.is_null() {
        return VA_STATUS_ERROR_INVALID_PARAMETER;
    }
    match drv.map_buffer(buf_id) {
        Ok(ptr) => {
            *pbuf = ptr;
            VA_STATUS_SUCCESS
        }
        Err(e) => e.status(),
    }
}

unsafe extern "C" fn nv_unmap_buffer(_ctx: VADriverContextP, _buf_id: VABufferID) -> VAStatus {
    VA_STATUS_SUCCESS
}

unsafe extern "C" fn nv_destroy_buffer(ctx: VADriverContextP, buffer_id: VABufferID) -> VAStatus {
    let Some(drv) = driver(ctx) else {
        return VA_STATUS_ERROR_INVALID_DISPLAY;
    };
    status_only(drv.destroy_buffer(buffer_id))
}

unsafe extern "C" fn nv_begin_picture(
    ctx: VADriverContextP,
    context: VAContextID,
    render_target: VASurfaceID,
) -> VAStatus {
    let Some(drv) = driver(ctx) else {
        return VA_STATUS_ERROR_INVALID_DISPLAY;
    };
    status_only(drv.begin_picture(context, render_target))
}

unsafe extern "C" fn nv_render_picture(
    ctx: VADriverContextP,
    context: VAContextID,
    buffers: *mut VABufferID,
    num_buffers: c_int,
) -> VAStatus {
    let Some(drv) = driver(ctx) else {
        return VA_STATUS_ERROR_INVALID_DISPLAY;
    };
    let ids = if buffers.is_null() {
        &[][..]
    } else {
        std::slice::from_raw_parts(buffers, num_buffers.max(0) as usize)
    };
    status_only(drv.render_picture(context, ids))
}

unsafe extern "C" fn nv_end_picture(ctx: VADriverContextP, context: VAContextID) -> VAStatus {
    let Some(drv) = driver(ctx) else {
        return VA_STATUS_ERROR_INVALID_DISPLAY;
    };
    status_only(drv.end_picture(context))
}

unsafe extern "C" fn nv_sync_surface(
    ctx: VADriverContextP,
    render_target: VASurfaceID,
) -> VAStatus {
    let Some(drv) = driver(ctx) else {
        return VA_STATUS_ERROR_INVALID_DISPLAY;
    };
    status_only(drv.sync_surface(render_target))
}

unsafe extern "C" fn nv_query_surface_status(
    _ctx: VADriverContextP,
    _render_target: VASurfaceID,
    _status: *mut i32,
) -> VAStatus {
    VA_STATUS_ERROR_UNIMPLEMENTED
}

unsafe extern "C" fn nv_query_surface_error(
    _ctx: VADriverContextP,
    _render_target: VASurfaceID,
    _error_status: VAStatus,
    _error_info: *mut *mut c_void,
) -> VAStatus {
    VA_STATUS_ERROR_UNIMPLEMENTED
}

#[allow(clippy::too_many_arguments)]
unsafe extern "C" fn nv_put_surface(
    _ctx: VADriverContextP,
    _surface: VASurfaceID,
    _draw: *mut c_void,
    _srcx: i16,
    _srcy: i16,
    _srcw: u16,
    _srch: u16,
    _destx: i16,
    _desty: i16,
    _destw: u16,
    _desth: u16,
    _cliprects: *mut VARectangle,
    _number_cliprects: c_uint,
    _flags: c_uint,
) -> VAStatus {
    VA_STATUS_ERROR_UNIMPLEMENTED
}

unsafe extern "C" fn nv_query_image_formats(
    ctx: VADriverContextP,
    format_list: *mut VAImageFormat,
    num_formats: *mut c_int,
) -> VAStatus {
    let Some(drv) = driver(ctx) else {
        return VA_STATUS_ERROR_INVALID_DISPLAY;
    };
    if format_list.is_null() || num_formats.is_null() {
        return VA_STATUS_ERROR_INVALID_PARAMETER;
    }
    let formats = drv.query_image_formats();
    let out = std::slice::from_raw_parts_mut(format_list, formats.len());
    out.copy_from_slice(&formats);
    *num_formats = formats.len() as c_int;
    VA_STATUS_SUCCESS
}

unsafe extern "C" fn nv_create_image(
    ctx: VADriverContextP,
    format: *mut VAImageFormat,
    width: c_int,
    height: c_int,
    image: *mut VAImage,
) -> VAStatus {
    let Some(drv) = driver(ctx) else {
        return VA_STATUS_ERROR_INVALID_DISPLAY;
    };
    if format.is_null() || image.is_null() {
        return VA_STATUS_ERROR_INVALID_PARAMETER;
    }
    match drv.create_image(&*format, width.max(0) as u32, height.max(0) as u32) {
        Ok(created) => {
            *image = created;
            VA_STATUS_SUCCESS
        }
        Err(e) => e.status(),
    }
}

unsafe extern "C" fn nv_derive_image(
    _ctx: VADriverContextP,
    _surface: VASurfaceID,
    _image: *mut VAImage,
) -> VAStatus {
    VA_STATUS_ERROR_OPERATION_FAILED
}

unsafe extern "C" fn nv_destroy_image(ctx: VADriverContextP, image: VAImageID) -> VAStatus {
    let Some(drv) = driver(ctx) else {
        return VA_STATUS_ERROR_INVALID_DISPLAY;
    };
    status_only(drv.destroy_image(image))
}

unsafe extern "C" fn nv_set_image_palette(
    _ctx: VADriverContextP,
    _image: VAImageID,
    _palette: *mut u8,
) -> VAStatus {
    VA_STATUS_ERROR_UNIMPLEMENTED
}

unsafe extern "C" fn nv_get_image(
    ctx: VADriverContextP,
    surface: VASurfaceID,
    _x: c_int,
    _y: c_int,
    width: c_uint,
    height: c_uint,
    image: VAImageID,
) -> VAStatus {
    let Some(drv) = driver(ctx) else {
        return VA_STATUS_ERROR_INVALID_DISPLAY;
    };
    status_only(drv.get_image(surface, image, width, height))
}

#[allow(clippy::too_many_arguments)]
unsafe extern "C" fn nv_put_image(
    _ctx: VADriverContextP,
    _surface: VASurfaceID,
    _image: VAImageID,
    _src_x: c_int,
    _src_y: c_int,
    _src_width: c_uint,
    _src_height: c_uint,
    _dest_x: c_int,
    _dest_y: c_int,
    _dest_width: c_uint,
    _dest_height: c_uint,
) -> VAStatus {
    // Composition is out of scope; succeed so clients that probe with a
    // no-op blit keep going.
    VA_STATUS_SUCCESS
}

unsafe extern "C" fn nv_query_subpicture_formats(
    _ctx: VADriverContextP,
    _format_list: *mut VAImageFormat,
    _flags: *mut c_uint,
    num_formats: *mut c_uint,
) -> VAStatus {
    if !num_formats.is_null() {
        *num_formats = 0;
    }
    VA_STATUS_SUCCESS
}

unsafe extern "C" fn nv_create_subpicture(
    _ctx: VADriverContextP,
    _image: VAImageID,
    _subpicture: *mut VASubpictureID,
) -> VAStatus {
    VA_STATUS_ERROR_UNIMPLEMENTED
}

unsafe extern "C" fn nv_destroy_subpicture(
    _ctx: VADriverContextP,
    _subpicture: VASubpictureID,
) -> VAStatus {
    VA_STATUS_ERROR_UNIMPLEMENTED
}

unsafe extern "C" fn nv_set_subpicture_image(
    _ctx: VADriverContextP,
    _subpicture: VASubpictureID,
    _image: VAImageID,
) -> VAStatus {
    VA_STATUS_ERROR_UNIMPLEMENTED
}

unsafe extern "C" fn nv_set_subpicture_chromakey(
    _ctx: VADriverContextP,
    _subpicture: VASubpictureID,
    _chromakey_min: c_uint,
    _chromakey_max: c_uint,
    _chromakey_mask: c_uint,
) -> VAStatus {
    VA_STATUS_ERROR_UNIMPLEMENTED
}

unsafe extern "C" fn nv_set_subpicture_global_alpha(
    _ctx: VADriverContextP,
    _subpicture: VASubpictureID,
    _global_alpha: f32,
) -> VAStatus {
    VA_STATUS_ERROR_UNIMPLEMENTED
}

#[allow(clippy::too_many_arguments)]
unsafe extern "C" fn nv_associate_subpicture(
    _ctx: VADriverContextP,
    _subpicture: VASubpictureID,
    _target_surfaces: *mut VASurfaceID,
    _num_surfaces: c_int,
    _src_x: i16,
    _src_y: i16,
    _src_width: u16,
    _src_height: u16,
    _dest_x: i16,
    _dest_y: i16,
    _dest_width: u16,
    _dest_height: u16,
    _flags: c_uint,
) -> VAStatus {
    VA_STATUS_ERROR_UNIMPLEMENTED
}

unsafe extern "C" fn nv_deassociate_subpicture(
    _ctx: VADriverContextP,
    _subpicture: VASubpictureID,
    _target_surfaces: *mut VASurfaceID,
    _num_surfaces: c_int,
) -> VAStatus {
    VA_STATUS_ERROR_UNIMPLEMENTED
}

unsafe extern "C" fn nv_query_display_attributes(
    _ctx: VADriverContextP,
    _attr_list: *mut VADisplayAttribute,
    num_attributes: *mut c_int,
) -> VAStatus {
    if !num_attributes.is_null() {
        *num_attributes = 0;
    }
    VA_STATUS_SUCCESS
}

unsafe extern "C" fn nv_get_display_attributes(
    _ctx: VADriverContextP,
    _attr_list: *mut VADisplayAttribute,
    _num_attributes: c_int,
) -> VAStatus {
    VA_STATUS_ERROR_UNIMPLEMENTED
}

unsafe extern "C" fn nv_set_display_attributes(
    _ctx: VADriverContextP,
    _attr_list: *mut VADisplayAttribute,
    _num_attributes: c_int,
) -> VAStatus {
    VA_STATUS_ERROR_UNIMPLEMENTED
}

unsafe extern "C" fn nv_buffer_info(
    _ctx: VADriverContextP,
    _buf_id: VABufferID,
    _type: *mut i32,
    size: *mut c_uint,
    num_elements: *mut c_uint,
) -> VAStatus {
    if !size.is_null() {
        *size = 0;
    }
    if !num_elements.is_null() {
        *num_elements = 0;
    }
    VA_STATUS_SUCCESS
}

#[allow(clippy::too_many_arguments)]
unsafe extern "C" fn nv_lock_surface(
    _ctx: VADriverContextP,
    _surface: VASurfaceID,
    _fourcc: *mut c_uint,
    _luma_stride: *mut c_uint,
    _chroma_u_stride: *mut c_uint,
    _chroma_v_stride: *mut c_uint,
    _luma_offset: *mut c_uint,
    _chroma_u_offset: *mut c_uint,
    _chroma_v_offset: *mut c_uint,
    _buffer_name: *mut c_uint,
    _buffer: *mut *mut c_void,
) -> VAStatus {
    VA_STATUS_ERROR_UNIMPLEMENTED
}

unsafe extern "C" fn nv_unlock_surface(
    _ctx: VADriverContextP,
    _surface: VASurfaceID,
) -> VAStatus {
    VA_STATUS_ERROR_UNIMPLEMENTED
}

unsafe extern "C" fn nv_query_surface_attributes(
    ctx: VADriverContextP,
    config: VAConfigID,
    attrib_list: *mut VASurfaceAttrib,
    num_attribs: *mut c_uint,
) -> VAStatus {
    let Some(drv) = driver(ctx) else {
        return VA_STATUS_ERROR_INVALID_DISPLAY;
    };
    if num_attribs.is_null() {
        return VA_STATUS_ERROR_INVALID_PARAMETER;
    }
    match drv.query_surface_attributes(config) {
        Ok(attribs) => {
            if !attrib_list.is_null() {
                let out = std::slice::from_raw_parts_mut(attrib_list, attribs.len());
                out.copy_from_slice(&attribs);
            }
            *num_attribs = attribs.len() as c_uint;
            VA_STATUS_SUCCESS
        }
        Err(e) => e.status(),
    }
}

unsafe extern "C" fn nv_acquire_buffer_handle(
    _ctx: VADriverContextP,
    _buf_id: VABufferID,
    _buf_info: *mut VABufferInfo,
) -> VAStatus {
    VA_STATUS_ERROR_UNIMPLEMENTED
}

unsafe extern "C" fn nv_release_buffer_handle(
    _ctx: VADriverContextP,
    _buf_id: VABufferID,
) -> VAStatus {
    VA_STATUS_ERROR_UNIMPLEMENTED
}

unsafe extern "C" fn nv_create_mf_context(
    _ctx: VADriverContextP,
    _mf_context: *mut VAMFContextID,
) -> VAStatus {
    VA_STATUS_ERROR_UNIMPLEMENTED
}

unsafe extern "C" fn nv_mf_add_context(
    _ctx: VADriverContextP,
    _mf_context: VAMFContextID,
    _context: VAContextID,
) -> VAStatus {
    VA_STATUS_ERROR_UNIMPLEMENTED
}

unsafe extern "C" fn nv_mf_release_context(
    _ctx: VADriverContextP,
    _mf_context: VAMFContextID,
    _context: VAContextID,
) -> VAStatus {
    VA_STATUS_ERROR_UNIMPLEMENTED
}

unsafe extern "C" fn nv_mf_submit(
    _ctx: VADriverContextP,
    _mf_context: VAMFContextID,
    _contexts: *mut VAContextID,
    _num_contexts: c_int,
) -> VAStatus {
    VA_STATUS_ERROR_UNIMPLEMENTED
}

#[allow(clippy::too_many_arguments)]
unsafe extern "C" fn nv_create_buffer2(
    _ctx: VADriverContextP,
    _context: VAContextID,
    _type: i32,
    _width: c_uint,
    _height: c_uint,
    _unit_size: *mut c_uint,
    _pitch: *mut c_uint,
    _buf_id: *mut VABufferID,
) -> VAStatus {
    VA_STATUS_ERROR_UNIMPLEMENTED
}

unsafe extern "C" fn nv_query_processing_rate(
    _ctx: VADriverContextP,
    _config_id: VAConfigID,
    _proc_buf: *mut c_void,
    _processing_rate: *mut c_uint,
) -> VAStatus {
    VA_STATUS_ERROR_UNIMPLEMENTED
}

unsafe extern "C" fn nv_export_surface_handle(
    ctx: VADriverContextP,
    surface_id: VASurfaceID,
    mem_type: u32,
    flags: u32,
    descriptor: *mut c_void,
) -> VAStatus {
    let Some(drv) = driver(ctx) else {
        return VA_STATUS_ERROR_INVALID_DISPLAY;
    };
    if descriptor.is_null() {
        return VA_STATUS_ERROR_INVALID_PARAMETER;
    }
    match drv.export_surface_handle(surface_id, mem_type, flags) {
        Ok(desc) => {
            *(descriptor as *mut VADRMPRIMESurfaceDescriptor) = desc;
            VA_STATUS_SUCCESS
        }
        Err(e) => e.status(),
    }
}

pub const MAX_PROFILES: usize = 32;

fn vtable() -> VADriverVTable {
    VADriverVTable {
        vaTerminate: Some(nv_terminate),
        vaQueryConfigProfiles: Some(nv_query_config_profiles),
        vaQueryConfigEntrypoints: Some(nv_query_config_entrypoints),
        vaGetConfigAttributes: Some(nv_get_config_attributes),
        vaCreateConfig: Some(nv_create_config),
        vaDestroyConfig: Some(nv_destroy_config),
        vaQueryConfigAttributes: Some(nv_query_config_attributes),
        vaCreateSurfaces: Some(nv_create_surfaces),
        vaDestroySurfaces: Some(nv_destroy_surfaces),
        vaCreateContext: Some(nv_create_context),
        vaDestroyContext: Some(nv_destroy_context),
        vaCreateBuffer: Some(nv_create_buffer),
        vaBufferSetNumElements: Some(nv_buffer_set_num_elements),
        vaMapBuffer: Some(nv_map_buffer),
        vaUnmapBuffer: Some(nv_unmap_buffer),
        vaDestroyBuffer: Some(nv_destroy_buffer),
        vaBeginPicture: Some(nv_begin_picture),
        vaRenderPicture: Some(nv_render_picture),
        vaEndPicture: Some(nv_end_picture),
        vaSyncSurface: Some(nv_sync_surface),
        vaQuerySurfaceStatus: Some(nv_query_surface_status),
        vaQuerySurfaceError: Some(nv_query_surface_error),
        vaPutSurface: Some(nv_put_surface),
        vaQueryImageFormats: Some(nv_query_image_formats),
        vaCreateImage: Some(nv_create_image),
        vaDeriveImage: Some(nv_derive_image),
        vaDestroyImage: Some(nv_destroy_image),
        vaSetImagePalette: Some(nv_set_image_palette),
        vaGetImage: Some(nv_get_image),
        vaPutImage: Some(nv_put_image),
        vaQuerySubpictureFormats: Some(nv_query_subpicture_formats),
        vaCreateSubpicture: Some(nv_create_subpicture),
        vaDestroySubpicture: Some(nv_destroy_subpicture),
        vaSetSubpictureImage: Some(nv_set_subpicture_image),
        vaSetSubpictureChromakey: Some(nv_set_subpicture_chromakey),
        vaSetSubpictureGlobalAlpha: Some(nv_set_subpicture_global_alpha),
        vaAssociateSubpicture: Some(nv_associate_subpicture),
        vaDeassociateSubpicture: Some(nv_deassociate_subpicture),
        vaQueryDisplayAttributes: Some(nv_query_display_attributes),
        vaGetDisplayAttributes: Some(nv_get_display_attributes),
        vaSetDisplayAttributes: Some(nv_set_display_attributes),
        vaBufferInfo: Some(nv_buffer_info),
        vaLockSurface: Some(nv_lock_surface),
        vaUnlockSurface: Some(nv_unlock_surface),
        vaGetSurfaceAttributes: None,
        vaCreateSurfaces2: Some(nv_create_surfaces2),
        vaQuerySurfaceAttributes: Some(nv_query_surface_attributes),
        vaAcquireBufferHandle: Some(nv_acquire_buffer_handle),
        vaReleaseBufferHandle: Some(nv_release_buffer_handle),
        vaCreateMFContext: Some(nv_create_mf_context),
        vaMFAddContext: Some(nv_mf_add_context),
        vaMFReleaseContext: Some(nv_mf_release_context),
        vaMFSubmit: Some(nv_mf_submit),
        vaCreateBuffer2: Some(nv_create_buffer2),
        vaQueryProcessingRate: Some(nv_query_processing_rate),
        vaExportSurfaceHandle: Some(nv_export_surface_handle),
        reserved: [std::ptr::null_mut(); 58],
    }
}

/// The entry symbol libva resolves after dlopen'ing the driver.
///
/// # Safety
/// `ctx` must point at a `VADriverContext` owned by libva for the lifetime
/// of the driver instance.
#[no_mangle]
pub unsafe extern "C" fn __vaDriverInit_1_0(ctx: VADriverContextP) -> VAStatus {
    logging::init_from_env();
    log::info!("Initialising NVIDIA VA-API Driver");
    let Some(ctx) = ctx.as_mut() else {
        return VA_STATUS_ERROR_INVALID_DISPLAY;
    };
    let options = DriverOptions::from_env();
    if DriverOptions::sandbox_detected() && !options.force_init {
        log::error!("Potential browser sandbox detected, failing to init!");
        log::error!(
            "If running in Firefox, set env var MOZ_DISABLE_RDD_SANDBOX=1 to disable sandbox."
        );
        return VA_STATUS_ERROR_OPERATION_FAILED;
    }

    let is_drm = !ctx.drm_state.is_null() && (*ctx.drm_state).fd > 0;
    let mut drm_fd: Option<RawFd> =
        if options.gpu == -1 && is_drm { Some((*ctx.drm_state).fd) } else { None };
    log::debug!("Got DRM FD: {is_drm} {drm_fd:?}");
    if let Some(fd) = drm_fd {
        if !drm::is_nvidia_drm_fd(fd) {
            log::info!("Passed in DRM FD does not belong to the NVIDIA driver, ignoring");
            drm_fd = None;
        } else if !drm::modeset_enabled() {
            log::error!("nvidia-drm modeset is disabled, giving up");
            return VA_STATUS_ERROR_OPERATION_FAILED;
        }
    }

    let device = match CudaDevice::new(options.gpu, drm_fd) {
        Ok(device) => Arc::new(device),
        Err(e) => {
            log::error!("Device setup failed: {e:#}");
            return VA_STATUS_ERROR_OPERATION_FAILED;
        }
    };
    let exporter: Arc<dyn SurfaceExporter> = match options.backend {
        BackendKind::Direct => {
            log::info!("Selecting Direct backend");
            Arc::new(crate::backend::direct::DirectExporter::new(Arc::clone(&device)))
        }
        BackendKind::Egl => {
            log::info!("Selecting EGL backend");
            Arc::new(crate::backend::egl::EglExporter::new(Arc::clone(&device)))
        }
    };
    let dyn_device: Arc<dyn VideoDevice> = device;
    let drv = match NvDriver::new(dyn_device, exporter, Arc::clone(InstanceLimiter::global())) {
        Ok(drv) => drv,
        Err(DriverError::HwBusy) => return VA_STATUS_ERROR_HW_BUSY,
        Err(e) => return e.status(),
    };

    ctx.max_profiles = MAX_PROFILES as c_int;
    ctx.max_entrypoints = 1;
    ctx.max_attributes = 1;
    ctx.max_display_attributes = 1;
    ctx.max_image_formats = crate::format::FORMATS.len() as c_int;
    ctx.max_subpic_formats = 1;
    ctx.str_vendor = options.backend.vendor_string().as_ptr();
    if !ctx.vtable.is_null() {
        *ctx.vtable = vtable();
    }
    ctx.pDriverData = Box::into_raw(Box::new(drv)) as *mut c_void;
    VA_STATUS_SUCCESS
}
