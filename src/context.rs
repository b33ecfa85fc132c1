// Copyright 2024 The nvdec-vaapi-driver Authors
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! One active decode session: the Begin/Render/End picture sequence and the
//! background resolve worker that maps decoded pictures out of the decoder
//! into exportable backing images.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::sync::mpsc::Receiver;
use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::backend::SurfaceExporter;
use crate::bitstream::AppendableBuffer;
use crate::codec::Codec;
use crate::codec::PictureContext;
use crate::codec::PictureIndexLookup;
use crate::device::VideoDecoder;
use crate::device::VideoDevice;
use crate::driver::DriverError;
use crate::driver::NvBuffer;
use crate::surface::NvSurface;
use crate::sys::cuvid::CUVIDPICPARAMS;
use crate::sys::cuvid::CUVIDPROCPARAMS;
use crate::va::VAContextID;
use crate::va::VAProfile;
use crate::va::VA_INVALID_ID;

/// Capacity of the per-context resolve queue. `EndPicture` blocks once this
/// many pictures are waiting to be resolved, which cannot happen before the
/// decoder's own surface pool (at most 32) is exhausted.
pub const SURFACE_QUEUE_SIZE: usize = 64;

/// How long context destruction waits for the resolve thread before
/// abandoning it.
const RESOLVE_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

enum ResolveTask {
    Resolve(Arc<NvSurface>),
    Exit,
}

/// Per-picture scratch the Begin/Render/End sequence assembles. The raw
/// pointers inside `pic_params` only ever point into the buffers next to
/// them.
struct PictureScratch {
    pic_params: Box<CUVIDPICPARAMS>,
    bitstream: AppendableBuffer,
    slice_offsets: AppendableBuffer,
    pending_slices: Vec<(u32, u32)>,
    render_target: Option<Arc<NvSurface>>,
    current_picture_id: u32,
}

unsafe impl Send for PictureScratch {}

struct Worker {
    handle: JoinHandle<()>,
    done_rx: Receiver<()>,
}

pub struct NvContext {
    pub codec: &'static Codec,
    pub profile: VAProfile,
    pub width: u32,
    pub height: u32,
    pub surface_count: u32,
    /// Registry id, filled in right after insertion and before the client
    /// ever sees the context.
    id: AtomicU32,
    device: Arc<dyn VideoDevice>,
    decoder: Arc<dyn VideoDecoder>,
    exporter: Arc<dyn SurfaceExporter>,
    scratch: Mutex<PictureScratch>,
    resolve_tx: Mutex<Option<SyncSender<ResolveTask>>>,
    worker: Mutex<Option<Worker>>,
    exiting: Arc<AtomicBool>,
}

impl NvContext {
    /// Wraps a freshly created decoder and starts the resolve thread.
    pub fn new(
        codec: &'static Codec,
        profile: VAProfile,
        width: u32,
        height: u32,
        surface_count: u32,
        device: Arc<dyn VideoDevice>,
        decoder: Box<dyn VideoDecoder>,
        exporter: Arc<dyn SurfaceExporter>,
    ) -> Result<Self, DriverError> {
        let decoder: Arc<dyn VideoDecoder> = Arc::from(decoder);
        let (resolve_tx, resolve_rx) = mpsc::sync_channel(SURFACE_QUEUE_SIZE);
        let (done_tx, done_rx) = mpsc::sync_channel(1);
        let exiting = Arc::new(AtomicBool::new(false));

        let worker = {
            let device = Arc::clone(&device);
            let decoder = Arc::clone(&decoder);
            let exporter = Arc::clone(&exporter);
            let exiting = Arc::clone(&exiting);
            std::thread::Builder::new()
                .name("nvd-resolve".into())
                .spawn(move || {
                    resolve_loop(&*device, &*decoder, &*exporter, resolve_rx, &exiting);
                    let _ = done_tx.send(());
                })
        };
        let handle = match worker {
            Ok(handle) => handle,
            Err(e) => {
                log::error!("Unable to create resolve thread: {e}");
                return Err(DriverError::OperationFailed);
            }
        };

        Ok(Self {
            codec,
            profile,
            width,
            height,
            surface_count,
            id: AtomicU32::new(VA_INVALID_ID),
            device,
            decoder,
            exporter,
            scratch: Mutex::new(PictureScratch {
                pic_params: Box::default(),
                bitstream: AppendableBuffer::new(),
                slice_offsets: AppendableBuffer::new(),
                pending_slices: Vec::new(),
                render_target: None,
                current_picture_id: 0,
            }),
            resolve_tx: Mutex::new(Some(resolve_tx)),
            worker: Mutex::new(Some(Worker { handle, done_rx })),
            exiting,
        })
    }

    pub fn set_id(&self, id: VAContextID) {
        self.id.store(id, Ordering::SeqCst);
    }

    pub fn id(&self) -> VAContextID {
        self.id.load(Ordering::SeqCst)
    }

    /// `BeginPicture`: binds the render target to this context, assigning it
    /// a decoder picture slot on first use.
    pub fn begin_picture(&self, target: &Arc<NvSurface>) -> Result<(), DriverError> {
        let mut scratch = self.scratch.lock().unwrap();
        {
            let mut state = target.state();
            if state.context_id != VA_INVALID_ID && state.context_id != self.id() {
                // The surface moved over from another context; its old
                // backing image and picture slot are meaningless here.
                if target.backing.lock().unwrap().is_some() {
                    drop(state);
                    self.exporter.detach_backing_image(target);
                    state = target.state();
                }
                state.picture_idx = -1;
            }
            if state.picture_idx == -1 {
                if scratch.current_picture_id == self.surface_count {
                    return Err(DriverError::MaxNumExceeded);
                }
                state.picture_idx = scratch.current_picture_id as i32;
                scratch.current_picture_id += 1;
            }
            state.resolving = true;
            state.progressive_frame = true;
            scratch.pic_params.clear();
            scratch.pic_params.CurrPicIdx = state.picture_idx;
        }
        scratch.bitstream.reset();
        scratch.slice_offsets.reset();
        scratch.pending_slices.clear();
        scratch.render_target = Some(Arc::clone(target));
        Ok(())
    }

    /// `RenderPicture` for one buffer: dispatch to the codec handler, or log
    /// and skip.
    pub fn render_buffer(&self, surfaces: &dyn PictureIndexLookup, buf: &NvBuffer) {
        let Some(buffer_type) = buf.typed() else {
            log::info!("Unhandled buffer type: {}", buf.buffer_type());
            return;
        };
        let Some(handler) = (self.codec.handler)(buffer_type) else {
            log::info!("Unhandled buffer type: {}", buf.buffer_type());
            return;
        };
        let mut guard = self.scratch.lock().unwrap();
        let scratch = &mut *guard;
        let mut pic = PictureContext {
            pic_params: &mut scratch.pic_params,
            bitstream: &mut scratch.bitstream,
            slice_offsets: &mut scratch.slice_offsets,
            pending_slices: &mut scratch.pending_slices,
            surfaces,
            width: self.width,
            height: self.height,
            profile: self.profile,
        };
        handler(&mut pic, buf);
    }

    /// `EndPicture`: submit the assembled picture and queue the target for
    /// resolution. A decode failure is reported to the caller but the target
    /// is still queued so `SyncSurface` waiters wake up.
    pub fn end_picture(&self) -> Result<(), DriverError> {
        let mut scratch = self.scratch.lock().unwrap();
        let Some(target) = scratch.render_target.take() else {
            return Err(DriverError::OperationFailed);
        };

        scratch.pic_params.pBitstreamData = scratch.bitstream.as_ptr();
        scratch.pic_params.pSliceDataOffsets = scratch.slice_offsets.as_ptr().cast();
        // Size zero, storage kept: the pointers stay valid for the decode
        // call below and the next picture starts from a clean arena.
        scratch.bitstream.reset();
        scratch.slice_offsets.reset();

        let decode_result = {
            let _current = self.device.enter().map_err(DriverError::from)?;
            self.decoder.decode_picture(&mut scratch.pic_params)
        };
        let status = match decode_result {
            Ok(()) => Ok(()),
            Err(e) => {
                log::error!("cuvidDecodePicture failed: {e:#}");
                Err(DriverError::DecodingError)
            }
        };

        {
            let mut state = target.state();
            state.context_id = self.id();
            state.top_field_first = scratch.pic_params.bottom_field_flag == 0;
            state.second_field = scratch.pic_params.second_field != 0;
            state.decode_failed = status.is_err();
        }

        let tx = self.resolve_tx.lock().unwrap();
        if let Some(tx) = tx.as_ref() {
            if tx.send(ResolveTask::Resolve(target)).is_err() {
                log::error!("resolve thread is gone, dropping picture");
            }
        }
        status
    }

    /// Cooperative teardown: ask the resolve thread to exit, join it with a
    /// bounded wait, then destroy the decoder even if the thread is stuck.
    pub fn destroy(&self) -> bool {
        let current = match self.device.enter() {
            Ok(guard) => guard,
            Err(e) => {
                log::error!("cannot enter device context for teardown: {e:#}");
                return false;
            }
        };
        log::debug!("Signaling resolve thread to exit");
        self.exiting.store(true, Ordering::SeqCst);
        if let Some(tx) = self.resolve_tx.lock().unwrap().take() {
            let _ = tx.try_send(ResolveTask::Exit);
        }

        if let Some(worker) = self.worker.lock().unwrap().take() {
            log::debug!("Waiting for resolve thread to exit");
            match worker.done_rx.recv_timeout(RESOLVE_JOIN_TIMEOUT) {
                Ok(()) => {
                    let _ = worker.handle.join();
                }
                Err(_) => {
                    // Dropping the handle abandons the thread; the decoder
                    // is torn down regardless.
                    log::error!("resolve thread did not exit within timeout, abandoning it");
                }
            }
        }

        {
            let mut scratch = self.scratch.lock().unwrap();
            scratch.bitstream.free();
            scratch.slice_offsets.free();
        }

        let mut successful = true;
        if let Err(e) = self.decoder.destroy() {
            log::error!("cuvidDestroyDecoder failed: {e:#}");
            successful = false;
        }
        drop(current);
        successful
    }
}

fn resolve_loop(
    device: &dyn VideoDevice,
    decoder: &dyn VideoDecoder,
    exporter: &dyn SurfaceExporter,
    rx: Receiver<ResolveTask>,
    exiting: &AtomicBool,
) {
    let _current = match device.enter() {
        Ok(guard) => guard,
        Err(e) => {
            log::error!("[RT] cannot enter device context: {e:#}");
            return;
        }
    };
    log::debug!("[RT] Resolve thread started");
    while !exiting.load(Ordering::SeqCst) {
        let surface = match rx.recv() {
            Ok(ResolveTask::Resolve(surface)) => surface,
            Ok(ResolveTask::Exit) | Err(_) => break,
        };
        resolve_one(decoder, exporter, &surface);
    }
    log::debug!("[RT] Resolve thread exiting");
}

fn resolve_one(decoder: &dyn VideoDecoder, exporter: &dyn SurfaceExporter, surface: &NvSurface) {
    let (picture_idx, mut proc_params) = {
        let state = surface.state();
        if state.decode_failed {
            drop(state);
            surface.finish_resolve();
            return;
        }
        let proc_params = CUVIDPROCPARAMS {
            progressive_frame: state.progressive_frame as i32,
            top_field_first: state.top_field_first as i32,
            second_field: state.second_field as i32,
            ..Default::default()
        };
        (state.picture_idx, proc_params)
    };

    match decoder.map_video_frame(picture_idx, &mut proc_params) {
        Ok(frame) => {
            if let Err(e) = exporter.export_cuda_ptr(frame.device_ptr, surface, frame.pitch) {
                log::error!("[RT] export of picture {picture_idx} failed: {e:#}");
            }
            if let Err(e) = decoder.unmap_video_frame(frame.device_ptr) {
                log::error!("[RT] cuvidUnmapVideoFrame failed: {e:#}");
            }
        }
        Err(e) => {
            log::error!("[RT] cuvidMapVideoFrame failed for picture {picture_idx}: {e:#}");
        }
    }
    surface.finish_resolve();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyExporter;
    use crate::device::dummy::DummyDevice;
    use crate::sys::cuvid::cudaVideoChromaFormat;
    use crate::sys::cuvid::cudaVideoSurfaceFormat;
    use crate::sys::cuvid::CUVIDDECODECREATEINFO;

    struct NoSurfaces;

    impl PictureIndexLookup for NoSurfaces {
        fn picture_index(&self, _: crate::va::VASurfaceID) -> i32 {
            -1
        }
    }

    struct Fixture {
        device: Arc<DummyDevice>,
        exporter: Arc<DummyExporter>,
        ctx: NvContext,
    }

    fn fixture(surface_count: u32) -> Fixture {
        let device = Arc::new(DummyDevice::new());
        let exporter = Arc::new(DummyExporter::new());
        let mut info: CUVIDDECODECREATEINFO = unsafe { std::mem::zeroed() };
        info.ulNumDecodeSurfaces = surface_count as std::ffi::c_ulong;
        let decoder = device.create_decoder(&mut info).unwrap();
        let dyn_device: Arc<dyn VideoDevice> = device.clone();
        let dyn_exporter: Arc<dyn SurfaceExporter> = exporter.clone();
        let ctx = NvContext::new(
            &crate::codec::h264::CODEC,
            VAProfile::H264Main,
            1920,
            1080,
            surface_count,
            dyn_device,
            decoder,
            dyn_exporter,
        )
        .unwrap();
        ctx.set_id(1000);
        Fixture { device, exporter, ctx }
    }

    fn surface() -> Arc<NvSurface> {
        Arc::new(NvSurface::new(
            1920,
            1080,
            cudaVideoSurfaceFormat::NV12,
            cudaVideoChromaFormat::YUV420,
            8,
        ))
    }

    #[test]
    fn test_picture_indices_are_distinct_until_exhaustion() {
        let f = fixture(3);
        let surfaces: Vec<_> = (0..3).map(|_| surface()).collect();
        for (i, s) in surfaces.iter().enumerate() {
            f.ctx.begin_picture(s).unwrap();
            assert_eq!(s.state().picture_idx, i as i32);
            f.ctx.end_picture().unwrap();
        }
        // A fourth surface has no free picture slot left.
        let extra = surface();
        assert!(matches!(
            f.ctx.begin_picture(&extra),
            Err(DriverError::MaxNumExceeded)
        ));
        // But re-beginning an already-bound surface reuses its slot.
        f.ctx.begin_picture(&surfaces[0]).unwrap();
        assert_eq!(surfaces[0].state().picture_idx, 0);
        f.ctx.end_picture().unwrap();
        for s in &surfaces {
            s.wait_idle();
        }
        assert!(f.ctx.destroy());
    }

    #[test]
    fn test_resolve_follows_end_picture_order() {
        let f = fixture(8);
        let surfaces: Vec<_> = (0..8).map(|_| surface()).collect();
        for s in &surfaces {
            f.ctx.begin_picture(s).unwrap();
            f.ctx.end_picture().unwrap();
        }
        for s in &surfaces {
            s.wait_idle();
        }
        assert_eq!(*f.device.map_order.lock().unwrap(), (0..8).collect::<Vec<i32>>());
        // One export per picture, in the same order they were submitted.
        assert_eq!(f.exporter.export_order.lock().unwrap().len(), 8);
        assert!(f.ctx.destroy());
    }

    #[test]
    fn test_decode_failure_still_wakes_sync_waiters() {
        let f = fixture(2);
        let target = surface();
        f.device.fail_decode.store(true, Ordering::SeqCst);
        f.ctx.begin_picture(&target).unwrap();
        assert!(matches!(f.ctx.end_picture(), Err(DriverError::DecodingError)));
        // Must return without hanging even though the decode failed.
        target.wait_idle();
        assert!(target.state().decode_failed);
        // The failed picture was never mapped or exported.
        assert!(f.device.map_order.lock().unwrap().is_empty());
        assert!(f.exporter.export_order.lock().unwrap().is_empty());
        assert!(f.ctx.destroy());
    }

    #[test]
    fn test_rebinding_surface_to_new_context_detaches_and_resets() {
        let f1 = fixture(4);
        let f2 = fixture(4);
        f2.ctx.set_id(2000);
        let target = surface();

        f1.ctx.begin_picture(&target).unwrap();
        f1.ctx.end_picture().unwrap();
        target.wait_idle();
        f1.exporter.realise_surface(&target).unwrap();
        assert!(target.backing.lock().unwrap().is_some());
        assert_eq!(target.state().picture_idx, 0);

        // Use a slot on the second context first so the reassigned index is
        // observably fresh.
        let other = surface();
        f2.ctx.begin_picture(&other).unwrap();
        f2.ctx.end_picture().unwrap();

        f2.ctx.begin_picture(&target).unwrap();
        assert!(target.backing.lock().unwrap().is_none(), "backing image must be detached");
        assert_eq!(target.state().picture_idx, 1);
        f2.ctx.end_picture().unwrap();
        target.wait_idle();
        other.wait_idle();
        assert_eq!(target.state().context_id, 2000);

        assert!(f1.ctx.destroy());
        assert!(f2.ctx.destroy());
    }

    #[test]
    fn test_destroy_is_idempotent_and_bounded() {
        let f = fixture(2);
        let start = std::time::Instant::now();
        assert!(f.ctx.destroy());
        assert!(f.ctx.destroy());
        assert!(start.elapsed() < RESOLVE_JOIN_TIMEOUT);
    }

    #[test]
    fn test_unknown_buffer_type_is_skipped() {
        let f = fixture(2);
        let target = surface();
        f.ctx.begin_picture(&target).unwrap();
        // A fabricated buffer type must be ignored without failing the
        // picture.
        let bogus = NvBuffer::new(0x7eadbeef, &[0u8; 16], 1, 0);
        f.ctx.render_buffer(&NoSurfaces, &bogus);
        f.ctx.end_picture().unwrap();
        target.wait_idle();
        assert!(!target.state().decode_failed);
        assert!(f.ctx.destroy());
    }
}
