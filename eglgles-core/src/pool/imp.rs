use super::BUFFER_POOL_OPTION_EGL_IMAGE;
use crate::format::{EGL_IMAGE_FEATURE, EGL_IMAGE_FORMATS};
use crate::images::ImageRegistry;
use crate::queue::{AllocationRequest, RenderChannel, WorkItem};
use gst::glib;
use gst::subclass::prelude::*;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::sync::Arc;

const BUFFER_POOL_OPTION_VIDEO_META: &str = "GstBufferPoolOptionVideoMeta";

#[derive(Debug, Default)]
struct PoolState {
    info: Option<gst_video::VideoInfo>,
    video_meta: bool,
    egl_image: bool,
}

#[derive(Debug)]
struct RenderTarget {
    channel: Arc<RenderChannel>,
    images: Arc<ImageRegistry>,
}

#[derive(Debug, Default)]
pub struct EglImageBufferPool {
    render: OnceCell<RenderTarget>,
    pub(super) last_buffer: Mutex<Option<gst::Buffer>>,
    state: Mutex<PoolState>,
}

impl EglImageBufferPool {
    pub(super) fn bind(&self, channel: Arc<RenderChannel>, images: Arc<ImageRegistry>) {
        if self.render.set(RenderTarget { channel, images }).is_err() {
            tracing::warn!("Buffer pool already bound to a render thread");
        }
    }

    fn is_last_buffer(&self, buffer: &gst::Buffer) -> bool {
        self.last_buffer
            .lock()
            .as_ref()
            .is_some_and(|last| last.as_ptr() == buffer.as_ptr())
    }

    fn alloc_egl_image(&self, info: &gst_video::VideoInfo) -> Result<Option<gst::Buffer>, gst::FlowError> {
        let Some(render) = self.render.get() else {
            return Ok(None);
        };
        let request = AllocationRequest::new(info.format(), info.width(), info.height());
        match render.channel.submit(WorkItem::Query(request.clone())) {
            Ok(_) => Ok(request.take_result()),
            Err(gst::FlowError::Flushing) => Err(gst::FlowError::Flushing),
            Err(err) => {
                tracing::warn!("EGLImage allocation failed: {err:?}");
                Ok(None)
            }
        }
    }
}

#[glib::object_subclass]
impl ObjectSubclass for EglImageBufferPool {
    const NAME: &'static str = "GstEglImageBufferPool";
    type Type = super::EglImageBufferPool;
    type ParentType = gst::BufferPool;
}

impl ObjectImpl for EglImageBufferPool {}

impl GstObjectImpl for EglImageBufferPool {}

impl BufferPoolImpl for EglImageBufferPool {
    fn options() -> &'static [&'static str] {
        &[BUFFER_POOL_OPTION_VIDEO_META, BUFFER_POOL_OPTION_EGL_IMAGE]
    }

    fn set_config(&self, config: &mut gst::BufferPoolConfigRef) -> bool {
        let Some((Some(caps), _size, _min, _max)) = config.params() else {
            tracing::error!("Buffer pool configured without caps");
            return false;
        };
        let info = match gst_video::VideoInfo::from_caps(&caps) {
            Ok(info) => info,
            Err(err) => {
                tracing::error!("Invalid caps {caps} in pool config: {err}");
                return false;
            }
        };

        let egl_features = caps
            .features(0)
            .is_some_and(|features| features.contains(EGL_IMAGE_FEATURE));
        {
            let mut state = self.state.lock();
            state.video_meta = config.has_option(BUFFER_POOL_OPTION_VIDEO_META);
            state.egl_image = config.has_option(BUFFER_POOL_OPTION_EGL_IMAGE) || egl_features;
            tracing::debug!(
                "Pool configured for {}x{} {} (video meta: {}, EGLImage: {})",
                info.width(),
                info.height(),
                info.format(),
                state.video_meta,
                state.egl_image
            );
            state.info = Some(info);
        }

        self.parent_set_config(config)
    }

    fn alloc_buffer(
        &self,
        params: Option<&gst::BufferPoolAcquireParams>,
    ) -> Result<gst::Buffer, gst::FlowError> {
        let (info, video_meta, egl_image) = {
            let state = self.state.lock();
            (state.info.clone(), state.video_meta, state.egl_image)
        };
        let Some(info) = info else {
            return Err(gst::FlowError::NotNegotiated);
        };

        if egl_image && EGL_IMAGE_FORMATS.contains(&info.format()) {
            if let Some(buffer) = self.alloc_egl_image(&info)? {
                return Ok(buffer);
            }
            tracing::debug!("Falling back to system memory buffers");
        }

        let mut buffer = self.parent_alloc_buffer(params)?;
        if video_meta {
            let buffer_mut = buffer.get_mut().ok_or(gst::FlowError::Error)?;
            gst_video::VideoMeta::add_full(
                buffer_mut,
                gst_video::VideoFrameFlags::empty(),
                info.format(),
                info.width(),
                info.height(),
                info.offset(),
                info.stride(),
            )
            .map_err(|_| gst::FlowError::Error)?;
        }
        Ok(buffer)
    }

    fn acquire_buffer(
        &self,
        params: Option<&gst::BufferPoolAcquireParams>,
    ) -> Result<gst::Buffer, gst::FlowError> {
        let buffer = self.parent_acquire_buffer(params)?;
        if !self.is_last_buffer(&buffer) {
            return Ok(buffer);
        }
        // Its EGLImages may still be sampled; hand out the next one instead.
        let next = self.parent_acquire_buffer(params);
        drop(buffer);
        next
    }

    fn free_buffer(&self, buffer: gst::Buffer) {
        if let Some(render) = self.render.get() {
            render.images.release(&buffer);
        }
        self.parent_free_buffer(buffer);
    }

    fn stop(&self) -> bool {
        *self.last_buffer.lock() = None;
        self.parent_stop()
    }
}
