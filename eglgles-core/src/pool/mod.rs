//! Buffer pool proposed upstream.
//!
//! With [`BUFFER_POOL_OPTION_EGL_IMAGE`] its buffers are backed by EGLImages created on the render
//! thread and published through [`crate::images::IMAGE_HANDLES_META`]. Otherwise they are plain
//! system memory with a `GstVideoMeta`.

use crate::images::ImageRegistry;
use crate::queue::RenderChannel;
use gst::glib;
use gst::subclass::prelude::*;
use std::sync::Arc;

mod imp;

/// Upstream sets this option to ask for EGLImage-backed buffers.
pub const BUFFER_POOL_OPTION_EGL_IMAGE: &str = "GstBufferPoolOptionEGLImage";

glib::wrapper! {
    pub struct EglImageBufferPool(ObjectSubclass<imp::EglImageBufferPool>)
        @extends gst::BufferPool, gst::Object;
}

impl EglImageBufferPool {
    pub fn new(channel: Arc<RenderChannel>, images: Arc<ImageRegistry>) -> Self {
        let pool: Self = glib::Object::new();
        pool.imp().bind(channel, images);
        pool
    }

    /// Keeps the buffer on screen alive and out of `acquire_buffer`.
    pub fn replace_last_buffer(&self, buffer: Option<gst::Buffer>) {
        *self.imp().last_buffer.lock() = buffer;
    }

    pub fn last_buffer(&self) -> Option<gst::Buffer> {
        self.imp().last_buffer.lock().clone()
    }
}
