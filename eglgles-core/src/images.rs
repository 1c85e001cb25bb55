use crate::backend::{EglImageHandle, ImagePlane};
use crate::error::RenderError;
use gst::prelude::*;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Custom meta on pool buffers naming the EGLImage and texture behind each plane, so the
/// producer can render into the image instead of the buffer's system memory.
pub const IMAGE_HANDLES_META: &str = "GstEglImageHandlesMeta";

static HANDLES_META: Lazy<()> = Lazy::new(|| gst::meta::CustomMeta::register(IMAGE_HANDLES_META, &[]));

/// Publishes `planes` as the `images` (`u64`) and `textures` (`u32`) arrays of the handle meta.
pub fn attach_handles(buffer: &mut gst::BufferRef, planes: &[ImagePlane]) -> Result<(), RenderError> {
    Lazy::force(&HANDLES_META);
    let mut meta = gst::meta::CustomMeta::add(buffer, IMAGE_HANDLES_META)
        .map_err(|_| RenderError::Unavailable("EGLImage handle meta"))?;
    let structure = meta.mut_structure();
    structure.set(
        "images",
        gst::Array::from_values(planes.iter().map(|p| (p.image.0 as u64).to_send_value())),
    );
    structure.set(
        "textures",
        gst::Array::from_values(planes.iter().map(|p| p.texture.to_send_value())),
    );
    Ok(())
}

/// EGLImages published on a pool buffer, in plane order.
pub fn image_handles(buffer: &gst::BufferRef) -> Option<Vec<EglImageHandle>> {
    Lazy::force(&HANDLES_META);
    let meta = gst::meta::CustomMeta::from_buffer(buffer, IMAGE_HANDLES_META).ok()?;
    let images = meta.structure().get::<gst::Array>("images").ok()?;
    images
        .iter()
        .map(|value| value.get::<u64>().ok().map(|image| EglImageHandle(image as usize)))
        .collect()
}

/// EGLImages backing the buffers handed out by the sink's pool.
///
/// Buffers are keyed by their first memory. The pool releases entries when it frees a buffer;
/// the render thread destroys the released planes, since only it may touch GPU objects.
#[derive(Debug, Default)]
pub struct ImageRegistry {
    state: Mutex<RegistryState>,
}

#[derive(Debug, Default)]
struct RegistryState {
    live: HashMap<usize, Vec<ImagePlane>>,
    released: Vec<ImagePlane>,
}

fn key(buffer: &gst::BufferRef) -> Option<usize> {
    (buffer.n_memory() > 0).then(|| buffer.peek_memory(0).as_ptr() as usize)
}

impl ImageRegistry {
    pub fn insert(&self, buffer: &gst::BufferRef, planes: Vec<ImagePlane>) {
        if let Some(key) = key(buffer) {
            self.state.lock().live.insert(key, planes);
        }
    }

    pub fn lookup(&self, buffer: &gst::BufferRef) -> Option<Vec<ImagePlane>> {
        let key = key(buffer)?;
        self.state.lock().live.get(&key).cloned()
    }

    pub fn release(&self, buffer: &gst::BufferRef) {
        let Some(key) = key(buffer) else {
            return;
        };
        let mut state = self.state.lock();
        if let Some(planes) = state.live.remove(&key) {
            state.released.extend(planes);
        }
    }

    pub fn take_released(&self) -> Vec<ImagePlane> {
        std::mem::take(&mut self.state.lock().released)
    }

    /// Everything, live or released, for context teardown.
    pub fn take_all(&self) -> Vec<ImagePlane> {
        let mut state = self.state.lock();
        let mut planes = std::mem::take(&mut state.released);
        planes.extend(state.live.drain().flat_map(|(_, planes)| planes));
        planes
    }

    pub fn live(&self) -> usize {
        self.state.lock().live.len()
    }
}
