//! GStreamer EGL/GLES video sink
//!
//! Uploads frames into GLES textures on a dedicated render thread and draws them into an
//! offscreen front texture. Frames arrive through one of three paths:
//! - system memory, copied into textures
//! - `memory:NVMM` surfaces imported as EGLImages on Jetson
//! - `memory:NVMM` CUDA memory copied through CUDA/GL interop on discrete GPUs

use gst::glib;

mod eglglessink;

pub use eglglessink::EglGlesSink;

fn plugin_init(plugin: &gst::Plugin) -> Result<(), glib::BoolError> {
    eglglessink::register(plugin)?;
    Ok(())
}

// Library is 'libgsteglglessink.so' -> plugin name is 'eglglessink'
gst::plugin_define!(
    eglglessink,
    env!("CARGO_PKG_DESCRIPTION"),
    plugin_init,
    concat!(env!("CARGO_PKG_VERSION"), "-", env!("COMMIT_ID")),
    "MIT",
    env!("CARGO_PKG_NAME"),
    env!("CARGO_PKG_NAME"),
    env!("CARGO_PKG_REPOSITORY"),
    env!("BUILD_REL_DATE")
);
