//! `vpfeglglessink`: renders negotiated video into a GLES texture owned by a render thread.

use eglglescore::Presentation;
use gst::glib;
use gst::prelude::*;
use gst::subclass::prelude::*;
use std::sync::Arc;

mod imp;

glib::wrapper! {
    pub struct EglGlesSink(ObjectSubclass<imp::EglGlesSink>) @extends gst_video::VideoSink, gst_base::BaseSink, gst::Element, gst::Object;
}

impl EglGlesSink {
    /// Front texture and frame notifications for whoever displays the output.
    pub fn presentation(&self) -> Arc<Presentation> {
        self.imp().presentation()
    }
}

pub fn register(plugin: &gst::Plugin) -> Result<(), glib::BoolError> {
    gst::Element::register(
        Some(plugin),
        "vpfeglglessink",
        gst::Rank::SECONDARY,
        EglGlesSink::static_type(),
    )
}
