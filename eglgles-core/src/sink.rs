//! Streaming-thread side of the sink: lifecycle of the render thread and item submission.

use crate::backend::BackendFactory;
use crate::error::RenderError;
use crate::format::{MemoryKind, NegotiatedFormat, UploadStrategy};
use crate::jitter::JitterMeter;
use crate::pool::{EglImageBufferPool, BUFFER_POOL_OPTION_EGL_IMAGE};
use crate::presentation::Presentation;
use crate::queue::{FlowResult, ThreadPhase, WorkItem};
use crate::render::{self, RenderSettings, RenderShared};
use gst::prelude::*;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Closed,
    Opened,
    Started,
}

const MIN_POOL_BUFFERS: u32 = 2;

pub struct RenderSink {
    settings: Mutex<RenderSettings>,
    shared: Arc<RenderShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
    lifecycle: Mutex<Lifecycle>,
    current_caps: Mutex<Option<gst::Caps>>,
}

impl Default for RenderSink {
    fn default() -> Self {
        RenderSink {
            settings: Mutex::new(RenderSettings::default()),
            shared: Arc::new(RenderShared::default()),
            thread: Mutex::new(None),
            lifecycle: Mutex::new(Lifecycle::Closed),
            current_caps: Mutex::new(None),
        }
    }
}

impl RenderSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Element the render thread posts its stream-status messages from. Held weakly.
    pub fn set_owner(&self, owner: &gst::Element) {
        *self.shared.owner.lock() = Some(owner.downgrade());
    }

    /// NULL→READY: snapshots the settings the next render thread runs with.
    pub fn open(&self, settings: RenderSettings) {
        *self.settings.lock() = settings;
        *self.shared.jitter.lock() = settings.profile.then(|| JitterMeter::new("display"));
        *self.lifecycle.lock() = Lifecycle::Opened;
    }

    /// READY→PAUSED: spawns a render thread and waits for its EGL context.
    pub fn start(&self, factory: BackendFactory) -> Result<(), RenderError> {
        self.join_thread();
        self.shared.channel.reset();

        let settings = *self.settings.lock();
        let handle = render::spawn(factory, settings, self.shared.clone())?;
        *self.thread.lock() = Some(handle);
        *self.lifecycle.lock() = Lifecycle::Started;
        Ok(())
    }

    /// PAUSED→READY: releases blocked producers. The thread stays parked until `close`.
    pub fn stop(&self) {
        self.shared.channel.set_flushing(true);
        if let Some(pool) = self.shared.pool.lock().as_ref() {
            pool.replace_last_buffer(None);
        }
        *self.current_caps.lock() = None;
        let mut lifecycle = self.lifecycle.lock();
        if *lifecycle == Lifecycle::Started {
            *lifecycle = Lifecycle::Opened;
        }
    }

    /// READY→NULL.
    pub fn close(&self) {
        self.join_thread();
        if let Some(pool) = self.shared.pool.lock().take() {
            pool.replace_last_buffer(None);
            if let Err(err) = pool.set_active(false) {
                tracing::debug!("Deactivating pool: {err}");
            }
        }
        if let Some(meter) = self.shared.jitter.lock().take() {
            meter.log();
        }
        *self.lifecycle.lock() = Lifecycle::Closed;
    }

    fn join_thread(&self) {
        let Some(handle) = self.thread.lock().take() else {
            return;
        };
        self.shared.channel.close();
        if handle.join().is_err() {
            tracing::error!("Render thread panicked");
        }
    }

    pub fn submit(&self, item: WorkItem) -> FlowResult {
        self.shared.channel.submit(item)
    }

    /// Configures the render thread for `caps` and, outside CUDA interop, replaces the pool.
    pub fn set_caps(&self, caps: &gst::Caps) -> Result<(), RenderError> {
        let platform = self.settings.lock().platform;
        let format = NegotiatedFormat::from_caps(caps, platform)?;

        self.submit(WorkItem::Caps(caps.clone())).map_err(|err| {
            RenderError::Negotiation(format!("render thread rejected {caps}: {err:?}"))
        })?;

        let pool = if format.strategy == UploadStrategy::CudaInterop {
            None
        } else {
            Some(self.create_pool(caps, &format)?)
        };
        let previous = std::mem::replace(&mut *self.shared.pool.lock(), pool);
        if let Some(previous) = previous {
            previous.replace_last_buffer(None);
            if let Err(err) = previous.set_active(false) {
                tracing::debug!("Deactivating previous pool: {err}");
            }
        }

        *self.current_caps.lock() = Some(caps.clone());
        Ok(())
    }

    fn create_pool(
        &self,
        caps: &gst::Caps,
        format: &NegotiatedFormat,
    ) -> Result<EglImageBufferPool, RenderError> {
        let pool = EglImageBufferPool::new(
            self.shared.channel.clone(),
            self.shared.images.clone(),
        );
        let mut config = pool.config();
        config.set_params(Some(caps), format.info.size() as u32, MIN_POOL_BUFFERS, 0);
        config.add_option(gst_video::BUFFER_POOL_OPTION_VIDEO_META.as_ref());
        // Producers only write into EGLImages when they negotiated EGLImage memory.
        if format.memory == MemoryKind::EglImage {
            config.add_option(BUFFER_POOL_OPTION_EGL_IMAGE);
        }
        pool.set_config(config)
            .map_err(|err| RenderError::Negotiation(format!("pool config: {err}")))?;
        Ok(pool)
    }

    /// Pool to propose for `caps`: the current one when its caps match, a fresh one otherwise.
    pub fn allocation_pool(&self, caps: &gst::Caps) -> Result<Option<EglImageBufferPool>, RenderError> {
        let platform = self.settings.lock().platform;
        let format = NegotiatedFormat::from_caps(caps, platform)?;
        if format.strategy == UploadStrategy::CudaInterop {
            return Ok(None);
        }

        if let Some(pool) = self.shared.pool.lock().as_ref() {
            let (pool_caps, ..) = pool.config().params().unwrap_or((None, 0, 0, 0));
            if pool_caps.as_ref() == Some(caps) {
                return Ok(Some(pool.clone()));
            }
        }
        self.create_pool(caps, &format).map(Some)
    }

    pub fn prepare(&self, buffer: &gst::Buffer) -> FlowResult {
        self.submit(WorkItem::Buffer(buffer.clone()))
    }

    pub fn show_frame(&self) -> FlowResult {
        self.submit(WorkItem::Display)
    }

    pub fn presentation(&self) -> Arc<Presentation> {
        self.shared.presentation.clone()
    }

    pub fn pool(&self) -> Option<EglImageBufferPool> {
        self.shared.pool.lock().clone()
    }

    pub fn current_caps(&self) -> Option<gst::Caps> {
        self.current_caps.lock().clone()
    }

    pub fn phase(&self) -> ThreadPhase {
        self.shared.channel.phase()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.lock()
    }

    pub fn registered_images(&self) -> usize {
        self.shared.images.live()
    }
}

impl Drop for RenderSink {
    fn drop(&mut self) {
        self.close();
    }
}
