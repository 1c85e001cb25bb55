use crate::backend::TextureId;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameEvent {
    /// Counts uploaded frames since the sink was created.
    pub sequence: u64,
    pub pts: Option<gst::ClockTime>,
}

/// What a windowing/UI collaborator sees of the sink.
///
/// The front texture lives in the render thread's EGL context; sharing it requires a context
/// created against the same display.
#[derive(Debug)]
pub struct Presentation {
    front_texture: AtomicU32,
    sequence: AtomicU64,
    sender: Sender<FrameEvent>,
    receiver: Receiver<FrameEvent>,
}

impl Default for Presentation {
    fn default() -> Self {
        // A consumer that fell behind sees a single pending notification.
        let (sender, receiver) = crossbeam_channel::bounded(1);
        Presentation {
            front_texture: AtomicU32::new(0),
            sequence: AtomicU64::new(0),
            sender,
            receiver,
        }
    }
}

impl Presentation {
    /// Texture holding the last drawn frame, 0 before the first draw.
    pub fn front_texture(&self) -> TextureId {
        self.front_texture.load(Ordering::Acquire)
    }

    pub fn subscribe(&self) -> Receiver<FrameEvent> {
        self.receiver.clone()
    }

    pub fn frames(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }

    pub(crate) fn set_front_texture(&self, texture: TextureId) {
        self.front_texture.store(texture, Ordering::Release);
    }

    pub(crate) fn content_changed(&self, pts: Option<gst::ClockTime>) {
        let sequence = self.sequence.fetch_add(1, Ordering::AcqRel) + 1;
        if let Err(TrySendError::Full(_)) = self.sender.try_send(FrameEvent { sequence, pts }) {
            tracing::trace!("Frame {sequence} coalesced into pending notification");
        }
    }
}
