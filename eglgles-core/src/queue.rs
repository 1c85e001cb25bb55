//! Work queue between the streaming thread and the render thread.
//!
//! `submit` blocks until the render thread has processed the submitted item. Items carry a
//! sequence id assigned under the rendezvous lock, so queue order and id order agree and a waiter
//! only has to compare against the last processed id.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;

pub type FlowResult = Result<gst::FlowSuccess, gst::FlowError>;

/// Buffer allocation request answered by the render thread.
#[derive(Debug)]
pub struct AllocationRequest {
    pub format: gst_video::VideoFormat,
    pub width: u32,
    pub height: u32,
    result: Mutex<Option<gst::Buffer>>,
}

impl AllocationRequest {
    pub fn new(format: gst_video::VideoFormat, width: u32, height: u32) -> Arc<Self> {
        Arc::new(AllocationRequest {
            format,
            width,
            height,
            result: Mutex::new(None),
        })
    }

    pub fn set_result(&self, buffer: gst::Buffer) {
        *self.result.lock() = Some(buffer);
    }

    pub fn take_result(&self) -> Option<gst::Buffer> {
        self.result.lock().take()
    }
}

#[derive(Debug)]
pub enum WorkItem {
    Caps(gst::Caps),
    /// Shared with the caller, who reads the result after `submit` returns.
    Query(Arc<AllocationRequest>),
    Buffer(gst::Buffer),
    /// Draw the last uploaded frame.
    Display,
}

impl WorkItem {
    pub fn kind(&self) -> &'static str {
        match self {
            WorkItem::Caps(_) => "caps",
            WorkItem::Query(_) => "query",
            WorkItem::Buffer(_) => "buffer",
            WorkItem::Display => "display",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ItemId(u64);

#[derive(Debug)]
pub struct Pending {
    pub id: ItemId,
    pub item: WorkItem,
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<Pending>,
    flushing: bool,
}

#[derive(Debug, Default)]
struct WorkQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl WorkQueue {
    fn push(&self, pending: Pending) -> Result<(), Pending> {
        let mut state = self.state.lock();
        if state.flushing {
            return Err(pending);
        }
        state.items.push_back(pending);
        self.available.notify_one();
        Ok(())
    }

    fn pop(&self) -> Option<Pending> {
        let mut state = self.state.lock();
        loop {
            if state.flushing {
                return None;
            }
            if let Some(pending) = state.items.pop_front() {
                return Some(pending);
            }
            self.available.wait(&mut state);
        }
    }

    fn set_flushing(&self, flushing: bool) {
        let dropped = {
            let mut state = self.state.lock();
            state.flushing = flushing;
            self.available.notify_all();
            if flushing {
                std::mem::take(&mut state.items)
            } else {
                VecDeque::new()
            }
        };
        if !dropped.is_empty() {
            tracing::debug!("Dropping {} unprocessed work items", dropped.len());
        }
    }

    fn len(&self) -> usize {
        self.state.lock().items.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadPhase {
    Idle,
    Running,
    Draining,
    Exited,
}

#[derive(Debug)]
struct RendezvousState {
    last_flow: FlowResult,
    dequeued: Option<ItemId>,
    closing: bool,
    phase: ThreadPhase,
    next_id: u64,
}

/// Queue plus the `submitted`/`exited` rendezvous shared by producer and render thread.
#[derive(Debug)]
pub struct RenderChannel {
    queue: WorkQueue,
    state: Mutex<RendezvousState>,
    submitted: Condvar,
    exited: Condvar,
}

impl Default for RenderChannel {
    fn default() -> Self {
        RenderChannel {
            queue: WorkQueue::default(),
            state: Mutex::new(RendezvousState {
                last_flow: Err(gst::FlowError::Flushing),
                dequeued: None,
                closing: false,
                phase: ThreadPhase::Idle,
                next_id: 0,
            }),
            submitted: Condvar::new(),
            exited: Condvar::new(),
        }
    }
}

impl RenderChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Hands `item` to the render thread and waits until it has been processed.
    pub fn submit(&self, item: WorkItem) -> FlowResult {
        let mut state = self.state.lock();
        state.last_flow?;

        let id = ItemId(state.next_id);
        state.next_id += 1;
        let kind = item.kind();
        if let Err(rejected) = self.queue.push(Pending { id, item }) {
            drop(state);
            tracing::debug!("Queue is flushing, dropping {}", rejected.item.kind());
            return Err(gst::FlowError::Flushing);
        }

        tracing::trace!("Waiting for {kind} {:?} to be processed", id);
        while !state.dequeued.is_some_and(|done| done >= id) && state.last_flow.is_ok() {
            self.submitted.wait(&mut state);
        }
        state.last_flow
    }

    /// Blocks for the next item; `None` once the queue is flushing.
    pub fn next_item(&self) -> Option<Pending> {
        self.queue.pop()
    }

    /// Publishes the result of processing `id` to every waiter.
    pub fn complete(&self, id: ItemId, flow: FlowResult) {
        let mut state = self.state.lock();
        state.last_flow = flow;
        state.dequeued = Some(id);
        self.submitted.notify_all();
    }

    /// Makes blocked and future `submit` calls return `Flushing`.
    pub fn set_flushing(&self, flushing: bool) {
        self.queue.set_flushing(flushing);
        if flushing {
            let mut state = self.state.lock();
            state.last_flow = Err(gst::FlowError::Flushing);
            self.submitted.notify_all();
        }
    }

    /// Prepares for a fresh render thread.
    pub fn reset(&self) {
        {
            let mut state = self.state.lock();
            state.closing = false;
            state.dequeued = None;
            state.last_flow = Ok(gst::FlowSuccess::Ok);
            state.phase = ThreadPhase::Idle;
        }
        self.queue.set_flushing(false);
    }

    pub fn set_phase(&self, phase: ThreadPhase) {
        self.state.lock().phase = phase;
    }

    pub fn phase(&self) -> ThreadPhase {
        self.state.lock().phase
    }

    pub fn last_flow(&self) -> FlowResult {
        self.state.lock().last_flow
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Render thread side of shutdown: release waiters, then park until `closing`.
    pub fn drain(&self) {
        let mut state = self.state.lock();
        state.phase = ThreadPhase::Draining;
        if state.last_flow.is_ok() {
            state.last_flow = Err(gst::FlowError::Flushing);
        }
        self.submitted.notify_all();
        while !state.closing {
            self.exited.wait(&mut state);
        }
    }

    /// Lets a draining render thread finish.
    pub fn close(&self) {
        self.queue.set_flushing(true);
        let mut state = self.state.lock();
        state.closing = true;
        if state.last_flow.is_ok() {
            state.last_flow = Err(gst::FlowError::Flushing);
        }
        self.exited.notify_all();
        self.submitted.notify_all();
    }
}
