//! The finalizer thread.
//!
//! Condemned objects arrive in batches from the collector. For each object
//! the thread clears its weak slot first, so no new upgrade can reach it,
//! then runs the user finalizers. The collector frees the batch only after
//! the thread acknowledges it.

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    thread::{self, JoinHandle, ThreadId},
};

use flume::{Receiver, Sender};
use log::{debug, error, trace};

use crate::{
    core::{Finalizer, SendPtr},
    error::{GcError, GcResult},
};

pub(crate) enum FinalizerMessage {
    Batch {
        objects: Vec<SendPtr>,
        /// Receives the number of user finalizers that ran.
        done: Sender<usize>,
    },
    Shutdown,
}

pub(crate) struct FinalizerThread {
    sender: Sender<FinalizerMessage>,
    handle: Option<JoinHandle<()>>,
    thread_id: ThreadId,
}

impl FinalizerThread {
    pub(crate) fn spawn(name: &str) -> GcResult<Self> {
        let (sender, receiver) = flume::unbounded();
        let handle = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || run(receiver))?;
        let thread_id = handle.thread().id();
        debug!("started finalizer thread {name:?}");

        Ok(Self {
            sender,
            handle: Some(handle),
            thread_id,
        })
    }

    /// Whether the calling thread is this finalizer thread.
    pub(crate) fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Queue a batch of condemned objects. The returned receiver yields once
    /// every object in the batch has been finalized.
    pub(crate) fn submit(&self, objects: Vec<SendPtr>) -> GcResult<Receiver<usize>> {
        let (done, finished) = flume::bounded(1);
        self.sender
            .send(FinalizerMessage::Batch { objects, done })
            .map_err(|_| GcError::FinalizerThreadLost)?;
        Ok(finished)
    }

    pub(crate) fn shutdown(&mut self) {
        let _ = self.sender.send(FinalizerMessage::Shutdown);
        let Some(handle) = self.handle.take() else {
            return;
        };
        // A finalizer that drops the last heap reference cannot join itself.
        if self.is_current() {
            return;
        }
        if handle.join().is_err() {
            error!("finalizer thread panicked");
        }
    }
}

fn run(receiver: Receiver<FinalizerMessage>) {
    for message in receiver.iter() {
        match message {
            FinalizerMessage::Batch { objects, done } => {
                // SAFETY: the collector condemned these objects and keeps
                // them allocated until `done` fires.
                let finalizers_run = unsafe { finalize_batch(&objects) };
                let _ = done.send(finalizers_run);
            }
            FinalizerMessage::Shutdown => break,
        }
    }
    debug!("finalizer thread exiting");
}

/// # Safety
/// Every object must be condemned and still allocated.
unsafe fn finalize_batch(objects: &[SendPtr]) -> usize {
    let mut finalizers_run = 0;
    for &object in objects {
        let header = unsafe { object.header() };
        debug_assert!(header.is_condemned());

        let (weak, user): (Vec<_>, Vec<_>) = header
            .take_finalizers()
            .into_iter()
            .partition(|finalizer| matches!(finalizer, Finalizer::ClearWeak(_)));

        for finalizer in weak.into_iter().chain(user) {
            match finalizer {
                Finalizer::ClearWeak(slot) => slot.invalidate(),
                Finalizer::User(callback) => {
                    finalizers_run += 1;
                    if catch_unwind(AssertUnwindSafe(callback)).is_err() {
                        error!("finalizer panicked; continuing with remaining objects");
                    }
                }
            }
        }
        trace!("finalized object {object:?}");
    }
    finalizers_run
}
