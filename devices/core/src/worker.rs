use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::{
    DeviceDescriptor, Error, Frame, Resolution, Result, Session, SessionStats, StreamReport,
};

struct Job {
    frame: Frame,
    reply: oneshot::Sender<Result<StreamReport>>,
}

/// Dedicated streaming thread for one session.
///
/// Frames are taken from a bounded queue strictly in submission order, one at a time.
/// Closing raises the session's cancel flag: the frame in flight stops at its next
/// message boundary or wait, and it and every queued frame are answered with
/// [`Error::SessionClosed`].
pub struct SessionWorker {
    queue: Option<mpsc::Sender<Job>>,
    cancel: Arc<AtomicBool>,
    thread: Option<JoinHandle<SessionStats>>,
    descriptor: DeviceDescriptor,
    resolution: Option<Resolution>,
}

impl SessionWorker {
    /// Move a ready session onto its own thread
    pub fn spawn(session: Session, queue_depth: usize) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        let cancel = session.cancel_handle();
        let descriptor = *session.descriptor();
        let resolution = session.resolution();

        let thread = std::thread::Builder::new()
            .name(format!("trcc-{}", descriptor.signature))
            .spawn({
                let cancel = cancel.clone();
                move || run(session, rx, cancel)
            })?;

        Ok(Self {
            queue: Some(tx),
            cancel,
            thread: Some(thread),
            descriptor,
            resolution,
        })
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub fn resolution(&self) -> Option<Resolution> {
        self.resolution
    }

    /// Queue a frame, waiting for space. The receiver resolves once the frame was sent.
    pub async fn enqueue(&self, frame: Frame) -> Result<oneshot::Receiver<Result<StreamReport>>> {
        let queue = self.queue.as_ref().ok_or(Error::SessionClosed)?;
        let (reply, rx) = oneshot::channel();
        queue
            .send(Job { frame, reply })
            .await
            .map_err(|_| Error::SessionClosed)?;
        Ok(rx)
    }

    /// Queue a frame and wait for its outcome
    pub async fn submit(&self, frame: Frame) -> Result<StreamReport> {
        let rx = self.enqueue(frame).await?;
        rx.await.unwrap_or(Err(Error::SessionClosed))
    }

    /// Stop the worker and close the session, blocking until the in-flight frame has
    /// reached a message boundary
    pub fn close(mut self) -> SessionStats {
        self.shutdown();
        self.thread
            .take()
            .and_then(|thread| thread.join().ok())
            .unwrap_or_default()
    }

    fn shutdown(&mut self) {
        self.cancel.store(true, Ordering::Release);
        self.queue.take();
    }
}

impl Drop for SessionWorker {
    fn drop(&mut self) {
        // the thread closes the session on its own once the queue drains
        self.shutdown();
    }
}

fn run(mut session: Session, mut rx: mpsc::Receiver<Job>, cancel: Arc<AtomicBool>) -> SessionStats {
    while let Some(job) = rx.blocking_recv() {
        let result = if cancel.load(Ordering::Acquire) {
            Err(Error::SessionClosed)
        } else {
            session.submit_frame(&job.frame)
        };
        // the submitter may have stopped waiting
        let _ = job.reply.send(result);
    }
    let stats = session.stats();
    session.close();
    debug!(?stats, "session worker stopped");
    stats
}
