use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use log::warn;

use crate::callbacks::ThreadInitCallback;
use crate::event_loop::EventLoop;

/// One OS thread hosting exactly one [`EventLoop`].
///
/// The loop is built on the spawned thread (the only place it may be
/// built, given thread pinning) and its handle published back through a
/// condvar; [`start_loop`] blocks until the handle exists.
///
/// [`start_loop`]: EventLoopThread::start_loop
pub struct EventLoopThread {
    event_loop: Arc<(Mutex<Option<Arc<EventLoop>>>, Condvar)>,
    thread: Option<thread::JoinHandle<()>>,
    name: String,
    init_callback: Option<ThreadInitCallback>,
}

impl EventLoopThread {
    pub fn new(init_callback: Option<ThreadInitCallback>, name: String) -> EventLoopThread {
        EventLoopThread {
            event_loop: Arc::new((Mutex::new(None), Condvar::new())),
            thread: None,
            name,
            init_callback,
        }
    }

    /// Spawns the worker and returns its loop once the worker has built
    /// it. The worker runs the init callback, if any, before it starts
    /// polling.
    pub fn start_loop(&mut self) -> Arc<EventLoop> {
        let shared = self.event_loop.clone();
        let init_callback = self.init_callback.take();
        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                let event_loop = EventLoop::new();
                if let Some(callback) = &init_callback {
                    callback(&event_loop);
                }
                {
                    let (slot, condvar) = &*shared;
                    *slot.lock().unwrap() = Some(event_loop.clone());
                    condvar.notify_one();
                }
                event_loop.run();
                let (slot, _) = &*shared;
                *slot.lock().unwrap() = None;
            })
            .unwrap_or_else(|err| fatal!("spawning loop thread failed: {}", err));
        self.thread = Some(handle);

        let (slot, condvar) = &*self.event_loop;
        let mut published = slot.lock().unwrap();
        while published.is_none() {
            published = condvar.wait(published).unwrap();
        }
        published.clone().unwrap()
    }
}

impl Drop for EventLoopThread {
    fn drop(&mut self) {
        let event_loop = self.event_loop.0.lock().unwrap().take();
        if let Some(event_loop) = event_loop {
            // The loop may already be gone if the thread is exiting on
            // its own; quit is idempotent either way.
            event_loop.quit();
        }
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("loop thread panicked");
            }
        }
    }
}
