use std::sync::Arc;

use log::debug;

use crate::callbacks::ThreadInitCallback;
use crate::event_loop::EventLoop;
use crate::event_loop_thread::EventLoopThread;

/// A fixed set of I/O loop threads, handed out round-robin.
///
/// With zero workers the base (main) loop does all the I/O itself; with
/// one or more, the base loop only accepts and the workers take turns
/// owning new connections. The base loop is never part of the rotation.
pub struct EventLoopThreadPool {
    base_loop: Arc<EventLoop>,
    name: String,
    started: bool,
    num_threads: usize,
    next: usize,
    threads: Vec<EventLoopThread>,
    loops: Vec<Arc<EventLoop>>,
}

impl EventLoopThreadPool {
    pub fn new(base_loop: Arc<EventLoop>, name: &str) -> EventLoopThreadPool {
        EventLoopThreadPool {
            base_loop,
            name: name.to_string(),
            started: false,
            num_threads: 0,
            next: 0,
            threads: Vec::new(),
            loops: Vec::new(),
        }
    }

    /// Sets the worker count. Must be called before [`start`].
    ///
    /// [`start`]: EventLoopThreadPool::start
    pub fn set_thread_num(&mut self, num_threads: usize) {
        assert!(!self.started, "pool already started");
        self.num_threads = num_threads;
    }

    pub fn start(&mut self, init_callback: Option<ThreadInitCallback>) {
        assert!(!self.started, "pool already started");
        self.base_loop.assert_in_loop_thread();
        self.started = true;

        for i in 0..self.num_threads {
            let name = format!("{}{}", self.name, i);
            let mut thread = EventLoopThread::new(init_callback.clone(), name);
            self.loops.push(thread.start_loop());
            self.threads.push(thread);
        }
        debug!("pool {} started {} loop threads", self.name, self.num_threads);

        if self.num_threads == 0 {
            if let Some(callback) = init_callback {
                callback(&self.base_loop);
            }
        }
    }

    /// The loop for the next connection: the base loop when the pool is
    /// empty, otherwise the workers in turn.
    pub fn get_next_loop(&mut self) -> Arc<EventLoop> {
        assert!(self.started, "pool not started");
        if self.loops.is_empty() {
            return self.base_loop.clone();
        }
        let chosen = self.loops[self.next].clone();
        self.next = (self.next + 1) % self.loops.len();
        chosen
    }

    pub fn get_all_loops(&self) -> Vec<Arc<EventLoop>> {
        if self.loops.is_empty() {
            vec![self.base_loop.clone()]
        } else {
            self.loops.clone()
        }
    }

    pub fn started(&self) -> bool {
        self.started
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
