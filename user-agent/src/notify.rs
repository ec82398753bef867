//! Event fan-out with isolated listeners.
//!
//! Two kinds of receivers hang off a [`Notifier`]:
//!   • callback listeners, run inline on the emitting thread;
//!   • channel subscribers (`crossbeam`), for code that wants to observe from
//!     another thread.
//!
//! A panicking listener is logged and skipped. The remaining listeners still
//! run and the emitter never sees the failure. Subscribers whose receiver
//! was dropped are pruned on the next emit.

use std::panic::{self, AssertUnwindSafe};

use crossbeam::channel::{self, Receiver, Sender};
use log::Level;

use crate::memdrv_log;

type Listener<E> = Box<dyn Fn(&E) + Send + 'static>;

pub struct Notifier<E: Clone> {
    name: &'static str,
    listeners: Vec<Listener<E>>,
    subscribers: Vec<Sender<E>>,
}

impl<E: Clone + std::fmt::Debug> Notifier<E> {
    pub fn new(name: &'static str) -> Self {
        Self { name, listeners: Vec::new(), subscribers: Vec::new() }
    }

    /// Register a callback.
    pub fn listen<F>(&mut self, f: F)
    where
        F: Fn(&E) + Send + 'static,
    {
        self.listeners.push(Box::new(f));
    }

    /// Open an unbounded channel that receives every future event.
    pub fn subscribe(&mut self) -> Receiver<E> {
        let (tx, rx) = channel::unbounded();
        self.subscribers.push(tx);
        rx
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len() + self.subscribers.len()
    }

    /// Deliver `event` to everyone. Never panics because of a listener.
    pub fn emit(&mut self, event: E) {
        for (idx, listener) in self.listeners.iter().enumerate() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener(&event)));
            if outcome.is_err() {
                memdrv_log!(Level::Error, "notify", "{} listener #{} panicked on {:?}; ignored", self.name, idx, event);
            }
        }
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl<E: Clone> std::fmt::Debug for Notifier<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("name", &self.name)
            .field("listeners", &self.listeners.len())
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}
