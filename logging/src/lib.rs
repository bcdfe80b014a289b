//! Common logging infrastructure: a [`Registry`] mapping named streams to
//! typed [`Logger`]s.
//!
//! Each OS thread driving a worker pool owns its own `Registry` (constructed
//! in [`Registry::new`] against that thread's start `Instant`); loggers are
//! not `Send`, matching the one-registry-per-thread design they're used in.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

pub mod events;

/// Binds names to typed, buffered log streams.
pub struct Registry {
    time: Instant,
    map: HashMap<String, Box<dyn Any>>,
}

impl Registry {
    /// Creates a new registry, timestamping all future events relative to `time`.
    pub fn new(time: Instant) -> Self {
        Registry { time, map: HashMap::new() }
    }

    /// Binds `name` to an action invoked on event batches, returning any
    /// previously-bound logger under that name. Existing `Logger<T>` handles
    /// obtained before this call keep writing to their original action;
    /// only handles obtained via a later [`Registry::get`] see the new one.
    pub fn insert<T: 'static>(
        &mut self,
        name: impl Into<String>,
        action: Box<dyn Fn(&Duration, &[(Duration, T)])>,
    ) -> Option<Box<dyn Any>> {
        let logger = Logger::<T>::new(self.time, action);
        self.map.insert(name.into(), Box::new(logger))
    }

    /// Removes a bound logger, signaling end-of-stream to its action once
    /// the last `Logger` handle referencing it is dropped.
    pub fn remove(&mut self, name: &str) -> Option<Box<dyn Any>> {
        self.map.remove(name)
    }

    /// Retrieves a shared handle to a bound logger, if `name` is bound and
    /// was bound with event type `T`.
    pub fn get<T: 'static>(&self, name: &str) -> Option<Logger<T>> {
        self.map.get(name).and_then(|entry| entry.downcast_ref::<Logger<T>>()).cloned()
    }
}

/// A cheaply-cloneable, buffering handle to a named log stream.
pub struct Logger<T> {
    time: Instant,
    action: Rc<dyn Fn(&Duration, &[(Duration, T)])>,
    buffer: Rc<RefCell<Vec<(Duration, T)>>>,
}

impl<T> Clone for Logger<T> {
    fn clone(&self) -> Self {
        Logger { time: self.time, action: self.action.clone(), buffer: self.buffer.clone() }
    }
}

impl<T> Logger<T> {
    /// Allocates a logger bound to `action`, timestamping events relative to `time`.
    pub fn new(time: Instant, action: Box<dyn Fn(&Duration, &[(Duration, T)])>) -> Self {
        Logger { time, action: Rc::from(action), buffer: Rc::new(RefCell::new(Vec::with_capacity(1024))) }
    }

    /// Records `event` at the current time, flushing the buffer to the
    /// installed action once it fills.
    pub fn log(&self, event: T) {
        let mut buffer = self.buffer.borrow_mut();
        buffer.push((self.time.elapsed(), event));
        if buffer.len() == buffer.capacity() {
            (self.action)(&self.time.elapsed(), &buffer[..]);
            buffer.clear();
        }
    }

    /// Flushes any buffered events to the installed action immediately.
    pub fn flush(&self) {
        let mut buffer = self.buffer.borrow_mut();
        if !buffer.is_empty() {
            (self.action)(&self.time.elapsed(), &buffer[..]);
            buffer.clear();
        }
    }
}
