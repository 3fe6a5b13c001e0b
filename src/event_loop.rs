use std::collections::VecDeque;
use std::fmt;
use tracing::trace;

type Task<C> = Box<dyn FnOnce(&mut C, &mut EventLoop<C>) + Send>;

/// A unit of work for the [`EventLoop`]: a payload bound to the handler that consumes it.
///
/// Handlers receive the shared context and the loop itself, so they may enqueue follow-up work.
/// Follow-ups always land behind everything already queued.
pub struct LoopEvent<C> {
    label: &'static str,
    is_async: bool,
    task: Task<C>,
}

impl<C: 'static> LoopEvent<C> {
    pub fn new<T>(label: &'static str, payload: T, handler: fn(T, &mut C, &mut EventLoop<C>)) -> Self
    where
        T: Send + 'static,
    {
        Self {
            label,
            is_async: false,
            task: Box::new(move |ctx, events| handler(payload, ctx, events)),
        }
    }

    /// An event whose work waits on outside readiness, such as socket polling or output delivery.
    /// It runs through the same queue as any other event.
    pub fn deferred<T>(
        label: &'static str,
        payload: T,
        handler: fn(T, &mut C, &mut EventLoop<C>),
    ) -> Self
    where
        T: Send + 'static,
    {
        Self {
            is_async: true,
            ..Self::new(label, payload, handler)
        }
    }
}

impl<C> LoopEvent<C> {
    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn is_async(&self) -> bool {
        self.is_async
    }
}

impl<C> fmt::Debug for LoopEvent<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopEvent")
            .field("label", &self.label)
            .field("is_async", &self.is_async)
            .finish()
    }
}

/// A single-threaded, cooperative FIFO scheduler.
///
/// Every event runs to completion before the next one is taken off the queue, so handlers never
/// observe each other half way through.
pub struct EventLoop<C> {
    queue: VecDeque<LoopEvent<C>>,
    running: bool,
}

impl<C> EventLoop<C> {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            running: true,
        }
    }

    pub fn enqueue(&mut self, event: LoopEvent<C>) {
        self.queue.push_back(event);
    }

    /// Runs the event at the head of the queue. Returns `false` when there was nothing to run.
    pub fn tick(&mut self, ctx: &mut C) -> bool {
        let Some(event) = self.queue.pop_front() else {
            return false;
        };

        trace!(event = event.label, is_async = event.is_async, "tick");
        (event.task)(ctx, self);

        true
    }

    /// Runs events until the queue is drained or the loop is stopped. Returns the number of events
    /// that ran.
    pub fn run(&mut self, ctx: &mut C) -> usize {
        let mut ticks = 0;

        while self.running && self.tick(ctx) {
            ticks += 1;
        }

        ticks
    }

    /// Stops the loop before it takes the next event. Queued events are kept.
    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl<C> Default for EventLoop<C> {
    fn default() -> Self {
        Self::new()
    }
}
