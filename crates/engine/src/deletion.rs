//! Deferred destruction of device objects.
//!
//! Objects are registered together with the code that destroys them and are released in
//! reverse registration order once the owner knows the GPU no longer uses them: after a
//! frame's fence has signalled for per-frame queues, or after `device_wait_idle` for the
//! engine-wide queue.

type Deletor<C> = Box<dyn FnOnce(&C)>;

pub struct DeletionQueue<C: ?Sized> {
    deletors: Vec<Deletor<C>>,
}

impl<C: ?Sized> DeletionQueue<C> {
    pub fn new() -> Self {
        Self {
            deletors: Vec::new(),
        }
    }

    pub fn push<F>(&mut self, deletor: F)
    where
        F: FnOnce(&C) + 'static,
    {
        self.deletors.push(Box::new(deletor));
    }

    /// Runs every pending deletor, last registered first. The queue is empty afterward.
    pub fn flush(&mut self, ctx: &C) {
        if !self.deletors.is_empty() {
            log::trace!("Flushing {} deferred deletions", self.deletors.len());
        }
        while let Some(deletor) = self.deletors.pop() {
            deletor(ctx);
        }
    }

    pub fn len(&self) -> usize {
        self.deletors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deletors.is_empty()
    }
}

impl<C: ?Sized> Default for DeletionQueue<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ?Sized> Drop for DeletionQueue<C> {
    fn drop(&mut self) {
        if !self.deletors.is_empty() {
            log::warn!(
                "Deletion queue dropped with {} pending deletions, device objects leaked",
                self.deletors.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    type Log = RefCell<Vec<&'static str>>;

    #[test]
    fn flush_runs_in_reverse_order() {
        let mut queue: DeletionQueue<Log> = DeletionQueue::new();
        queue.push(|log: &Log| log.borrow_mut().push("allocator"));
        queue.push(|log: &Log| log.borrow_mut().push("draw image"));
        queue.push(|log: &Log| log.borrow_mut().push("pipeline"));

        let log = Log::default();
        queue.flush(&log);

        assert_eq!(*log.borrow(), vec!["pipeline", "draw image", "allocator"]);
    }

    #[test]
    fn flush_empties_the_queue() {
        let mut queue: DeletionQueue<Log> = DeletionQueue::new();
        queue.push(|log: &Log| log.borrow_mut().push("a"));
        queue.push(|log: &Log| log.borrow_mut().push("b"));
        assert_eq!(queue.len(), 2);

        let log = Log::default();
        queue.flush(&log);
        assert!(queue.is_empty());

        // a second flush must not run anything twice
        queue.flush(&log);
        assert_eq!(log.borrow().len(), 2);
    }

    #[test]
    fn queue_is_reusable_after_flush() {
        let mut queue: DeletionQueue<Log> = DeletionQueue::default();
        let log = Log::default();

        queue.push(|log: &Log| log.borrow_mut().push("frame 0"));
        queue.flush(&log);
        queue.push(|log: &Log| log.borrow_mut().push("frame 2"));
        queue.flush(&log);

        assert_eq!(*log.borrow(), vec!["frame 0", "frame 2"]);
    }

    #[test]
    fn deletors_own_their_captures() {
        let mut queue: DeletionQueue<RefCell<Vec<u64>>> = DeletionQueue::new();
        for handle in [10_u64, 20, 30] {
            queue.push(move |destroyed: &RefCell<Vec<u64>>| destroyed.borrow_mut().push(handle));
        }

        let destroyed = RefCell::new(Vec::new());
        queue.flush(&destroyed);
        assert_eq!(destroyed.into_inner(), vec![30, 20, 10]);
    }

    #[test]
    fn dropping_unflushed_queue_leaks_instead_of_running() {
        let handle = Rc::new(Cell::new(false));
        let captured = Rc::clone(&handle);

        let mut queue: DeletionQueue<()> = DeletionQueue::new();
        queue.push(move |_: &()| captured.set(true));
        assert!(!queue.is_empty());
        drop(queue);

        // the deletor was discarded with its captures, never called
        assert!(!handle.get());
        assert_eq!(Rc::strong_count(&handle), 1);
    }

    #[test]
    fn empty_flush_is_a_no_op() {
        let mut queue: DeletionQueue<Log> = DeletionQueue::new();
        let log = Log::default();
        queue.flush(&log);
        assert!(log.borrow().is_empty());
    }
}
