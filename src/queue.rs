//! Bounded connection queue & admission control.
//!
//! A ring buffer guarded by a mutex and condvar: simplest of the usual
//! admission-control shapes and idiomatic with `parking_lot::Condvar`,
//! already this engine's lock crate of choice elsewhere.

use std::collections::VecDeque;
use std::net::TcpStream;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Compile-time ceiling on queue capacity.
pub const MAX_QUEUE_SIZE: usize = 100;

struct State {
    ring: VecDeque<TcpStream>,
    capacity: usize,
    shutdown: bool,
}

pub struct ConnectionQueue {
    state: Mutex<State>,
    not_empty: Condvar,
}

impl ConnectionQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(MAX_QUEUE_SIZE).max(1);
        ConnectionQueue {
            state: Mutex::new(State {
                ring: VecDeque::with_capacity(capacity),
                capacity,
                shutdown: false,
            }),
            not_empty: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().ring.len()
    }

    /// Non-blocking producer side: rejects immediately when full rather
    /// than waiting, per 's fail-fast admission policy. Returns the
    /// socket back to the caller on rejection so it can write a 503 and
    /// close it — the queue never buffers rejected sockets.
    pub fn try_enqueue(&self, stream: TcpStream) -> Result<(), TcpStream> {
        let mut state = self.state.lock();
        if state.ring.len() >= state.capacity {
            return Err(stream);
        }
        state.ring.push_back(stream);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Blocking consumer side. Returns `None` once shutdown has been
    /// signaled and the queue has drained.
    pub fn dequeue(&self) -> Option<TcpStream> {
        let mut state = self.state.lock();
        loop {
            if let Some(stream) = state.ring.pop_front() {
                return Some(stream);
            }
            if state.shutdown {
                return None;
            }
            self.not_empty.wait_for(&mut state, Duration::from_millis(500));
        }
    }

    /// Wakes every blocked worker so they can observe shutdown.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        drop(state);
        self.not_empty.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};
    use std::sync::Arc;
    use std::thread;

    fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn admits_up_to_capacity_then_rejects() {
        let queue = ConnectionQueue::new(2);
        let (_c1, s1) = socket_pair();
        let (_c2, s2) = socket_pair();
        let (_c3, s3) = socket_pair();

        assert!(queue.try_enqueue(s1).is_ok());
        assert!(queue.try_enqueue(s2).is_ok());
        assert_eq!(queue.len(), 2);

        let rejected = queue.try_enqueue(s3);
        assert!(rejected.is_err(), "third connection should be rejected at capacity");
    }

    #[test]
    fn dequeue_is_fifo() {
        let queue = ConnectionQueue::new(4);
        let (_c1, s1) = socket_pair();
        let (_c2, s2) = socket_pair();
        let first_peer = s1.peer_addr().unwrap();
        let second_peer = s2.peer_addr().unwrap();

        queue.try_enqueue(s1).unwrap();
        queue.try_enqueue(s2).unwrap();

        let first = queue.dequeue().unwrap();
        let second = queue.dequeue().unwrap();
        assert_eq!(first.peer_addr().unwrap(), first_peer);
        assert_eq!(second.peer_addr().unwrap(), second_peer);
    }

    #[test]
    fn dequeue_after_admission_succeeds() {
        let queue = Arc::new(ConnectionQueue::new(1));
        let (_c1, s1) = socket_pair();
        queue.try_enqueue(s1).unwrap();

        let (_c2, s2) = socket_pair();
        assert!(queue.try_enqueue(s2.try_clone().unwrap()).is_err());

        assert!(queue.dequeue().is_some());
        assert!(queue.try_enqueue(s2).is_ok(), "slot freed after dequeue");
    }

    #[test]
    fn shutdown_wakes_blocked_consumer() {
        let queue = Arc::new(ConnectionQueue::new(4));
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.dequeue())
        };
        thread::sleep(Duration::from_millis(50));
        queue.shutdown();
        assert!(consumer.join().unwrap().is_none());
    }

    #[test]
    fn capacity_clamped_to_compile_time_ceiling() {
        let queue = ConnectionQueue::new(MAX_QUEUE_SIZE + 50);
        assert_eq!(queue.capacity(), MAX_QUEUE_SIZE);
    }
}
