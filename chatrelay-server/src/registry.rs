//! Registry of connected clients: display name → outbound line queue.
//!
//! This is the only shared mutable state in the server. Every operation
//! takes the lock once, does its work, and releases it; nothing here awaits,
//! so the lock is never held across a socket read or write. Deliveries use
//! `try_send` into each client's bounded queue, and the client's writer task
//! does the actual socket I/O. A queue that overflows or closes raises that
//! client's [`StuckSignal`], and its handler disconnects it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chatrelay_sdk::protocol::presence_line;
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};
use tokio::sync::mpsc::error::TrySendError;

/// Sender half of a client's outbound line queue.
pub type Outbox = mpsc::Sender<String>;

/// Set once a client can no longer keep up with its queue.
#[derive(Debug, Default)]
pub struct StuckSignal {
    raised: AtomicBool,
    notify: Notify,
}

impl StuckSignal {
    pub fn raise(&self) {
        if !self.raised.swap(true, Ordering::AcqRel) {
            // notify_one keeps a permit if the handler is not waiting yet
            self.notify.notify_one();
        }
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }

    /// Resolve once the signal has been raised.
    pub async fn raised(&self) {
        if self.is_raised() {
            return;
        }
        self.notify.notified().await;
    }
}

/// A client's outbound queue paired with its stuck signal.
#[derive(Debug, Clone)]
pub struct Peer {
    outbox: Outbox,
    stuck: Arc<StuckSignal>,
}

impl Peer {
    pub fn new(outbox: Outbox) -> Self {
        Self {
            outbox,
            stuck: Arc::new(StuckSignal::default()),
        }
    }

    /// Queue `line` without waiting. On overflow or a closed queue the line
    /// is dropped and the peer is marked stuck.
    pub fn deliver(&self, who: &str, line: &str) -> bool {
        match self.outbox.try_send(line.to_string()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                if !self.stuck.is_raised() {
                    tracing::warn!(who, "Send buffer full, disconnecting client");
                }
                self.stuck.raise();
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(who, "Send channel closed, dropping line");
                self.stuck.raise();
                false
            }
        }
    }

    pub fn is_stuck(&self) -> bool {
        self.stuck.is_raised()
    }

    /// Resolve once a delivery to this peer has failed.
    pub async fn stuck(&self) {
        self.stuck.raised().await
    }
}

/// Connected clients in join order.
#[derive(Default)]
pub struct ClientRegistry {
    clients: Mutex<Vec<(String, Peer)>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `name` for `peer`. Returns `false` without changing anything
    /// if the name is already taken.
    pub fn try_register(&self, name: &str, peer: Peer) -> bool {
        let mut clients = self.clients.lock();
        if clients.iter().any(|(n, _)| n == name) {
            return false;
        }
        clients.push((name.to_string(), peer));
        true
    }

    /// Like [`try_register`](Self::try_register), but `greeting` is queued on
    /// `peer` before the entry becomes visible, so it is the first line
    /// the client receives ahead of any broadcast.
    pub fn try_register_with_greeting(&self, name: &str, peer: Peer, greeting: &str) -> bool {
        let mut clients = self.clients.lock();
        if clients.iter().any(|(n, _)| n == name) {
            return false;
        }
        peer.deliver(name, greeting);
        clients.push((name.to_string(), peer));
        true
    }

    /// Release `name`. Returns whether an entry was removed; removing an
    /// absent name is a no-op.
    pub fn unregister(&self, name: &str) -> bool {
        let mut clients = self.clients.lock();
        match clients.iter().position(|(n, _)| n == name) {
            Some(idx) => {
                clients.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Queue `line` for every registered client. The whole fan-out happens
    /// under one lock acquisition, so a concurrent join or leave lands either
    /// before or after it. Returns how many queues accepted the line.
    pub fn broadcast(&self, line: &str) -> usize {
        let clients = self.clients.lock();
        clients
            .iter()
            .filter(|(name, peer)| peer.deliver(name, line))
            .count()
    }

    /// Broadcast the presence list. The list is read under the same lock as
    /// the fan-out, so two racing joins can never leave clients holding a
    /// stale list.
    pub fn broadcast_presence(&self) -> usize {
        let clients = self.clients.lock();
        let names: Vec<&str> = clients.iter().map(|(n, _)| n.as_str()).collect();
        let line = presence_line(&names);
        clients
            .iter()
            .filter(|(name, peer)| peer.deliver(name, &line))
            .count()
    }

    /// Queue `line` for one client. Returns whether `name` is registered.
    pub fn send_to(&self, name: &str, line: &str) -> bool {
        let clients = self.clients.lock();
        match clients.iter().find(|(n, _)| n == name) {
            Some((name, peer)) => {
                peer.deliver(name, line);
                true
            }
            None => false,
        }
    }

    /// Snapshot of registered names in join order.
    pub fn list_names(&self) -> Vec<String> {
        self.clients.lock().iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outbox() -> (Peer, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(16);
        (Peer::new(tx), rx)
    }

    fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn names_are_unique() {
        let reg = ClientRegistry::new();
        let (a, _ra) = outbox();
        let (b, mut rb) = outbox();
        assert!(reg.try_register("alice", a));
        assert!(!reg.try_register("alice", b.clone()));
        assert_eq!(reg.len(), 1);

        // The loser's outbox was never stored.
        reg.broadcast("hello");
        assert!(drain(&mut rb).is_empty());
    }

    #[test]
    fn unregister_is_idempotent() {
        let reg = ClientRegistry::new();
        let (a, _ra) = outbox();
        reg.try_register("alice", a);
        assert!(reg.unregister("alice"));
        assert!(!reg.unregister("alice"));
        assert!(!reg.unregister("nobody"));
        assert!(reg.is_empty());
    }

    #[test]
    fn list_keeps_join_order_after_leaves() {
        let reg = ClientRegistry::new();
        let mut keep = Vec::new();
        for name in ["n1", "n2", "n3", "n4", "n5", "n6"] {
            let (tx, rx) = outbox();
            assert!(reg.try_register(name, tx));
            keep.push(rx);
        }
        reg.unregister("n2");
        reg.unregister("n5");
        assert_eq!(reg.list_names(), vec!["n1", "n3", "n4", "n6"]);

        // A returning name goes to the back.
        let (tx, _rx) = outbox();
        reg.try_register("n2", tx);
        assert_eq!(reg.list_names(), vec!["n1", "n3", "n4", "n6", "n2"]);
    }

    #[test]
    fn broadcast_reaches_every_client_once() {
        let reg = ClientRegistry::new();
        let (a, mut ra) = outbox();
        let (b, mut rb) = outbox();
        reg.try_register("alice", a);
        reg.try_register("bob", b);

        assert_eq!(reg.broadcast("one"), 2);
        reg.unregister("alice");
        assert_eq!(reg.broadcast("two"), 1);

        assert_eq!(drain(&mut ra), vec!["one"]);
        assert_eq!(drain(&mut rb), vec!["one", "two"]);
    }

    #[test]
    fn greeting_is_queued_only_on_success() {
        let reg = ClientRegistry::new();
        let (a, mut ra) = outbox();
        let (b, mut rb) = outbox();
        assert!(reg.try_register_with_greeting("alice", a, "NAMEACCEPTED alice"));
        assert!(!reg.try_register_with_greeting("alice", b, "NAMEACCEPTED alice"));
        reg.broadcast("after");
        assert_eq!(drain(&mut ra), vec!["NAMEACCEPTED alice", "after"]);
        assert!(drain(&mut rb).is_empty());
    }

    #[test]
    fn presence_lists_current_names() {
        let reg = ClientRegistry::new();
        let (a, mut ra) = outbox();
        let (b, mut rb) = outbox();
        reg.try_register("alice", a);
        reg.try_register("bob", b);
        assert_eq!(reg.broadcast_presence(), 2);
        reg.unregister("alice");
        reg.broadcast_presence();
        assert_eq!(drain(&mut ra), vec!["USERLIST alice,bob"]);
        assert_eq!(drain(&mut rb), vec!["USERLIST alice,bob", "USERLIST bob"]);
    }

    #[test]
    fn send_to_reports_presence() {
        let reg = ClientRegistry::new();
        let (a, mut ra) = outbox();
        reg.try_register("alice", a);
        assert!(reg.send_to("alice", "psst"));
        assert!(!reg.send_to("bob", "psst"));
        assert_eq!(drain(&mut ra), vec!["psst"]);
    }

    #[test]
    fn full_queue_does_not_block_others() {
        let reg = ClientRegistry::new();
        let (tx, _rs) = mpsc::channel(1);
        let slow = Peer::new(tx);
        let (fast, mut rf) = outbox();
        reg.try_register("slow", slow.clone());
        reg.try_register("fast", fast.clone());

        assert_eq!(reg.broadcast("1"), 2);
        assert!(!slow.is_stuck());
        assert_eq!(reg.broadcast("2"), 1);
        assert_eq!(drain(&mut rf), vec!["1", "2"]);
        assert!(slow.is_stuck());
        assert!(!fast.is_stuck());
    }

    #[test]
    fn targeted_overflow_marks_peer_stuck() {
        let reg = ClientRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        let peer = Peer::new(tx);
        reg.try_register("alice", peer.clone());
        assert!(reg.send_to("alice", "one"));
        assert!(!peer.is_stuck());
        reg.send_to("alice", "two");
        assert!(peer.is_stuck());
    }

    #[test]
    fn closed_queue_marks_peer_stuck() {
        let reg = ClientRegistry::new();
        let (tx, rx) = mpsc::channel(4);
        let peer = Peer::new(tx);
        reg.try_register("alice", peer.clone());
        drop(rx);
        reg.broadcast_presence();
        assert!(peer.is_stuck());
    }

    #[tokio::test]
    async fn stuck_signal_wakes_a_later_waiter() {
        let (tx, _rx) = mpsc::channel(1);
        let peer = Peer::new(tx);
        peer.deliver("alice", "fills the queue");
        peer.deliver("alice", "overflows");
        tokio::time::timeout(std::time::Duration::from_secs(1), peer.stuck())
            .await
            .expect("signal already raised");
    }

    #[tokio::test]
    async fn stuck_signal_wakes_a_waiting_handler() {
        let (tx, _rx) = mpsc::channel(1);
        let peer = Peer::new(tx);
        let waiter = {
            let peer = peer.clone();
            tokio::spawn(async move { peer.stuck().await })
        };
        tokio::task::yield_now().await;
        peer.deliver("alice", "a");
        peer.deliver("alice", "b");
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("waiter woke")
            .unwrap();
    }

    #[test]
    fn concurrent_claims_have_one_winner() {
        let reg = Arc::new(ClientRegistry::new());
        let handles: Vec<_> = (0..32)
            .map(|_| {
                let reg = Arc::clone(&reg);
                std::thread::spawn(move || {
                    let (tx, _rx) = mpsc::channel(1);
                    reg.try_register("alice", Peer::new(tx))
                })
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
        assert_eq!(reg.list_names(), vec!["alice"]);
    }

    #[test]
    fn concurrent_distinct_names_all_register() {
        let reg = Arc::new(ClientRegistry::new());
        let handles: Vec<_> = (0..32)
            .map(|i| {
                let reg = Arc::clone(&reg);
                std::thread::spawn(move || {
                    let (tx, _rx) = mpsc::channel(1);
                    reg.try_register(&format!("user{i}"), Peer::new(tx))
                })
            })
            .collect();
        assert!(handles.into_iter().all(|h| h.join().unwrap()));
        assert_eq!(reg.len(), 32);
    }
}
