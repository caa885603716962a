//! Best-tip announcements to the rest of the node.

use crate::types::hash::Hash;
use tokio::sync::broadcast;

/// Receives notification whenever the best chain gains a new tip.
///
/// Invoked from inside the chain acceptor's serialized section, so
/// implementations must not block.
pub trait TipBroadcast: Send + Sync {
    fn notify_new_best_tip(&self, block_hash: Hash);
}

/// Discards notifications; for tools and tests without a relay layer.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullBroadcast;

impl TipBroadcast for NullBroadcast {
    fn notify_new_best_tip(&self, _block_hash: Hash) {}
}

/// Fans tip hashes out over a tokio broadcast channel.
///
/// Sending never blocks; when no subscriber is listening the hash is
/// dropped, which is the correct behavior for a best-effort relay.
pub struct BroadcastChannel {
    sender: broadcast::Sender<Hash>,
}

impl BroadcastChannel {
    pub fn new(capacity: usize) -> BroadcastChannel {
        let (sender, _) = broadcast::channel(capacity);
        BroadcastChannel { sender }
    }

    /// A new subscription receiving every tip announced from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Hash> {
        self.sender.subscribe()
    }
}

impl TipBroadcast for BroadcastChannel {
    fn notify_new_best_tip(&self, block_hash: Hash) {
        let _ = self.sender.send(block_hash);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_utils::utils::random_hash;

    #[test]
    fn subscribers_receive_announced_tips() {
        let channel = BroadcastChannel::new(8);
        let mut rx = channel.subscribe();

        let tip = random_hash();
        channel.notify_new_best_tip(tip);

        assert_eq!(rx.try_recv().unwrap(), tip);
    }

    #[test]
    fn send_without_subscribers_does_not_panic() {
        let channel = BroadcastChannel::new(8);
        channel.notify_new_best_tip(random_hash());
    }

    #[test]
    fn late_subscriber_misses_earlier_tips() {
        let channel = BroadcastChannel::new(8);
        channel.notify_new_best_tip(random_hash());

        let mut rx = channel.subscribe();
        assert!(rx.try_recv().is_err());
    }
}
