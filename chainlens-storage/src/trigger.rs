//! Change trigger backed by a tokio watch channel.

use chainlens_core::ChangeTrigger;
use tokio::sync::watch;

/// Trigger that bumps a version counter on every fire.
///
/// Consumers hold a [`watch::Receiver`] and await `changed()`; several
/// fires between two polls collapse into one wake-up, and the counter tells
/// how many there were.
#[derive(Debug)]
pub struct WatchTrigger {
    sender: watch::Sender<u64>,
}

impl Default for WatchTrigger {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchTrigger {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(0);
        Self { sender }
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.sender.subscribe()
    }

    /// Number of times the trigger has fired.
    pub fn version(&self) -> u64 {
        *self.sender.borrow()
    }
}

impl ChangeTrigger for WatchTrigger {
    fn fire(&self) {
        // send_modify updates the value even with no receivers alive.
        self.sender.send_modify(|version| *version += 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fire_wakes_subscribers() {
        let trigger = WatchTrigger::new();
        let mut receiver = trigger.subscribe();

        trigger.fire();
        receiver.changed().await.unwrap();
        assert_eq!(*receiver.borrow_and_update(), 1);
    }

    #[test]
    fn test_fire_without_receivers_still_counts() {
        let trigger = WatchTrigger::new();
        trigger.fire();
        trigger.fire();
        assert_eq!(trigger.version(), 2);
    }
}
