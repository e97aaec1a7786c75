use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Debounced, self-resetting motion flag.
///
/// There is only ever one reset deadline. A new signal moves it forward
/// instead of arming a second timer, so an older reset can never clear a
/// fresher alert.
pub struct MotionAlert {
    window: Duration,
    deadline: Option<Instant>,
    tx: watch::Sender<bool>,
}

impl MotionAlert {
    pub fn new(window: Duration) -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            window,
            deadline: None,
            tx,
        }
    }

    pub fn is_active(&self) -> bool {
        self.deadline.is_some()
    }

    /// When the flag drops back to inactive, if it is active
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    pub fn trigger(&mut self, now: Instant) {
        self.deadline = Some(now + self.window);
        self.publish(true);
    }

    /// Clear the flag if its deadline has passed. Returns true if it cleared.
    pub fn expire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                self.publish(false);
                true
            }
            _ => false,
        }
    }

    fn publish(&self, active: bool) {
        self.tx.send_if_modified(|current| {
            let changed = *current != active;
            *current = active;
            changed
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(2);

    #[test]
    fn test_trigger_then_expire() {
        let start = Instant::now();
        let mut alert = MotionAlert::new(WINDOW);
        let rx = alert.subscribe();

        alert.trigger(start);
        assert!(alert.is_active());
        assert!(*rx.borrow());

        assert!(!alert.expire(start + Duration::from_millis(1999)));
        assert!(alert.is_active());

        assert!(alert.expire(start + WINDOW));
        assert!(!alert.is_active());
        assert!(!*rx.borrow());
    }

    #[test]
    fn test_retrigger_extends_window() {
        let start = Instant::now();
        let mut alert = MotionAlert::new(WINDOW);

        alert.trigger(start);
        alert.trigger(start + Duration::from_millis(500));

        // The first signal's reset time no longer clears anything
        assert!(!alert.expire(start + WINDOW));
        assert!(alert.is_active());
        assert_eq!(alert.deadline(), Some(start + Duration::from_millis(2500)));

        assert!(alert.expire(start + Duration::from_millis(2500)));
    }

    #[test]
    fn test_retrigger_publishes_once() {
        let start = Instant::now();
        let mut alert = MotionAlert::new(WINDOW);
        let mut rx = alert.subscribe();

        alert.trigger(start);
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        alert.trigger(start + Duration::from_millis(100));
        assert!(!rx.has_changed().unwrap());
    }
}
