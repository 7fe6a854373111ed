use std::time::{Duration, Instant};
use tootleconf::SessionConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveAction {
    SendPing,
    Wait,
    TimedOut,
}

/// Ping/pong bookkeeping for one connection.
///
/// On every interval tick a ping goes out unless one is already pending; a
/// ping left unanswered for `timeout` ends the connection.
#[derive(Debug, Clone)]
pub struct Keepalive {
    interval: Duration,
    timeout: Duration,
    pending_since: Option<Instant>,
}

impl Keepalive {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            pending_since: None,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.ping_interval(), config.ping_timeout())
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// A ticker that skips its immediate first tick.
    pub fn ticker(&self) -> tokio::time::Interval {
        let start = tokio::time::Instant::now() + self.interval;
        let mut ticker = tokio::time::interval_at(start, self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker
    }

    pub fn on_tick(&mut self, now: Instant) -> KeepaliveAction {
        match self.pending_since {
            Some(sent) if now.saturating_duration_since(sent) >= self.timeout => {
                KeepaliveAction::TimedOut
            }
            Some(_) => KeepaliveAction::Wait,
            None => {
                self.pending_since = Some(now);
                KeepaliveAction::SendPing
            }
        }
    }

    pub fn on_pong(&mut self) {
        self.pending_since = None;
    }

    pub fn awaiting_pong(&self) -> bool {
        self.pending_since.is_some()
    }
}
