//! Client-side view of the link to the host.
//!
//! ```text
//!   [Connected] ──(silence > timeout)──→ [Reconnecting{1}] ──(grace expired)──→ [Reconnecting{2}] ...
//!        ↑                                      │                                      │
//!        └──────(heartbeat newer than baseline)─┴──────────────────────────────────────┤
//!                                                                                      ▼ (attempts exhausted)
//!                                                                                  [Failed]
//! ```

use std::time::Duration;

use tokio::time::Instant;

use crate::SessionError;

#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// How often a heartbeat is sent.
    pub interval: Duration,
    /// Silence after which the link counts as lost.
    pub timeout: Duration,
    /// Delay before each reconnection attempt. The last entry is reused
    /// once the schedule runs out.
    pub backoff: Vec<Duration>,
    pub max_reconnect_attempts: u32,
    /// How long an attempt may take to produce a newer heartbeat.
    pub success_grace: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(20),
            backoff: [1, 2, 4, 8, 15].into_iter().map(Duration::from_secs).collect(),
            max_reconnect_attempts: 5,
            success_grace: Duration::from_secs(3),
        }
    }
}

impl HeartbeatConfig {
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.interval.is_zero() || self.timeout.is_zero() {
            return Err(SessionError::InvalidConfig(
                "heartbeat interval and timeout must be non-zero".into(),
            ));
        }
        if self.backoff.is_empty() {
            return Err(SessionError::InvalidConfig("backoff schedule is empty".into()));
        }
        if self.max_reconnect_attempts == 0 {
            return Err(SessionError::InvalidConfig(
                "max_reconnect_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Delay before attempt `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let index = attempt.saturating_sub(1) as usize;
        self.backoff
            .get(index)
            .or_else(|| self.backoff.last())
            .copied()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Reconnecting { attempt: u32 },
    Failed,
}

/// What a UI should react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    /// Show the "connection lost" modal.
    ConnectionLost,
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// Time to redial the host.
    AttemptReconnect { attempt: u32 },
    /// Close the modal.
    Reconnected,
    /// Out of attempts. Offer reload or leave.
    Failed,
}

/// Tracks host liveness and drives the reconnection schedule.
pub struct ConnectionStatusManager {
    config: HeartbeatConfig,
    status: ConnectionStatus,
    last_seen: Instant,
    last_timestamp: Option<u64>,
    /// Heartbeat timestamp recorded when the link was lost or the current
    /// attempt began. Success needs something strictly newer.
    baseline: Option<u64>,
    next_attempt_at: Option<Instant>,
    attempt_deadline: Option<Instant>,
}

impl ConnectionStatusManager {
    pub fn new(config: HeartbeatConfig, now: Instant) -> Self {
        Self {
            config,
            status: ConnectionStatus::Connected,
            last_seen: now,
            last_timestamp: None,
            baseline: None,
            next_attempt_at: None,
            attempt_deadline: None,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn config(&self) -> &HeartbeatConfig {
        &self.config
    }

    pub fn last_timestamp(&self) -> Option<u64> {
        self.last_timestamp
    }

    /// Any inbound traffic counts as liveness while connected.
    pub fn touch(&mut self, now: Instant) {
        self.last_seen = now;
    }

    /// Records a heartbeat from the host.
    pub fn record_heartbeat(&mut self, timestamp: u64, now: Instant) -> Vec<StatusEvent> {
        self.touch(now);
        self.last_timestamp = Some(self.last_timestamp.map_or(timestamp, |t| t.max(timestamp)));

        let ConnectionStatus::Reconnecting { attempt } = self.status else {
            return Vec::new();
        };
        let newer = self.baseline.is_none_or(|baseline| timestamp > baseline);
        if !newer {
            return Vec::new();
        }
        // Too late for this attempt; the next poll moves on to another one.
        if self.attempt_deadline.is_some_and(|deadline| now > deadline) {
            tracing::debug!(attempt, timestamp, "heartbeat arrived after the attempt's grace period");
            return Vec::new();
        }

        tracing::info!(attempt, timestamp, "connection to host restored");
        self.status = ConnectionStatus::Connected;
        self.baseline = None;
        self.next_attempt_at = None;
        self.attempt_deadline = None;
        vec![StatusEvent::Reconnected]
    }

    /// The link dropped. Only acts when currently connected.
    pub fn handle_disconnection(&mut self, now: Instant) -> Vec<StatusEvent> {
        if self.status != ConnectionStatus::Connected {
            tracing::debug!(status = ?self.status, "disconnection already being handled");
            return Vec::new();
        }

        let delay = self.config.backoff_for(1);
        tracing::warn!(?delay, "connection to host lost");
        self.status = ConnectionStatus::Reconnecting { attempt: 1 };
        self.baseline = self.last_timestamp;
        self.next_attempt_at = Some(now + delay);
        self.attempt_deadline = None;
        vec![
            StatusEvent::ConnectionLost,
            StatusEvent::ReconnectScheduled { attempt: 1, delay },
        ]
    }

    /// Advances timers. Call periodically.
    pub fn poll(&mut self, now: Instant) -> Vec<StatusEvent> {
        match self.status {
            ConnectionStatus::Connected => {
                if now.saturating_duration_since(self.last_seen) > self.config.timeout {
                    return self.handle_disconnection(now);
                }
                Vec::new()
            }
            ConnectionStatus::Reconnecting { attempt } => {
                if let Some(at) = self.next_attempt_at {
                    if now >= at {
                        self.next_attempt_at = None;
                        self.attempt_deadline = Some(now + self.config.success_grace);
                        self.baseline = self.last_timestamp;
                        tracing::info!(attempt, "attempting reconnection");
                        return vec![StatusEvent::AttemptReconnect { attempt }];
                    }
                    return Vec::new();
                }

                match self.attempt_deadline {
                    Some(deadline) if now > deadline => {
                        self.attempt_deadline = None;
                        if attempt >= self.config.max_reconnect_attempts {
                            tracing::warn!(attempt, "reconnection failed");
                            self.status = ConnectionStatus::Failed;
                            return vec![StatusEvent::Failed];
                        }
                        let next = attempt + 1;
                        let delay = self.config.backoff_for(next);
                        self.status = ConnectionStatus::Reconnecting { attempt: next };
                        self.next_attempt_at = Some(now + delay);
                        vec![StatusEvent::ReconnectScheduled { attempt: next, delay }]
                    }
                    _ => Vec::new(),
                }
            }
            ConnectionStatus::Failed => Vec::new(),
        }
    }

    /// Back to connected, e.g. after a manual reload.
    pub fn reset(&mut self, now: Instant) {
        self.status = ConnectionStatus::Connected;
        self.last_seen = now;
        self.baseline = None;
        self.next_attempt_at = None;
        self.attempt_deadline = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_validate_default_config() {
        assert!(HeartbeatConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_backoff() {
        let config = HeartbeatConfig {
            backoff: Vec::new(),
            ..HeartbeatConfig::default()
        };
        assert!(matches!(config.validate(), Err(SessionError::InvalidConfig(_))));
    }

    #[test]
    fn test_backoff_for_reuses_last_entry() {
        let config = HeartbeatConfig::default();
        assert_eq!(config.backoff_for(1), secs(1));
        assert_eq!(config.backoff_for(5), secs(15));
        assert_eq!(config.backoff_for(9), secs(15));
    }

    #[test]
    fn test_poll_detects_silence_after_timeout() {
        let t0 = Instant::now();
        let mut mgr = ConnectionStatusManager::new(HeartbeatConfig::default(), t0);
        mgr.record_heartbeat(100, t0);

        assert!(mgr.poll(t0 + secs(20)).is_empty());
        assert_eq!(
            mgr.poll(t0 + secs(21)),
            vec![
                StatusEvent::ConnectionLost,
                StatusEvent::ReconnectScheduled {
                    attempt: 1,
                    delay: secs(1)
                },
            ]
        );
        assert_eq!(mgr.status(), ConnectionStatus::Reconnecting { attempt: 1 });
    }

    #[test]
    fn test_reconnect_success_within_grace() {
        let t0 = Instant::now();
        let mut mgr = ConnectionStatusManager::new(HeartbeatConfig::default(), t0);
        mgr.record_heartbeat(1_000, t0);

        let lost = mgr.handle_disconnection(t0 + secs(1));
        assert_eq!(lost.len(), 2);
        // A second disconnection while reconnecting changes nothing.
        assert!(mgr.handle_disconnection(t0 + secs(1)).is_empty());

        assert_eq!(
            mgr.poll(t0 + secs(2)),
            vec![StatusEvent::AttemptReconnect { attempt: 1 }]
        );
        // A replayed timestamp does not count.
        assert!(mgr.record_heartbeat(1_000, t0 + secs(3)).is_empty());
        assert_eq!(mgr.status(), ConnectionStatus::Reconnecting { attempt: 1 });

        assert_eq!(
            mgr.record_heartbeat(1_001, t0 + secs(4)),
            vec![StatusEvent::Reconnected]
        );
        assert_eq!(mgr.status(), ConnectionStatus::Connected);
        assert!(mgr.poll(t0 + secs(5)).is_empty());
    }

    #[test]
    fn test_attempts_walk_schedule_then_fail() {
        let config = HeartbeatConfig {
            backoff: vec![secs(1), secs(2)],
            max_reconnect_attempts: 3,
            success_grace: secs(1),
            ..HeartbeatConfig::default()
        };
        let t0 = Instant::now();
        let mut mgr = ConnectionStatusManager::new(config, t0);
        mgr.handle_disconnection(t0);

        let mut now = t0;
        let mut events = Vec::new();
        for _ in 0..40 {
            now += ms(500);
            events.extend(mgr.poll(now));
        }

        assert_eq!(
            events,
            vec![
                StatusEvent::AttemptReconnect { attempt: 1 },
                StatusEvent::ReconnectScheduled {
                    attempt: 2,
                    delay: secs(2)
                },
                StatusEvent::AttemptReconnect { attempt: 2 },
                StatusEvent::ReconnectScheduled {
                    attempt: 3,
                    delay: secs(2)
                },
                StatusEvent::AttemptReconnect { attempt: 3 },
                StatusEvent::Failed,
            ]
        );
        assert_eq!(mgr.status(), ConnectionStatus::Failed);
        // Failed is terminal until reset.
        assert!(mgr.handle_disconnection(now).is_empty());
        assert!(mgr.record_heartbeat(9_999, now).is_empty());

        mgr.reset(now);
        assert_eq!(mgr.status(), ConnectionStatus::Connected);
    }

    #[test]
    fn test_heartbeat_after_grace_does_not_restore() {
        let t0 = Instant::now();
        let mut mgr = ConnectionStatusManager::new(HeartbeatConfig::default(), t0);
        mgr.record_heartbeat(1_000, t0);
        mgr.handle_disconnection(t0);
        assert_eq!(
            mgr.poll(t0 + secs(1)),
            vec![StatusEvent::AttemptReconnect { attempt: 1 }]
        );

        // The grace period ended at t0+4s but nothing polled since.
        assert!(mgr.record_heartbeat(1_001, t0 + secs(5)).is_empty());
        assert_eq!(mgr.status(), ConnectionStatus::Reconnecting { attempt: 1 });
        assert_eq!(
            mgr.poll(t0 + secs(5)),
            vec![StatusEvent::ReconnectScheduled {
                attempt: 2,
                delay: secs(2)
            }]
        );
    }

    #[test]
    fn test_heartbeat_without_baseline_restores() {
        let t0 = Instant::now();
        let mut mgr = ConnectionStatusManager::new(HeartbeatConfig::default(), t0);
        mgr.handle_disconnection(t0);
        assert_eq!(mgr.record_heartbeat(1, t0), vec![StatusEvent::Reconnected]);
    }

    #[test]
    fn test_touch_keeps_link_alive() {
        let t0 = Instant::now();
        let mut mgr = ConnectionStatusManager::new(HeartbeatConfig::default(), t0);
        mgr.touch(t0 + secs(15));
        assert!(mgr.poll(t0 + secs(30)).is_empty());
        assert_eq!(mgr.status(), ConnectionStatus::Connected);
    }
}
