//! Application-level keepalive.
//!
//! While a session is `Connected` a [`HeartbeatTimer`] queues one `Ping`
//! message every interval on the session's outbound channel.  The session task
//! writes it like any other frame, so a dead peer shows up as a write or read
//! error and the session fails.
//!
//! The timer is its own task, independent of the receive loop.  It is created
//! only by the transition into `Connected` and stopped by the transition out of
//! it; dropping the timer also stops it.

use std::time::Duration;

use codelink_core::{encode_message, WireMessage};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, warn};

/// Shortest period the timer runs at; `interval` rejects a zero period.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// A running heartbeat task.
#[derive(Debug)]
pub struct HeartbeatTimer {
    task: JoinHandle<()>,
}

impl HeartbeatTimer {
    /// Spawns the heartbeat task.  The first `Ping` goes out one full
    /// `period` after the call.  A zero `period` is raised to 1 ms.
    pub fn start(period: Duration, outbound: mpsc::Sender<Message>) -> Self {
        if period < MIN_PERIOD {
            warn!("heartbeat interval {period:?} too short; using {MIN_PERIOD:?}");
        }
        let period = period.max(MIN_PERIOD);
        let task = tokio::spawn(async move {
            let ping = match encode_message(&WireMessage::Ping) {
                Ok(text) => text,
                Err(e) => {
                    error!("failed to encode heartbeat Ping: {e}");
                    return;
                }
            };

            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick resolves immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if outbound.send(Message::Text(ping.clone())).await.is_err() {
                    debug!("heartbeat: outbound channel closed");
                    break;
                }
                debug!("heartbeat: queued Ping");
            }
        });

        Self { task }
    }

    /// Stops the heartbeat.  No further `Ping` is queued after this returns.
    pub fn stop(self) {
        self.task.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for HeartbeatTimer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn expect_ping(msg: Message) {
        match msg {
            Message::Text(text) => assert_eq!(text, r#"{"type":"Ping"}"#),
            other => panic!("expected text Ping, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_ping_after_one_period() {
        // Arrange
        let (tx, mut rx) = mpsc::channel(8);
        let _timer = HeartbeatTimer::start(Duration::from_secs(30), tx);

        // Act
        tokio::time::sleep(Duration::from_secs(29)).await;
        let early = rx.try_recv();
        tokio::time::sleep(Duration::from_secs(2)).await;

        // Assert
        assert!(early.is_err(), "no Ping before the first period elapses");
        expect_ping(rx.try_recv().expect("Ping after one period"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_period_is_clamped_instead_of_panicking() {
        // Arrange
        let (tx, mut rx) = mpsc::channel(8);
        let timer = HeartbeatTimer::start(Duration::ZERO, tx);

        // Act
        tokio::time::sleep(Duration::from_millis(5)).await;

        // Assert
        assert!(timer.is_running(), "timer task must not have panicked");
        expect_ping(rx.try_recv().expect("Ping at the clamped period"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pings_repeat_every_period() {
        // Arrange
        let (tx, mut rx) = mpsc::channel(8);
        let _timer = HeartbeatTimer::start(Duration::from_secs(30), tx);

        // Act
        tokio::time::sleep(Duration::from_secs(95)).await;

        // Assert
        let mut count = 0;
        while let Ok(msg) = rx.try_recv() {
            expect_ping(msg);
            count += 1;
        }
        assert_eq!(count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_prevents_further_pings() {
        // Arrange
        let (tx, mut rx) = mpsc::channel(8);
        let timer = HeartbeatTimer::start(Duration::from_secs(1), tx);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(rx.try_recv().is_ok());

        // Act
        timer.stop();
        tokio::time::sleep(Duration::from_secs(5)).await;

        // Assert
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_ends_when_channel_closes() {
        // Arrange
        let (tx, rx) = mpsc::channel(8);
        let timer = HeartbeatTimer::start(Duration::from_secs(1), tx);

        // Act
        drop(rx);
        tokio::time::sleep(Duration::from_secs(3)).await;

        // Assert
        assert!(!timer.is_running());
    }
}
