//! Connection lifecycle state machine and startup grace gate.
//!
//! Pure bookkeeping with no I/O: the connection loop in
//! [`super::Transport`] drives these types from its socket callbacks, and
//! tests drive them directly.
//!
//! ```text
//!                 begin_connect            opened
//! Disconnected ───────────────► Connecting ──────► Connected
//!                                 ▲   │                │
//!                   begin_connect │   │ lost           │ lost
//!                                 │   ▼                ▼
//!                             Reconnecting ◄── attempts < max
//!                                             attempts >= max ──► Exhausted
//!
//! close() from any state ──► Disconnected (terminal)
//! ```

use std::time::Duration;

use tokio::time::Instant;

/// Connection state as seen by the rest of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected. Initial state, and terminal after an explicit close.
    #[default]
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Connected and ready; the only state in which frames flow.
    Connected,
    /// Waiting out the reconnect delay.
    Reconnecting,
    /// Reconnect budget spent. Terminal.
    Exhausted,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Exhausted => "exhausted",
        };
        f.write_str(name)
    }
}

/// What the connection loop should do after losing the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Wait the reconnect delay, then connect again.
    Reconnect {
        /// 1-based number of this reconnect attempt.
        attempt: u32,
    },
    /// Budget spent; stop for good.
    Exhausted,
    /// An explicit close already happened; stop quietly.
    Closed,
}

/// Connection state plus attempt counter and has-ever-connected flag.
#[derive(Debug, Clone)]
pub struct ConnectionLifecycle {
    state: ConnectionState,
    attempts: u32,
    max_attempts: u32,
    ever_connected: bool,
    closed: bool,
}

impl ConnectionLifecycle {
    /// New lifecycle in `Disconnected` allowing `max_attempts` reconnects.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempts: 0,
            max_attempts,
            ever_connected: false,
            closed: false,
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Reconnect attempts made since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether any connection has ever opened.
    pub fn ever_connected(&self) -> bool {
        self.ever_connected
    }

    /// Whether inbound frames may be accepted right now.
    pub fn accepts_frames(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Enter `Connecting`. Returns `false` when the lifecycle is terminal.
    pub fn begin_connect(&mut self) -> bool {
        if self.closed || self.state == ConnectionState::Exhausted {
            return false;
        }
        self.state = ConnectionState::Connecting;
        true
    }

    /// The socket opened: reset the attempt counter.
    pub fn opened(&mut self) {
        if self.closed {
            return;
        }
        self.state = ConnectionState::Connected;
        self.attempts = 0;
        self.ever_connected = true;
    }

    /// The socket closed unexpectedly or a connect attempt failed.
    pub fn connection_lost(&mut self) -> CloseOutcome {
        if self.closed {
            return CloseOutcome::Closed;
        }
        if self.state == ConnectionState::Exhausted {
            return CloseOutcome::Exhausted;
        }
        if self.attempts < self.max_attempts {
            self.attempts += 1;
            self.state = ConnectionState::Reconnecting;
            CloseOutcome::Reconnect {
                attempt: self.attempts,
            }
        } else {
            self.state = ConnectionState::Exhausted;
            CloseOutcome::Exhausted
        }
    }

    /// Explicit close: terminal, suppresses reconnection.
    pub fn close(&mut self) {
        self.closed = true;
        self.state = ConnectionState::Disconnected;
    }

    /// Whether [`Self::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Suppresses user-visible connectivity errors during startup.
///
/// Errors are reported once a connection has ever succeeded, or once the
/// grace period since construction has elapsed.
#[derive(Debug, Clone, Copy)]
pub struct GraceGate {
    started: Instant,
    period: Duration,
}

impl GraceGate {
    /// Start the grace window now.
    pub fn start(period: Duration) -> Self {
        Self {
            started: Instant::now(),
            period,
        }
    }

    /// Whether an error should reach the user.
    pub fn allows(&self, ever_connected: bool) -> bool {
        ever_connected || self.started.elapsed() >= self.period
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let lifecycle = ConnectionLifecycle::new(5);
        assert_eq!(lifecycle.state(), ConnectionState::Disconnected);
        assert_eq!(lifecycle.attempts(), 0);
        assert!(!lifecycle.ever_connected());
        assert!(!lifecycle.accepts_frames());
    }

    #[test]
    fn test_open_accepts_frames_and_marks_connected() {
        let mut lifecycle = ConnectionLifecycle::new(5);
        assert!(lifecycle.begin_connect());
        assert_eq!(lifecycle.state(), ConnectionState::Connecting);
        lifecycle.opened();
        assert_eq!(lifecycle.state(), ConnectionState::Connected);
        assert!(lifecycle.ever_connected());
        assert!(lifecycle.accepts_frames());
    }

    #[test]
    fn test_attempts_bounded_by_max() {
        let mut lifecycle = ConnectionLifecycle::new(3);
        let mut reconnects = 0;
        loop {
            assert!(lifecycle.begin_connect());
            match lifecycle.connection_lost() {
                CloseOutcome::Reconnect { attempt } => {
                    reconnects += 1;
                    assert_eq!(attempt, reconnects);
                    assert_eq!(lifecycle.state(), ConnectionState::Reconnecting);
                }
                CloseOutcome::Exhausted => break,
                CloseOutcome::Closed => panic!("not closed"),
            }
        }
        assert_eq!(reconnects, 3);
        assert_eq!(lifecycle.state(), ConnectionState::Exhausted);
        assert!(!lifecycle.begin_connect());
        assert_eq!(lifecycle.connection_lost(), CloseOutcome::Exhausted);
    }

    #[test]
    fn test_open_resets_attempts() {
        let mut lifecycle = ConnectionLifecycle::new(2);
        lifecycle.begin_connect();
        lifecycle.connection_lost();
        lifecycle.begin_connect();
        lifecycle.connection_lost();
        assert_eq!(lifecycle.attempts(), 2);

        lifecycle.begin_connect();
        lifecycle.opened();
        assert_eq!(lifecycle.attempts(), 0);
        assert_eq!(
            lifecycle.connection_lost(),
            CloseOutcome::Reconnect { attempt: 1 }
        );
    }

    #[test]
    fn test_zero_budget_exhausts_immediately() {
        let mut lifecycle = ConnectionLifecycle::new(0);
        lifecycle.begin_connect();
        assert_eq!(lifecycle.connection_lost(), CloseOutcome::Exhausted);
    }

    #[test]
    fn test_close_is_terminal() {
        let mut lifecycle = ConnectionLifecycle::new(5);
        lifecycle.begin_connect();
        lifecycle.opened();
        lifecycle.close();

        assert_eq!(lifecycle.state(), ConnectionState::Disconnected);
        assert!(lifecycle.is_closed());
        assert_eq!(lifecycle.connection_lost(), CloseOutcome::Closed);
        assert!(!lifecycle.begin_connect());
        lifecycle.opened();
        assert_eq!(lifecycle.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_gate_suppresses_then_allows() {
        let gate = GraceGate::start(Duration::from_secs(3));
        assert!(!gate.allows(false));
        assert!(gate.allows(true));

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(gate.allows(false));
    }
}
