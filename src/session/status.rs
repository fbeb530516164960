use std::sync::Arc;

use arc_swap::ArcSwap;

/// Lifecycle of a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Running,
    Stopping,
    Stopped,
}

/// Why a session stopped delivering frames
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalReason {
    /// `close` was called
    Closed,
    /// The backend reported an unrecoverable error
    BackendFatal(String),
    /// The producer thread panicked
    ProducerPanicked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: SessionState,
    /// Set once, by whichever stop condition happened first
    pub terminal: Option<TerminalReason>,
}

impl SessionStatus {
    pub fn is_open(&self) -> bool {
        self.state == SessionState::Running
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self.terminal,
            Some(TerminalReason::BackendFatal(_)) | Some(TerminalReason::ProducerPanicked)
        )
    }
}

/// Status shared between the session and its producer thread
pub(crate) struct StatusCell(ArcSwap<SessionStatus>);

impl StatusCell {
    pub(crate) fn new() -> Self {
        Self(ArcSwap::from_pointee(SessionStatus {
            state: SessionState::Created,
            terminal: None,
        }))
    }

    pub(crate) fn load(&self) -> SessionStatus {
        SessionStatus::clone(&self.0.load())
    }

    fn update(&self, f: impl Fn(&SessionStatus) -> SessionStatus) {
        self.0.rcu(|current| f(current));
    }

    pub(crate) fn mark_running(&self) {
        self.update(|current| match current.state {
            SessionState::Created => SessionStatus {
                state: SessionState::Running,
                terminal: None,
            },
            _ => current.clone(),
        });
    }

    /// Enter `Stopping`, keeping the first recorded terminal reason
    pub(crate) fn begin_stopping(&self, reason: TerminalReason) {
        self.update(|current| {
            let state = match current.state {
                SessionState::Created | SessionState::Running => SessionState::Stopping,
                later => later,
            };
            SessionStatus {
                state,
                terminal: current.terminal.clone().or_else(|| Some(reason.clone())),
            }
        });
    }

    pub(crate) fn mark_stopped(&self) {
        self.update(|current| SessionStatus {
            state: SessionState::Stopped,
            terminal: current.terminal.clone().or(Some(TerminalReason::Closed)),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        let cell = StatusCell::new();
        assert_eq!(cell.load().state, SessionState::Created);

        cell.mark_running();
        assert!(cell.load().is_open());

        cell.begin_stopping(TerminalReason::Closed);
        let status = cell.load();
        assert_eq!(status.state, SessionState::Stopping);
        assert_eq!(status.terminal, Some(TerminalReason::Closed));

        cell.mark_stopped();
        assert_eq!(cell.load().state, SessionState::Stopped);
    }

    #[test]
    fn test_first_terminal_reason_wins() {
        let cell = StatusCell::new();
        cell.mark_running();
        cell.begin_stopping(TerminalReason::BackendFatal("unplugged".into()));
        cell.begin_stopping(TerminalReason::Closed);
        cell.mark_stopped();

        let status = cell.load();
        assert_eq!(status.state, SessionState::Stopped);
        assert_eq!(
            status.terminal,
            Some(TerminalReason::BackendFatal("unplugged".into()))
        );
        assert!(status.is_fatal());
    }

    #[test]
    fn test_mark_running_only_from_created() {
        let cell = StatusCell::new();
        cell.mark_running();
        cell.begin_stopping(TerminalReason::Closed);
        cell.mark_running();
        assert_eq!(cell.load().state, SessionState::Stopping);
    }
}
