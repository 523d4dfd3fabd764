//! Call session states

use std::fmt;

/// SIP call session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SipState {
    #[default]
    Null,
    /// INVITE sent, nothing heard yet
    Starting,
    /// 1xx received or sent
    Proceeding,
    /// 180 received or sent
    Ringing,
    /// 200 sent, waiting for ACK
    Connecting,
    Active,
    Fail,
    /// 486, 600 or 603 received
    Busy,
    /// BYE sent by us
    MODClearing,
    /// CANCEL or error response sent by us
    MODCanceling,
    /// BYE received
    MTDClearing,
    /// CANCEL received
    MTDCanceling,
    Canceled,
    Cleared,
    /// MESSAGE sent, waiting for the final response
    MessageSubmit,
    Timeout,
}

impl SipState {
    /// No further transitions are expected from a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SipState::Cleared | SipState::Canceled | SipState::Fail | SipState::Timeout
        )
    }

    /// Clearing or canceling in either direction
    pub fn is_clearing(&self) -> bool {
        matches!(
            self,
            SipState::MODClearing
                | SipState::MODCanceling
                | SipState::MTDClearing
                | SipState::MTDCanceling
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            SipState::Null => "Null",
            SipState::Starting => "Starting",
            SipState::Proceeding => "Proceeding",
            SipState::Ringing => "Ringing",
            SipState::Connecting => "Connecting",
            SipState::Active => "Active",
            SipState::Fail => "Fail",
            SipState::Busy => "Busy",
            SipState::MODClearing => "MODClearing",
            SipState::MODCanceling => "MODCanceling",
            SipState::MTDClearing => "MTDClearing",
            SipState::MTDCanceling => "MTDCanceling",
            SipState::Canceled => "Canceled",
            SipState::Cleared => "Cleared",
            SipState::MessageSubmit => "SMS-Submit",
            SipState::Timeout => "Timeout",
        }
    }
}

impl fmt::Display for SipState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        for state in [
            SipState::Cleared,
            SipState::Canceled,
            SipState::Fail,
            SipState::Timeout,
        ] {
            assert!(state.is_terminal(), "{} should be terminal", state);
        }
        for state in [
            SipState::Null,
            SipState::Active,
            SipState::Busy,
            SipState::MODClearing,
            SipState::MessageSubmit,
        ] {
            assert!(!state.is_terminal(), "{} should not be terminal", state);
        }
    }

    #[test]
    fn test_state_names() {
        assert_eq!(SipState::default(), SipState::Null);
        assert_eq!(SipState::MTDCanceling.to_string(), "MTDCanceling");
        assert_eq!(SipState::MessageSubmit.name(), "SMS-Submit");
        assert!(SipState::MTDClearing.is_clearing());
        assert!(!SipState::Active.is_clearing());
    }
}
