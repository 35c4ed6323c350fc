//! Process exit statuses
//!
//! | code | meaning |
//! |------|---------|
//! | 0 | clean shutdown |
//! | 1 | unexpected runtime failure |
//! | 2 | command-line usage error |
//! | 64 | invalid configuration value |
//! | 65 | network transport asked to bind a non-loopback address |
//! | 66 | listener bind failure |
//! | 67 | collaborator startup failure |
//! | 68 | stream binding terminated by a transport fault |

/// Documented exit status of the `certmcp` binary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    Success = 0,
    Failure = 1,
    Usage = 2,
    InvalidConfig = 64,
    NonLoopbackRefused = 65,
    BindFailed = 66,
    StartupFailed = 67,
    TransportFault = 68,
}

impl ExitCode {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Map a raw status observed by the supervisor back to a known code
    pub fn from_status(status: i32) -> Option<Self> {
        Some(match status {
            0 => Self::Success,
            1 => Self::Failure,
            2 => Self::Usage,
            64 => Self::InvalidConfig,
            65 => Self::NonLoopbackRefused,
            66 => Self::BindFailed,
            67 => Self::StartupFailed,
            68 => Self::TransportFault,
            _ => return None,
        })
    }

    pub fn describe(self) -> &'static str {
        match self {
            Self::Success => "clean shutdown",
            Self::Failure => "unexpected runtime failure",
            Self::Usage => "command-line usage error",
            Self::InvalidConfig => "invalid configuration value",
            Self::NonLoopbackRefused => "refused to bind a non-loopback address",
            Self::BindFailed => "listener bind failure",
            Self::StartupFailed => "collaborator startup failure",
            Self::TransportFault => "stream transport fault",
        }
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct_and_roundtrip() {
        let all = [
            ExitCode::Success,
            ExitCode::Failure,
            ExitCode::Usage,
            ExitCode::InvalidConfig,
            ExitCode::NonLoopbackRefused,
            ExitCode::BindFailed,
            ExitCode::StartupFailed,
            ExitCode::TransportFault,
        ];
        for code in all {
            assert_eq!(ExitCode::from_status(code.code() as i32), Some(code));
        }
        assert_eq!(ExitCode::from_status(137), None);
        assert_eq!(ExitCode::NonLoopbackRefused.code(), 65);
    }
}
