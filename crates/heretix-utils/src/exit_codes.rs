//! Process exit codes for the CLI.

/// `0` on a completed run (regardless of verdict), `1` on missing
/// credentials or a configuration error, per the CLI's external contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(i32);

impl ExitCode {
    pub const SUCCESS: ExitCode = ExitCode(0);
    pub const CONFIG_ERROR: ExitCode = ExitCode(1);

    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code.0
    }
}
