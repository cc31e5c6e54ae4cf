//! Process exit codes

use std::process::ExitCode;

/// At least one test failed
pub const TEST_FAILURE: u8 = 1;

/// Exit code for a finished run
pub fn for_run(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(TEST_FAILURE)
    }
}
