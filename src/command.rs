//! Privilege escalation wrapping and the verified-execution retry core.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::ExecError;
use crate::types::CommandResult;

/// Wrap a command so it runs with elevated privilege.
///
/// The original command is opaque data: it is single-quoted for the remote
/// shell with embedded quotes escaped, so metacharacters inside it cannot
/// break out of the wrapper. `-S` makes sudo read a password from stdin
/// when one is required.
pub(crate) fn escalate_command(command: &str) -> String {
    format!("sudo -S sh -c '{}'", command.replace('\'', r"'\''"))
}

/// Run `attempt` until it returns a zero exit status, up to `retries + 1`
/// tries with a fixed `delay` between them.
///
/// Only nonzero return codes are retried. An [`ExecError`] from an attempt
/// (timeout, connection loss) propagates immediately: retrying a
/// session-level failure is the lifecycle manager's job, not this layer's.
/// After the last nonzero attempt the error message combines the caller's
/// `context` with the command, return code, and captured stderr.
pub(crate) async fn verify_with_retries<F, Fut>(
    mut attempt: F,
    command: &str,
    retries: u32,
    delay: Duration,
    context: &str,
) -> Result<(String, String), ExecError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<CommandResult, ExecError>>,
{
    let mut last: Option<CommandResult> = None;

    for try_number in 0..=retries {
        if try_number > 0 {
            tokio::time::sleep(delay).await;
        }

        let result = attempt().await?;

        if result.success() {
            return Ok((result.stdout, result.stderr));
        }

        warn!(
            "Command {:?} returned {} on attempt {}/{}",
            command,
            result.ret_code,
            try_number + 1,
            retries + 1
        );
        last = Some(result);
    }

    let last = last.unwrap_or(CommandResult {
        ret_code: -1,
        stdout: String::new(),
        stderr: String::new(),
    });

    Err(ExecError::CommandFailure {
        context: context.to_string(),
        command: command.to_string(),
        ret_code: last.ret_code,
        stderr: last.stderr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    mod escalation {
        use super::*;

        #[test]
        fn test_plain_command() {
            assert_eq!(
                escalate_command("ip link show"),
                "sudo -S sh -c 'ip link show'"
            );
        }

        #[test]
        fn test_single_quote_and_semicolon_stay_literal() {
            // The quote must not close the wrapper and let the semicolon
            // start a second shell command.
            let wrapped = escalate_command("echo 'a; rm -rf /'");
            assert_eq!(wrapped, r#"sudo -S sh -c 'echo '\''a; rm -rf /'\'''"#);
        }

        #[test]
        fn test_metacharacters_are_opaque() {
            let wrapped = escalate_command("echo $(hostname) && true");
            assert_eq!(wrapped, "sudo -S sh -c 'echo $(hostname) && true'");
        }

        #[test]
        fn test_every_quote_is_escaped() {
            let wrapped = escalate_command("a'b'c");
            assert_eq!(wrapped, r"sudo -S sh -c 'a'\''b'\''c'");
        }
    }

    mod verified_retries {
        use super::*;

        fn result(ret_code: i32, stdout: &str, stderr: &str) -> CommandResult {
            CommandResult {
                ret_code,
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            }
        }

        #[tokio::test]
        async fn test_first_success_returns_immediately() {
            let calls = Cell::new(0u32);
            let out = verify_with_retries(
                || {
                    calls.set(calls.get() + 1);
                    async { Ok(result(0, "ok", "")) }
                },
                "true",
                3,
                Duration::from_millis(1),
                "should not fail",
            )
            .await
            .unwrap();

            assert_eq!(out.0, "ok");
            assert_eq!(calls.get(), 1);
        }

        #[tokio::test]
        async fn test_succeeds_on_third_attempt() {
            let calls = Cell::new(0u32);
            let out = verify_with_retries(
                || {
                    calls.set(calls.get() + 1);
                    let rc = if calls.get() < 3 { 1 } else { 0 };
                    async move { Ok(result(rc, "done", "")) }
                },
                "flaky",
                2,
                Duration::from_millis(1),
                "flaky command failed",
            )
            .await;

            assert!(out.is_ok());
            assert_eq!(calls.get(), 3);
        }

        #[tokio::test]
        async fn test_exhausted_retries_raise_with_stderr() {
            let calls = Cell::new(0u32);
            let err = verify_with_retries(
                || {
                    calls.set(calls.get() + 1);
                    async { Ok(result(127, "", "command not found")) }
                },
                "missing-binary",
                1,
                Duration::from_millis(1),
                "setup failed",
            )
            .await
            .unwrap_err();

            // retries=1 means exactly 2 total attempts
            assert_eq!(calls.get(), 2);
            match &err {
                ExecError::CommandFailure {
                    ret_code, stderr, ..
                } => {
                    assert_eq!(*ret_code, 127);
                    assert_eq!(stderr, "command not found");
                }
                other => panic!("expected CommandFailure, got {:?}", other),
            }
            let msg = err.to_string();
            assert!(msg.contains("setup failed"));
            assert!(msg.contains("command not found"));
        }

        #[tokio::test]
        async fn test_engine_errors_propagate_without_retry() {
            let calls = Cell::new(0u32);
            let err = verify_with_retries(
                || {
                    calls.set(calls.get() + 1);
                    async {
                        Err(ExecError::Timeout {
                            elapsed: Duration::from_secs(5),
                            stdout: "partial".to_string(),
                            stderr: String::new(),
                        })
                    }
                },
                "slow",
                5,
                Duration::from_millis(1),
                "never retried",
            )
            .await
            .unwrap_err();

            assert_eq!(calls.get(), 1);
            assert!(matches!(err, ExecError::Timeout { .. }));
        }

        #[tokio::test]
        async fn test_zero_retries_is_single_attempt() {
            let calls = Cell::new(0u32);
            let err = verify_with_retries(
                || {
                    calls.set(calls.get() + 1);
                    async { Ok(result(1, "", "nope")) }
                },
                "false",
                0,
                Duration::from_millis(1),
                "single shot",
            )
            .await
            .unwrap_err();

            assert_eq!(calls.get(), 1);
            assert!(matches!(err, ExecError::CommandFailure { .. }));
        }
    }
}
