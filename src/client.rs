//! Caller-side driver for the sandbox binary.
//!
//! Spawns one `judgebox` process per request, streams the request frame to
//! its standard input, and decodes the response frame from its standard
//! output. This is the interface a judge daemon uses to run compile and
//! test steps.

use crate::proto;
use crate::types::{JudgeConfig, JudgeError, JudgeResult, Result};
use std::path::Path;
use std::process::{Command, Stdio};

/// Run one judging request against the sandbox binary at `judger_bin`.
///
/// The sandbox exits non-zero only on an internal failure that may have
/// corrupted the response stream, so that case is an error here rather than
/// a verdict.
pub fn run(judger_bin: &Path, cfg: &JudgeConfig) -> Result<JudgeResult> {
    let mut child = Command::new(judger_bin)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|e| JudgeError::Process(format!("failed to spawn {}: {}", judger_bin.display(), e)))?;

    {
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| JudgeError::Process("sandbox stdin not captured".to_string()))?;
        proto::encode_request(&mut stdin, cfg)?;
    }

    let output = child
        .wait_with_output()
        .map_err(|e| JudgeError::Process(format!("failed to collect sandbox output: {}", e)))?;

    if !output.status.success() {
        return Err(JudgeError::Process(format!(
            "sandbox exited abnormally: {}",
            output.status
        )));
    }

    proto::decode_result(&mut output.stdout.as_slice())
}
