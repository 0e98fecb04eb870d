//! Length-prefixed binary framing for the request and response streams.
//!
//! Integers are little-endian; strings and byte buffers are `[u32 len][len
//! bytes]`. The same result encoding is used on the internal container ->
//! supervisor pipe and on the external stdout transport. No length ceiling is
//! enforced: the peer is always another copy of this program or its test
//! harness.

use crate::types::{FileSpec, JudgeConfig, JudgeError, JudgeResult, Result, Verdict};
use std::io::{ErrorKind, Read, Write};

fn fill<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<()> {
    // read_exact retries short reads and EINTR; EOF mid-frame is a protocol
    // error rather than a plain IO error.
    r.read_exact(buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => JudgeError::Protocol("unexpected end of stream".to_string()),
        _ => JudgeError::Io(e),
    })
}

pub fn read_u32<R: Read>(r: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    fill(r, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub fn read_i64<R: Read>(r: &mut R) -> Result<i64> {
    let mut buf = [0u8; 8];
    fill(r, &mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

pub fn read_bytes<R: Read>(r: &mut R) -> Result<Vec<u8>> {
    let len = read_u32(r)? as usize;
    let mut buf = vec![0u8; len];
    if len > 0 {
        fill(r, &mut buf)?;
    }
    Ok(buf)
}

pub fn read_string<R: Read>(r: &mut R) -> Result<String> {
    let bytes = read_bytes(r)?;
    String::from_utf8(bytes)
        .map_err(|_| JudgeError::Protocol("string field is not valid UTF-8".to_string()))
}

pub fn write_u32<W: Write>(w: &mut W, v: u32) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

pub fn write_i64<W: Write>(w: &mut W, v: i64) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

pub fn write_bytes<W: Write>(w: &mut W, buf: &[u8]) -> Result<()> {
    write_u32(w, buf.len() as u32)?;
    if !buf.is_empty() {
        w.write_all(buf)?;
    }
    Ok(())
}

pub fn write_str<W: Write>(w: &mut W, s: &str) -> Result<()> {
    write_bytes(w, s.as_bytes())
}

/// Decode one request frame into an immutable [`JudgeConfig`].
pub fn decode_request<R: Read>(r: &mut R) -> Result<JudgeConfig> {
    let time_limit_ms = read_u32(r)?;
    let memory_limit_mb = read_i64(r)?;
    let pids_limit = read_u32(r)?;
    let rootfs_path = read_string(r)?;
    let tmpfs_size = read_string(r)?;
    let cgroup_root = read_string(r)?;
    let sandbox_id = read_string(r)?;
    let stdin_payload = read_bytes(r)?;

    let cmdline_count = read_u32(r)?;
    let mut cmdline = Vec::with_capacity(cmdline_count as usize);
    for _ in 0..cmdline_count {
        cmdline.push(read_string(r)?);
    }

    let file_count = read_u32(r)?;
    let mut input_files = Vec::with_capacity(file_count as usize);
    for _ in 0..file_count {
        let filename = read_string(r)?;
        let content = read_bytes(r)?;
        let mode = read_u32(r)?;
        input_files.push(FileSpec {
            filename,
            content,
            mode,
        });
    }

    let output_count = read_u32(r)?;
    let mut output_filenames = Vec::with_capacity(output_count as usize);
    for _ in 0..output_count {
        output_filenames.push(read_string(r)?);
    }

    if sandbox_id.is_empty() {
        return Err(JudgeError::Protocol("empty sandbox id".to_string()));
    }
    if cmdline.is_empty() {
        return Err(JudgeError::Protocol("empty command line".to_string()));
    }

    Ok(JudgeConfig {
        time_limit_ms,
        memory_limit_mb,
        pids_limit,
        rootfs_path,
        tmpfs_size,
        cgroup_root,
        sandbox_id,
        stdin_payload,
        cmdline,
        input_files,
        output_filenames,
    })
}

/// Encode one request frame. Used by the in-process client and tests.
pub fn encode_request<W: Write>(w: &mut W, cfg: &JudgeConfig) -> Result<()> {
    write_u32(w, cfg.time_limit_ms)?;
    write_i64(w, cfg.memory_limit_mb)?;
    write_u32(w, cfg.pids_limit)?;
    write_str(w, &cfg.rootfs_path)?;
    write_str(w, &cfg.tmpfs_size)?;
    write_str(w, &cfg.cgroup_root)?;
    write_str(w, &cfg.sandbox_id)?;
    write_bytes(w, &cfg.stdin_payload)?;

    write_u32(w, cfg.cmdline.len() as u32)?;
    for arg in &cfg.cmdline {
        write_str(w, arg)?;
    }

    write_u32(w, cfg.input_files.len() as u32)?;
    for f in &cfg.input_files {
        write_str(w, &f.filename)?;
        write_bytes(w, &f.content)?;
        write_u32(w, f.mode)?;
    }

    write_u32(w, cfg.output_filenames.len() as u32)?;
    for name in &cfg.output_filenames {
        write_str(w, name)?;
    }
    Ok(())
}

/// Decode one result frame. Output-file modes are not on the wire and read
/// back as zero.
pub fn decode_result<R: Read>(r: &mut R) -> Result<JudgeResult> {
    let verdict = Verdict::from(read_u32(r)?);
    let time_ms = read_u32(r)?;
    let memory_mb = read_i64(r)?;
    let stdout = read_bytes(r)?;
    let stderr = read_bytes(r)?;

    let file_count = read_u32(r)?;
    let mut output_files = Vec::with_capacity(file_count as usize);
    for _ in 0..file_count {
        let filename = read_string(r)?;
        let content = read_bytes(r)?;
        output_files.push(FileSpec {
            filename,
            content,
            mode: 0,
        });
    }

    Ok(JudgeResult {
        verdict,
        time_ms,
        memory_mb,
        stdout,
        stderr,
        output_files,
    })
}

/// Encode one result frame.
pub fn encode_result<W: Write>(w: &mut W, res: &JudgeResult) -> Result<()> {
    write_u32(w, res.verdict.code())?;
    write_u32(w, res.time_ms)?;
    write_i64(w, res.memory_mb)?;
    write_bytes(w, &res.stdout)?;
    write_bytes(w, &res.stderr)?;

    write_u32(w, res.output_files.len() as u32)?;
    for f in &res.output_files {
        write_str(w, &f.filename)?;
        write_bytes(w, &f.content)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> JudgeConfig {
        JudgeConfig {
            time_limit_ms: 2000,
            memory_limit_mb: 128,
            pids_limit: 16,
            rootfs_path: "/srv/judge/rootfs".to_string(),
            tmpfs_size: "256M".to_string(),
            cgroup_root: "/sys/fs/cgroup/judge".to_string(),
            sandbox_id: "sub42_test1".to_string(),
            stdin_payload: b"3 4\n".to_vec(),
            cmdline: vec!["/tmp/solution".to_string(), "--fast".to_string()],
            input_files: vec![FileSpec {
                filename: "solution".to_string(),
                content: vec![0x7f, b'E', b'L', b'F', 0x00],
                mode: 0o755,
            }],
            output_filenames: vec!["answer.txt".to_string()],
        }
    }

    #[test]
    fn request_frame_round_trips() {
        let cfg = sample_config();
        let mut buf = Vec::new();
        encode_request(&mut buf, &cfg).unwrap();
        let decoded = decode_request(&mut buf.as_slice()).unwrap();
        assert_eq!(decoded.time_limit_ms, cfg.time_limit_ms);
        assert_eq!(decoded.memory_limit_mb, cfg.memory_limit_mb);
        assert_eq!(decoded.sandbox_id, cfg.sandbox_id);
        assert_eq!(decoded.stdin_payload, cfg.stdin_payload);
        assert_eq!(decoded.cmdline, cfg.cmdline);
        assert_eq!(decoded.input_files, cfg.input_files);
        assert_eq!(decoded.output_filenames, cfg.output_filenames);
    }

    #[test]
    fn result_frame_round_trips() {
        let res = JudgeResult {
            verdict: Verdict::Mle,
            time_ms: 812,
            memory_mb: 65,
            stdout: b"partial output".to_vec(),
            stderr: Vec::new(),
            output_files: vec![FileSpec {
                filename: "answer.txt".to_string(),
                content: b"42\n".to_vec(),
                mode: 0,
            }],
        };
        let mut buf = Vec::new();
        encode_result(&mut buf, &res).unwrap();
        let decoded = decode_result(&mut buf.as_slice()).unwrap();
        assert_eq!(decoded, res);
    }

    #[test]
    fn truncated_frame_is_a_protocol_error() {
        let cfg = sample_config();
        let mut buf = Vec::new();
        encode_request(&mut buf, &cfg).unwrap();
        buf.truncate(buf.len() / 2);
        match decode_request(&mut buf.as_slice()) {
            Err(JudgeError::Protocol(_)) => {}
            other => panic!("expected protocol error, got {:?}", other.map(|c| c.sandbox_id)),
        }
    }

    #[test]
    fn empty_cmdline_is_rejected() {
        let mut cfg = sample_config();
        cfg.cmdline.clear();
        let mut buf = Vec::new();
        encode_request(&mut buf, &cfg).unwrap();
        assert!(decode_request(&mut buf.as_slice()).is_err());
    }
}
