use std::fs;
use std::path::Path;

use pathwatch_core::FlowJob;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobFileError {
    #[error("failed to read job file {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("job file line {line}: expected `src_port dst_port`, got {got:?}")]
    Malformed { line: usize, got: String },
    #[error("job file line {line}: invalid port {value:?}")]
    InvalidPort { line: usize, value: String },
    #[error("job file {path} contains no jobs")]
    Empty { path: String },
}

/// Read and validate the whole job list before anything is dispatched.
/// One whitespace-separated `src_port dst_port` pair per line; blank lines
/// are skipped; the first malformed entry aborts the run with no datagram
/// sent.
pub fn load_jobs(path: &Path) -> Result<Vec<FlowJob>, JobFileError> {
    let text = fs::read_to_string(path)
        .map_err(|source| JobFileError::Read { path: path.display().to_string(), source })?;

    let mut jobs = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }
        let mut fields = trimmed.split_whitespace();
        let (src, dst) = match (fields.next(), fields.next(), fields.next()) {
            (Some(src), Some(dst), None) => (src, dst),
            _ => return Err(JobFileError::Malformed { line, got: trimmed.to_string() }),
        };
        jobs.push(FlowJob { src_port: parse_port(src, line)?, dst_port: parse_port(dst, line)? });
    }

    if jobs.is_empty() {
        return Err(JobFileError::Empty { path: path.display().to_string() });
    }
    Ok(jobs)
}

fn parse_port(value: &str, line: usize) -> Result<u16, JobFileError> {
    match value.parse::<u16>() {
        Ok(0) | Err(_) => Err(JobFileError::InvalidPort { line, value: value.to_string() }),
        Ok(port) => Ok(port),
    }
}

/// Distinct source ports of a validated job list, for socket binding.
pub fn source_ports(jobs: &[FlowJob]) -> Vec<u16> {
    let mut ports: Vec<u16> = jobs.iter().map(|job| job.src_port).collect();
    ports.sort_unstable();
    ports.dedup();
    ports
}
