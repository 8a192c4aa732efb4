//! UI utilities for Ferry CLI.

use std::time::Duration;

use ferry_core::file::format_size;
use ferry_core::progress::{ChunkState, FileRecord, FileState, Progress};

/// How the run report is printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
    /// Per-file lines plus details for unfinished chunks
    Text,
    /// Only files that did not finish, on stderr
    Quiet,
    /// The full progress snapshot as JSON
    Json,
}

/// Print the outcome of a run.
pub fn report(progress: &Progress, output: Output) -> anyhow::Result<()> {
    match output {
        Output::Json => {
            println!("{}", serde_json::to_string_pretty(progress)?);
        }
        Output::Text => {
            for file in &progress.files {
                println!("{}", file_line(file));
                for line in chunk_lines(file) {
                    println!("  {}", line);
                }
            }
            println!();
            println!("{}", summary_line(progress));
        }
        Output::Quiet => {
            for file in progress.files.iter().filter(|f| f.state != FileState::Finished) {
                eprintln!("{}", file_line(file));
                for line in chunk_lines(file) {
                    eprintln!("  {}", line);
                }
            }
        }
    }
    Ok(())
}

/// `[finished/total chunks] src -> dst`, with the reason for failed files.
pub fn file_line(file: &FileRecord) -> String {
    let mut line = format!(
        "[{}/{} chunks] {} -> {}",
        file.finished_chunks(),
        file.chunks.len(),
        file.src.display(),
        file.dst.display()
    );
    if let Some(reason) = &file.exception {
        line.push_str(": ");
        line.push_str(reason);
    }
    line
}

/// One line per chunk that did not finish.
pub fn chunk_lines(file: &FileRecord) -> Vec<String> {
    file.chunks
        .iter()
        .filter(|c| c.state != ChunkState::Finished)
        .map(|c| {
            format!(
                "[{}] {} -> {}, {} {}: {}",
                state_label(c.state),
                file.src.display(),
                file.dst.display(),
                c.name.display(),
                c.offset,
                c.exception.as_deref().unwrap_or("-")
            )
        })
        .collect()
}

fn state_label(state: ChunkState) -> &'static str {
    match state {
        ChunkState::Pending => "pending",
        ChunkState::Running => "running",
        ChunkState::Finished => "finished",
        ChunkState::Failed => "failed",
    }
}

/// Totals for the whole run.
pub fn summary_line(progress: &Progress) -> String {
    let files = progress.file_counts();
    format!(
        "{} of {} transferred ({:.1}%), {} finished, {} failed, {} pending",
        format_size(progress.bytes_transferred()),
        format_size(progress.total_bytes()),
        progress.percentage(),
        files.finished,
        files.failed,
        files.pending
    )
}

/// Parse a duration string like "5m", "30s", or "1h".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Some(num_str) = s.strip_suffix('m') {
        let num: u64 = num_str.parse().ok()?;
        num.checked_mul(60).map(Duration::from_secs)
    } else if let Some(num_str) = s.strip_suffix('s') {
        let num: u64 = num_str.parse().ok()?;
        Some(Duration::from_secs(num))
    } else if let Some(num_str) = s.strip_suffix('h') {
        let num: u64 = num_str.parse().ok()?;
        num.checked_mul(3600).map(Duration::from_secs)
    } else {
        None
    }
}

/// Parse a byte size like "512", "64K", "8M", or "1G" (binary units).
pub fn parse_size(s: &str) -> Option<u64> {
    let s = s.trim();
    let (digits, multiplier) = match s.chars().last()?.to_ascii_uppercase() {
        'K' => (&s[..s.len() - 1], 1024),
        'M' => (&s[..s.len() - 1], 1024 * 1024),
        'G' => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        _ => (s, 1),
    };
    digits.trim().parse::<u64>().ok()?.checked_mul(multiplier)
}
