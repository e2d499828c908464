//! Reading user lists from, and writing batch results to, delimited files.
//!
//! Both directions use a single-column layout: a header row followed by one
//! user identifier per row. Extra columns in input files are ignored.

use crate::subscription::batch::BatchResult;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const RESULT_HEADER: &str = "NetID";

#[derive(Debug, Error)]
pub enum UserListError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("User list is empty, please add a header row (e.g. NetID)")]
    MissingHeader,
    #[error("Unterminated quoted field on line {0}")]
    UnterminatedQuote(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    Success,
    Failure,
}

impl ResultKind {
    fn default_prefix(&self) -> &'static str {
        match self {
            ResultKind::Success => "success_user_",
            ResultKind::Failure => "fail_user_",
        }
    }
}

/// Where and whether to write the success / failure lists of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultFileOptions {
    pub directory: PathBuf,
    pub write_successes: bool,
    pub success_name: Option<String>,
    pub write_failures: bool,
    pub failure_name: Option<String>,
}

pub fn read_user_list(path: &Path) -> Result<Vec<String>, UserListError> {
    let file = std::fs::File::open(path)?;
    parse_user_list(file)
}

pub fn parse_user_list<R: Read>(reader: R) -> Result<Vec<String>, UserListError> {
    let mut lines = BufReader::new(reader).lines();

    match lines.next() {
        Some(header) => {
            header?;
        }
        None => return Err(UserListError::MissingHeader),
    }

    let mut users = Vec::new();
    for (index, line) in lines.enumerate() {
        let line = line?;
        // Header is line 1.
        let id = first_field(&line, index + 2)?;
        let id = id.trim();
        if !id.is_empty() {
            users.push(id.to_string());
        }
    }

    Ok(users)
}

fn first_field(line: &str, line_number: usize) -> Result<String, UserListError> {
    let line = line.trim_end_matches('\r');
    let Some(rest) = line.trim_start().strip_prefix('"') else {
        return Ok(line.split(',').next().unwrap_or_default().to_string());
    };

    let mut field = String::new();
    let mut chars = rest.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '"' {
            if chars.peek() == Some(&'"') {
                chars.next();
                field.push('"');
            } else {
                return Ok(field);
            }
        } else {
            field.push(c);
        }
    }

    Err(UserListError::UnterminatedQuote(line_number))
}

fn quote_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

pub fn write_user_list(path: &Path, users: &[&str]) -> Result<(), UserListError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
    writeln!(file, "{}", RESULT_HEADER)?;
    for user in users {
        writeln!(file, "{}", quote_field(user))?;
    }
    file.flush()?;

    Ok(())
}

pub fn result_file_name(kind: ResultKind, custom_name: Option<&str>, calendar_id: &str) -> String {
    match custom_name {
        Some(name) if !name.is_empty() => format!("{}.csv", name),
        _ => {
            // Calendar ids are free-form; keep the default name inside the output directory.
            let safe_id: String = calendar_id
                .chars()
                .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
                .collect();
            format!("{}{}.csv", kind.default_prefix(), safe_id)
        }
    }
}

/// Writes the enabled result files and returns their paths.
pub fn write_batch_result(
    result: &BatchResult,
    options: &ResultFileOptions,
) -> Result<Vec<PathBuf>, UserListError> {
    let mut written = Vec::new();

    if options.write_successes {
        let name = result_file_name(ResultKind::Success, options.success_name.as_deref(), &result.calendar_id);
        let path = options.directory.join(name);
        let successes: Vec<&str> = result.successes().iter().map(String::as_str).collect();
        write_user_list(&path, &successes)?;
        tracing::info!("Wrote {} succeeded user(s) to {}", successes.len(), path.display());
        written.push(path);
    }

    if options.write_failures {
        let name = result_file_name(ResultKind::Failure, options.failure_name.as_deref(), &result.calendar_id);
        let path = options.directory.join(name);
        let failures = result.failures();
        write_user_list(&path, &failures)?;
        tracing::info!("Wrote {} failed user(s) to {}", failures.len(), path.display());
        written.push(path);
    }

    Ok(written)
}
