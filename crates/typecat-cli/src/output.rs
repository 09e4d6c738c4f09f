//! Output handling for the CLI.
//!
//! Results go to stdout, either one `Display` line per row or a single JSON
//! document with `--json`. Diagnostics go to stderr.

use serde::Serialize;
use std::fmt::Display;
use std::io;

#[derive(Default)]
pub struct OutputHandler {
    json: bool,
}

impl OutputHandler {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    pub fn emit_rows<T: Display + Serialize>(&self, rows: &[T]) -> io::Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(rows)?);
        } else if rows.is_empty() {
            self.diagnostic("[no matches]");
        } else {
            for row in rows {
                println!("{row}");
            }
        }
        Ok(())
    }

    /// A single value; `text` is printed in place of `Display` in text mode.
    pub fn emit_value<T: Serialize>(&self, value: &T, text: &str) -> io::Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            println!("{text}");
        }
        Ok(())
    }

    pub fn diagnostic(&self, message: &str) {
        eprintln!("{message}");
    }
}
