use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use crate::{PsiError, Result};

/// Directory the full-mode transcripts are written into.
const OUTPUT_DIR: &str = "output";

/// How much a party prints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Only the result line.
    Minimal,
    /// Status lines and a progress bar as well.
    Info,
    /// Additionally write OT transcripts and garbled-table dumps under
    /// `output/`.
    Full,
}

/// Per-party logger. Stdout carries the result and status lines; in full
/// mode the OT transcript goes to `output/ot_<party>.txt` and (for Alice)
/// garbled-table dumps go to `output/tables.txt`, both truncated at
/// construction.
#[derive(Debug)]
pub struct Logger {
    mode: OutputMode,
    prefix: String,
    ot_log: Option<File>,
    tables_log: Option<File>,
}

impl Logger {
    /// Build the logger for `party` ("Alice" or "Bob").
    pub fn new(party: &str, mode: OutputMode) -> Result<Self> {
        Self::with_prefix(party, mode, "[-] ")
    }

    /// Build a logger whose status lines carry a custom prefix; test mode
    /// uses this to tell the parties apart.
    pub fn with_prefix(party: &str, mode: OutputMode, prefix: &str) -> Result<Self> {
        let mut ot_log = None;
        let mut tables_log = None;
        if mode == OutputMode::Full && party != "test" {
            fs::create_dir_all(OUTPUT_DIR)
                .map_err(|e| PsiError::Config(format!("cannot create {OUTPUT_DIR}/: {e}")))?;
            let dir = Path::new(OUTPUT_DIR);
            ot_log = Some(create_log(&dir.join(format!("ot_{party}.txt")))?);
            if party == "Alice" {
                tables_log = Some(create_log(&dir.join("tables.txt"))?);
            }
        }
        Ok(Logger {
            mode,
            prefix: prefix.to_string(),
            ot_log,
            tables_log,
        })
    }

    /// The result line: bare in minimal mode, a prefixed `Result:` line
    /// otherwise.
    pub fn minimal(&mut self, s: &str) {
        if self.mode == OutputMode::Minimal {
            println!("{s}");
        } else {
            self.info(&format!("Result: {s}"));
        }
    }

    /// A status line, suppressed in minimal mode.
    pub fn info(&mut self, s: &str) {
        if self.mode != OutputMode::Minimal {
            println!("{}{s}", self.prefix);
        }
    }

    /// Append to the party's OT transcript (full mode only).
    pub fn ot(&mut self, s: &str) {
        if let Some(file) = &mut self.ot_log {
            let _ = writeln!(file, "{s}");
        }
    }

    /// Append a garbled-table dump (full mode, Alice only).
    pub fn circuit(&mut self, s: &str) {
        if let Some(file) = &mut self.tables_log {
            let _ = writeln!(file, "{s}");
        }
    }
}

fn create_log(path: &Path) -> Result<File> {
    File::create(path).map_err(|e| PsiError::Config(format!("cannot open {}: {e}", path.display())))
}
