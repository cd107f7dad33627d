//! The wire-event log: `sender_log.txt` / `receiver_log.txt`.
//!
//! This is a dedicated data-product writer, not application diagnostics.
//! Every logged line uses milliseconds elapsed since the *first* logged
//! event, so the first line always reads `0.00`.

use std::fs::File;
use std::io::{self, Write};
use std::time::Instant;

use crate::segment::Kind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dir {
    Snd,
    Rcv,
}

impl Dir {
    fn label(self) -> &'static str {
        match self {
            Dir::Snd => "snd",
            Dir::Rcv => "rcv",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Ok,
    Drp,
    Cor,
}

impl Action {
    fn label(self) -> &'static str {
        match self {
            Action::Ok => "ok",
            Action::Drp => "drp",
            Action::Cor => "cor",
        }
    }
}

pub struct EventLog {
    file: File,
    start: Option<Instant>,
}

impl EventLog {
    pub fn create(path: impl AsRef<std::path::Path>) -> io::Result<Self> {
        Ok(EventLog {
            file: File::create(path)?,
            start: None,
        })
    }

    /// Appends one log line, initializing the elapsed-time origin on first
    /// use so that this call's line reads `0.00`.
    pub fn log(&mut self, dir: Dir, action: Action, kind: Kind, seq: u16, len: usize) {
        let start = *self.start.get_or_insert_with(Instant::now);
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        let line = format!(
            "{}  {:<3}  {:6.2}  {:<4}  {:5}  {:4}\n",
            dir.label(),
            action.label(),
            elapsed_ms,
            kind.label(),
            seq,
            len
        );

        let _ = self.file.write_all(line.as_bytes());
        let _ = self.file.flush();
    }

    /// Appends one `label: count` summary line, right-justified the way the
    /// original course's trailing summary block is laid out.
    pub fn summary_line(&mut self, label: &str, count: u64) {
        let line = format!("{label:<32}{count:6}\n");
        let _ = self.file.write_all(line.as_bytes());
    }
}
