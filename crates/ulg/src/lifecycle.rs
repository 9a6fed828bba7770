//! 🚦 Ingestion file lifecycle: where a file is, what state it's in, and where it goes next.
//!
//! ```text
//!   pending ──start──▶ in-flight ──Indexed──▶ processed   (moved to chat_logs_processed/)
//!                          │
//!                          ├──Failed──▶ error              (moved to chat_logs_error/)
//!                          ├──Empty───▶ error              (moved, so someone can look)
//!                          └──Blank───▶ error              (zero-byte remnant removed)
//! ```
//!
//! A file is never half-committed. One bad item in the bulk response and the whole file
//! goes to `error`; the counts still say how many documents made it. Relocating a file
//! out of `pending` is also the only thing that keeps a re-run from indexing it twice.

use std::fmt;

use crate::errors::FileError;

/// 📂 The three sibling directories (or key prefixes) a file can live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FileLocation {
    Pending,
    Processed,
    Error,
}

impl FileLocation {
    pub fn prefix(self) -> &'static str {
        match self {
            FileLocation::Pending => "chat_logs",
            FileLocation::Processed => "chat_logs_processed",
            FileLocation::Error => "chat_logs_error",
        }
    }
}

/// 📎 A handle to one ingestion file. The name is the bare file name; the backend
/// combines it with its root and the location prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileRef {
    pub name: String,
    pub location: FileLocation,
    /// 📏 size in bytes when the listing told us, for the progress bar
    pub size_bytes: u64,
}

impl FileRef {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location: FileLocation::Pending,
            size_bytes: 0,
        }
    }

    /// 🔑 `chat_logs/abc.json`: the key under the store root
    pub fn key(&self) -> String {
        format!("{}/{}", self.location.prefix(), self.name)
    }

    pub fn moved_to(&self, location: FileLocation) -> Self {
        Self {
            location,
            ..self.clone()
        }
    }
}

impl fmt::Display for FileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// 🚦 File states. Terminal states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Pending,
    InFlight,
    Processed,
    Error,
}

/// 🎬 How the single submit attempt for a file turned out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Indexed,
    /// 🫥 zero valid records after normalization. `blank` means there wasn't even a
    /// byte worth keeping; otherwise the lines were all malformed or all banners.
    Empty { blank: bool },
    Failed(FileError),
}

/// 🚚 What to physically do with the artifact once its outcome is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relocation {
    MoveTo(FileLocation),
    Remove,
}

impl FileState {
    /// 🚀 pending → in-flight. Anything else is a bug in the caller.
    pub fn start(self) -> Option<FileState> {
        match self {
            FileState::Pending => Some(FileState::InFlight),
            _ => None,
        }
    }

    /// 🏁 in-flight → processed | error, plus where the artifact goes.
    pub fn finish(self, outcome: &Outcome) -> Option<(FileState, Relocation)> {
        if self != FileState::InFlight {
            return None;
        }
        Some(match outcome {
            Outcome::Indexed => (FileState::Processed, Relocation::MoveTo(FileLocation::Processed)),
            Outcome::Empty { blank: true } => (FileState::Error, Relocation::Remove),
            Outcome::Empty { blank: false } => (FileState::Error, Relocation::MoveTo(FileLocation::Error)),
            Outcome::Failed(_) => (FileState::Error, Relocation::MoveTo(FileLocation::Error)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_a_good_file_graduates_to_processed() {
        let the_state = FileState::Pending.start().expect("💀 pending should start");
        assert_eq!(the_state, FileState::InFlight);
        assert_eq!(
            the_state.finish(&Outcome::Indexed),
            Some((FileState::Processed, Relocation::MoveTo(FileLocation::Processed)))
        );
    }

    #[test]
    fn the_one_where_failures_go_to_the_error_pile_and_only_blanks_vanish() {
        assert_eq!(
            FileState::InFlight.finish(&Outcome::Failed(FileError::Transport("refused".into()))),
            Some((FileState::Error, Relocation::MoveTo(FileLocation::Error)))
        );
        assert_eq!(
            FileState::InFlight.finish(&Outcome::Empty { blank: true }),
            Some((FileState::Error, Relocation::Remove))
        );
        assert_eq!(
            FileState::InFlight.finish(&Outcome::Empty { blank: false }),
            Some((FileState::Error, Relocation::MoveTo(FileLocation::Error)))
        );
    }

    #[test]
    fn the_one_where_terminal_states_stay_terminal() {
        assert_eq!(FileState::Processed.start(), None);
        assert_eq!(FileState::Error.finish(&Outcome::Indexed), None);
        assert_eq!(FileState::Pending.finish(&Outcome::Indexed), None);
    }

    #[test]
    fn the_one_where_keys_follow_the_sibling_layout() {
        let the_file = FileRef::pending("abc.json");
        assert_eq!(the_file.key(), "chat_logs/abc.json");
        assert_eq!(the_file.moved_to(FileLocation::Processed).key(), "chat_logs_processed/abc.json");
        assert_eq!(the_file.moved_to(FileLocation::Error).to_string(), "chat_logs_error/abc.json");
    }
}
