//! Turning chat messages into note files.
//!
//! Notes live in the working copy under `notes/<folder>/<file>`. Files are
//! write-once: they are created with no-clobber semantics, and a name that is
//! already taken gets a numeric suffix (`todo.txt`, `todo-1.txt`, ...) rather
//! than replacing the earlier note.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use gitnote_persistence::{create_new, PersistenceError};
use regex::Regex;
use tracing::debug;

use crate::access::User;
use crate::error::NoteError;

/// Directory inside the repository that holds all user folders.
pub const NOTES_DIR: &str = "notes";

/// Extension used when a name has none.
const DEFAULT_EXTENSION: &str = "md";

/// Longest file stem kept from a user-supplied name, in bytes.
const MAX_STEM_BYTES: usize = 100;

/// Longest extension kept from a user-supplied name, in bytes.
const MAX_EXTENSION_BYTES: usize = 16;

/// Suffixes tried before giving up on a name.
const MAX_SUFFIX: u32 = 1000;

static DASH_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-{2,}").expect("Invalid dash regex"));

/// Result type for note operations.
pub type Result<T> = std::result::Result<T, NoteError>;

/// Lowercase slug for folder names ("Alice_W" -> "alice_w").
pub fn slugify(raw: &str) -> String {
    raw.to_lowercase()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<&str>>()
        .join("-")
}

/// Reduces a user-supplied file name to a safe `(stem, extension)` pair.
///
/// Path separators, `..`, whitespace and shell-hostile characters become
/// dashes; leading dots are dropped so no hidden file or parent reference
/// can be produced.
pub fn sanitize_file_name(raw: &str) -> Result<(String, String)> {
    let replaced: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    let collapsed = DASH_RUNS.replace_all(&replaced, "-");
    let cleaned = collapsed
        .trim_matches(|c| c == '.' || c == '-')
        .replace("..", ".");

    let (stem, ext) = match cleaned.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {
            (stem.to_string(), ext.to_lowercase())
        }
        _ => (cleaned.clone(), DEFAULT_EXTENSION.to_string()),
    };
    let stem = truncate_bytes(&stem, MAX_STEM_BYTES)
        .trim_end_matches(['.', '-'])
        .to_string();
    let ext = truncate_bytes(&ext, MAX_EXTENSION_BYTES).to_string();

    if stem.is_empty() {
        return Err(NoteError::InvalidName(raw.to_string()));
    }
    Ok((stem, ext))
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a char.
fn truncate_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// A note that has been written to the working copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    /// Path relative to the repository root.
    pub path: PathBuf,
    /// Author's user id.
    pub author_id: u64,
    /// Author's display name at write time.
    pub author_name: String,
    /// Message time.
    pub created_at: DateTime<Utc>,
}

impl Note {
    /// Commit message describing this note.
    pub fn commit_message(&self) -> String {
        format!(
            "Add note {} from {} ({})\n\nSent at {}",
            self.path.display(),
            self.author_name,
            self.author_id,
            self.created_at.to_rfc3339()
        )
    }
}

/// Writes note files into a working copy.
#[derive(Debug, Clone)]
pub struct NoteWriter {
    root: PathBuf,
}

impl NoteWriter {
    /// Creates a writer rooted at the repository working copy.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// A user's folder relative to the repository root.
    pub fn folder_path(&self, user: &User) -> PathBuf {
        Path::new(NOTES_DIR).join(&user.folder)
    }

    /// Creates the user's folder if needed and returns its relative path.
    pub fn ensure_folder(&self, user: &User) -> Result<PathBuf> {
        let relative = self.folder_path(user);
        let absolute = self.root.join(&relative);
        std::fs::create_dir_all(&absolute).map_err(|source| {
            NoteError::Io(PersistenceError::DirectoryError {
                path: absolute.clone(),
                source,
            })
        })?;
        Ok(relative)
    }

    /// Writes `content` as a new note for `user`.
    ///
    /// Without a `name` the file is named after `at` with millisecond
    /// precision. Either way an existing file is never replaced.
    pub fn write(
        &self,
        user: &User,
        content: &str,
        name: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Note> {
        if content.trim().is_empty() {
            return Err(NoteError::Empty);
        }

        let (stem, ext) = match name {
            Some(name) => sanitize_file_name(name)?,
            None => (
                at.format("%Y-%m-%d_%H-%M-%S-%3f").to_string(),
                DEFAULT_EXTENSION.to_string(),
            ),
        };

        let folder = self.ensure_folder(user)?;
        let mut body = content.to_string();
        if !body.ends_with('\n') {
            body.push('\n');
        }

        for attempt in 0..MAX_SUFFIX {
            let file_name = if attempt == 0 {
                format!("{}.{}", stem, ext)
            } else {
                format!("{}-{}.{}", stem, attempt, ext)
            };
            let relative = folder.join(&file_name);

            match create_new(&self.root.join(&relative), body.as_bytes()) {
                Ok(()) => {
                    debug!(path = %relative.display(), user_id = user.id, "Note written");
                    return Ok(Note {
                        path: relative,
                        author_id: user.id,
                        author_name: user.display_name.clone(),
                        created_at: at,
                    });
                }
                Err(PersistenceError::AlreadyExists(_)) => continue,
                Err(e) => return Err(NoteError::Io(e)),
            }
        }

        Err(NoteError::NameExhausted(format!("{}.{}", stem, ext)))
    }
}
