//! Persistence primitives for gitnote.
//!
//! Everything gitnote writes to disk goes through this crate: the access
//! registry is replaced atomically (write to temp file, then rename) and
//! note files are created with no-clobber semantics so an existing file is
//! never overwritten.
//!
//! # Example
//!
//! ```no_run
//! use gitnote_persistence::{atomic_write_json, read_json_optional};
//! use std::path::Path;
//!
//! let path = Path::new("/tmp/gitnote/access.json");
//! atomic_write_json(path, &vec![1u64, 2, 3]).unwrap();
//!
//! let loaded: Option<Vec<u64>> = read_json_optional(path).unwrap();
//! assert_eq!(loaded, Some(vec![1, 2, 3]));
//! ```

pub mod atomic;
pub mod error;

pub use atomic::{atomic_write, atomic_write_json, create_new, read_json, read_json_optional};
pub use error::{PersistenceError, Result};
