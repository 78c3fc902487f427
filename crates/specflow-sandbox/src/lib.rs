//! Specflow Path Sandbox
//!
//! The trusted boundary between caller-supplied identifiers and the
//! filesystem. Provides:
//!
//! - [`Slug`]: validated change identifier (grammar-checked newtype)
//! - [`PathSandbox`]: canonicalizing path resolver that guarantees every
//!   resolved path stays inside the project root
//!
//! Every engine operation resolves input through this crate before any read
//! or write touches the filesystem.
//!
//! # Example
//!
//! ```rust,ignore
//! use specflow_sandbox::{PathSandbox, Slug};
//!
//! let sandbox = PathSandbox::new("/srv/project/changes")?;
//! let slug: Slug = "add-auth".parse()?;
//! let dir = sandbox.change_dir(&slug);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod sandbox;
mod slug;

pub use sandbox::{PathSandbox, SandboxError};
pub use slug::{Slug, SlugError};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
