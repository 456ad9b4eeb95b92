//! Recipe data model and the KDL recipe document format.
//!
//! ```text
//! recipe "musl" {
//!   version "1.2.3"
//!   revision 0
//!   style "configure"
//!   artifacts { fetch { url "https://musl.libc.org/releases/{{name}}-{{version}}.tar.gz"; sha256 "..." } }
//!   install { make-install; link "../lib/libc.so" "usr/bin/ldd" }
//!   side "{{name}}-devel" { depends "{{self-ref}}"; claim "usr/include" "usr/lib/*.a" }
//! }
//! ```

mod parse;
mod types;

pub use parse::{Diagnostic, ParseError, load_file, parse_document};
pub use types::*;
