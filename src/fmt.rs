//! Debug formatting helpers for [`custom_debug_derive`].

use std::fmt;

/// Prints a secret's length instead of its contents.
///
/// Use with `#[debug(with = "crate::fmt::redacted")]` on cookie and token fields.
#[allow(clippy::ptr_arg)]
pub fn redacted(value: &String, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if value.is_empty() {
        f.write_str("<empty>")
    } else {
        write!(f, "<redacted {} bytes>", value.len())
    }
}
