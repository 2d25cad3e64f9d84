//! SQL identifier quoting.

/// Quote a SQL identifier using ANSI double-quoting.
///
/// Embedded double-quotes are escaped by doubling them (`"` → `""`), which
/// makes the result safe for any input string, including SQL keywords.
///
/// # Examples
///
/// ```
/// use orchard_core::quote_ident;
///
/// assert_eq!(quote_ident("students"), "\"students\"");
/// assert_eq!(quote_ident("se\"cret"), "\"se\"\"cret\"");
/// assert_eq!(quote_ident("select"), "\"select\"");
/// ```
#[inline]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
