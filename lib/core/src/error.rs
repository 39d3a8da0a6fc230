//! Error handling foundation for the copper-spaniel platform.
//!
//! Only the shared `Result` alias lives here. Domain error enums stay in
//! the crate that owns them; layers attach context through rootcause as a
//! failure crosses crate boundaries, and the worker binary reports the
//! full chain when it exits.

use rootcause::Report;

/// Result alias carrying a rootcause [`Report`] on the error side.
///
/// The context type parameter defaults to `()` for paths that only need
/// the error chain itself.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;
