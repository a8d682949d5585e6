//! Access-token claims and the permission check built on them.
//!
//! Claims are read from the token payload without verifying the signature; the
//! backend stays the authority and every request it receives is checked there.
//! The guards only use claims to decide which page to show.

mod claims;
pub mod permissions;

pub use self::claims::{Claims, ClaimsError};
pub use self::permissions::{evaluate, Requirements};
