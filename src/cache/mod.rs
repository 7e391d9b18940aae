//! Redis-backed caches.

pub mod identity;

pub use identity::IdentityCache;
