//! Polymarket venue clients: event discovery, pricing, and resolution.
//!
//! All three talk to public read-only endpoints. Discovery and resolution
//! use the Gamma API; pricing uses the CLOB API. Brackets carry both IDs
//! because the two APIs key markets differently.

pub mod discovery;
pub mod pricing;
pub mod resolution;
