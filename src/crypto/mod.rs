//! Post-Quantum Cryptography Module
//!
//! Key material for post-quantum key advertisement. The service itself only
//! carries these keys as opaque byte strings.

pub mod kyber;
