//! Admission Control
//!
//! Signed authorization grants with post-quantum key advertisement.

pub mod grant;
pub mod token;

pub use grant::{AccessToken, AuthorizationGrant, GrantAuthority, GrantError, RoomGrant};
