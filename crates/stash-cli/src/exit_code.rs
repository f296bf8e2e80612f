//! Process exit codes.
//!
//! Scripts can branch on these instead of parsing error text.

pub const SUCCESS: u8 = 0;
pub const GENERAL_ERROR: u8 = 1;
/// Unreadable or invalid configuration.
pub const CONFIG_INVALID: u8 = 2;
/// Wrong password or unknown user during authentication.
pub const AUTH_FAILED: u8 = 3;
pub const NOT_FOUND: u8 = 4;
/// The request conflicts with existing state (duplicate user, last user).
pub const CONFLICT: u8 = 5;
/// The snapshot could not be read, decoded or written.
pub const STORE_FAILED: u8 = 6;
pub const PERMISSION_DENIED: u8 = 7;
/// The store refused the request because it is closing.
pub const SHUTTING_DOWN: u8 = 8;
