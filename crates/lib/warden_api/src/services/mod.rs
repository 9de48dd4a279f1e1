//! Helpers shared by handlers: cookies and the OAuth handshake.

pub mod cookies;
pub mod oauth;
