//! Session authentication core: anonymous/authenticated HTTP session
//! cookies, JWT-backed anonymous sessions, opaque authenticated session
//! tokens, CSRF double-submit protection, rolling-expiry refresh, and
//! anonymous→authenticated promotion, behind a pluggable [`store::SessionStore`]
//! contract.
//!
//! A host axum server links this crate in, builds one [`config::SessionConfig`]
//! at startup, initializes the secret registry via [`secrets::init_secret`],
//! and calls [`entry::get_session`] once per request (memoized through an
//! [`entry::SessionCache`] it stores in the request's extensions). Handlers
//! then interact with the returned [`context::SessionContext`]; the host
//! flushes [`context::SessionContext::take_headers`] onto the response
//! before it is sent.

pub mod authorizer;
pub mod config;
pub mod context;
pub mod cookie;
pub mod entry;
pub mod error;
pub mod factory;
pub mod models;
pub mod resolver;
pub mod secrets;
pub mod store;
pub mod sync;
pub mod token;
