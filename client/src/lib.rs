//! Client side of the Platform 360 session relay.
//!
//! ARCHITECTURE
//! ============
//! - `store`: durable key/value storage (the local-storage analogue).
//! - `token`: the bearer token kept in both durable storage and a cookie.
//! - `transport`: HTTP calls to the server, mockable behind a trait.
//! - `session`: login/logout/profile state built on the three above.
//! - `form`: generic form submission with lifecycle events.
//!
//! Everything a UI would hold in global context is an explicit object here,
//! constructed once and shared by `Arc`.

pub mod form;
pub mod session;
pub mod store;
pub mod token;
pub mod transport;
