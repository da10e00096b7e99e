//! # logged-user
//!
//! Client-side session state for a web application: who the current visitor
//! is, whether they are logged in, and keeping their access token fresh.
//!
//! The [`session::SessionAccessor`] composes three collaborators: a
//! [`fetcher::UserFetcher`] for the identity endpoint, a
//! [`query::RequestCache`] that de-duplicates fetches, and a
//! [`store::PersistentStore`] holding a token-free snapshot of the last user
//! so the next start has something to show before the network answers.

pub mod config;
pub mod fetcher;
pub mod query;
pub mod refresh;
pub mod session;
pub mod store;
pub mod user;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use session::{SessionAccessor, SessionError, SessionSnapshot};
pub use user::{AccessToken, AnonymousUser, LoggedUser, User};
