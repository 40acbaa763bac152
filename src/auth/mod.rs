//! OAuth 2.0 authentication: PKCE material, the loopback callback server,
//! and the authorization/refresh flow controller.

pub mod callback;
pub mod flow;
pub mod pkce;
pub mod token;

pub use callback::{CallbackOutcome, CallbackServer};
pub use flow::{AuthorizeOptions, HeadlessAttempt, OAuthFlow};
pub use pkce::{generate_state, PkcePair};
pub use token::Credentials;
