pub mod authority;
pub mod generator;
pub mod session;

pub use authority::IssuedToken;
pub use generator::{generate_token, hash_token};
pub use session::SessionPair;
