pub mod cache;
pub mod error;
pub mod integrations;
pub mod oauth;
pub mod session;
pub mod stripe;
