pub mod billing;
pub mod integrations;
pub mod publishing;
pub mod retry;
