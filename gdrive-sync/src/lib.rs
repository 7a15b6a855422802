pub mod logging;
pub mod oauth_flow;
pub mod session;
pub mod settings;
pub mod storage;
pub mod sync;
pub mod token_provider;
