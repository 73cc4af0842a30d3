pub mod backend;
pub mod dispatcher;
pub mod error;
pub mod pool;
pub mod store;
