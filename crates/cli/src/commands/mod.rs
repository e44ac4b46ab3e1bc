pub mod migrate;
pub mod session;
