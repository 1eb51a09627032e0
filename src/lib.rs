pub mod authz;
pub mod entities;
pub mod errors;
pub mod export;
pub mod geo;
pub mod query;
pub mod session;
pub mod settings;
pub mod storage;
pub mod web;
