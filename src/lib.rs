pub mod catalog;
pub mod config;
pub mod data_types;
pub mod frontend;
pub mod repository;
pub mod schema;

#[cfg(test)]
pub(crate) mod testutils;
