pub mod config;
pub mod coordinator;
pub mod error;
pub mod handlers;
pub mod worker;

#[cfg(test)]
mod test_utils;
