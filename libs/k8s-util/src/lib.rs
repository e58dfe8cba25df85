pub mod csr;
pub mod error;
pub mod identity;
pub mod registration;
pub mod telemetry;

#[cfg(test)]
mod mock;
