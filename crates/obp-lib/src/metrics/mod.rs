pub mod envelope;
pub mod pressure;
