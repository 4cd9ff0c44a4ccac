pub mod telemetry_init;
pub mod webhook;
