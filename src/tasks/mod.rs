//! Background tasks that run beside the router

mod health_reporter;

pub use health_reporter::HealthReporter;
