pub mod command;
pub mod logger;
pub mod readiness;
pub mod shutdown;
