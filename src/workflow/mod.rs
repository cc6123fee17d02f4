pub mod chain_driver;
pub mod step_ctx;

pub use chain_driver::{CancelFlag, CancelOnDrop, ChainDeps, ChainDriver, Credentials, DriverPolicy};
pub use step_ctx::StepCtx;
