pub mod clock;
pub mod js_executor;
pub mod renderer;

pub use clock::{Clock, SystemClock};
pub use js_executor::JsExecutor;
pub use renderer::{ChromiumRenderer, Renderer};
