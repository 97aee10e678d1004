pub(crate) mod change;
pub mod engine;

pub use change::is_notable;
pub use engine::Monitor;
