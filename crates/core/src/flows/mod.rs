pub mod signals;

pub use signals::{FlowError, FlowFlags, FlowSignal};
