pub mod dataflow;
pub mod liveness;
pub mod typeflow;
