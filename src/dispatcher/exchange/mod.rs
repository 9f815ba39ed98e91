//! Task execution: request preparation, body transfer and lifecycle callbacks

mod orchestration;
mod state;
mod stream;

pub(crate) use orchestration::run_exchange;
pub(crate) use state::Lifecycle;
