//! Blocking primitives shared by the worker tasks
//!
//! - [`Semaphore`]: counting semaphore, initial count chosen by the caller
//! - [`completion`]: one-shot result slot behind the synchronous call helper

mod completion;
mod semaphore;

pub use completion::{completion, Completion, CompletionWaiter};
pub use semaphore::Semaphore;
