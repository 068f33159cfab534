//! The futures/completion model (spec §2 item 2, §4.3) plus the task
//! payload and priority types that the scheduler dispatches.

mod future;
mod payload;
mod priority;
mod token;

pub use future::{new_future_pair, Completion, FutureWriter, ListenableFuture};
pub use payload::{Payload, PayloadKind};
pub use priority::Priority;
pub use token::CancellationToken;
