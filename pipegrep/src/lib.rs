pub mod errors;
pub mod grep;
pub mod queue;

pub use errors::{GrepError, GrepResult};
pub use grep::{CancelToken, Grep, GrepRun, Matches};
pub use queue::{Envelope, Queue};
