pub mod flap;
pub mod severity;
pub mod subdue;

pub use severity::Severity;
pub use subdue::{Subdue, SubdueAt};
