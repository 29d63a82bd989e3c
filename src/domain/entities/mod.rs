pub mod check;
pub mod client;
pub mod event;
pub mod result;

pub use check::{CheckConfig, CheckPayload};
pub use client::Client;
pub use event::{Event, EventAction, EventOccurrence};
pub use result::CheckResult;
