//! Cluster membership signals consumed by the supplier.

mod events;

pub use events::{MemberEvent, MemberEventListener};
