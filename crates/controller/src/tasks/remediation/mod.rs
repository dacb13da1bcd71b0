//! Machine deletion remediation: condition tracking, Machine identity and the
//! reconcile state machine that ties them together.

pub mod conditions;
pub mod controller;
pub mod identity;

#[cfg(test)]
mod tests;

pub use controller::reconcile_remediation;
