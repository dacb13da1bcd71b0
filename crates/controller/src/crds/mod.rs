pub mod remediation;

pub use remediation::*;
