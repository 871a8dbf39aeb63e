pub mod escalation;
pub mod guardrail;
pub mod quota;
pub mod stages;
pub mod title;

mod patterns;
