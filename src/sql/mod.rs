pub mod guardrail;
pub mod prompt;
pub mod sanitizer;
