//! Built-in example workflows

pub mod approval;
pub mod code_review;

pub use approval::{APPROVAL, APPROVAL_GRANTED};
pub use code_review::CODE_REVIEW;

use crate::pipeline::Pipeline;

/// Every built-in pipeline, ready to register
pub fn builtin() -> Vec<Pipeline> {
    vec![code_review::pipeline(), approval::pipeline()]
}

/// One-line descriptions for `durable-flow workflows`
pub fn describe() -> Vec<(&'static str, &'static str)> {
    vec![
        (
            CODE_REVIEW,
            "discover files, scan them for secrets, report (input: {\"root\": \"<dir>\"})",
        ),
        (
            APPROVAL,
            "request a change, wait for approval.granted, apply (input: {\"change\": \"...\"})",
        ),
    ]
}
