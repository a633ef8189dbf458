//! # Vision Module
//!
//! Descrizioni AI delle immagini:
//! - `client`: contratto con il collaboratore esterno e client OpenAI-compatibile
//! - `describer`: chiamata singola, rate-limited, con retry e timeout

pub mod client;
pub mod describer;

pub use client::{OpenAiVisionClient, VisionClient, VisionRequest};
pub use describer::VisionDescriber;
