//! Stages used by the in-process pdfium backend.
//!
//! ```text
//! render ──▶ encode ──▶ llm ──▶ postprocess
//! (pdfium)   (base64)   (VLM)   (cleanup)
//! ```
//!
//! 1. [`render`] — bind pdfium, read the text layer, rasterise pages; all
//!    pdfium calls run in `spawn_blocking`
//! 2. [`encode`] — PNG-encode and base64-wrap a page image for the provider
//! 3. [`llm`]    — one refinement call per page with retry/backoff; only used
//!    by the assisted mode
//! 4. [`postprocess`] — deterministic markdown cleanup

pub mod encode;
pub mod llm;
pub mod postprocess;
pub mod render;
