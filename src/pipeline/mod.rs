//! Pipeline stages for PDF-to-audiobook conversion.
//!
//! Each submodule implements exactly one step; the orchestrator in
//! [`crate::convert`] sequences them.
//!
//! ## Data Flow
//!
//! ```text
//! extract ──▶ normalize ──▶ chunk ──▶ synth ──▶ assemble ──▶ mux
//! (pdfium)    (regex)       (≤4000)   (TTS API)  (ffmpeg     (ffmpeg
//!                                                 + ffprobe)  lavfi)
//! ```
//!
//! 1. [`extract`]   — text layer, page count and title; runs in `spawn_blocking`
//! 2. [`normalize`] — line breaks to pauses, whitespace and symbol cleanup
//! 3. [`chunk`]     — sentence-packed pieces under the provider's input limit
//! 4. [`synth`]     — one provider call per chunk, strictly in order
//! 5. [`assemble`]  — lossless concat of the chunk files, duration probe
//! 6. [`mux`]       — title-card video over the narration
//!
//! [`runner`] executes the external tools and [`media`] puts the ffmpeg
//! steps behind a trait.

pub mod assemble;
pub mod chunk;
pub mod extract;
pub mod media;
pub mod mux;
pub mod normalize;
pub mod runner;
pub mod synth;
