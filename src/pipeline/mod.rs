//! Pipeline stages for batch radiograph analysis.
//!
//! Each submodule implements exactly one transformation step and is tested
//! on its own.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ encode ──▶ llm ──▶ render
//! (path/URL) (JPEG+b64) (VLM)   (HTML)
//! ```
//!
//! 1. [`input`]  — read a local file or download a URL into a `SourceImage`
//! 2. [`encode`] — decode, flatten colour, bound the size, JPEG + base64;
//!    runs in `spawn_blocking` because it is CPU-bound
//! 3. [`llm`]    — drive the vision-model call with retry/backoff; the only
//!    stage with API traffic
//! 4. [`render`] — assemble all entries into one self-contained HTML page

pub mod encode;
pub mod input;
pub mod llm;
pub mod render;
