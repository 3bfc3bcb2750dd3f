//! Page fetching for PageLens.
//!
//! This crate provides:
//! - [`Fetcher`]: HTTP-first fetcher with an ordered strategy list
//! - [`BrowserRenderer`] / [`RemoteRenderer`]: browser-rendering fallback
//! - [`PageSource`]: the seam the orchestrator fetches through
//! - SSRF and URL normalisation helpers in [`guard`]

pub mod fetcher;
pub mod guard;
pub mod renderer;
pub mod substance;

pub use fetcher::{FetchStrategy, Fetcher, PageSource, RawPage};
pub use guard::{is_ssrf_target, normalize_target};
pub use renderer::{BrowserRenderer, RemoteRenderer, RenderedPage};
pub use substance::{Substance, assess};
