//! Page rendering behind a single trait so the scanner does not care whether a
//! real browser or a plain HTTP client produced the markup.

pub mod chromium;
pub mod http;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{RenderConfig, RendererKind};
use crate::error::FetchError;

pub use chromium::ChromiumRenderer;
pub use http::HttpRenderer;

/// How long to wait and how far to scroll before reading a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderProfile {
    /// Wait after load so client-side scripts can populate the DOM.
    pub settle: Duration,
    pub scrolls: u32,
    pub scroll_pause: Duration,
    pub timeout: Duration,
}

/// Renders a URL, runs its scripts and returns the final markup.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &str, profile: &RenderProfile) -> Result<String, FetchError>;

    fn name(&self) -> &'static str;
}

pub fn build_renderer(config: &RenderConfig) -> Result<Arc<dyn PageRenderer>, FetchError> {
    let renderer: Arc<dyn PageRenderer> = match config.kind {
        RendererKind::Chromium => Arc::new(ChromiumRenderer::new(config)),
        RendererKind::Http => Arc::new(HttpRenderer::new(config)?),
    };
    Ok(renderer)
}
