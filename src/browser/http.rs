//! Plain HTTP renderer. Executes no scripts, so it only sees server-rendered
//! markup; useful for sites that do not need a browser and for debugging.

use async_trait::async_trait;
use log::debug;
use reqwest::Client;

use super::{PageRenderer, RenderProfile};
use crate::config::RenderConfig;
use crate::error::FetchError;

pub struct HttpRenderer {
    client: Client,
}

impl HttpRenderer {
    pub fn new(config: &RenderConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl PageRenderer for HttpRenderer {
    async fn render(&self, url: &str, profile: &RenderProfile) -> Result<String, FetchError> {
        if profile.scrolls > 0 {
            debug!("HTTP renderer ignores {} scrolls for {}", profile.scrolls, url);
        }

        let response = self
            .client
            .get(url)
            .timeout(profile.timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        Ok(response.text().await?)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
