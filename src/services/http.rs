// src/services/http.rs

//! Direct HTTP retrieval for sources that serve static HTML, XML or JSON.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use reqwest::header::HeaderMap;

use crate::error::FetchError;
use crate::models::PayloadFormat;
use crate::services::fetch::{FetchOutcome, Payload, SourceAdapter, check_status};
use crate::utils::template::render_endpoint;

/// Plain GET against the rendered endpoint template.
pub struct HttpAdapter {
    client: Client,
    endpoint_template: String,
    headers: HeaderMap,
    format: PayloadFormat,
}

impl HttpAdapter {
    pub fn new(
        client: Client,
        endpoint_template: &str,
        headers: HeaderMap,
        format: PayloadFormat,
    ) -> Self {
        Self {
            client,
            endpoint_template: endpoint_template.to_string(),
            headers,
            format,
        }
    }
}

#[async_trait]
impl SourceAdapter for HttpAdapter {
    fn method(&self) -> &'static str {
        "direct_http"
    }

    async fn fetch(&self, date: NaiveDate) -> Result<FetchOutcome, FetchError> {
        let url = render_endpoint(&self.endpoint_template, date)?;
        log::debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .headers(self.headers.clone())
            .send()
            .await?;

        if !check_status(response.status(), &url)? {
            log::info!("No bulletin at {} ({})", url, response.status());
            return Ok(FetchOutcome::NoContent);
        }

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(FetchOutcome::NoContent);
        }

        Ok(FetchOutcome::Payload(Payload {
            body,
            format: self.format,
            source_url: url,
        }))
    }
}
