// src/services/api.rs

//! Two-step retrieval for sources whose listing lives behind a JSON API.
//!
//! The endpoint page is fetched first and scanned for an edition id; the
//! id is then posted as a form to the API, which answers with JSON.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use regex::Regex;
use reqwest::Client;
use reqwest::header::HeaderMap;

use crate::error::{AppError, FetchError, Result};
use crate::models::PayloadFormat;
use crate::services::fetch::{FetchOutcome, Payload, SourceAdapter, check_status};
use crate::utils::template::render_endpoint;

pub struct ApiAdapter {
    client: Client,
    endpoint_template: String,
    headers: HeaderMap,
    id_pattern: Regex,
    api_url: String,
    form: BTreeMap<String, String>,
}

impl ApiAdapter {
    /// Fails when `id_pattern` does not compile or has no capture group.
    pub fn new(
        client: Client,
        endpoint_template: &str,
        headers: HeaderMap,
        id_pattern: &str,
        api_url: &str,
        form: BTreeMap<String, String>,
    ) -> Result<Self> {
        let id_pattern = Regex::new(id_pattern)
            .map_err(|e| AppError::config(format!("invalid id_pattern '{id_pattern}': {e}")))?;
        if id_pattern.captures_len() < 2 {
            return Err(AppError::config(format!(
                "id_pattern '{id_pattern}' needs a capture group"
            )));
        }
        Ok(Self {
            client,
            endpoint_template: endpoint_template.to_string(),
            headers,
            id_pattern,
            api_url: api_url.to_string(),
            form,
        })
    }

    fn extract_id(&self, page: &str) -> Option<String> {
        self.id_pattern
            .captures(page)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }

    fn form_for(&self, id: &str) -> Vec<(String, String)> {
        self.form
            .iter()
            .map(|(k, v)| (k.clone(), v.replace("{id}", id)))
            .collect()
    }
}

#[async_trait]
impl SourceAdapter for ApiAdapter {
    fn method(&self) -> &'static str {
        "specialized_api"
    }

    async fn fetch(&self, date: NaiveDate) -> std::result::Result<FetchOutcome, FetchError> {
        let page_url = render_endpoint(&self.endpoint_template, date)?;
        let api_url = render_endpoint(&self.api_url, date)?;

        let page = self
            .client
            .get(&page_url)
            .headers(self.headers.clone())
            .send()
            .await?;
        if !check_status(page.status(), &page_url)? {
            return Ok(FetchOutcome::NoContent);
        }
        let page = page.text().await?;

        // An edition page without an id means nothing was published.
        let Some(id) = self.extract_id(&page) else {
            log::info!("No edition id found at {}", page_url);
            return Ok(FetchOutcome::NoContent);
        };
        log::debug!("Edition id {} from {}", id, page_url);

        let response = self
            .client
            .post(&api_url)
            .headers(self.headers.clone())
            .header("X-Requested-With", "XMLHttpRequest")
            .form(&self.form_for(&id))
            .send()
            .await?;
        if !check_status(response.status(), &api_url)? {
            return Ok(FetchOutcome::NoContent);
        }

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(FetchOutcome::NoContent);
        }

        Ok(FetchOutcome::Payload(Payload {
            body,
            format: PayloadFormat::Json,
            source_url: api_url,
        }))
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 7).unwrap()
    }

    fn adapter(server: &MockServer) -> ApiAdapter {
        let mut form = BTreeMap::new();
        form.insert("EditionID_FK".to_string(), "{id}".to_string());
        form.insert("length".to_string(), "500".to_string());
        ApiAdapter::new(
            Client::new(),
            &format!("{}/online/{{date_iso}}", server.uri()),
            HeaderMap::new(),
            r"data\.EditionID_FK\s*=\s*'(\d+)'",
            &format!("{}/online/AdsMainEditionJson", server.uri()),
            form,
        )
        .unwrap()
    }

    #[test]
    fn pattern_without_group_is_rejected() {
        let result = ApiAdapter::new(
            Client::new(),
            "https://x.org",
            HeaderMap::new(),
            r"EditionID_FK",
            "https://x.org/api",
            BTreeMap::new(),
        );
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[tokio::test]
    async fn posts_extracted_id_and_returns_json() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/online/2024-03-07"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<script>data.EditionID_FK = '4711';</script>"),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/online/AdsMainEditionJson"))
            .and(header("x-requested-with", "XMLHttpRequest"))
            .and(body_string_contains("EditionID_FK=4711"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"data":[]}"#))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = adapter(&server).fetch(date()).await.unwrap();
        match outcome {
            FetchOutcome::Payload(payload) => {
                assert_eq!(payload.format, PayloadFormat::Json);
                assert_eq!(payload.body, r#"{"data":[]}"#);
            }
            other => panic!("expected payload, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn page_without_id_is_no_content() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>holiday</html>"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let outcome = adapter(&server).fetch(date()).await;
        assert_eq!(outcome, Ok(FetchOutcome::NoContent));
    }

    #[tokio::test]
    async fn api_failure_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("data.EditionID_FK = '1'"),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = adapter(&server).fetch(date()).await.unwrap_err();
        assert!(matches!(err, FetchError::Unreachable(_)));
    }
}
