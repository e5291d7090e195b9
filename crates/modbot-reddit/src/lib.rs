//! Reddit adapter (top post titles).
//!
//! Application-only OAuth: the client-credentials token is cached until
//! shortly before it expires.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::{sync::Mutex, time::Instant};

use modbot_core::{config::RedditCredentials, errors::Error, reddit::TitleSource, Result};

const TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";
const API_BASE: &str = "https://oauth.reddit.com";
/// Refresh this long before the advertised expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Child>,
}

#[derive(Deserialize)]
struct Child {
    data: Post,
}

#[derive(Deserialize)]
struct Post {
    title: String,
}

/// Post titles out of a listing response body, in listing order.
pub fn parse_titles(body: &str) -> Result<Vec<String>> {
    let listing: Listing = serde_json::from_str(body)?;
    Ok(listing
        .data
        .children
        .into_iter()
        .map(|c| c.data.title)
        .collect())
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub struct RedditClient {
    creds: RedditCredentials,
    http: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
}

impl RedditClient {
    pub fn new(creds: RedditCredentials) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(creds.user_agent.clone())
            .build()
            .map_err(|e| Error::Config(format!("reddit http client: {e}")))?;
        Ok(Self {
            creds,
            http,
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        let resp = self
            .http
            .post(TOKEN_URL)
            .basic_auth(&self.creds.client_id, Some(&self.creds.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| Error::External(format!("reddit token request error: {e}")))?;
        if !resp.status().is_success() {
            return Err(Error::External(format!(
                "reddit token request failed: {}",
                resp.status()
            )));
        }
        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| Error::External(format!("reddit token json error: {e}")))?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(EXPIRY_MARGIN);
        tracing::debug!(expires_in = token.expires_in, "refreshed reddit token");
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }
}

#[async_trait]
impl TitleSource for RedditClient {
    async fn top_titles(
        &self,
        subreddit: &str,
        time_filter: &str,
        limit: u32,
    ) -> Result<Vec<String>> {
        let token = self.access_token().await?;
        let limit = limit.to_string();
        let resp = self
            .http
            .get(format!("{API_BASE}/r/{subreddit}/top"))
            .bearer_auth(token)
            .query(&[("t", time_filter), ("limit", limit.as_str())])
            .send()
            .await
            .map_err(|e| Error::External(format!("reddit request error: {e}")))?;

        if !resp.status().is_success() {
            if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
                *self.token.lock().await = None;
            }
            return Err(Error::External(format!(
                "reddit listing failed: {}",
                resp.status()
            )));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| Error::External(format!("reddit body error: {e}")))?;
        parse_titles(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn titles_from_listing() {
        let body = r#"{
            "kind": "Listing",
            "data": {
                "after": "t3_x",
                "children": [
                    {"kind": "t3", "data": {"title": "Teeth are bones you can see", "ups": 10}},
                    {"kind": "t3", "data": {"title": "Pockets are tiny bags", "ups": 3}}
                ]
            }
        }"#;
        assert_eq!(
            parse_titles(body).unwrap(),
            vec!["Teeth are bones you can see", "Pockets are tiny bags"]
        );
    }

    #[test]
    fn malformed_listing_is_an_error() {
        assert!(matches!(parse_titles("{}"), Err(Error::Json(_))));
    }
}
