use anyhow::{anyhow, Context, Result};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Thin Marzban admin API client with a cached bearer token.
pub struct ApiClient {
    client: Client,
    base_url: String,
    username: String,
    password: String,
    token: RwLock<Option<String>>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl ApiClient {
    pub fn new(base_url: String, username: String, password: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            username,
            password,
            token: RwLock::new(None),
        }
    }

    async fn login(&self) -> Result<String> {
        let url = format!("{}/api/admin/token", self.base_url);
        let resp = self
            .client
            .post(&url)
            .form(&[
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
            ])
            .send()
            .await
            .context("Marzban login request failed")?;

        if !resp.status().is_success() {
            return Err(anyhow!("Marzban login failed: {}", resp.status()));
        }

        let token: TokenResponse = resp.json().await?;
        info!("Authenticated against Marzban at {}", self.base_url);
        *self.token.write().await = Some(token.access_token.clone());
        Ok(token.access_token)
    }

    async fn token(&self) -> Result<String> {
        if let Some(token) = self.token.read().await.clone() {
            return Ok(token);
        }
        self.login().await
    }

    async fn send<T: for<'de> Deserialize<'de>>(
        &self,
        build: impl Fn(&Client, &str) -> reqwest::RequestBuilder,
        path: &str,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut token = self.token().await?;

        for attempt in 0..2 {
            let resp = build(&self.client, &url).bearer_auth(&token).send().await?;
            if resp.status() == StatusCode::UNAUTHORIZED && attempt == 0 {
                debug!("Marzban token expired, logging in again");
                token = self.login().await?;
                continue;
            }
            if !resp.status().is_success() {
                return Err(anyhow!("Request {} failed: {}", path, resp.status()));
            }
            return Ok(resp.json().await?);
        }
        Err(anyhow!("Request {} failed: unauthorized", path))
    }

    pub async fn get<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T> {
        self.send(|client, url| client.get(url), path).await
    }

    pub async fn post<T: for<'de> Deserialize<'de>, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.send(|client, url| client.post(url).json(body), path)
            .await
    }
}
