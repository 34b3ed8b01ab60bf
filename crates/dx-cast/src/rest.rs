//! Discord REST client.
//!
//! # REST endpoints
//!
//! | Operation              | Method | Path                               |
//! |------------------------|--------|------------------------------------|
//! | List own guilds        | GET    | `/users/@me/guilds`                |
//! | Own member record      | GET    | `/guilds/{guild}/members/{user}`   |
//! | Set own nickname       | PATCH  | `/guilds/{guild}/members/@me`      |
//!
//! Requests carry `Authorization: Bot <token>` and share the caller's
//! `reqwest::Client`.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, RETRY_AFTER};
use reqwest::{Method, RequestBuilder, Response};
use serde_json::json;
use tracing::debug;

use crate::error::CastError;
use crate::{Membership, SelfRecord};

/// Page size of `/users/@me/guilds` (platform maximum).
const GUILD_PAGE_LIMIT: usize = 200;

/// Discord REST client.
#[derive(Clone)]
pub struct DiscordRest {
    /// Shared HTTP client.
    http: reqwest::Client,
    /// Versioned API base URL (e.g. `https://discord.com/api/v10`).
    base_url: String,
    /// `Bot <token>` header value.
    auth: String,
    timeout: Duration,
}

impl DiscordRest {
    pub fn new(http: reqwest::Client, base_url: &str, token: &str, timeout: Duration) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth: format!("Bot {token}"),
            timeout,
        }
    }

    /// List all guilds of the current user, following `after` pagination.
    pub async fn current_user_guilds(&self) -> Result<Vec<Membership>, CastError> {
        let mut out = Vec::new();
        let mut after: Option<u64> = None;

        loop {
            let mut req = self
                .request(Method::GET, "/users/@me/guilds")
                .query(&[("limit", GUILD_PAGE_LIMIT.to_string())]);
            if let Some(id) = after {
                req = req.query(&[("after", id.to_string())]);
            }

            let body = self.send_json(req).await?;
            let page = parse_guilds(&body)?;
            let full_page = page.len() == GUILD_PAGE_LIMIT;
            after = page.last().map(|m| m.guild_id);
            out.extend(page);

            if !full_page {
                break;
            }
        }

        debug!(guilds = out.len(), "[rest] guild list fetched");
        Ok(out)
    }

    /// Fetch the member record of `user_id` in `guild_id`.
    pub async fn guild_member(&self, guild_id: u64, user_id: u64) -> Result<SelfRecord, CastError> {
        let req = self.request(Method::GET, &format!("/guilds/{guild_id}/members/{user_id}"));
        let body = self.send_json(req).await?;
        parse_member(&body)
    }

    /// Change the current user's nickname in `guild_id`.
    pub async fn modify_own_nick(&self, guild_id: u64, nick: &str) -> Result<(), CastError> {
        let req = self
            .request(Method::PATCH, &format!("/guilds/{guild_id}/members/@me"))
            .json(&json!({ "nick": nick }));
        let resp = self.send(req).await?;
        debug!(guild_id, status = resp.status().as_u16(), "[rest] nickname updated");
        Ok(())
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{path}", self.base_url))
            .header(AUTHORIZATION, &self.auth)
            .timeout(self.timeout)
    }

    /// Send and map non-success statuses to [`CastError`].
    async fn send(&self, req: RequestBuilder) -> Result<Response, CastError> {
        let resp = req.send().await.map_err(|e| self.classify(e))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let header_retry = resp
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<f64>().ok());
        let body = resp.text().await.unwrap_or_default();
        let retry_after = retry_after_from_body(&body)
            .or(header_retry)
            .filter(|s| s.is_finite() && *s >= 0.0)
            .map(Duration::from_secs_f64);

        Err(CastError::from_status(status.as_u16(), error_message(&body), retry_after))
    }

    async fn send_json(&self, req: RequestBuilder) -> Result<serde_json::Value, CastError> {
        let resp = self.send(req).await?;
        resp.json().await.map_err(|e| self.classify(e))
    }

    fn classify(&self, e: reqwest::Error) -> CastError {
        if e.is_timeout() {
            CastError::Timeout(self.timeout)
        } else {
            CastError::Transport(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

/// Parse a snowflake, which the API encodes as a JSON string.
pub fn parse_snowflake(v: Option<&serde_json::Value>) -> Option<u64> {
    let v = v?;
    match v.as_str() {
        Some(s) => s.parse().ok(),
        None => v.as_u64(),
    }
}

/// Parse a `/users/@me/guilds` page.
pub fn parse_guilds(body: &serde_json::Value) -> Result<Vec<Membership>, CastError> {
    let rows = body
        .as_array()
        .ok_or_else(|| CastError::Transport("guild list is not an array".into()))?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(guild_id) = parse_snowflake(row.get("id")) else {
            continue;
        };
        out.push(Membership {
            guild_id,
            name: row.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            owner: row.get("owner").and_then(|v| v.as_bool()).unwrap_or(false),
            permissions: parse_snowflake(row.get("permissions")).unwrap_or(0),
        });
    }
    Ok(out)
}

/// Parse a guild member object.
pub fn parse_member(body: &serde_json::Value) -> Result<SelfRecord, CastError> {
    if parse_snowflake(body.pointer("/user/id")).is_none() {
        return Err(CastError::Transport("member object without user.id".into()));
    }

    Ok(SelfRecord {
        nick: body.get("nick").and_then(|v| v.as_str()).map(str::to_string),
    })
}

fn retry_after_from_body(body: &str) -> Option<f64> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()?
        .get("retry_after")?
        .as_f64()
}

/// Prefer the API's `message` field over the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.chars().take(200).collect())
}
