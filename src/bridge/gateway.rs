use crate::error::GatewayError;
use crate::import::config::GatewayConfig;
use crate::import::util::truncate_with_ellipsis;
use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const LOGGED_RESULT_CHARS: usize = 500;

/// A reasoning endpoint that runs a prompt with a set of allowed tools.
pub trait Gateway {
    /// Run `prompt` with `tools` as the capability scope; returns the result text.
    fn complete(&self, prompt: &str, tools: &[String]) -> Result<String, GatewayError>;
}

#[derive(Debug, Serialize)]
struct GatewayRequest<'a> {
    prompt: &'a str,
    args: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GatewayUsage {
    pub input_tokens: u64,
    pub cache_creation_input_tokens: u64,
    pub cache_read_input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GatewayResponse {
    #[serde(rename = "type")]
    pub kind: String,
    pub subtype: String,
    pub is_error: bool,
    pub duration_ms: u64,
    pub duration_api_ms: u64,
    pub num_turns: u32,
    pub result: String,
    pub session_id: String,
    pub total_cost_usd: f64,
    pub usage: GatewayUsage,
}

fn scope_args(tools: &[String]) -> Vec<String> {
    vec!["--allowedTools".to_string(), tools.join(",")]
}

pub fn decode_response(body: &str) -> Result<GatewayResponse, GatewayError> {
    let parsed: GatewayResponse =
        serde_json::from_str(body).map_err(|err| GatewayError::Decode(err.to_string()))?;
    if parsed.is_error {
        return Err(GatewayError::Reported(truncate_with_ellipsis(
            &parsed.result,
            LOGGED_RESULT_CHARS,
        )));
    }
    Ok(parsed)
}

fn log_telemetry(response: &GatewayResponse) {
    tracing::debug!(
        duration_ms = response.duration_ms,
        duration_api_ms = response.duration_api_ms,
        num_turns = response.num_turns,
        cost_usd = response.total_cost_usd,
        input_tokens = response.usage.input_tokens,
        cache_creation_tokens = response.usage.cache_creation_input_tokens,
        cache_read_tokens = response.usage.cache_read_input_tokens,
        output_tokens = response.usage.output_tokens,
        session = %response.session_id,
        "gateway call finished"
    );
    tracing::debug!(
        "gateway result: {}",
        truncate_with_ellipsis(&response.result, LOGGED_RESULT_CHARS)
    );
}

/// Blocking HTTP client for the bridge's reasoning endpoint.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: Client,
    url: String,
}

impl HttpGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build gateway http client")?;
        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Gateway for HttpGateway {
    fn complete(&self, prompt: &str, tools: &[String]) -> Result<String, GatewayError> {
        let payload = GatewayRequest {
            prompt,
            args: scope_args(tools),
        };
        tracing::debug!(
            url = %self.url,
            tools = %tools.join(","),
            prompt_chars = prompt.chars().count(),
            "calling gateway"
        );
        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .map_err(|err| GatewayError::Transport(err.to_string()))?;
        if !response.status().is_success() {
            return Err(GatewayError::Status(response.status().as_u16()));
        }
        let body = response
            .text()
            .map_err(|err| GatewayError::Transport(err.to_string()))?;
        let decoded = decode_response(&body)?;
        log_telemetry(&decoded);
        Ok(decoded.result)
    }
}
