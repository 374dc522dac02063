use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::params::Params;

static API_URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\.api\.sanity\.io.*?(?:query|listen)/(.*?)\?(.*)")
        .expect("api url pattern should compile")
});

#[derive(Debug, Clone, PartialEq)]
pub struct ApiUrlQuery {
    pub dataset: String,
    pub query: String,
    pub params: Params,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiUrlError {
    #[error("api url is missing a dataset segment")]
    MissingDataset,
    #[error("api url has no `query` parameter")]
    MissingQuery,
    #[error("parameter `{name}` is not valid JSON: {message}")]
    InvalidParam { name: String, message: String },
}

#[must_use]
pub fn decode_api_url(text: &str) -> Option<Result<ApiUrlQuery, ApiUrlError>> {
    let captures = API_URL_PATTERN.captures(text)?;
    let dataset = captures.get(1).map_or("", |m| m.as_str());
    let query_string = captures.get(2).map_or("", |m| m.as_str());
    Some(decode_parts(dataset, query_string))
}

fn decode_parts(dataset: &str, query_string: &str) -> Result<ApiUrlQuery, ApiUrlError> {
    if dataset.is_empty() {
        return Err(ApiUrlError::MissingDataset);
    }

    let mut query = None;
    let mut params = Params::new();
    for (key, value) in url::form_urlencoded::parse(query_string.trim().as_bytes()) {
        if key == "query" {
            query = Some(value.into_owned());
            continue;
        }

        let name = key.strip_prefix('$').unwrap_or(&key[..]);
        if name.is_empty() {
            continue;
        }
        let parsed: Value =
            serde_json::from_str(&value).map_err(|error| ApiUrlError::InvalidParam {
                name: name.to_string(),
                message: error.to_string(),
            })?;
        params.insert(name.to_string(), parsed);
    }

    Ok(ApiUrlQuery {
        dataset: dataset.to_string(),
        query: query.ok_or(ApiUrlError::MissingQuery)?,
        params,
    })
}
