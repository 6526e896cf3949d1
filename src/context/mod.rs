//! Per-request context handed to every handler.
//!
//! Route parameters travel inside the [`Context`] itself: the router builds
//! one per matched request, so there is no side table to look them up in and
//! nothing to clean up after the handler returns.

use std::collections::HashMap;
use std::str::FromStr;

use anyhow::{Context as _, anyhow};

use crate::Request;

/// Named values captured from the matched route template.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Parameters {
    map: HashMap<String, String>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.map.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Parameters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Self::new();
        for (k, v) in iter {
            params.insert(k, v);
        }
        params
    }
}

/// The request plus everything the router learned while matching it.
#[derive(Debug, Clone)]
pub struct Context {
    request: Request,
    params: Parameters,
}

impl Context {
    /// Context without route parameters.
    pub fn new(request: Request) -> Self {
        Self::with_params(request, Parameters::new())
    }

    pub fn with_params(request: Request, params: Parameters) -> Self {
        Self { request, params }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn params(&self) -> &Parameters {
        &self.params
    }

    /// A route parameter by name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    pub fn param_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.param(name).unwrap_or(default)
    }

    /// A route parameter parsed into `T`.
    ///
    /// # Errors
    ///
    /// Fails when the parameter is missing or does not parse.
    pub fn param_parsed<T>(&self, name: &str) -> anyhow::Result<T>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        let raw = self
            .param(name)
            .ok_or_else(|| anyhow!("missing route parameter `{name}`"))?;
        raw.parse::<T>()
            .with_context(|| format!("invalid route parameter `{name}`: {raw:?}"))
    }

    /// A query-string parameter by name.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.request.query_param(name)
    }

    /// `true`/`false` query flag, falling back to `default` when absent or malformed.
    pub fn query_flag(&self, name: &str, default: bool) -> bool {
        self.query_param(name)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Decodes the request body as JSON.
    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: serde::de::DeserializeOwned,
    {
        serde_json::from_slice(self.request.body())
    }

    pub fn into_request(self) -> Request {
        self.request
    }
}
