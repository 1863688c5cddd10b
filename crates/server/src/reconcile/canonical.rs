//! Normalization of local records and remote payloads into canonical entities.
//!
//! Everything here is pure and total. Remote payloads are arbitrary JSON; a
//! field with an unexpected shape degrades to its default instead of failing,
//! so the diff engine only ever sees well-typed entities.

use crate::reconcile::model::{
    AccountType, CanonicalClient, CanonicalScope, ClientRecord, ScopeRecord,
};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use url::Url;

/// Metadata key under which the account type travels to the remote side.
pub const ACCOUNT_TYPE_METADATA_KEY: &str = "account_type";

/// A client object as returned by the admin API listing.
#[derive(Clone, Debug)]
pub struct RemoteClient(pub Value);

/// A scope object as returned by the admin API listing.
#[derive(Clone, Debug)]
pub struct RemoteScope(pub Value);

/// Conversion of a source-specific record into its canonical shape.
pub trait Canonicalize {
    type Output;

    fn canonicalize(&self) -> Self::Output;
}

impl Canonicalize for ClientRecord {
    type Output = CanonicalClient;

    fn canonicalize(&self) -> CanonicalClient {
        let mut metadata = self.metadata.clone();
        metadata.remove(ACCOUNT_TYPE_METADATA_KEY);
        CanonicalClient {
            client_id: self.client_id.trim().to_string(),
            client_name: self.client_name.trim().to_string(),
            account_type: self.account_type,
            grant_types: text_set(&self.grant_types),
            response_types: text_set(&self.response_types),
            redirect_uris: uri_set(&self.redirect_uris),
            post_logout_redirect_uris: uri_set(&self.post_logout_redirect_uris),
            allowed_cors_origins: origin_set(&self.allowed_cors_origins),
            token_endpoint_auth_method: self.token_endpoint_auth_method.trim().to_string(),
            audience: uri_set(&self.audience),
            scopes: text_set(&self.scopes),
            owner: optional_text(self.owner.as_deref()),
            skip_consent: self.skip_consent,
            metadata,
        }
    }
}

impl Canonicalize for ScopeRecord {
    type Output = CanonicalScope;

    fn canonicalize(&self) -> CanonicalScope {
        CanonicalScope {
            name: self.name.trim().to_string(),
            description: self.description.trim().to_string(),
            applies_to: self.applies_to.iter().copied().collect(),
        }
    }
}

impl Canonicalize for RemoteClient {
    type Output = CanonicalClient;

    fn canonicalize(&self) -> CanonicalClient {
        let raw = &self.0;
        let mut metadata = match raw.get("metadata") {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        let account_type = metadata
            .remove(ACCOUNT_TYPE_METADATA_KEY)
            .as_ref()
            .and_then(Value::as_str)
            .and_then(AccountType::parse)
            .unwrap_or(AccountType::Service);
        let scopes = string_field(raw, "scope")
            .split_whitespace()
            .map(str::to_string)
            .collect();

        CanonicalClient {
            client_id: string_field(raw, "client_id").trim().to_string(),
            client_name: string_field(raw, "client_name").trim().to_string(),
            account_type,
            grant_types: text_set(&string_list(raw, "grant_types")),
            response_types: text_set(&string_list(raw, "response_types")),
            redirect_uris: uri_set(&string_list(raw, "redirect_uris")),
            post_logout_redirect_uris: uri_set(&string_list(raw, "post_logout_redirect_uris")),
            allowed_cors_origins: origin_set(&string_list(raw, "allowed_cors_origins")),
            token_endpoint_auth_method: string_field(raw, "token_endpoint_auth_method")
                .trim()
                .to_string(),
            audience: uri_set(&string_list(raw, "audience")),
            scopes,
            owner: optional_text(raw.get("owner").and_then(Value::as_str)),
            skip_consent: raw
                .get("skip_consent")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            metadata,
        }
    }
}

impl Canonicalize for RemoteScope {
    type Output = CanonicalScope;

    fn canonicalize(&self) -> CanonicalScope {
        let raw = &self.0;
        CanonicalScope {
            name: string_field(raw, "name").trim().to_string(),
            description: string_field(raw, "description").trim().to_string(),
            applies_to: string_list(raw, "applies_to")
                .iter()
                .filter_map(|s| AccountType::parse(s))
                .collect(),
        }
    }
}

fn string_field<'a>(raw: &'a Value, key: &str) -> &'a str {
    raw.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn string_list(raw: &Value, key: &str) -> Vec<String> {
    match raw.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn optional_text(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn text_set(values: &[String]) -> BTreeSet<String> {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

fn uri_set(values: &[String]) -> BTreeSet<String> {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(normalize_uri)
        .collect()
}

fn origin_set(values: &[String]) -> BTreeSet<String> {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(normalize_origin)
        .collect()
}

/// Lowercases scheme and host, drops default ports and resolves dot segments.
/// Values that are not absolute URLs are returned trimmed.
pub fn normalize_uri(value: &str) -> String {
    match Url::parse(value) {
        Ok(url) if url.has_host() => url.to_string(),
        _ => value.to_string(),
    }
}

/// Reduces a CORS origin to `scheme://host[:port]`.
pub fn normalize_origin(value: &str) -> String {
    match Url::parse(value) {
        Ok(url) if url.has_host() => url.origin().ascii_serialization(),
        _ => value.trim_end_matches('/').to_string(),
    }
}
