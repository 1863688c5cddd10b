//! Records as the two stores describe them, and their canonical forms.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use utoipa::ToSchema;

/// Kind of OAuth2 client a service account represents.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Service,
    Browser,
}

impl AccountType {
    /// Accepts both the short names and the labels stored by the admin console.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "service" | "service-to-service" => Some(AccountType::Service),
            "browser" => Some(AccountType::Browser),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AccountType::Service => "service",
            AccountType::Browser => "browser",
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Client,
    Scope,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntityKind::Client => "client",
            EntityKind::Scope => "scope",
        })
    }
}

/// A service account as the local policy store holds it.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientRecord {
    pub client_id: String,
    pub client_name: String,
    pub account_type: AccountType,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    pub redirect_uris: Vec<String>,
    pub post_logout_redirect_uris: Vec<String>,
    pub allowed_cors_origins: Vec<String>,
    pub token_endpoint_auth_method: String,
    pub audience: Vec<String>,
    pub scopes: Vec<String>,
    pub owner: Option<String>,
    pub skip_consent: bool,
    pub active: bool,
    pub metadata: Map<String, Value>,
    /// Never compared; the authorization server generates secrets.
    pub client_secret: Option<String>,
}

impl ClientRecord {
    /// A service-to-service client with the console's defaults.
    pub fn service(client_id: impl Into<String>) -> Self {
        let client_id = client_id.into();
        Self {
            client_name: client_id.clone(),
            client_id,
            account_type: AccountType::Service,
            grant_types: vec!["client_credentials".into()],
            response_types: Vec::new(),
            redirect_uris: Vec::new(),
            post_logout_redirect_uris: Vec::new(),
            allowed_cors_origins: Vec::new(),
            token_endpoint_auth_method: "client_secret_basic".into(),
            audience: Vec::new(),
            scopes: Vec::new(),
            owner: None,
            skip_consent: true,
            active: true,
            metadata: Map::new(),
            client_secret: None,
        }
    }
}

/// An OAuth2 scope as the local policy store holds it.
#[derive(Clone, Debug, PartialEq)]
pub struct ScopeRecord {
    pub name: String,
    pub description: String,
    pub applies_to: Vec<AccountType>,
    pub active: bool,
}

impl ScopeRecord {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            applies_to: vec![AccountType::Service, AccountType::Browser],
            active: true,
        }
    }
}

/// Comparison-ready entity keyed by a stable identity.
///
/// `fields` is the only definition of what counts as a difference: two
/// entities with the same identity are equal iff their field maps are equal.
pub trait Canonical: Clone + fmt::Debug + PartialEq + Send + Sync + 'static {
    const KIND: EntityKind;

    fn identity(&self) -> &str;

    fn fields(&self) -> BTreeMap<&'static str, Value>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CanonicalClient {
    pub client_id: String,
    pub client_name: String,
    pub account_type: AccountType,
    pub grant_types: BTreeSet<String>,
    pub response_types: BTreeSet<String>,
    pub redirect_uris: BTreeSet<String>,
    pub post_logout_redirect_uris: BTreeSet<String>,
    pub allowed_cors_origins: BTreeSet<String>,
    pub token_endpoint_auth_method: String,
    pub audience: BTreeSet<String>,
    pub scopes: BTreeSet<String>,
    pub owner: Option<String>,
    pub skip_consent: bool,
    pub metadata: Map<String, Value>,
}

impl Canonical for CanonicalClient {
    const KIND: EntityKind = EntityKind::Client;

    fn identity(&self) -> &str {
        &self.client_id
    }

    fn fields(&self) -> BTreeMap<&'static str, Value> {
        BTreeMap::from([
            ("account_type", json!(self.account_type)),
            ("allowed_cors_origins", json!(self.allowed_cors_origins)),
            ("audience", json!(self.audience)),
            ("client_name", json!(self.client_name)),
            ("grant_types", json!(self.grant_types)),
            ("metadata", Value::Object(self.metadata.clone())),
            ("owner", json!(self.owner)),
            (
                "post_logout_redirect_uris",
                json!(self.post_logout_redirect_uris),
            ),
            ("redirect_uris", json!(self.redirect_uris)),
            ("response_types", json!(self.response_types)),
            ("scopes", json!(self.scopes)),
            ("skip_consent", json!(self.skip_consent)),
            (
                "token_endpoint_auth_method",
                json!(self.token_endpoint_auth_method),
            ),
        ])
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CanonicalScope {
    pub name: String,
    pub description: String,
    pub applies_to: BTreeSet<AccountType>,
}

impl Canonical for CanonicalScope {
    const KIND: EntityKind = EntityKind::Scope;

    fn identity(&self) -> &str {
        &self.name
    }

    fn fields(&self) -> BTreeMap<&'static str, Value> {
        BTreeMap::from([
            ("applies_to", json!(self.applies_to)),
            ("description", json!(self.description)),
        ])
    }
}
