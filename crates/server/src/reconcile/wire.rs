//! Admin API payloads built from canonical entities.
//!
//! The inverse direction lives in [`crate::reconcile::canonical`].

use crate::reconcile::canonical::ACCOUNT_TYPE_METADATA_KEY;
use crate::reconcile::diff::Update;
use crate::reconcile::model::{CanonicalClient, CanonicalScope};
use serde_json::{Value, json};

fn client_metadata(client: &CanonicalClient) -> Value {
    let mut metadata = client.metadata.clone();
    metadata.insert(
        ACCOUNT_TYPE_METADATA_KEY.to_string(),
        Value::String(client.account_type.as_str().to_string()),
    );
    Value::Object(metadata)
}

fn scope_string(client: &CanonicalClient) -> String {
    client
        .scopes
        .iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Full client body for `POST /admin/clients`.
pub fn client_payload(client: &CanonicalClient) -> Value {
    json!({
        "client_id": client.client_id,
        "client_name": client.client_name,
        "grant_types": client.grant_types,
        "response_types": client.response_types,
        "redirect_uris": client.redirect_uris,
        "post_logout_redirect_uris": client.post_logout_redirect_uris,
        "allowed_cors_origins": client.allowed_cors_origins,
        "token_endpoint_auth_method": client.token_endpoint_auth_method,
        "audience": client.audience,
        "scope": scope_string(client),
        "owner": client.owner.clone().unwrap_or_default(),
        "skip_consent": client.skip_consent,
        "metadata": client_metadata(client),
    })
}

/// Full scope body for `POST <scopes_path>`.
pub fn scope_payload(scope: &CanonicalScope) -> Value {
    json!({
        "name": scope.name,
        "description": scope.description,
        "applies_to": scope.applies_to,
    })
}

fn replace(path: &str, value: Value) -> Value {
    json!({ "op": "replace", "path": path, "value": value })
}

/// RFC 6902 patch touching only the client attributes in the delta.
pub fn client_patch(update: &Update<CanonicalClient>) -> Value {
    let client = &update.desired;
    let mut ops = Vec::new();
    let mut metadata_done = false;

    for change in &update.delta {
        match change.field {
            "scopes" => ops.push(replace("/scope", json!(scope_string(client)))),
            "owner" => ops.push(replace(
                "/owner",
                json!(client.owner.clone().unwrap_or_default()),
            )),
            "metadata" | "account_type" => {
                if !metadata_done {
                    ops.push(replace("/metadata", client_metadata(client)));
                    metadata_done = true;
                }
            }
            field => ops.push(replace(&format!("/{field}"), change.desired.clone())),
        }
    }
    Value::Array(ops)
}

/// RFC 6902 patch touching only the scope attributes in the delta.
pub fn scope_patch(update: &Update<CanonicalScope>) -> Value {
    Value::Array(
        update
            .delta
            .iter()
            .map(|change| replace(&format!("/{}", change.field), change.desired.clone()))
            .collect(),
    )
}
