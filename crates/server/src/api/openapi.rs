//! OpenAPI/Utoipa configuration.

use crate::api::{health::MISC_TAG, sync::SYNC_TAG};
use utoipa::OpenApi;

/// OpenAPI documentation configuration.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Hydra Reconciler API",
        version = "1.0.0",
        description = "Keeps ORY Hydra clients and scopes in sync with the local policy store."
    ),
    tags(
        (name = MISC_TAG, description = "Miscellaneous endpoints"),
        (name = SYNC_TAG, description = "Hydra reconciliation endpoints")
    )
)]
pub struct ApiDoc;
