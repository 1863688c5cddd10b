//! Loading desired and observed state.

use crate::error::{FetchError, StoreError};
use crate::reconcile::canonical::Canonicalize;
use crate::reconcile::model::{Canonical, CanonicalClient, CanonicalScope};
use crate::reconcile::ports::{AdminApi, PolicyStore, RemoteEntity};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Canonical clients and scopes keyed by identity.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StateSnapshot {
    pub clients: HashMap<String, CanonicalClient>,
    pub scopes: HashMap<String, CanonicalScope>,
}

fn index<T: Canonical>(items: impl IntoIterator<Item = T>, origin: &'static str) -> HashMap<String, T> {
    let mut out = HashMap::new();
    for item in items {
        if item.identity().is_empty() {
            tracing::warn!(
                name = "reconcile.source.missing_identity",
                target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                origin,
                entity = %T::KIND,
                message = "Ignoring entity without identity"
            );
            continue;
        }
        let key = item.identity().to_string();
        if out.insert(key.clone(), item).is_some() {
            tracing::warn!(
                name = "reconcile.source.duplicate_identity",
                target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                origin,
                entity = %T::KIND,
                identity = %key,
                message = "Duplicate identity, keeping the last occurrence"
            );
        }
    }
    out
}

/// Reads active clients and scopes from the local policy store.
#[derive(Clone)]
pub struct DesiredStateReader {
    store: Arc<dyn PolicyStore>,
}

impl DesiredStateReader {
    pub fn new(store: Arc<dyn PolicyStore>) -> Self {
        Self { store }
    }

    #[tracing::instrument(name = "desired_state_load", skip(self))]
    pub async fn load(&self) -> Result<StateSnapshot, StoreError> {
        let (clients, scopes) = tokio::try_join!(
            self.store.list_active_clients(),
            self.store.list_active_scopes()
        )?;
        Ok(StateSnapshot {
            clients: index(
                clients.iter().filter(|c| c.active).map(Canonicalize::canonicalize),
                "desired",
            ),
            scopes: index(
                scopes.iter().filter(|s| s.active).map(Canonicalize::canonicalize),
                "desired",
            ),
        })
    }
}

/// Pages through the admin API until every listing is exhausted.
#[derive(Clone)]
pub struct ObservedStateFetcher {
    api: Arc<dyn AdminApi>,
}

impl ObservedStateFetcher {
    pub fn new(api: Arc<dyn AdminApi>) -> Self {
        Self { api }
    }

    #[tracing::instrument(name = "observed_state_load", skip(self))]
    pub async fn load(&self) -> Result<StateSnapshot, FetchError> {
        let (clients, scopes) = tokio::try_join!(
            fetch_all::<CanonicalClient>(self.api.as_ref()),
            fetch_all::<CanonicalScope>(self.api.as_ref())
        )?;
        Ok(StateSnapshot { clients, scopes })
    }
}

/// Any failed page aborts the listing: a partial listing is
/// indistinguishable from fewer objects existing.
async fn fetch_all<T: RemoteEntity>(api: &dyn AdminApi) -> Result<HashMap<String, T>, FetchError> {
    let mut items = Vec::new();
    let mut seen_cursors = HashSet::new();
    let mut cursor: Option<String> = None;
    let mut pages = 0usize;

    loop {
        let page = T::list_page(api, cursor.as_deref())
            .await
            .map_err(|source| FetchError::Remote {
                entity: T::KIND,
                source,
            })?;
        pages += 1;
        items.extend(page.items.into_iter().map(T::from_remote));

        match page.next_cursor {
            Some(next) => {
                if !seen_cursors.insert(next.clone()) {
                    return Err(FetchError::CursorLoop {
                        entity: T::KIND,
                        cursor: next,
                    });
                }
                cursor = Some(next);
            }
            None => break,
        }
    }

    tracing::debug!(
        name = "reconcile.source.observed_listed",
        target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
        entity = %T::KIND,
        pages,
        count = items.len(),
        message = "Fetched remote listing"
    );
    Ok(index(items, "observed"))
}
