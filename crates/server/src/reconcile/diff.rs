//! Desired vs. observed comparison.

use crate::error::{DanglingScope, ValidationError};
use crate::reconcile::model::{Canonical, CanonicalClient, CanonicalScope};
use crate::reconcile::source::StateSnapshot;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

/// One attribute that differs between desired and observed state.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FieldChange {
    pub field: &'static str,
    pub desired: Value,
    /// `Null` when the observed value is unknown.
    pub observed: Value,
}

/// An entity to update remotely, with the attributes that differ.
#[derive(Clone, Debug, PartialEq)]
pub struct Update<T> {
    pub desired: T,
    pub delta: Vec<FieldChange>,
}

impl<T: Canonical> Update<T> {
    /// Full overwrite, for when the remote object's current shape is unknown.
    pub fn overwrite(desired: T) -> Self {
        let delta = desired
            .fields()
            .into_iter()
            .map(|(field, value)| FieldChange {
                field,
                desired: value,
                observed: Value::Null,
            })
            .collect();
        Self { desired, delta }
    }

    pub fn identity(&self) -> &str {
        self.desired.identity()
    }

    pub fn changed_fields(&self) -> Vec<String> {
        self.delta.iter().map(|c| c.field.to_string()).collect()
    }

    pub fn touches(&self, field: &str) -> bool {
        self.delta.iter().any(|c| c.field == field)
    }
}

/// Partition of the identity union for one entity type.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeSet<T> {
    pub to_create: Vec<T>,
    pub to_update: Vec<Update<T>>,
    pub to_delete: Vec<T>,
    pub unchanged: Vec<String>,
}

impl<T> Default for ChangeSet<T> {
    fn default() -> Self {
        Self {
            to_create: Vec::new(),
            to_update: Vec::new(),
            to_delete: Vec::new(),
            unchanged: Vec::new(),
        }
    }
}

impl<T: Canonical> ChangeSet<T> {
    /// Whether applying this change set would touch the remote side.
    pub fn is_converged(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }

    pub fn mutation_count(&self) -> usize {
        self.to_create.len() + self.to_update.len() + self.to_delete.len()
    }

    pub fn create_ids(&self) -> Vec<&str> {
        self.to_create.iter().map(Canonical::identity).collect()
    }

    pub fn update_ids(&self) -> Vec<&str> {
        self.to_update.iter().map(Update::identity).collect()
    }

    pub fn delete_ids(&self) -> Vec<&str> {
        self.to_delete.iter().map(Canonical::identity).collect()
    }
}

/// Change sets for every entity type of one run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Plan {
    pub scopes: ChangeSet<CanonicalScope>,
    pub clients: ChangeSet<CanonicalClient>,
}

impl Plan {
    pub fn is_converged(&self) -> bool {
        self.scopes.is_converged() && self.clients.is_converged()
    }

    pub fn unchanged_count(&self) -> usize {
        self.scopes.unchanged.len() + self.clients.unchanged.len()
    }
}

/// Classify every identity present on either side.
pub fn diff<T: Canonical>(
    desired: &HashMap<String, T>,
    observed: &HashMap<String, T>,
) -> ChangeSet<T> {
    let keys: BTreeSet<&String> = desired.keys().chain(observed.keys()).collect();
    let mut out = ChangeSet::default();

    for key in keys {
        match (desired.get(key), observed.get(key)) {
            (Some(want), None) => out.to_create.push(want.clone()),
            (None, Some(have)) => out.to_delete.push(have.clone()),
            (Some(want), Some(have)) => {
                let delta = field_delta(want, have);
                if delta.is_empty() {
                    out.unchanged.push(key.clone());
                } else {
                    out.to_update.push(Update {
                        desired: want.clone(),
                        delta,
                    });
                }
            }
            (None, None) => unreachable!("key comes from one of the maps"),
        }
    }
    out
}

fn field_delta<T: Canonical>(desired: &T, observed: &T) -> Vec<FieldChange> {
    let have = observed.fields();
    desired
        .fields()
        .into_iter()
        .filter_map(|(field, want)| {
            let seen = have.get(field).cloned().unwrap_or(Value::Null);
            (want != seen).then_some(FieldChange {
                field,
                desired: want,
                observed: seen,
            })
        })
        .collect()
}

/// Every scope a desired client names must itself be desired, and no scope
/// name may contain whitespace.
pub fn validate_references(desired: &StateSnapshot) -> Result<(), ValidationError> {
    let mut dangling: Vec<DanglingScope> = desired
        .clients
        .values()
        .flat_map(|client| {
            client
                .scopes
                .iter()
                .filter(|scope| !desired.scopes.contains_key(*scope))
                .map(|scope| DanglingScope {
                    client_id: client.client_id.clone(),
                    scope: scope.clone(),
                })
        })
        .collect();

    let spaced_names: Vec<String> = desired
        .scopes
        .keys()
        .chain(desired.clients.values().flat_map(|client| client.scopes.iter()))
        .filter(|name| name.chars().any(char::is_whitespace))
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    if dangling.is_empty() && spaced_names.is_empty() {
        return Ok(());
    }
    dangling.sort_by(|a, b| (&a.client_id, &a.scope).cmp(&(&b.client_id, &b.scope)));
    Err(ValidationError {
        dangling,
        spaced_names,
    })
}

/// Validate the desired state and diff both entity types.
pub fn plan(desired: &StateSnapshot, observed: &StateSnapshot) -> Result<Plan, ValidationError> {
    validate_references(desired)?;
    Ok(Plan {
        scopes: diff(&desired.scopes, &observed.scopes),
        clients: diff(&desired.clients, &observed.clients),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::canonical::Canonicalize;
    use crate::reconcile::model::{AccountType, ClientRecord, ScopeRecord};

    fn scopes(names: &[&str]) -> HashMap<String, CanonicalScope> {
        names
            .iter()
            .map(|n| (n.to_string(), ScopeRecord::new(*n, *n).canonicalize()))
            .collect()
    }

    fn client(id: &str, scopes: &[&str]) -> CanonicalClient {
        let mut record = ClientRecord::service(id);
        record.scopes = scopes.iter().map(|s| s.to_string()).collect();
        record.canonicalize()
    }

    #[test]
    fn partition_is_total_and_disjoint() {
        let desired = scopes(&["a", "b", "c"]);
        let mut observed = scopes(&["b", "c", "d"]);
        observed.get_mut("c").unwrap().description = "changed".into();

        let cs = diff(&desired, &observed);
        assert_eq!(cs.create_ids(), vec!["a"]);
        assert_eq!(cs.update_ids(), vec!["c"]);
        assert_eq!(cs.delete_ids(), vec!["d"]);
        assert_eq!(cs.unchanged, vec!["b".to_string()]);

        let mut all: Vec<&str> = cs.create_ids();
        all.extend(cs.update_ids());
        all.extend(cs.delete_ids());
        all.extend(cs.unchanged.iter().map(String::as_str));
        all.sort();
        assert_eq!(all, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn update_carries_field_delta() {
        let desired = scopes(&["read"]);
        let mut observed = scopes(&["read"]);
        let s = observed.get_mut("read").unwrap();
        s.applies_to = [AccountType::Browser].into();

        let cs = diff(&desired, &observed);
        assert_eq!(cs.to_update.len(), 1);
        let update = &cs.to_update[0];
        assert_eq!(update.changed_fields(), vec!["applies_to".to_string()]);
        assert_eq!(update.delta[0].observed, serde_json::json!(["browser"]));
    }

    #[test]
    fn empty_inputs_converge() {
        let cs: ChangeSet<CanonicalScope> = diff(&HashMap::new(), &HashMap::new());
        assert!(cs.is_converged());
        assert!(cs.unchanged.is_empty());
    }

    #[test]
    fn dangling_scope_fails_validation() {
        let desired = StateSnapshot {
            clients: HashMap::from([("svc-b".to_string(), client("svc-b", &["missing"]))]),
            scopes: HashMap::new(),
        };
        let err = plan(&desired, &StateSnapshot::default()).unwrap_err();
        assert_eq!(err.dangling.len(), 1);
        assert_eq!(err.dangling[0].scope, "missing");
    }

    #[test]
    fn scope_names_with_whitespace_fail_validation() {
        let desired = StateSnapshot {
            clients: HashMap::from([(
                "svc-a".to_string(),
                client("svc-a", &["read all", "write"]),
            )]),
            scopes: scopes(&["read all", "write"]),
        };
        let err = plan(&desired, &StateSnapshot::default()).unwrap_err();
        assert!(err.dangling.is_empty());
        assert_eq!(err.spaced_names, vec!["read all".to_string()]);

        let fine = StateSnapshot {
            clients: HashMap::from([("svc-a".to_string(), client("svc-a", &[" write "]))]),
            scopes: scopes(&["write"]),
        };
        assert!(validate_references(&fine).is_ok());
    }

    #[test]
    fn overwrite_lists_every_field() {
        let update = Update::overwrite(client("svc", &[]));
        assert_eq!(update.delta.len(), client("svc", &[]).fields().len());
        assert!(update.delta.iter().all(|c| c.observed.is_null()));
    }
}
