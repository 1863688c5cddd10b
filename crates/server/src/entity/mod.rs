//! SeaORM entities for the policy store and run history.

pub mod scope;
pub mod service_account;
pub mod service_account_scope;
pub mod sync_run;
