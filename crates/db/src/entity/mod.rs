//! Sea-ORM entities for the controller tables.

pub mod agents;
pub mod metrics;
pub mod oauth_grants;
pub mod secrets;

pub use agents::Entity as Agents;
pub use metrics::Entity as Metrics;
pub use oauth_grants::Entity as OauthGrants;
pub use secrets::Entity as Secrets;
