//! agents entity
//! One row per tracked (repository, branch) pair.

use sea_orm::entity::prelude::*;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize)]
#[sea_orm(table_name = "agents")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub repo_url: String,
    pub branch_name: String,

    /// keccak256(repo_url + "/" + branch_name) as 64 lowercase hex chars.
    /// The identity that survives database loss.
    #[sea_orm(unique)]
    pub branch_hash: String,

    /// On-chain agent contract, absent until registration succeeds.
    pub contract_address: Option<String>,

    /// deploying | running | error | stopped
    pub status: String,

    /// Advisory only; the supervisor is authoritative for liveness.
    pub worker_pid: Option<i32>,

    /// Last failure note, kept so recovery can resume without archaeology.
    #[sea_orm(column_type = "Text", nullable)]
    pub last_error: Option<String>,

    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::secrets::Entity")]
    Secrets,
    #[sea_orm(has_many = "super::metrics::Entity")]
    Metrics,
}

impl Related<super::secrets::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Secrets.def()
    }
}

impl Related<super::metrics::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Metrics.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
