//! Authtoken entity: long-lived opaque client credentials

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "authtokens")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    /// Operator-assigned label, display only
    pub label: String,

    /// SHA-256 hex of the plaintext token
    #[sea_orm(unique)]
    pub token_hash: String,

    /// Display-safe leading characters of the plaintext
    pub token_prefix: String,

    pub created_at: ChronoDateTimeUtc,

    /// Set when revoked; revoked tokens stay on record
    pub revoked_at: Option<ChronoDateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::reserved_subdomain::Entity")]
    ReservedSubdomain,

    #[sea_orm(has_many = "super::reserved_tcp_port::Entity")]
    ReservedTcpPort,
}

impl Related<super::reserved_subdomain::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ReservedSubdomain.def()
    }
}

impl Related<super::reserved_tcp_port::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ReservedTcpPort.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
