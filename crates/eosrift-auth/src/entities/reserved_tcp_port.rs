//! Reserved TCP port entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "reserved_tcp_ports")]
pub struct Model {
    /// Public TCP port (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub port: i32,

    /// Owning token
    pub token_id: i64,

    pub created_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::auth_token::Entity",
        from = "Column::TokenId",
        to = "super::auth_token::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    AuthToken,
}

impl Related<super::auth_token::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AuthToken.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
