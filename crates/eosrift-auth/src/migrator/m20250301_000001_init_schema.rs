//! Initial schema: authtokens and reservations

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AuthToken::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AuthToken::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(AuthToken::Label)
                            .string()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(AuthToken::TokenHash)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(AuthToken::TokenPrefix).string().not_null())
                    .col(
                        ColumnDef::new(AuthToken::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(AuthToken::RevokedAt).timestamp_with_time_zone())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_authtokens_revoked_at")
                    .table(AuthToken::Table)
                    .col(AuthToken::RevokedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ReservedSubdomain::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ReservedSubdomain::Subdomain)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ReservedSubdomain::TokenId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ReservedSubdomain::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_reserved_subdomains_token_id")
                            .from(ReservedSubdomain::Table, ReservedSubdomain::TokenId)
                            .to(AuthToken::Table, AuthToken::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_reserved_subdomains_token_id")
                    .table(ReservedSubdomain::Table)
                    .col(ReservedSubdomain::TokenId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ReservedTcpPort::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ReservedTcpPort::Port)
                            .integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ReservedTcpPort::TokenId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ReservedTcpPort::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_reserved_tcp_ports_token_id")
                            .from(ReservedTcpPort::Table, ReservedTcpPort::TokenId)
                            .to(AuthToken::Table, AuthToken::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_reserved_tcp_ports_token_id")
                    .table(ReservedTcpPort::Table)
                    .col(ReservedTcpPort::TokenId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ReservedTcpPort::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ReservedSubdomain::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(AuthToken::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum AuthToken {
    #[sea_orm(iden = "authtokens")]
    Table,
    Id,
    Label,
    TokenHash,
    TokenPrefix,
    CreatedAt,
    RevokedAt,
}

#[derive(DeriveIden)]
enum ReservedSubdomain {
    #[sea_orm(iden = "reserved_subdomains")]
    Table,
    Subdomain,
    TokenId,
    CreatedAt,
}

#[derive(DeriveIden)]
enum ReservedTcpPort {
    #[sea_orm(iden = "reserved_tcp_ports")]
    Table,
    Port,
    TokenId,
    CreatedAt,
}
