//! The store: token lifecycle and reservations over SQLite

use crate::entities::{auth_token, reserved_subdomain, reserved_tcp_port};
use crate::migrator::Migrator;
use crate::subdomain::normalize_subdomain;
use crate::token::{generate_token, hash_token, token_prefix};
use crate::AuthError;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Database, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use sea_orm_migration::MigratorTrait;
use tracing::debug;

/// A stored authtoken, without secret material.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenRecord {
    pub id: i64,
    pub label: String,
    pub prefix: String,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl From<auth_token::Model> for TokenRecord {
    fn from(model: auth_token::Model) -> Self {
        Self {
            id: model.id,
            label: model.label,
            prefix: model.token_prefix,
            created_at: model.created_at,
            revoked_at: model.revoked_at,
        }
    }
}

/// A reserved subdomain joined with its owner's display prefix.
#[derive(Debug, Clone, PartialEq)]
pub struct ReservedSubdomain {
    pub subdomain: String,
    pub token_id: i64,
    pub token_prefix: String,
    pub created_at: DateTime<Utc>,
}

/// A reserved TCP port joined with its owner's display prefix.
#[derive(Debug, Clone, PartialEq)]
pub struct ReservedTcpPort {
    pub port: u16,
    pub token_id: i64,
    pub token_prefix: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct Store {
    db: DatabaseConnection,
}

impl Store {
    /// Open (creating if needed) the database at `db_path` and run
    /// migrations. `:memory:` opens an in-memory database.
    pub async fn open(db_path: &str) -> Result<Self, AuthError> {
        let path = db_path.trim();
        if path.is_empty() {
            return Err(AuthError::EmptyDbPath);
        }

        let url = if path == ":memory:" {
            "sqlite::memory:".to_string()
        } else if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite://{path}?mode=rwc")
        };

        let db = Database::connect(&url).await?;
        Migrator::up(&db, None).await?;
        debug!(path, "auth store opened");

        Ok(Self { db })
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Create a token. Returns the record and the plaintext, which is not
    /// recoverable afterwards.
    pub async fn create_token(&self, label: &str) -> Result<(TokenRecord, String), AuthError> {
        let plain = generate_token();
        let record = self.insert_token(&plain, label).await.map_err(AuthError::Db)?;
        Ok((record, plain))
    }

    /// Insert a known plaintext token if absent. Used to bootstrap a
    /// deployment from the environment; an existing token is a success.
    pub async fn ensure_token(&self, token: &str, label: &str) -> Result<(), AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::EmptyToken);
        }

        match self.insert_token(token, label).await {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn list_tokens(&self) -> Result<Vec<TokenRecord>, AuthError> {
        let models = auth_token::Entity::find()
            .order_by_asc(auth_token::Column::Id)
            .all(&self.db)
            .await?;
        Ok(models.into_iter().map(TokenRecord::from).collect())
    }

    /// Revoke a token. Revoking an already-revoked or unknown id is a no-op.
    pub async fn revoke_token(&self, id: i64) -> Result<(), AuthError> {
        if id <= 0 {
            return Err(AuthError::InvalidTokenId);
        }

        if let Some(model) = auth_token::Entity::find_by_id(id).one(&self.db).await? {
            if model.revoked_at.is_none() {
                let mut active: auth_token::ActiveModel = model.into();
                active.revoked_at = Set(Some(Utc::now()));
                active.update(&self.db).await?;
            }
        }
        Ok(())
    }

    /// Whether the plaintext matches a live (non-revoked) token.
    pub async fn validate_token(&self, token: &str) -> Result<bool, AuthError> {
        Ok(self.live_token(token).await?.is_some())
    }

    /// Resolve the plaintext to a live token id.
    pub async fn token_id(&self, token: &str) -> Result<Option<i64>, AuthError> {
        Ok(self.live_token(token).await?.map(|model| model.id))
    }

    async fn live_token(&self, token: &str) -> Result<Option<auth_token::Model>, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Ok(None);
        }

        let model = auth_token::Entity::find()
            .filter(auth_token::Column::TokenHash.eq(hash_token(token)))
            .filter(auth_token::Column::RevokedAt.is_null())
            .one(&self.db)
            .await?;
        Ok(model)
    }

    async fn insert_token(&self, token: &str, label: &str) -> Result<TokenRecord, sea_orm::DbErr> {
        let model = auth_token::ActiveModel {
            label: Set(label.trim().to_string()),
            token_hash: Set(hash_token(token)),
            token_prefix: Set(token_prefix(token)),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&self.db)
        .await?;
        Ok(model.into())
    }

    pub async fn reserve_subdomain(&self, token_id: i64, subdomain: &str) -> Result<(), AuthError> {
        if token_id <= 0 {
            return Err(AuthError::InvalidTokenId);
        }
        let norm = normalize_subdomain(subdomain)?;

        let result = reserved_subdomain::ActiveModel {
            subdomain: Set(norm),
            token_id: Set(token_id),
            created_at: Set(Utc::now()),
        }
        .insert(&self.db)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(AuthError::AlreadyReserved),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn unreserve_subdomain(&self, subdomain: &str) -> Result<(), AuthError> {
        let norm = normalize_subdomain(subdomain)?;
        reserved_subdomain::Entity::delete_by_id(norm)
            .exec(&self.db)
            .await?;
        Ok(())
    }

    /// Who owns a subdomain, if anyone.
    pub async fn reserved_subdomain_token_id(
        &self,
        subdomain: &str,
    ) -> Result<Option<i64>, AuthError> {
        let norm = normalize_subdomain(subdomain)?;
        let model = reserved_subdomain::Entity::find_by_id(norm)
            .one(&self.db)
            .await?;
        Ok(model.map(|m| m.token_id))
    }

    pub async fn list_reserved_subdomains(&self) -> Result<Vec<ReservedSubdomain>, AuthError> {
        let rows = reserved_subdomain::Entity::find()
            .find_also_related(auth_token::Entity)
            .order_by_asc(reserved_subdomain::Column::Subdomain)
            .all(&self.db)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(res, token)| ReservedSubdomain {
                subdomain: res.subdomain,
                token_id: res.token_id,
                token_prefix: token.map(|t| t.token_prefix).unwrap_or_default(),
                created_at: res.created_at,
            })
            .collect())
    }

    pub async fn reserve_tcp_port(&self, token_id: i64, port: u16) -> Result<(), AuthError> {
        if token_id <= 0 {
            return Err(AuthError::InvalidTokenId);
        }
        if port == 0 {
            return Err(AuthError::InvalidPort);
        }

        let result = reserved_tcp_port::ActiveModel {
            port: Set(i32::from(port)),
            token_id: Set(token_id),
            created_at: Set(Utc::now()),
        }
        .insert(&self.db)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(AuthError::AlreadyReserved),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn unreserve_tcp_port(&self, port: u16) -> Result<(), AuthError> {
        if port == 0 {
            return Err(AuthError::InvalidPort);
        }
        reserved_tcp_port::Entity::delete_by_id(i32::from(port))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    /// Who owns a TCP port, if anyone.
    pub async fn reserved_tcp_port_token_id(&self, port: u16) -> Result<Option<i64>, AuthError> {
        if port == 0 {
            return Err(AuthError::InvalidPort);
        }
        let model = reserved_tcp_port::Entity::find_by_id(i32::from(port))
            .one(&self.db)
            .await?;
        Ok(model.map(|m| m.token_id))
    }

    pub async fn list_reserved_tcp_ports(&self) -> Result<Vec<ReservedTcpPort>, AuthError> {
        let rows = reserved_tcp_port::Entity::find()
            .find_also_related(auth_token::Entity)
            .order_by_asc(reserved_tcp_port::Column::Port)
            .all(&self.db)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(res, token)| ReservedTcpPort {
                port: res.port as u16,
                token_id: res.token_id,
                token_prefix: token.map(|t| t.token_prefix).unwrap_or_default(),
                created_at: res.created_at,
            })
            .collect())
    }
}

fn is_unique_violation(err: &sea_orm::DbErr) -> bool {
    // sqlx surfaces sqlite constraint failures as strings; match the text
    // rather than a driver-specific error type.
    err.to_string().to_lowercase().contains("unique constraint")
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_store() -> Store {
        Store::open(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_create_validate_revoke() {
        let store = open_store().await;

        let (record, plain) = store.create_token("ci").await.unwrap();
        assert_eq!(record.label, "ci");
        assert!(plain.starts_with("eos_"));
        assert_eq!(record.prefix, plain.chars().take(12).collect::<String>());

        assert!(store.validate_token(&plain).await.unwrap());
        assert_eq!(store.token_id(&plain).await.unwrap(), Some(record.id));
        assert!(!store.validate_token("eos_bogus").await.unwrap());
        assert!(!store.validate_token("").await.unwrap());

        store.revoke_token(record.id).await.unwrap();
        assert!(!store.validate_token(&plain).await.unwrap());
        assert_eq!(store.token_id(&plain).await.unwrap(), None);

        // Revoking again is a no-op, and the record survives.
        store.revoke_token(record.id).await.unwrap();
        let tokens = store.list_tokens().await.unwrap();
        assert_eq!(tokens.len(), 1);
        assert!(tokens[0].revoked_at.is_some());
    }

    #[tokio::test]
    async fn test_ensure_token_is_idempotent() {
        let store = open_store().await;

        store.ensure_token("eos_bootstrap", "bootstrap").await.unwrap();
        store.ensure_token("eos_bootstrap", "bootstrap").await.unwrap();

        assert_eq!(store.list_tokens().await.unwrap().len(), 1);
        assert!(store.validate_token("eos_bootstrap").await.unwrap());
        assert!(store.ensure_token("  ", "x").await.is_err());
    }

    #[tokio::test]
    async fn test_subdomain_reservations() {
        let store = open_store().await;
        let (owner, _) = store.create_token("owner").await.unwrap();
        let (other, _) = store.create_token("other").await.unwrap();

        store.reserve_subdomain(owner.id, "Demo").await.unwrap();
        assert_eq!(
            store.reserved_subdomain_token_id("demo").await.unwrap(),
            Some(owner.id)
        );

        let err = store.reserve_subdomain(other.id, "demo").await.unwrap_err();
        assert!(matches!(err, AuthError::AlreadyReserved));

        let listed = store.list_reserved_subdomains().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].subdomain, "demo");
        assert_eq!(listed[0].token_id, owner.id);
        assert!(!listed[0].token_prefix.is_empty());

        store.unreserve_subdomain("demo").await.unwrap();
        assert_eq!(store.reserved_subdomain_token_id("demo").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_tcp_port_reservations() {
        let store = open_store().await;
        let (owner, _) = store.create_token("owner").await.unwrap();

        store.reserve_tcp_port(owner.id, 25000).await.unwrap();
        assert_eq!(
            store.reserved_tcp_port_token_id(25000).await.unwrap(),
            Some(owner.id)
        );
        assert!(matches!(
            store.reserve_tcp_port(owner.id, 25000).await.unwrap_err(),
            AuthError::AlreadyReserved
        ));
        assert!(store.reserve_tcp_port(owner.id, 0).await.is_err());

        let listed = store.list_reserved_tcp_ports().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].port, 25000);

        store.unreserve_tcp_port(25000).await.unwrap();
        assert_eq!(store.reserved_tcp_port_token_id(25000).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalid_inputs() {
        let store = open_store().await;
        assert!(store.reserve_subdomain(0, "demo").await.is_err());
        assert!(store.reserve_subdomain(1, "bad.dot").await.is_err());
        assert!(store.revoke_token(0).await.is_err());
        assert!(Store::open("").await.is_err());
    }
}
