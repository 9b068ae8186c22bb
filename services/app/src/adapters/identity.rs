//! services/app/src/adapters/identity.rs
//!
//! Concrete implementation of the `IdentityProvider` port. Anonymous subjects
//! are credential-less rows; the upgrade path attaches an email and password
//! hash to the existing row, which is what keeps the subject id stable.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use tracing::error;
use uuid::Uuid;

use dao_reader_core::domain::{Subject, SubjectId};
use dao_reader_core::ports::{IdentityError, IdentityProvider, IdentityResult};

/// Minimum accepted password length.
const MIN_PASSWORD_LEN: usize = 6;

fn provider_err(e: sqlx::Error) -> IdentityError {
    IdentityError::Provider(e.to_string())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(d) if d.code().as_deref() == Some("23505"))
}

fn check_password_policy(password: &str) -> IdentityResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(IdentityError::WeakCredential);
    }
    Ok(())
}

fn hash_password(password: &str) -> IdentityResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            error!("Failed to hash password: {:?}", e);
            IdentityError::Provider("password hashing failed".to_string())
        })
}

fn verify_password(password: &str, stored_hash: &str) -> IdentityResult<()> {
    let parsed = PasswordHash::new(stored_hash).map_err(|e| {
        error!("Failed to parse stored password hash: {:?}", e);
        IdentityError::Provider("stored credential is unreadable".to_string())
    })?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| IdentityError::InvalidCredential)
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A PostgreSQL-backed adapter that implements the `IdentityProvider` port.
#[derive(Clone)]
pub struct DbIdentity {
    pool: PgPool,
}

impl DbIdentity {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct UserRow {
    user_id: Uuid,
    email: Option<String>,
    password_hash: Option<String>,
    is_anonymous: bool,
}

impl UserRow {
    fn to_domain(&self) -> Subject {
        Subject {
            id: self.user_id,
            email: self.email.clone(),
            is_anonymous: self.is_anonymous,
        }
    }
}

#[async_trait]
impl IdentityProvider for DbIdentity {
    async fn create_anonymous(&self) -> IdentityResult<Subject> {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO users (user_id, is_anonymous) VALUES ($1, TRUE)")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(provider_err)?;
        Ok(Subject {
            id,
            email: None,
            is_anonymous: true,
        })
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> IdentityResult<Subject> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT user_id, email, password_hash, is_anonymous FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(provider_err)?
        .ok_or(IdentityError::NotFound)?;

        let stored_hash = row
            .password_hash
            .as_deref()
            .ok_or(IdentityError::InvalidCredential)?;
        verify_password(password, stored_hash)?;
        Ok(row.to_domain())
    }

    async fn create_account(&self, email: &str, password: &str) -> IdentityResult<Subject> {
        check_password_policy(password)?;
        let hash = hash_password(password)?;
        let id = Uuid::new_v4();

        sqlx::query(
            "INSERT INTO users (user_id, email, password_hash, is_anonymous)
             VALUES ($1, $2, $3, FALSE)",
        )
        .bind(id)
        .bind(email)
        .bind(&hash)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                IdentityError::CredentialInUse
            } else {
                provider_err(e)
            }
        })?;

        Ok(Subject {
            id,
            email: Some(email.to_string()),
            is_anonymous: false,
        })
    }

    async fn link_credential(
        &self,
        subject: SubjectId,
        email: &str,
        password: &str,
    ) -> IdentityResult<Subject> {
        check_password_policy(password)?;

        // 1. The subject must exist and still be anonymous.
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT user_id, email, password_hash, is_anonymous FROM users WHERE user_id = $1",
        )
        .bind(subject)
        .fetch_optional(&self.pool)
        .await
        .map_err(provider_err)?
        .ok_or(IdentityError::NotFound)?;
        if !row.is_anonymous {
            return Err(IdentityError::NotAnonymous);
        }

        // 2. Attach the credential in place; the row keeps its id.
        let hash = hash_password(password)?;
        sqlx::query(
            "UPDATE users SET email = $2, password_hash = $3, is_anonymous = FALSE
             WHERE user_id = $1 AND is_anonymous",
        )
        .bind(subject)
        .bind(email)
        .bind(&hash)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                IdentityError::CredentialInUse
            } else {
                provider_err(e)
            }
        })?;

        Ok(Subject {
            id: subject,
            email: Some(email.to_string()),
            is_anonymous: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_policy_counts_characters() {
        assert!(check_password_policy("秘密のこと").is_err());
        assert!(check_password_policy("secret").is_ok());
        assert!(check_password_policy("12345").is_err());
    }

    #[test]
    fn hashes_verify_and_reject() {
        let hash = hash_password("correct horse").unwrap();
        assert!(verify_password("correct horse", &hash).is_ok());
        assert!(matches!(
            verify_password("wrong", &hash),
            Err(IdentityError::InvalidCredential)
        ));
    }
}
