use crate::db::models::User;
use crate::error::{AppError, AppResult};
use crate::state::DbPool;
use crate::users::{self, NewUser};

/// One message for every credential failure so responses never reveal
/// whether an account exists.
pub const INVALID_CREDENTIALS: &str = "Invalid email or password";

const MIN_PASSWORD_LEN: usize = 8;

pub fn validate_password(password: &str) -> AppResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::BadRequest(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

pub fn hash_password(password: &str, cost: u32) -> AppResult<String> {
    bcrypt::hash(password, cost).map_err(|e| AppError::Internal(format!("bcrypt: {}", e)))
}

pub fn sign_up(pool: &DbPool, new: NewUser, password: &str, cost: u32) -> AppResult<User> {
    validate_password(password)?;

    // Magic-link members set a password through the reset flow instead, which
    // proves they own the mailbox.
    if users::get_user_by_email(pool, &new.email)?.is_some() {
        return Err(AppError::BadRequest(
            "An account with this email already exists".into(),
        ));
    }

    let hash = hash_password(password, cost)?;
    users::create_user(
        pool,
        NewUser {
            password_hash: Some(hash),
            ..new
        },
    )
}

pub fn sign_in(pool: &DbPool, email: &str, password: &str) -> AppResult<User> {
    let user = users::get_user_by_email(pool, email)?.ok_or(AppError::InvalidCredentials)?;
    let hash = user.password_hash.as_deref().ok_or(AppError::InvalidCredentials)?;

    match bcrypt::verify(password, hash) {
        Ok(true) => Ok(user),
        Ok(false) => Err(AppError::InvalidCredentials),
        Err(e) => {
            tracing::warn!(user_id = %user.id, "Stored password hash unreadable: {}", e);
            Err(AppError::InvalidCredentials)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    const COST: u32 = 4;

    fn pool() -> (tempfile::TempDir, DbPool) {
        let tmp = tempfile::tempdir().unwrap();
        let pool = db::create_pool(&tmp.path().join("test.db")).unwrap();
        db::run_migrations(&pool).unwrap();
        (tmp, pool)
    }

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.into(),
            ..Default::default()
        }
    }

    #[test]
    fn sign_up_then_sign_in() {
        let (_tmp, pool) = pool();
        let created = sign_up(&pool, new_user("o@example.com"), "correct horse", COST).unwrap();
        let signed_in = sign_in(&pool, "o@example.com", "correct horse").unwrap();
        assert_eq!(created.id, signed_in.id);
    }

    #[test]
    fn wrong_password_and_unknown_user_look_the_same() {
        let (_tmp, pool) = pool();
        sign_up(&pool, new_user("o@example.com"), "correct horse", COST).unwrap();

        let wrong = sign_in(&pool, "o@example.com", "battery staple").unwrap_err();
        let unknown = sign_in(&pool, "nobody@example.com", "battery staple").unwrap_err();
        assert!(matches!(wrong, AppError::InvalidCredentials));
        assert!(matches!(unknown, AppError::InvalidCredentials));
    }

    #[test]
    fn duplicate_sign_up_is_rejected() {
        let (_tmp, pool) = pool();
        sign_up(&pool, new_user("o@example.com"), "correct horse", COST).unwrap();
        let err = sign_up(&pool, new_user("o@example.com"), "another one", COST).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn password_less_member_cannot_sign_in_or_be_claimed() {
        let (_tmp, pool) = pool();
        users::find_or_create_by_email(&pool, "m@example.com").unwrap();
        assert!(matches!(
            sign_in(&pool, "m@example.com", "anything at all"),
            Err(AppError::InvalidCredentials)
        ));
        assert!(sign_up(&pool, new_user("m@example.com"), "long enough", COST).is_err());
    }

    #[test]
    fn short_passwords_are_rejected() {
        assert!(validate_password("short").is_err());
        assert!(validate_password("12345678").is_ok());
    }
}
