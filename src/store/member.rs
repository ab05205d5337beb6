use std::collections::HashMap;

use bcrypt::{hash, verify};
use chrono::Utc;
use log::error;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set};

use crate::entity::member;
use crate::error::AppError;

const BCRYPT_COST: u32 = 10;

pub async fn register<C: ConnectionTrait>(
    db: &C,
    email: &str,
    username: &str,
    password: &str,
) -> Result<member::Model, AppError> {
    let email = email.trim();
    let username = username.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::param_error("email is invalid"));
    }
    if username.is_empty() {
        return Err(AppError::param_error("username cannot be null"));
    }
    if password.trim().is_empty() {
        return Err(AppError::param_error("password cannot be null"));
    }

    let password_hash = hash(password, BCRYPT_COST).map_err(|e| {
        error!("hash password failed: {}", e);
        AppError::system_exception()
    })?;
    let now = Utc::now();
    let model = member::ActiveModel {
        email: Set(email.to_string()),
        username: Set(username.to_string()),
        password_hash: Set(password_hash),
        created: Set(Some(now)),
        updated: Set(Some(now)),
        ..Default::default()
    };

    match model.insert(db).await {
        Ok(created) => Ok(created),
        Err(err) => {
            let msg = err.to_string();
            if msg.contains("Duplicate") || msg.contains("UNIQUE") {
                return Err(AppError::param_error("email or username already exists"));
            }
            error!("register member failed: {}", msg);
            Err(AppError::system_exception())
        }
    }
}

/// Checks the credentials and returns the member they belong to.
pub async fn authenticate<C: ConnectionTrait>(
    db: &C,
    email: &str,
    password: &str,
) -> Result<member::Model, AppError> {
    let found = member::Entity::find()
        .filter(member::Column::Email.eq(email.trim()))
        .one(db)
        .await?
        .ok_or_else(|| AppError::param_error("email or password is incorrect"))?;

    let ok = verify(password, &found.password_hash).map_err(|e| {
        error!("verify password failed: {}", e);
        AppError::system_exception()
    })?;
    if !ok {
        return Err(AppError::param_error("email or password is incorrect"));
    }
    Ok(found)
}

pub async fn find<C: ConnectionTrait>(db: &C, id: i32) -> Result<member::Model, AppError> {
    member::Entity::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::not_found(format!("member {} not found", id)))
}

/// Members keyed by id; unknown ids are simply absent.
pub async fn find_many<C: ConnectionTrait>(
    db: &C,
    ids: &[i32],
) -> Result<HashMap<i32, member::Model>, AppError> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows = member::Entity::find()
        .filter(member::Column::Id.is_in(ids.to_vec()))
        .all(db)
        .await?;
    Ok(rows.into_iter().map(|m| (m.id, m)).collect())
}
