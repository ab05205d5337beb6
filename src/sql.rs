use chrono::{DateTime, SecondsFormat, Utc};
use log::error;
use sea_orm::{ConnectionTrait, QueryResult, Statement, TransactionError};

use crate::error::AppError;

/// Runs a statement and returns the number of affected rows.
pub async fn exec_sql<C: ConnectionTrait>(
    db: &C,
    sql: &str,
    values: Vec<sea_orm::Value>,
) -> Result<u64, AppError> {
    let backend = db.get_database_backend();
    let stmt = Statement::from_sql_and_values(backend, sql, values);
    let result = db.execute(stmt).await.map_err(|e| {
        error!("exec_sql failed: {} (sql={})", e, sql);
        AppError::system_exception()
    })?;
    Ok(result.rows_affected())
}

pub async fn query_one<C: ConnectionTrait>(
    db: &C,
    sql: &str,
    values: Vec<sea_orm::Value>,
) -> Result<Option<QueryResult>, AppError> {
    let backend = db.get_database_backend();
    let stmt = Statement::from_sql_and_values(backend, sql, values);
    db.query_one(stmt).await.map_err(|e| {
        error!("query_one failed: {} (sql={})", e, sql);
        AppError::system_exception()
    })
}

pub async fn query_all<C: ConnectionTrait>(
    db: &C,
    sql: &str,
    values: Vec<sea_orm::Value>,
) -> Result<Vec<QueryResult>, AppError> {
    let backend = db.get_database_backend();
    let stmt = Statement::from_sql_and_values(backend, sql, values);
    db.query_all(stmt).await.map_err(|e| {
        error!("query_all failed: {} (sql={})", e, sql);
        AppError::system_exception()
    })
}

/// Expects the statement to alias its count as `cnt`.
pub async fn query_count<C: ConnectionTrait>(
    db: &C,
    sql: &str,
    values: Vec<sea_orm::Value>,
) -> Result<u64, AppError> {
    let row = query_one(db, sql, values).await?;
    let cnt: i64 = row.and_then(|r| r.try_get("", "cnt").ok()).unwrap_or(0);
    Ok(cnt.max(0) as u64)
}

pub fn map_tx_error(err: TransactionError<AppError>) -> AppError {
    match err {
        TransactionError::Connection(e) => {
            error!("transaction failed: {}", e);
            AppError::system_exception()
        }
        TransactionError::Transaction(app) => app,
    }
}

pub fn to_rfc3339(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, false)
}
