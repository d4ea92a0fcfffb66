use thiserror::Error;

use crate::error::{AppError, AppErrorKind, DomainError, InfrastructureError};

#[derive(Debug, Clone, Error)]
pub enum DatabaseErrorKind {
    #[error("{entity} {id} not found")]
    NotFound { entity: String, id: String },

    #[error("unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    #[error("check constraint violated: {constraint}")]
    CheckViolation { constraint: String },

    #[error("connection error: {message}")]
    ConnectionError { message: String },

    #[error("query error: {message}")]
    QueryError { message: String },

    #[error("database error: {message}")]
    Unknown { message: String },
}

#[derive(Debug, Clone, Error)]
#[error("{kind}")]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        Self { kind }
    }

    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        Self::new(DatabaseErrorKind::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        })
    }

    pub fn from_sqlx(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::RowNotFound => DatabaseErrorKind::NotFound {
                entity: "row".to_string(),
                id: "unknown".to_string(),
            },
            sqlx::Error::Database(db_err) => {
                let constraint = db_err.constraint().unwrap_or("unknown").to_string();
                if db_err.is_unique_violation() {
                    DatabaseErrorKind::UniqueViolation { constraint }
                } else if db_err.is_check_violation() {
                    DatabaseErrorKind::CheckViolation { constraint }
                } else {
                    DatabaseErrorKind::QueryError {
                        message: db_err.message().to_string(),
                    }
                }
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DatabaseErrorKind::ConnectionError {
                    message: err.to_string(),
                }
            }
            _ => DatabaseErrorKind::Unknown {
                message: err.to_string(),
            },
        };
        Self { kind }
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::UniqueViolation { .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::ConnectionError { .. })
    }
}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        match &err.kind {
            DatabaseErrorKind::NotFound { entity, id } if entity == "order" => {
                match id.parse::<i64>() {
                    Ok(order_id) => AppError::domain(DomainError::OrderNotFound { order_id }),
                    Err(_) => database_failure(&err),
                }
            }
            DatabaseErrorKind::NotFound { entity, id } if entity == "product" => {
                match id.parse::<i64>() {
                    Ok(product_id) => {
                        AppError::domain(DomainError::ProductNotFound { product_id })
                    }
                    Err(_) => database_failure(&err),
                }
            }
            _ => database_failure(&err),
        }
    }
}

fn database_failure(err: &DatabaseError) -> AppError {
    AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
        message: err.to_string(),
        is_retryable: err.is_retryable(),
    }))
}

pub type DbResult<T> = Result<T, DatabaseError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn order_not_found_maps_to_domain_error() {
        let err: AppError = DatabaseError::not_found("order", 42).into();
        assert_eq!(err.error_code(), ErrorCode::OrderNotFound);
        assert_eq!(err.status_code(), 404);
    }

    #[test]
    fn unique_violation_is_detected() {
        let err = DatabaseError::new(DatabaseErrorKind::UniqueViolation {
            constraint: "payments_order_id_key".to_string(),
        });
        assert!(err.is_unique_violation());
        assert!(!err.is_retryable());
    }

    #[test]
    fn connection_errors_are_retryable() {
        let err = DatabaseError::new(DatabaseErrorKind::ConnectionError {
            message: "pool timed out".to_string(),
        });
        assert!(err.is_retryable());
        let app: AppError = err.into();
        assert_eq!(app.error_code(), ErrorCode::DatabaseError);
        assert!(app.is_retryable());
    }
}
