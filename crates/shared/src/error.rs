/// Shared error type used across the node's crates.
#[derive(Debug, thiserror::Error)]
pub enum RemusError {
    #[error("not found")]
    NotFound,

    #[error("unauthorized")]
    Unauthorized,

    #[error("authority unavailable")]
    AuthorityUnavailable,

    #[error("forbidden")]
    Forbidden,

    #[error("validation error: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("rate limited")]
    RateLimited,

    #[error("upload too large: {0}")]
    UploadTooLarge(String),

    #[error("invalid database: {0}")]
    InvalidDatabase(String),

    #[error("internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        assert_eq!(RemusError::NotFound.to_string(), "not found");
    }

    #[test]
    fn validation_contains_message() {
        let err = RemusError::Validation("bad input".into());
        assert_eq!(err.to_string(), "validation error: bad input");
    }

    #[test]
    fn authority_unavailable_is_distinct_from_unauthorized() {
        assert_ne!(
            RemusError::AuthorityUnavailable.to_string(),
            RemusError::Unauthorized.to_string()
        );
    }

    #[test]
    fn all_variants_impl_error() {
        let errors: Vec<Box<dyn std::error::Error>> = vec![
            Box::new(RemusError::NotFound),
            Box::new(RemusError::Unauthorized),
            Box::new(RemusError::AuthorityUnavailable),
            Box::new(RemusError::Forbidden),
            Box::new(RemusError::Validation("x".into())),
            Box::new(RemusError::Conflict("y".into())),
            Box::new(RemusError::RateLimited),
            Box::new(RemusError::UploadTooLarge("z".into())),
            Box::new(RemusError::InvalidDatabase("w".into())),
            Box::new(RemusError::Internal("v".into())),
        ];
        for e in &errors {
            let _ = e.to_string();
        }
    }
}
