use http::StatusCode;

use crate::TenantId;

/// Coarse error category shared by every tenancy error, with a fixed HTTP mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Unauthenticated,
    Forbidden,
    BadRequest,
    NotFound,
    Conflict,
    Unavailable,
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub fn status(self) -> StatusCode {
        match self {
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict => StatusCode::CONFLICT,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Failures of tenant context resolution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionError {
    #[error("authentication required")]
    Unauthenticated,

    #[error("tenant '{tenant_id}' is unknown or not active")]
    UnknownTenant { tenant_id: TenantId },

    #[error("tenant override requires superuser privileges")]
    ForbiddenOverride,

    /// Zero or several candidate tenants and none was selected.
    #[error("tenant is ambiguous ({} candidates); select one explicitly", candidates.len())]
    AmbiguousTenant { candidates: Vec<TenantId> },
}

impl ResolutionError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthenticated => ErrorKind::Unauthenticated,
            Self::UnknownTenant { .. } | Self::ForbiddenOverride => ErrorKind::Forbidden,
            Self::AmbiguousTenant { .. } => ErrorKind::BadRequest,
        }
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::UnknownTenant { .. } => "UNKNOWN_TENANT",
            Self::ForbiddenOverride => "FORBIDDEN_OVERRIDE",
            Self::AmbiguousTenant { .. } => "AMBIGUOUS_TENANT",
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.kind().status()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn resolution_errors_map_to_http_status() {
        assert_eq!(ResolutionError::Unauthenticated.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ResolutionError::ForbiddenOverride.status(), StatusCode::FORBIDDEN);
        let unknown = ResolutionError::UnknownTenant {
            tenant_id: TenantId::new("ghost").unwrap(),
        };
        assert_eq!(unknown.status(), StatusCode::FORBIDDEN);
        assert_eq!(unknown.code(), "UNKNOWN_TENANT");
        let ambiguous = ResolutionError::AmbiguousTenant { candidates: vec![] };
        assert_eq!(ambiguous.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorKind::Unavailable.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(ErrorKind::Conflict.status(), StatusCode::CONFLICT);
    }
}
