use serde::{Deserialize, Serialize};

/// JWT claims issued by the TenderIQ auth service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,

    /// Expiration (Unix timestamp)
    pub exp: i64,

    /// Issued at (Unix timestamp) - optional
    #[serde(default)]
    pub iat: Option<i64>,

    /// Issuer - optional, checked when JWT_ISSUER is configured
    #[serde(default)]
    pub iss: Option<String>,

    /// User email - optional
    #[serde(default)]
    pub email: Option<String>,

    /// User role - optional
    #[serde(default)]
    pub role: Option<String>,
}
