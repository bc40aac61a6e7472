//! HS256 bearer token verification

use anyhow::{Context, Result};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

use super::Claims;

/// Verifies bearer tokens signed with the shared `JWT_SECRET`
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str, issuer: Option<&str>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.validate_aud = false;
        if let Some(issuer) = issuer {
            validation.set_issuer(&[issuer]);
        }

        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Verify a JWT token and return the claims
    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        let token_data =
            decode::<Claims>(token, &self.key, &self.validation).context("JWT validation failed")?;
        Ok(token_data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "test-secret";

    fn token(secret: &str, iss: Option<&str>, exp_offset: i64) -> String {
        let claims = Claims {
            sub: "6f1c1f38-3c2e-4a0a-9b0e-6d8f0d1c2a11".to_string(),
            exp: chrono::Utc::now().timestamp() + exp_offset,
            iat: Some(chrono::Utc::now().timestamp()),
            iss: iss.map(str::to_string),
            email: Some("analyst@example.com".to_string()),
            role: None,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn accepts_valid_token() {
        let verifier = TokenVerifier::new(SECRET, None);
        let claims = verifier.verify_token(&token(SECRET, None, 3600)).unwrap();
        assert_eq!(claims.email.as_deref(), Some("analyst@example.com"));
    }

    #[test]
    fn rejects_wrong_secret_and_expired_tokens() {
        let verifier = TokenVerifier::new(SECRET, None);
        assert!(verifier.verify_token(&token("other", None, 3600)).is_err());
        assert!(verifier.verify_token(&token(SECRET, None, -3600)).is_err());
        assert!(verifier.verify_token("not-a-jwt").is_err());
    }

    #[test]
    fn enforces_configured_issuer() {
        let verifier = TokenVerifier::new(SECRET, Some("tenderiq"));
        assert!(verifier
            .verify_token(&token(SECRET, Some("tenderiq"), 3600))
            .is_ok());
        assert!(verifier
            .verify_token(&token(SECRET, Some("someone-else"), 3600))
            .is_err());
    }
}
