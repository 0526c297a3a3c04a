use anyhow::{Context, Result};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JWT Claims - the subset of the platform's access token this service reads
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String, // Subject (user id as string)
    pub exp: i64,    // Expiration timestamp
    pub iat: i64,    // Issued at timestamp
    pub iss: String, // Issuer
}

impl Claims {
    pub fn user_id(&self) -> Result<Uuid> {
        Uuid::parse_str(&self.sub).context("token subject is not a user id")
    }
}

/// JWT Service - verifies access tokens
#[derive(Clone)]
pub struct JwtService {
    decoding_key: DecodingKey,
    issuer: String,
}

impl JwtService {
    /// Create new JWT service with secret and issuer
    pub fn new(secret: &str, issuer: String) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            issuer,
        }
    }

    /// Verify and decode a JWT token
    ///
    /// Returns claims if token is valid, unexpired and from our issuer
    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::default();
        validation.set_issuer(&[&self.issuer]);

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(Into::into)
    }
}

#[cfg(test)]
pub(crate) mod test_tokens {
    use super::Claims;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use uuid::Uuid;

    /// Sign a token the way the identity platform does
    pub fn sign(secret: &str, issuer: &str, user_id: Uuid, expires_in_secs: i64) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            exp: now + expires_in_secs,
            iat: now,
            iss: issuer.to_string(),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_tokens::sign;
    use super::*;

    #[test]
    fn test_verify_token() {
        let service = JwtService::new("test_secret_key", "test_issuer".to_string());
        let user_id = Uuid::new_v4();

        let claims = service
            .verify_token(&sign("test_secret_key", "test_issuer", user_id, 3600))
            .unwrap();

        assert_eq!(claims.user_id().unwrap(), user_id);
        assert_eq!(claims.iss, "test_issuer");
    }

    #[test]
    fn test_invalid_token() {
        let service = JwtService::new("test_secret_key", "test_issuer".to_string());
        assert!(service.verify_token("invalid_token").is_err());
    }

    #[test]
    fn test_wrong_secret() {
        let service = JwtService::new("secret2", "test_issuer".to_string());
        let token = sign("secret1", "test_issuer", Uuid::new_v4(), 3600);

        // Token signed with secret1 should not verify with secret2
        assert!(service.verify_token(&token).is_err());
    }

    #[test]
    fn test_wrong_issuer() {
        let service = JwtService::new("test_secret_key", "identity-platform".to_string());
        let token = sign("test_secret_key", "someone-else", Uuid::new_v4(), 3600);
        assert!(service.verify_token(&token).is_err());
    }

    #[test]
    fn test_expired_token() {
        let service = JwtService::new("test_secret_key", "test_issuer".to_string());
        // Well past the default 60s leeway
        let token = sign("test_secret_key", "test_issuer", Uuid::new_v4(), -3600);
        assert!(service.verify_token(&token).is_err());
    }
}
