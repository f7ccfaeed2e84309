use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::models::{User, UserTier};
use crate::database::queries::users;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // Subject (user ID)
    pub exp: usize,  // Expiration time
    pub iat: usize,  // Issued at
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

impl AuthConfig {
    /// Read from JWT_SECRET, falling back to a random per-process secret.
    /// With a random secret every token fails verification, so the server
    /// still boots but serves the anonymous lane only.
    pub fn from_env() -> Self {
        let jwt_secret = match std::env::var("JWT_SECRET") {
            Ok(secret) if !secret.is_empty() => secret,
            _ => {
                tracing::warn!(
                    "JWT_SECRET is not set; generated a random secret, authenticated requests will be rejected"
                );
                generate_jwt_secret()
            }
        };
        Self { jwt_secret }
    }
}

fn generate_jwt_secret() -> String {
    let mut rng = rand::thread_rng();
    let secret: Vec<u8> = (0..32).map(|_| rng.gen()).collect();
    hex::encode(secret)
}

/// Classification of the caller, resolved once per request.
#[derive(Debug, Clone)]
pub enum Identity {
    Anonymous,
    Authenticated { user: User, tier: UserTier },
}

impl Identity {
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Identity::Anonymous)
    }
}

#[derive(Debug, Clone)]
pub struct AuthService {
    config: AuthConfig,
}

impl AuthService {
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Verify JWT token and extract claims
    pub fn verify_token(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        let key = DecodingKey::from_secret(self.config.jwt_secret.as_ref());
        let validation = Validation::new(Algorithm::HS256);

        let token_data = decode::<Claims>(token, &key, &validation)?;
        Ok(token_data.claims)
    }

    /// Issue a token for a user id. The session service owns issuance in
    /// production; this exists for local setups and tests.
    pub fn generate_token(&self, user_id: Uuid) -> Result<String, jsonwebtoken::errors::Error> {
        let now = chrono::Utc::now();
        let exp = now + chrono::Duration::hours(24 * 7);

        let claims = Claims {
            sub: user_id.to_string(),
            exp: exp.timestamp() as usize,
            iat: now.timestamp() as usize,
        };

        let header = Header::new(Algorithm::HS256);
        let key = EncodingKey::from_secret(self.config.jwt_secret.as_ref());
        encode(&header, &claims, &key)
    }

    /// Resolve a bearer token to an identity. A missing or invalid token is
    /// not an error here; it classifies the caller as anonymous and the
    /// endpoint decides whether that lane is allowed.
    pub async fn resolve_identity(&self, pool: &PgPool, token: Option<&str>) -> Identity {
        let Some(token) = token else {
            return Identity::Anonymous;
        };

        let claims = match self.verify_token(token) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::debug!("Token verification failed: {}", e);
                return Identity::Anonymous;
            }
        };

        let Ok(user_id) = Uuid::parse_str(&claims.sub) else {
            return Identity::Anonymous;
        };

        match users::get_user_by_id(pool, user_id).await {
            Ok(Some(user)) => {
                let tier = user.tier;
                Identity::Authenticated { user, tier }
            }
            Ok(None) => Identity::Anonymous,
            Err(e) => {
                tracing::error!("Error loading user for token: {}", e);
                Identity::Anonymous
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> AuthService {
        AuthService::new(AuthConfig {
            jwt_secret: "test-secret".to_string(),
        })
    }

    #[test]
    fn test_token_round_trip() {
        let service = service();
        let user_id = Uuid::new_v4();

        let token = service.generate_token(user_id).unwrap();
        let claims = service.verify_token(&token).unwrap();

        assert_eq!(claims.sub, user_id.to_string());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = service().generate_token(Uuid::new_v4()).unwrap();

        let other = AuthService::new(AuthConfig {
            jwt_secret: "other-secret".to_string(),
        });
        assert!(other.verify_token(&token).is_err());
    }

    #[test]
    fn test_generated_secret_is_random() {
        assert_ne!(generate_jwt_secret(), generate_jwt_secret());
    }
}
