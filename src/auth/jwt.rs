// src/auth/jwt.rs

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, TokenData, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::error::{AppError, AppResult};
use crate::models::User;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub is_admin: bool,
    pub exp: i64,
    pub iat: i64,
}

pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expire_minutes: i64,
}

impl JwtService {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            expire_minutes: config.token_expire_minutes,
        }
    }

    pub fn generate_token(&self, user: &User) -> AppResult<String> {
        let now = Utc::now();
        let exp = now + Duration::minutes(self.expire_minutes);

        let claims = Claims {
            sub: user.id_as_uuid(),
            username: user.username.clone(),
            is_admin: user.is_admin,
            exp: exp.timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| AppError::AuthError(format!("Failed to generate token: {}", e)))
    }

    pub fn validate_token(&self, token: &str) -> AppResult<TokenData<Claims>> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map_err(|e| AppError::AuthError(format!("Invalid token: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_service() -> JwtService {
        let config = AuthConfig {
            jwt_secret: "test-secret-key-for-testing".to_string(),
            token_expire_minutes: 30,
            signups_allowed: true,
            default_admin_username: None,
            default_admin_password: None,
        };
        JwtService::new(&config)
    }

    fn test_user() -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4().to_string(),
            username: "alice".to_string(),
            password_hash: "hash".to_string(),
            is_admin: false,
            disabled: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_generate_and_validate_token() {
        let service = test_service();
        let user = test_user();

        let token = service.generate_token(&user).unwrap();
        let data = service.validate_token(&token).unwrap();

        assert_eq!(data.claims.sub, user.id_as_uuid());
        assert_eq!(data.claims.username, "alice");
        assert!(!data.claims.is_admin);
    }

    #[test]
    fn test_invalid_token() {
        let service = test_service();
        assert!(service.validate_token("invalid.token.here").is_err());
    }
}
