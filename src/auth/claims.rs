//! Token Claims 与本地签名校验

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{GatewayError, Result};

/// Token Claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// 用户ID
    #[serde(rename = "UserID")]
    pub user_id: String,
    /// 平台ID
    #[serde(rename = "PlatformID")]
    pub platform_id: i32,
    /// 过期时间（Unix时间戳）
    pub exp: i64,
    /// 生效时间
    pub nbf: i64,
    /// 签发时间
    pub iat: i64,
}

impl Claims {
    pub fn new(user_id: impl Into<String>, platform_id: i32, ttl_secs: i64) -> Self {
        let now = Utc::now().timestamp();
        Self {
            user_id: user_id.into(),
            platform_id,
            exp: now + ttl_secs,
            nbf: now,
            iat: now,
        }
    }
}

/// HS256 Token 校验器
pub struct TokenVerifier {
    decoding_key: DecodingKey,
    encoding_key: EncodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.validate_nbf = true;

        Self {
            decoding_key: DecodingKey::from_secret(secret),
            encoding_key: EncodingKey::from_secret(secret),
            validation,
        }
    }

    /// 校验签名和有效期，返回 Claims
    pub fn verify(&self, token: &str) -> Result<Claims> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            debug!(error = %e, "Token verification failed");
            GatewayError::Unauthenticated(format!("token verification failed: {e}"))
        })?;
        Ok(data.claims)
    }

    /// 签发 Token（开发环境与测试使用，线上由认证服务签发）
    pub fn sign(&self, claims: &Claims) -> Result<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| GatewayError::UpstreamInternal(format!("failed to sign token: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let verifier = TokenVerifier::new(b"secret");
        let token = verifier.sign(&Claims::new("u1", 1, 3600)).unwrap();
        let claims = verifier.verify(&token).unwrap();
        assert_eq!(claims.user_id, "u1");
        assert_eq!(claims.platform_id, 1);
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let token = TokenVerifier::new(b"secret")
            .sign(&Claims::new("u1", 1, 3600))
            .unwrap();
        let err = TokenVerifier::new(b"other").verify(&token).unwrap_err();
        assert!(matches!(err, GatewayError::Unauthenticated(_)));
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let verifier = TokenVerifier::new(b"secret");
        let mut claims = Claims::new("u1", 1, 3600);
        claims.exp = Utc::now().timestamp() - 3600;
        claims.nbf = claims.exp - 3600;
        claims.iat = claims.nbf;
        let token = verifier.sign(&claims).unwrap();
        assert!(verifier.verify(&token).is_err());
    }

    #[test]
    fn test_claim_field_names() {
        let json = serde_json::to_value(Claims::new("u1", 5, 60)).unwrap();
        assert_eq!(json["UserID"], "u1");
        assert_eq!(json["PlatformID"], 5);
    }
}
