//! 会话校验器
//!
//! ```text
//! NoToken → TokenPresent → ClaimsExtracted → 吊销状态查询 → {Authorized | Kicked | Unknown | NotFound}
//! ```
//!
//! 除 Authorized 外的所有终态都直接终止请求。状态查询有超时上限，超时视为校验失败。

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::{RevocationStore, SessionIdentity, TokenStatus, TokenVerifier};
use crate::error::{GatewayError, Result};

/// 会话校验器
pub struct SessionValidator {
    verifier: TokenVerifier,
    store: Arc<dyn RevocationStore>,
    timeout: Duration,
}

impl SessionValidator {
    pub fn new(verifier: TokenVerifier, store: Arc<dyn RevocationStore>, timeout: Duration) -> Self {
        Self {
            verifier,
            store,
            timeout,
        }
    }

    /// 校验请求头中的 Token
    pub async fn validate(&self, token: Option<&str>) -> Result<SessionIdentity> {
        let token = match token.map(str::trim) {
            Some(t) if !t.is_empty() => t,
            _ => return Err(GatewayError::Unauthenticated("header must have token".to_string())),
        };

        let claims = self.verifier.verify(token)?;

        let lookup = self.store.tokens(&claims.user_id, claims.platform_id);
        let tokens = match tokio::time::timeout(self.timeout, lookup).await {
            Ok(Ok(tokens)) => tokens,
            Ok(Err(e)) => {
                warn!(user_id = %claims.user_id, platform_id = claims.platform_id, error = %e, "Revocation store read failed");
                return Err(GatewayError::TokenNotFound);
            }
            Err(_) => {
                warn!(
                    user_id = %claims.user_id,
                    platform_id = claims.platform_id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Revocation store read timed out"
                );
                return Err(GatewayError::TokenUnknown);
            }
        };

        if tokens.is_empty() {
            debug!(user_id = %claims.user_id, platform_id = claims.platform_id, "No recorded session for device");
            return Err(GatewayError::TokenNotFound);
        }

        match tokens.get(token) {
            None => Err(GatewayError::TokenNotFound),
            Some(TokenStatus::Normal) => Ok(SessionIdentity::new(claims.user_id, claims.platform_id)),
            Some(TokenStatus::Kicked) => Err(GatewayError::TokenKicked),
            Some(TokenStatus::Unknown(code)) => {
                debug!(user_id = %claims.user_id, status = code, "Unexpected token status");
                Err(GatewayError::TokenUnknown)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;

    use super::*;
    use crate::auth::{Claims, MemoryRevocationStore};

    const SECRET: &[u8] = b"flare-test";

    fn sign(user_id: &str, platform_id: i32) -> String {
        TokenVerifier::new(SECRET)
            .sign(&Claims::new(user_id, platform_id, 3600))
            .unwrap()
    }

    fn validator(store: Arc<dyn RevocationStore>) -> SessionValidator {
        SessionValidator::new(TokenVerifier::new(SECRET), store, Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_missing_token() {
        let v = validator(Arc::new(MemoryRevocationStore::new()));
        assert!(matches!(v.validate(None).await, Err(GatewayError::Unauthenticated(_))));
        assert!(matches!(v.validate(Some("  ")).await, Err(GatewayError::Unauthenticated(_))));
    }

    #[tokio::test]
    async fn test_invalid_signature() {
        let v = validator(Arc::new(MemoryRevocationStore::new()));
        let forged = TokenVerifier::new(b"other")
            .sign(&Claims::new("u1", 1, 3600))
            .unwrap();
        assert!(matches!(
            v.validate(Some(&forged)).await,
            Err(GatewayError::Unauthenticated(_))
        ));
    }

    #[tokio::test]
    async fn test_absent_token_is_not_found() {
        let store = MemoryRevocationStore::new();
        let v = validator(Arc::new(store.clone()));
        let token = sign("u1", 1);

        // 设备没有任何记录
        assert!(matches!(v.validate(Some(&token)).await, Err(GatewayError::TokenNotFound)));

        // 设备有记录但不包含当前 Token
        store.set("u1", 1, "another-token", TokenStatus::Normal).await;
        assert!(matches!(v.validate(Some(&token)).await, Err(GatewayError::TokenNotFound)));
    }

    #[tokio::test]
    async fn test_kicked_token() {
        let store = MemoryRevocationStore::new();
        let token = sign("u1", 2);
        store.set("u1", 2, &token, TokenStatus::Kicked).await;

        let err = validator(Arc::new(store)).validate(Some(&token)).await.unwrap_err();
        assert!(matches!(err, GatewayError::TokenKicked));
        assert_ne!(err.code(), GatewayError::TokenNotFound.code());
    }

    #[tokio::test]
    async fn test_unknown_status() {
        let store = MemoryRevocationStore::new();
        let token = sign("u1", 1);
        store.set("u1", 1, &token, TokenStatus::Unknown(1)).await;

        assert!(matches!(
            validator(Arc::new(store)).validate(Some(&token)).await,
            Err(GatewayError::TokenUnknown)
        ));
    }

    #[tokio::test]
    async fn test_normal_token_uses_signed_claims() {
        let store = MemoryRevocationStore::new();
        let token = sign("u1", 5);
        store.set("u1", 5, &token, TokenStatus::Normal).await;
        store.set("u1", 5, "older", TokenStatus::Kicked).await;

        let identity = validator(Arc::new(store)).validate(Some(&token)).await.unwrap();
        assert_eq!(identity.user_id, "u1");
        assert_eq!(identity.platform_id, 5);
        assert_eq!(identity.platform_name, "Web");
    }

    struct SlowStore;

    #[async_trait]
    impl RevocationStore for SlowStore {
        async fn tokens(&self, _: &str, _: i32) -> Result<HashMap<String, TokenStatus>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(HashMap::new())
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl RevocationStore for BrokenStore {
        async fn tokens(&self, _: &str, _: i32) -> Result<HashMap<String, TokenStatus>> {
            Err(GatewayError::ServiceUnavailable("redis".to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_timeout_fails_closed() {
        let token = sign("u1", 1);
        assert!(matches!(
            validator(Arc::new(SlowStore)).validate(Some(&token)).await,
            Err(GatewayError::TokenUnknown)
        ));
    }

    #[tokio::test]
    async fn test_store_error_fails_closed() {
        let token = sign("u1", 1);
        assert!(matches!(
            validator(Arc::new(BrokenStore)).validate(Some(&token)).await,
            Err(GatewayError::TokenNotFound)
        ));
    }
}
