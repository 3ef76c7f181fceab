use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use common_keys::{KeyAlgorithm, KeyManager};
use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use crate::binding::{check_binding, truncated_hash, BindingContext, BindingOutcome};
use crate::claims::{AccessClaims, BindingLevel, RefreshClaims, TokenType, TokenTypeTag};
use crate::config::TokenConfig;
use crate::error::{TokenError, TokenResult};

pub struct AccessTokenSubject {
    pub user_id: Uuid,
    pub email: String,
    pub name: String,
    pub sid: Uuid,
}

pub struct IssuedAccessToken {
    pub token: String,
    pub jti: Uuid,
    pub expires_at: DateTime<Utc>,
}

pub struct IssuedRefreshToken {
    pub token: String,
    pub jti: Uuid,
    pub token_family: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// Signs and verifies the three token variants, routing signing-key lookups
/// through the key manager so rotation is transparent to callers.
pub struct TokenService {
    keys: Arc<KeyManager>,
    config: TokenConfig,
}

impl TokenService {
    pub fn new(keys: Arc<KeyManager>, config: TokenConfig) -> Self {
        Self { keys, config }
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    fn jwt_algorithm(algorithm: KeyAlgorithm) -> Algorithm {
        match algorithm {
            KeyAlgorithm::Ps256 => Algorithm::PS256,
            KeyAlgorithm::Ps384 => Algorithm::PS384,
            KeyAlgorithm::Ps512 => Algorithm::PS512,
            KeyAlgorithm::Rs256 => Algorithm::RS256,
            KeyAlgorithm::Rs384 => Algorithm::RS384,
            KeyAlgorithm::Rs512 => Algorithm::RS512,
        }
    }

    fn signing_header(&self, key_id: &str, algorithm: KeyAlgorithm) -> Header {
        let mut header = Header::new(Self::jwt_algorithm(algorithm));
        header.kid = Some(key_id.to_string());
        header
    }

    pub fn issue_access(
        &self,
        subject: AccessTokenSubject,
        binding: Option<&BindingContext<'_>>,
    ) -> TokenResult<IssuedAccessToken> {
        let signing = self.keys.active_key()?;
        let encoding_key = EncodingKey::from_rsa_pem(signing.private_key_pem.as_bytes())
            .map_err(|err| TokenError::KeyParse(err.to_string()))?;

        let now = Utc::now();
        let exp = now + Duration::seconds(self.config.access_ttl_seconds);
        let jti = Uuid::new_v4();
        let (ip_hash, ua_hash) = hash_binding(binding);

        let claims = AccessClaims {
            user_id: subject.user_id,
            email: subject.email,
            name: subject.name,
            sid: subject.sid,
            jti,
            ip_hash,
            ua_hash,
            binding_level: BindingLevel::Soft,
            token_type: TokenType::Access,
            scopes: None,
            ttl: None,
            iat: now.timestamp(),
            exp: exp.timestamp(),
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
        };

        let header = self.signing_header(&signing.key_id, signing.algorithm);
        let token = encode(&header, &claims, &encoding_key)
            .map_err(|err| TokenError::Verification(err.to_string()))?;

        Ok(IssuedAccessToken {
            token,
            jti,
            expires_at: exp,
        })
    }

    pub fn issue_privileged(
        &self,
        subject: AccessTokenSubject,
        scopes: BTreeSet<String>,
        binding: Option<&BindingContext<'_>>,
    ) -> TokenResult<IssuedAccessToken> {
        let signing = self.keys.active_key()?;
        let encoding_key = EncodingKey::from_rsa_pem(signing.private_key_pem.as_bytes())
            .map_err(|err| TokenError::KeyParse(err.to_string()))?;

        let now = Utc::now();
        let exp = now + Duration::seconds(self.config.privileged_ttl_seconds);
        let jti = Uuid::new_v4();
        let (ip_hash, ua_hash) = hash_binding(binding);

        let claims = AccessClaims {
            user_id: subject.user_id,
            email: subject.email,
            name: subject.name,
            sid: subject.sid,
            jti,
            ip_hash,
            ua_hash,
            binding_level: BindingLevel::Strict,
            token_type: TokenType::Privileged,
            scopes: Some(scopes),
            ttl: Some(self.config.privileged_ttl_seconds),
            iat: now.timestamp(),
            exp: exp.timestamp(),
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
        };

        let header = self.signing_header(&signing.key_id, signing.algorithm);
        let token = encode(&header, &claims, &encoding_key)
            .map_err(|err| TokenError::Verification(err.to_string()))?;

        Ok(IssuedAccessToken {
            token,
            jti,
            expires_at: exp,
        })
    }

    pub fn issue_refresh(
        &self,
        user_id: Uuid,
        sid: Uuid,
        token_family: Option<Uuid>,
    ) -> TokenResult<IssuedRefreshToken> {
        let signing = self.keys.active_key()?;
        let encoding_key = EncodingKey::from_rsa_pem(signing.private_key_pem.as_bytes())
            .map_err(|err| TokenError::KeyParse(err.to_string()))?;

        let now = Utc::now();
        let exp = now + Duration::seconds(self.config.refresh_ttl_seconds);
        let jti = Uuid::new_v4();
        let token_family = token_family.unwrap_or_else(Uuid::new_v4);

        let claims = RefreshClaims {
            user_id,
            sid,
            jti,
            token_family,
            token_type: TokenType::Refresh,
            iat: now.timestamp(),
            exp: exp.timestamp(),
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
        };

        let header = self.signing_header(&signing.key_id, signing.algorithm);
        let token = encode(&header, &claims, &encoding_key)
            .map_err(|err| TokenError::Verification(err.to_string()))?;

        Ok(IssuedRefreshToken {
            token,
            jti,
            token_family,
            expires_at: exp,
        })
    }

    fn decoding_key_for(&self, kid: &str, alg: Algorithm) -> TokenResult<DecodingKey> {
        if alg == Algorithm::HS256 {
            let secret = self
                .config
                .legacy_hs256_secret
                .as_deref()
                .ok_or_else(|| TokenError::UnknownKeyId(kid.to_string()))?;
            return Ok(DecodingKey::from_secret(secret.as_bytes()));
        }
        let verification = self.keys.verification_key(kid)?;
        DecodingKey::from_rsa_pem(verification.public_key_pem.as_bytes())
            .map_err(|err| TokenError::KeyParse(err.to_string()))
    }

    fn validation_for(&self, alg: Algorithm) -> Validation {
        let mut validation = Validation::new(alg);
        validation.set_issuer(&[self.config.issuer.clone()]);
        validation.set_audience(&[self.config.audience.clone()]);
        validation.leeway = self.config.clock_skew_seconds.max(0) as u64;
        validation.algorithms = vec![Algorithm::PS256, Algorithm::RS256, Algorithm::HS256];
        validation
    }

    pub fn verify_access(
        &self,
        token: &str,
        binding: Option<&BindingContext<'_>>,
    ) -> TokenResult<(AccessClaims, BindingOutcome)> {
        let header = decode_header(token).map_err(|err| TokenError::InvalidHeader(err.to_string()))?;
        let kid = header.kid.ok_or(TokenError::MissingKeyId)?;
        let decoding_key = self.decoding_key_for(&kid, header.alg)?;
        let validation = self.validation_for(header.alg);

        let tag = decode::<TokenTypeTag>(token, &decoding_key, &validation)?;
        if !matches!(tag.claims.token_type, TokenType::Access | TokenType::Privileged) {
            return Err(TokenError::WrongType {
                expected: "access",
                found: format!("{:?}", tag.claims.token_type),
            });
        }

        let data = decode::<AccessClaims>(token, &decoding_key, &validation)?;
        let claims = data.claims;

        let outcome = check_binding(
            claims.binding_level,
            claims.ip_hash.as_deref(),
            claims.ua_hash.as_deref(),
            binding,
        );
        if outcome == BindingOutcome::StrictMismatch {
            return Err(TokenError::BindingMismatch);
        }

        Ok((claims, outcome))
    }

    pub fn verify_refresh(&self, token: &str) -> TokenResult<RefreshClaims> {
        let header = decode_header(token).map_err(|err| TokenError::InvalidHeader(err.to_string()))?;
        let kid = header.kid.ok_or(TokenError::MissingKeyId)?;
        let decoding_key = self.decoding_key_for(&kid, header.alg)?;
        let validation = self.validation_for(header.alg);

        let tag = decode::<TokenTypeTag>(token, &decoding_key, &validation)?;
        if tag.claims.token_type != TokenType::Refresh {
            return Err(TokenError::WrongType {
                expected: "refresh",
                found: format!("{:?}", tag.claims.token_type),
            });
        }

        let data = decode::<RefreshClaims>(token, &decoding_key, &validation)?;
        Ok(data.claims)
    }
}

fn hash_binding(binding: Option<&BindingContext<'_>>) -> (Option<String>, Option<String>) {
    let Some(binding) = binding else {
        return (None, None);
    };
    (
        binding.ip.map(truncated_hash),
        binding.user_agent.map(truncated_hash),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use common_keys::KeyManagerConfig;

    async fn test_service() -> TokenService {
        let dir = tempfile::tempdir().unwrap();
        let keys = KeyManager::spawn(KeyManagerConfig {
            key_store_dir: dir.path().to_path_buf(),
            grace_window: Duration::hours(1),
        });
        keys.wait_until_ready().await;
        std::mem::forget(dir);
        TokenService::new(keys, TokenConfig::default())
    }

    fn subject() -> AccessTokenSubject {
        AccessTokenSubject {
            user_id: Uuid::new_v4(),
            email: "user@example.com".to_string(),
            name: "Test User".to_string(),
            sid: Uuid::new_v4(),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn issues_and_verifies_access_token() {
        let service = test_service().await;
        let binding = BindingContext {
            ip: Some("203.0.113.1"),
            user_agent: Some("test-agent/1.0"),
        };
        let issued = service.issue_access(subject(), Some(&binding)).unwrap();
        let (claims, outcome) = service.verify_access(&issued.token, Some(&binding)).unwrap();
        assert_eq!(outcome, BindingOutcome::Ok);
        assert_eq!(claims.jti, issued.jti);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn strict_binding_mismatch_on_privileged_token_fails() {
        let service = test_service().await;
        let issue_binding = BindingContext {
            ip: Some("203.0.113.1"),
            user_agent: Some("test-agent/1.0"),
        };
        let issued = service
            .issue_privileged(subject(), BTreeSet::from(["licenses:write".to_string()]), Some(&issue_binding))
            .unwrap();

        let verify_binding = BindingContext {
            ip: Some("198.51.100.2"),
            user_agent: Some("test-agent/1.0"),
        };
        let result = service.verify_access(&issued.token, Some(&verify_binding));
        assert!(matches!(result, Err(TokenError::BindingMismatch)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn soft_binding_mismatch_still_succeeds() {
        let service = test_service().await;
        let issue_binding = BindingContext {
            ip: Some("203.0.113.1"),
            user_agent: Some("test-agent/1.0"),
        };
        let issued = service.issue_access(subject(), Some(&issue_binding)).unwrap();

        let verify_binding = BindingContext {
            ip: Some("198.51.100.2"),
            user_agent: Some("test-agent/1.0"),
        };
        let (_, outcome) = service.verify_access(&issued.token, Some(&verify_binding)).unwrap();
        assert_eq!(outcome, BindingOutcome::SoftMismatch);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn refresh_token_rejects_as_access() {
        let service = test_service().await;
        let issued = service.issue_refresh(Uuid::new_v4(), Uuid::new_v4(), None).unwrap();
        let result = service.verify_access(&issued.token, None);
        assert!(matches!(result, Err(TokenError::WrongType { .. })));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn access_token_rejects_as_refresh() {
        let service = test_service().await;
        let issued = service.issue_access(subject(), None).unwrap();
        let result = service.verify_refresh(&issued.token);
        assert!(matches!(result, Err(TokenError::WrongType { .. })));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn refresh_token_with_unknown_kid_is_reported_distinctly() {
        use rand_core::OsRng;
        use rsa::pkcs1::EncodeRsaPrivateKey;
        use rsa::RsaPrivateKey;

        let service = test_service().await;

        // A token signed under a kid the manager has never heard of (e.g.
        // purged past its hard grace): this must surface as `UnknownKeyId`,
        // not the generic signature-failure path, so callers above can tell
        // the client to log out instead of asking it to retry.
        let stray_key = RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
        let pem = stray_key.to_pkcs1_pem(rsa::pkcs1::LineEnding::LF).unwrap();
        let encoding_key = EncodingKey::from_rsa_pem(pem.as_bytes()).unwrap();
        let mut header = Header::new(Algorithm::PS256);
        header.kid = Some("key_does_not_exist".to_string());
        let claims = RefreshClaims {
            user_id: Uuid::new_v4(),
            sid: Uuid::new_v4(),
            jti: Uuid::new_v4(),
            token_family: Uuid::new_v4(),
            token_type: TokenType::Refresh,
            iat: Utc::now().timestamp(),
            exp: (Utc::now() + Duration::minutes(5)).timestamp(),
            iss: service.config().issuer.clone(),
            aud: service.config().audience.clone(),
        };
        let token = encode(&header, &claims, &encoding_key).unwrap();

        let result = service.verify_refresh(&token);
        assert!(matches!(result, Err(TokenError::UnknownKeyId(_))));
    }
}
