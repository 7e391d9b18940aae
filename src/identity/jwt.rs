use async_trait::async_trait;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

use super::{ExternalIdentity, IdentityError, IdentityProvider};
use crate::config::Config;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    pub exp: i64,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

/// Verifies HS256 tokens signed by the auth provider with a shared secret.
pub struct JwtIdentityProvider {
    key: DecodingKey,
    validation: Validation,
}

impl JwtIdentityProvider {
    pub fn new(secret: &str, issuer: Option<&str>, audience: Option<&str>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // jsonwebtoken only checks iss/aud when the claim is present unless required.
        let mut required = vec!["exp"];
        if issuer.is_some() {
            required.push("iss");
        }
        if audience.is_some() {
            required.push("aud");
        }
        validation.set_required_spec_claims(&required);
        match issuer {
            Some(iss) => validation.set_issuer(&[iss]),
            None => validation.iss = None,
        }
        match audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }

        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.jwt_secret,
            config.jwt_issuer.as_deref(),
            config.jwt_audience.as_deref(),
        )
    }

    pub fn verify(&self, token: &str) -> Result<TokenClaims, IdentityError> {
        decode::<TokenClaims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => IdentityError::Expired,
                _ => IdentityError::Invalid(e.to_string()),
            })
    }
}

#[async_trait]
impl IdentityProvider for JwtIdentityProvider {
    async fn resolve(&self, token: &str) -> Result<ExternalIdentity, IdentityError> {
        let claims = self.verify(token)?;
        if claims.sub.trim().is_empty() {
            return Err(IdentityError::Invalid("empty subject".into()));
        }
        Ok(ExternalIdentity {
            subject: claims.sub,
            email: claims.email,
            name: claims.name,
            picture: claims.picture,
            expires_at: Some(claims.exp),
        })
    }
}

#[cfg(test)]
pub(crate) fn sign_for_tests(secret: &str, claims: &TokenClaims) -> String {
    use jsonwebtoken::{EncodingKey, Header, encode};
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("signing test token")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn claims(sub: &str, ttl: Duration) -> TokenClaims {
        TokenClaims {
            sub: sub.into(),
            exp: (Utc::now() + ttl).timestamp(),
            email: Some(format!("{sub}@example.com")),
            name: None,
            picture: None,
            iss: None,
            aud: None,
        }
    }

    #[tokio::test]
    async fn resolves_valid_token() {
        let provider = JwtIdentityProvider::new("s3cret", None, None);
        let token = sign_for_tests("s3cret", &claims("user_1", Duration::hours(1)));
        let identity = provider.resolve(&token).await.unwrap();
        assert_eq!(identity.subject, "user_1");
        assert_eq!(identity.email.as_deref(), Some("user_1@example.com"));
    }

    #[tokio::test]
    async fn rejects_wrong_secret() {
        let provider = JwtIdentityProvider::new("s3cret", None, None);
        let token = sign_for_tests("other", &claims("user_1", Duration::hours(1)));
        assert!(matches!(
            provider.resolve(&token).await,
            Err(IdentityError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn rejects_expired_token() {
        let provider = JwtIdentityProvider::new("s3cret", None, None);
        let token = sign_for_tests("s3cret", &claims("user_1", Duration::hours(-2)));
        assert!(matches!(
            provider.resolve(&token).await,
            Err(IdentityError::Expired)
        ));
    }

    #[tokio::test]
    async fn enforces_configured_issuer() {
        let provider = JwtIdentityProvider::new("s3cret", Some("https://auth.example"), None);

        let missing = sign_for_tests("s3cret", &claims("user_1", Duration::hours(1)));
        assert!(provider.resolve(&missing).await.is_err());

        let mut wrong = claims("user_1", Duration::hours(1));
        wrong.iss = Some("https://evil.example".into());
        let wrong = sign_for_tests("s3cret", &wrong);
        assert!(provider.resolve(&wrong).await.is_err());

        let mut right = claims("user_1", Duration::hours(1));
        right.iss = Some("https://auth.example".into());
        let right = sign_for_tests("s3cret", &right);
        assert_eq!(provider.resolve(&right).await.unwrap().subject, "user_1");
    }

    #[tokio::test]
    async fn enforces_configured_audience() {
        let provider = JwtIdentityProvider::new("s3cret", None, Some("toolkudu"));

        let missing = sign_for_tests("s3cret", &claims("user_1", Duration::hours(1)));
        assert!(provider.resolve(&missing).await.is_err());

        let mut right = claims("user_1", Duration::hours(1));
        right.aud = Some("toolkudu".into());
        let right = sign_for_tests("s3cret", &right);
        assert!(provider.resolve(&right).await.is_ok());
    }

    #[tokio::test]
    async fn identity_carries_token_expiry() {
        let provider = JwtIdentityProvider::new("s3cret", None, None);
        let claims = claims("user_1", Duration::hours(1));
        let token = sign_for_tests("s3cret", &claims);
        let identity = provider.resolve(&token).await.unwrap();
        assert_eq!(identity.expires_at, Some(claims.exp));
    }
}
