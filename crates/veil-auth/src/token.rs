use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use veil_core::errors::AuthError;
use veil_core::ids::UserId;

/// Credential claims: subject user id and expiry.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
}

/// Verifies signed credentials. The algorithm is pinned to HS256 and the
/// expiry claim is required; a token signed with anything else is malformed
/// no matter how valid its signature looks.
pub struct TokenVerifier {
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &SecretString) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);
        Self {
            decoding: DecodingKey::from_secret(secret.expose_secret().as_bytes()),
            validation,
        }
    }

    /// Extract the subject id from a verified credential.
    pub fn verify(&self, token: &str) -> Result<UserId, AuthError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Malformed,
            }
        })?;
        Ok(UserId::from_raw(data.claims.sub))
    }
}

/// Issue a credential for `user`, valid for `ttl_secs`. The identity
/// service signs real tokens; this exists for tooling and tests.
pub fn issue_token(secret: &SecretString, user: &UserId, ttl_secs: i64) -> String {
    let claims = Claims {
        sub: user.as_str().to_owned(),
        exp: Utc::now().timestamp() + ttl_secs,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.expose_secret().as_bytes()),
    )
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret() -> SecretString {
        SecretString::from("test-secret")
    }

    #[test]
    fn verify_roundtrip() {
        let verifier = TokenVerifier::new(&secret());
        let user = UserId::from_raw("user_a");
        let token = issue_token(&secret(), &user, 60);
        assert_eq!(verifier.verify(&token).unwrap(), user);
    }

    #[test]
    fn expired_token() {
        let verifier = TokenVerifier::new(&secret());
        let token = issue_token(&secret(), &UserId::from_raw("user_a"), -60);
        assert_eq!(verifier.verify(&token).unwrap_err(), AuthError::Expired);
    }

    #[test]
    fn garbage_token_is_malformed() {
        let verifier = TokenVerifier::new(&secret());
        assert_eq!(
            verifier.verify("not.a.token").unwrap_err(),
            AuthError::Malformed
        );
    }

    #[test]
    fn wrong_secret_is_malformed() {
        let verifier = TokenVerifier::new(&secret());
        let token = issue_token(&SecretString::from("other"), &UserId::from_raw("user_a"), 60);
        assert_eq!(verifier.verify(&token).unwrap_err(), AuthError::Malformed);
    }

    #[test]
    fn foreign_algorithm_is_malformed() {
        // HS384-signed token must be rejected even with the right secret
        let claims = Claims {
            sub: "user_a".into(),
            exp: Utc::now().timestamp() + 60,
        };
        let token = encode(
            &Header::new(Algorithm::HS384),
            &claims,
            &EncodingKey::from_secret(secret().expose_secret().as_bytes()),
        )
        .unwrap();

        let verifier = TokenVerifier::new(&secret());
        assert_eq!(verifier.verify(&token).unwrap_err(), AuthError::Malformed);
    }
}
