use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::abs_client::{AbsClient, UserDto};
use crate::error::{Result, SyncError};

/// RFC 7636 S256 verifier/challenge pair for the OpenID code flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofKey {
    pub verifier: String,
    pub challenge: String,
}

impl ProofKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::from_verifier(URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn from_verifier(verifier: impl Into<String>) -> Self {
        let verifier = verifier.into();
        let digest = Sha256::digest(verifier.as_bytes());
        let challenge = URL_SAFE_NO_PAD.encode(digest);
        Self { verifier, challenge }
    }
}

/// How a connection proves itself to the server.
#[derive(Debug, Clone)]
pub enum AuthStrategy {
    UsernamePassword {
        username: String,
        password: String,
    },
    /// Authorization-code leg of the OpenID flow; the verifier must match the
    /// challenge sent when the flow started.
    OpenId {
        code: String,
        verifier: String,
        redirect_uri: String,
    },
    /// Tokens obtained out of band, e.g. migrated from another client.
    Token {
        username: String,
        access_token: String,
        refresh_token: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationOutcome {
    pub username: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
}

impl AuthStrategy {
    /// Run the exchange against the server and reduce the response to the
    /// tokens worth keeping.
    pub async fn resolve(self, client: &AbsClient) -> Result<AuthorizationOutcome> {
        let user = match self {
            Self::UsernamePassword { username, password } => {
                client.login(&username, &password).await?
            }
            Self::OpenId {
                code,
                verifier,
                redirect_uri,
            } => {
                client
                    .exchange_openid_code(&code, &verifier, &redirect_uri)
                    .await?
            }
            Self::Token {
                username,
                access_token,
                refresh_token,
            } => {
                return Ok(AuthorizationOutcome {
                    username,
                    access_token,
                    refresh_token,
                });
            }
        };
        outcome_from_user(user)
    }
}

fn outcome_from_user(user: UserDto) -> Result<AuthorizationOutcome> {
    let access_token = user.token.ok_or(SyncError::Unauthorized)?;
    Ok(AuthorizationOutcome {
        username: user.username,
        access_token,
        refresh_token: user.refresh_token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proof_key_matches_rfc_7636_vector() {
        let key = ProofKey::from_verifier("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk");
        assert_eq!(key.challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
    }

    #[test]
    fn generated_proof_keys_are_unique_and_unpadded() {
        let a = ProofKey::generate();
        let b = ProofKey::generate();
        assert_ne!(a.verifier, b.verifier);
        assert!(!a.verifier.contains('='));
        assert!(!a.challenge.contains('='));
    }

    #[tokio::test]
    async fn token_strategy_skips_the_exchange() {
        let client = AbsClient::new("http://localhost:1").unwrap();
        let outcome = AuthStrategy::Token {
            username: "alice".into(),
            access_token: "token".into(),
            refresh_token: None,
        }
        .resolve(&client)
        .await
        .unwrap();
        assert_eq!(outcome.username, "alice");
        assert_eq!(outcome.access_token, "token");
    }

    #[test]
    fn missing_token_is_an_authorization_failure() {
        let user = UserDto {
            id: "u1".into(),
            username: "alice".into(),
            token: None,
            refresh_token: None,
            media_progress: Vec::new(),
            bookmarks: Vec::new(),
            extra: Default::default(),
        };
        assert!(matches!(
            outcome_from_user(user),
            Err(SyncError::Unauthorized)
        ));
    }
}
