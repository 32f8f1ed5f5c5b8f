//! Identity-service client: profile lookup and the hasJoined check.

use crate::config::AuthConfig;
use mattock_types::ProfileProperty;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

const MAX_RETRIES: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authentication rejected by the session server")]
    Failure,
    #[error("session server unavailable")]
    Unavailable,
}

#[derive(Debug, Deserialize)]
struct ProfileResponse {
    id: String,
    #[allow(dead_code)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct PropertyResponse {
    name: String,
    value: String,
    #[serde(default)]
    signature: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HasJoinedResponse {
    id: String,
    name: String,
    #[serde(default)]
    properties: Vec<PropertyResponse>,
}

/// The result of a successful hasJoined call.
#[derive(Debug, Clone)]
pub struct AuthResult {
    pub uuid: Uuid,
    pub name: String,
    pub properties: Vec<ProfileProperty>,
}

pub struct AuthClient {
    http: reqwest::Client,
    profile_base: String,
    session_base: String,
}

impl AuthClient {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_default(),
            profile_base: config.profile_base.trim_end_matches('/').to_string(),
            session_base: config.session_base.trim_end_matches('/').to_string(),
        }
    }

    /// Resolve a player name to its canonical UUID.
    pub async fn fetch_uuid(&self, name: &str) -> Option<Uuid> {
        let url = format!("{}/users/profiles/minecraft/{}", self.profile_base, name);
        let response = self.http.get(&url).send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        let profile: ProfileResponse = response.json().await.ok()?;
        Uuid::try_parse(&profile.id).ok()
    }

    /// Fetch the signed textures property for a UUID.
    pub async fn fetch_textures(&self, uuid: &Uuid) -> Option<ProfileProperty> {
        let url = format!(
            "{}/session/minecraft/profile/{}?unsigned=false",
            self.session_base,
            uuid.simple()
        );
        let response = self.http.get(&url).send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        let profile: HasJoinedResponse = response.json().await.ok()?;
        profile
            .properties
            .into_iter()
            .find(|p| p.name == "textures")
            .map(|p| ProfileProperty {
                name: p.name,
                value: p.value,
                signature: p.signature,
            })
    }

    /// The hasJoined check: a 204 means the client never announced this
    /// server hash, i.e. authentication failed. Transport errors retry
    /// with a 1 s backoff up to 3 attempts.
    pub async fn has_joined(
        &self,
        username: &str,
        server_hash: &str,
        client_ip: &str,
    ) -> Result<AuthResult, AuthError> {
        let url = format!(
            "{}/session/minecraft/hasJoined?username={}&serverId={}&ip={}",
            self.session_base, username, server_hash, client_ip
        );

        for attempt in 1..=MAX_RETRIES {
            match self.http.get(&url).send().await {
                Ok(response) => {
                    if response.status() == reqwest::StatusCode::NO_CONTENT {
                        return Err(AuthError::Failure);
                    }
                    if !response.status().is_success() {
                        warn!(
                            "session server returned {} (attempt {attempt})",
                            response.status()
                        );
                    } else {
                        match response.json::<HasJoinedResponse>().await {
                            Ok(body) => {
                                let uuid = Uuid::try_parse(&body.id)
                                    .map_err(|_| AuthError::Unavailable)?;
                                return Ok(AuthResult {
                                    uuid,
                                    name: body.name,
                                    properties: body
                                        .properties
                                        .into_iter()
                                        .map(|p| ProfileProperty {
                                            name: p.name,
                                            value: p.value,
                                            signature: p.signature,
                                        })
                                        .collect(),
                                });
                            }
                            Err(e) => warn!("bad hasJoined body (attempt {attempt}): {e}"),
                        }
                    }
                }
                Err(e) => debug!("hasJoined request failed (attempt {attempt}): {e}"),
            }
            if attempt < MAX_RETRIES {
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }
        Err(AuthError::Unavailable)
    }
}

/// Offline-mode fallback UUID derived from the player name.
pub fn offline_uuid(name: &str) -> Uuid {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let input = format!("OfflinePlayer:{}", name);
    let mut hasher = DefaultHasher::new();
    input.hash(&mut hasher);
    let h1 = hasher.finish();
    input.len().hash(&mut hasher);
    let h2 = hasher.finish();
    let mut bytes = [0u8; 16];
    bytes[..8].copy_from_slice(&h1.to_be_bytes());
    bytes[8..].copy_from_slice(&h2.to_be_bytes());
    // Version 3 and variant bits.
    bytes[6] = (bytes[6] & 0x0f) | 0x30;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    Uuid::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offline_uuid_is_stable_and_versioned() {
        let a = offline_uuid("Steve");
        let b = offline_uuid("Steve");
        let c = offline_uuid("Alex");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.get_version_num(), 3);
    }

    #[test]
    fn test_mojang_uuid_parse_without_dashes() {
        let parsed = Uuid::try_parse("069a79f444e94726a5befca90e38aaf5").unwrap();
        assert_eq!(
            parsed.hyphenated().to_string(),
            "069a79f4-44e9-4726-a5be-fca90e38aaf5"
        );
    }
}
