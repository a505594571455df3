//! Upgrade headers.
//!
//! A peer presents three headers when opening a link:
//!
//! | Header           | Value                                                    |
//! |------------------|----------------------------------------------------------|
//! | `Authentication` | the shared secret, compared exactly                      |
//! | `Instances`      | JSON array of `{instanceName, instanceType}`             |
//! | `SocketId`       | the id received on the previous link, or `-1`            |
//!
//! The secret is checked first: a request with a bad secret is refused with
//! `401` whatever else it carries. Malformed identity or id headers after a
//! good secret are refused with `409`.

use axum::http::HeaderMap;
use chatbridge_types::{InstanceIdentity, SocketId};

use crate::error::HandshakeError;

/// Shared secret header.
pub const AUTHENTICATION: &str = "authentication";

/// Claimed identities header.
pub const INSTANCES: &str = "instances";

/// Previous session id header.
pub const SOCKET_ID: &str = "socketid";

/// A validated upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// Identities the peer hosts. Internal identities are dropped.
    pub instances: Vec<InstanceIdentity>,
    /// Id of the peer's previous session, if any.
    pub previous: Option<SocketId>,
}

/// Validate upgrade headers against the server secret.
pub fn verify(headers: &HeaderMap, key: &str) -> Result<Handshake, HandshakeError> {
    let presented = headers
        .get(AUTHENTICATION)
        .ok_or(HandshakeError::Unauthorized)?;
    if presented.as_bytes() != key.as_bytes() {
        return Err(HandshakeError::Unauthorized);
    }

    let instances = headers
        .get(INSTANCES)
        .ok_or_else(|| HandshakeError::MalformedInstances(String::from("missing")))?;
    let instances: Vec<InstanceIdentity> = serde_json::from_slice(instances.as_bytes())
        .map_err(|error| HandshakeError::MalformedInstances(error.to_string()))?;

    let previous = headers
        .get(SOCKET_ID)
        .ok_or_else(|| HandshakeError::MalformedSocketId(String::from("missing")))?;
    let previous = previous
        .to_str()
        .ok()
        .and_then(|text| text.trim().parse::<i64>().ok())
        .and_then(SocketId::from_header)
        .ok_or_else(|| {
            HandshakeError::MalformedSocketId(String::from_utf8_lossy(previous.as_bytes()).into())
        })?;

    Ok(Handshake {
        instances: instances
            .into_iter()
            .filter(|identity| !identity.is_internal())
            .collect(),
        previous,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::http::HeaderValue;
    use chatbridge_types::InstanceType;

    use super::*;

    fn headers(key: &str, instances: &str, socket_id: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHENTICATION, HeaderValue::from_str(key).unwrap());
        headers.insert(INSTANCES, HeaderValue::from_str(instances).unwrap());
        headers.insert(SOCKET_ID, HeaderValue::from_str(socket_id).unwrap());
        headers
    }

    const GUILD_A: &str = r#"[{"instanceName":"guild-a","instanceType":"minecraft"}]"#;

    #[test]
    fn accepts_matching_secret() {
        let handshake = verify(&headers("S1", GUILD_A, "-1"), "S1").unwrap();
        assert_eq!(
            handshake.instances,
            [InstanceIdentity::new("guild-a", InstanceType::Minecraft)]
        );
        assert_eq!(handshake.previous, None);

        let handshake = verify(&headers("S1", "[]", "3"), "S1").unwrap();
        assert_eq!(handshake.previous, Some(SocketId(3)));
    }

    #[test]
    fn wrong_or_missing_secret_is_unauthorized() {
        assert_eq!(
            verify(&headers("S2", GUILD_A, "-1"), "S1"),
            Err(HandshakeError::Unauthorized)
        );
        // A bad secret wins over malformed headers.
        assert_eq!(
            verify(&headers("S2", "garbage", "x"), "S1"),
            Err(HandshakeError::Unauthorized)
        );
        assert_eq!(
            verify(&HeaderMap::new(), "S1"),
            Err(HandshakeError::Unauthorized)
        );
    }

    #[test]
    fn malformed_headers_after_auth() {
        assert!(matches!(
            verify(&headers("S1", "garbage", "-1"), "S1"),
            Err(HandshakeError::MalformedInstances(_))
        ));
        assert!(matches!(
            verify(&headers("S1", GUILD_A, "-7"), "S1"),
            Err(HandshakeError::MalformedSocketId(_))
        ));
        assert!(matches!(
            verify(&headers("S1", GUILD_A, "abc"), "S1"),
            Err(HandshakeError::MalformedSocketId(_))
        ));
    }

    #[test]
    fn internal_claims_are_dropped() {
        let claimed = r#"[
            {"instanceName":"node","instanceType":"main"},
            {"instanceName":"guild-a","instanceType":"minecraft"}
        ]"#
        .replace('\n', " ");
        let handshake = verify(&headers("S1", &claimed, "-1"), "S1").unwrap();
        assert_eq!(handshake.instances.len(), 1);
    }
}
