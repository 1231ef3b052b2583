use crate::peer::types::{IceServerConfig, IceServerKind};
use rand::Rng;

/// Short random hex id used to tag a run in logs and in the summary
pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

// Prefixes the ICE server URL with its scheme when the scheme is missing
pub fn add_ice_url_scheme(config: &IceServerConfig) -> String {
    let url = config.url.trim();
    if url.starts_with("turn:")
        || url.starts_with("turns:")
        || url.starts_with("stun:")
        || url.starts_with("stuns:")
    {
        url.to_string()
    } else {
        let scheme = match config.kind {
            IceServerKind::Turn => "turn:",
            IceServerKind::Stun => "stun:",
        };
        format!("{}{}", scheme, url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_id_is_sixteen_hex_chars() {
        let id = random_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn existing_scheme_is_kept() {
        let server = IceServerConfig::turn("turns:relay.example.org:5349", "u", "p");
        assert_eq!(add_ice_url_scheme(&server), "turns:relay.example.org:5349");
    }
}
