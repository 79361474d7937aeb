use rand::Rng;

/// `len` random lowercase hex characters.
pub fn random_hex(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| char::from_digit(rng.random_range(0..16), 16).unwrap_or('0'))
        .collect()
}

pub fn message_id() -> String {
    format!("msg_{}", random_hex(24))
}

pub fn tool_use_id() -> String {
    format!("toolu_{}", random_hex(24))
}

pub fn tool_call_id() -> String {
    format!("call_{}", random_hex(24))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_have_prefix_and_hex_suffix() {
        let id = tool_use_id();
        let suffix = id.strip_prefix("toolu_").unwrap();
        assert_eq!(suffix.len(), 24);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(message_id(), message_id());
    }
}
