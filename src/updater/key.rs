use crate::error::{NetErr, Result};

/// Key stride per layer in the parameter store.
///
/// Only two role offsets are used today; the gap reserves key space for
/// future per-layer weight roles without renumbering existing keys.
pub const DATA_KEY_STEP: i32 = 4;

/// Encodes `(layer_index, weight role)` into the globally unique integer key
/// addressing that parameter in the store.
///
/// `key(layer[i].wmat) == i * 4`, `key(layer[i].bias) == i * 4 + 1`.
pub fn encode_data_key(layer_index: i32, tag: &str) -> Result<i32> {
    match tag {
        "wmat" => Ok(layer_index * DATA_KEY_STEP),
        "bias" => Ok(layer_index * DATA_KEY_STEP + 1),
        _ => Err(NetErr::Usage("only weight tags wmat and bias are supported")),
    }
}

/// Decodes the weight role back out of a key.
pub fn decode_tag(key: i32) -> Result<&'static str> {
    match key.rem_euclid(DATA_KEY_STEP) {
        0 => Ok("wmat"),
        1 => Ok("bias"),
        _ => Err(NetErr::InvalidKey { key }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        for layer_index in 0..64 {
            let w = encode_data_key(layer_index, "wmat").unwrap();
            let b = encode_data_key(layer_index, "bias").unwrap();
            assert_eq!(w, layer_index * 4);
            assert_eq!(b, layer_index * 4 + 1);
            assert_eq!(decode_tag(w).unwrap(), "wmat");
            assert_eq!(decode_tag(b).unwrap(), "bias");
        }
    }

    #[test]
    fn reserved_role_offsets_fail_to_decode() {
        for layer_index in 0..4 {
            for off in [2, 3] {
                let key = layer_index * DATA_KEY_STEP + off;
                assert!(matches!(
                    decode_tag(key),
                    Err(NetErr::InvalidKey { key: k }) if k == key
                ));
            }
        }
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert!(encode_data_key(0, "gamma").is_err());
    }
}
