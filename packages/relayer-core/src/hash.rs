use tiny_keccak::{Hasher, Keccak};

use crate::types::{Address, DomainId, H256};

/// 对 `parts` 拼接结果计算 Legacy keccak256
pub fn keccak256<'a>(parts: impl IntoIterator<Item = &'a [u8]>) -> H256 {
    let mut hasher = Keccak::v256();
    for part in parts {
        hasher.update(part);
    }
    let mut output = [0u8; 32];
    hasher.finalize(&mut output);
    H256(output)
}

/// 代币映射的内容地址：`keccak256(dest_token ‖ domain ‖ destination)`
///
/// 编码为 20 字节地址后接两个单字节 domain id，同一事件总能算出同一个 id
pub fn mapping_hash(dest_token: &Address, domain: DomainId, destination: DomainId) -> H256 {
    keccak256([dest_token.as_bytes(), &[domain], &[destination]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keccak_of_empty_input() {
        assert_eq!(
            keccak256(std::iter::empty::<&[u8]>()).to_string(),
            "0xc5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn test_parts_are_concatenated() {
        assert_eq!(keccak256([&b"ab"[..], &b"c"[..]]), keccak256([&b"abc"[..]]));
    }

    #[test]
    fn test_mapping_hash_is_pure() {
        let token = Address([7u8; 20]);
        assert_eq!(mapping_hash(&token, 1, 2), mapping_hash(&token, 1, 2));
        assert_ne!(mapping_hash(&token, 1, 2), mapping_hash(&token, 2, 1));
        assert_ne!(mapping_hash(&token, 1, 2), mapping_hash(&Address([8u8; 20]), 1, 2));

        let mut encoded = token.as_bytes().to_vec();
        encoded.extend_from_slice(&[1, 2]);
        assert_eq!(mapping_hash(&token, 1, 2), keccak256([encoded.as_slice()]));
    }
}
