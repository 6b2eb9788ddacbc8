//! 存款 calldata 与提案数据所用 32 字节字布局的辅助函数

use crate::{Error, Result};

pub const WORD: usize = 32;

/// 将 `bytes` 左补零成一个字
pub fn encode_word(bytes: &[u8]) -> Result<[u8; WORD]> {
    if bytes.len() > WORD {
        return Err(Error::Serialization(format!(
            "Value of {} bytes does not fit in a word",
            bytes.len()
        )));
    }
    let mut word = [0u8; WORD];
    word[WORD - bytes.len()..].copy_from_slice(bytes);
    Ok(word)
}

pub fn encode_len(len: usize) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[WORD - 8..].copy_from_slice(&(len as u64).to_be_bytes());
    word
}

/// 返回 `data[offset..offset + len]`，越界时返回带 `what` 的解码错误
pub fn read_slice<'a>(data: &'a [u8], offset: usize, len: usize, what: &str) -> Result<&'a [u8]> {
    offset
        .checked_add(len)
        .and_then(|end| data.get(offset..end))
        .ok_or_else(|| {
            Error::Decode(format!(
                "Calldata too short for {}: need {} bytes at offset {}, have {}",
                what,
                len,
                offset,
                data.len()
            ))
        })
}

/// 读取大端长度字，放不进 `usize` 的长度无法用于索引，按解码错误处理
pub fn read_len(data: &[u8], offset: usize, what: &str) -> Result<usize> {
    let word = read_slice(data, offset, WORD, what)?;
    let (high, low) = word.split_at(WORD - 8);
    if high.iter().any(|b| *b != 0) {
        return Err(Error::Decode(format!("Length of {} overflows", what)));
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(low);
    usize::try_from(u64::from_be_bytes(buf))
        .map_err(|_| Error::Decode(format!("Length of {} overflows", what)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_word_left_pads() {
        let word = encode_word(&[1, 2]).unwrap();
        assert_eq!(&word[30..], &[1, 2]);
        assert!(word[..30].iter().all(|b| *b == 0));
        assert!(encode_word(&[0u8; 33]).is_err());
    }

    #[test]
    fn test_read_len_rejects_huge_values() {
        let mut data = encode_len(3).to_vec();
        assert_eq!(read_len(&data, 0, "x").unwrap(), 3);
        data[0] = 1;
        assert!(read_len(&data, 0, "x").is_err());
    }

    #[test]
    fn test_read_slice_bounds() {
        let data = [0u8; 10];
        assert!(read_slice(&data, 4, 6, "x").is_ok());
        assert!(read_slice(&data, 4, 7, "x").is_err());
        assert!(read_slice(&data, usize::MAX, 2, "x").is_err());
    }
}
