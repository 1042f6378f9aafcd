//! 程序镜像加载器

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use thiserror::Error;

/// 字节配对为字的顺序
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    /// 高字节在前 (汇编器默认输出)
    #[default]
    Big,
    Little,
}

/// 镜像文件格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// 原始二进制
    #[default]
    Binary,
    /// 十六进制文本, 空白被忽略
    Hex,
}

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("程序镜像为空: {path:?}")]
    Empty { path: PathBuf },

    #[error("十六进制镜像格式错误")]
    Hex(#[from] hex::FromHexError),
}

/// 两两配对字节, 奇数长度时最后一个字节占据首位的那一半
pub fn words_from_bytes(bytes: &[u8], order: ByteOrder) -> Vec<u16> {
    bytes
        .chunks(2)
        .map(|pair| {
            let first = pair[0];
            let second = pair.get(1).copied().unwrap_or(0);
            match order {
                ByteOrder::Big => u16::from_be_bytes([first, second]),
                ByteOrder::Little => u16::from_le_bytes([first, second]),
            }
        })
        .collect()
}

pub fn words_from_hex(text: &str, order: ByteOrder) -> Result<Vec<u16>, LoaderError> {
    let digits: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = hex::decode(digits)?;
    Ok(words_from_bytes(&bytes, order))
}

/// 读取程序镜像并转换为字序列
pub fn load_program(path: impl AsRef<Path>, format: ImageFormat, order: ByteOrder) -> Result<Vec<u16>> {
    let path = path.as_ref();
    let words = match format {
        ImageFormat::Binary => {
            let bytes = fs::read(path).with_context(|| format!("无法读取程序镜像 '{}'", path.display()))?;
            words_from_bytes(&bytes, order)
        }
        ImageFormat::Hex => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("无法读取程序镜像 '{}'", path.display()))?;
            words_from_hex(&text, order).with_context(|| format!("无法解析程序镜像 '{}'", path.display()))?
        }
    };

    if words.is_empty() {
        return Err(LoaderError::Empty {
            path: path.to_path_buf(),
        }
        .into());
    }
    tracing::info!(words = words.len(), ?format, ?order, "程序镜像已加载: {}", path.display());
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_file(name: &str, contents: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("dcpu16vm-{}-{}", std::process::id(), name));
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(contents).unwrap();
        path
    }

    #[test]
    fn test_words_from_bytes_orders() {
        let bytes = [0x7c, 0x01, 0x00, 0x30];
        assert_eq!(words_from_bytes(&bytes, ByteOrder::Big), vec![0x7c01, 0x0030]);
        assert_eq!(words_from_bytes(&bytes, ByteOrder::Little), vec![0x017c, 0x3000]);
    }

    #[test]
    fn test_odd_trailing_byte() {
        assert_eq!(words_from_bytes(&[0x12, 0x34, 0x56], ByteOrder::Big), vec![0x1234, 0x5600]);
        assert_eq!(words_from_bytes(&[0x12, 0x34, 0x56], ByteOrder::Little), vec![0x3412, 0x0056]);
        assert!(words_from_bytes(&[], ByteOrder::Big).is_empty());
    }

    #[test]
    fn test_words_from_hex() {
        assert_eq!(
            words_from_hex("7c01 0030\n", ByteOrder::Big).unwrap(),
            vec![0x7c01, 0x0030]
        );
        assert!(matches!(
            words_from_hex("7c0g", ByteOrder::Big),
            Err(LoaderError::Hex(_))
        ));
    }

    #[test]
    fn test_load_binary_and_hex() {
        let bin = temp_file("prog.bin", &[0x7c, 0x01, 0x00, 0x30]);
        assert_eq!(
            load_program(&bin, ImageFormat::Binary, ByteOrder::Big).unwrap(),
            vec![0x7c01, 0x0030]
        );
        let hex = temp_file("prog.hex", b"017c 3000");
        assert_eq!(
            load_program(&hex, ImageFormat::Hex, ByteOrder::Little).unwrap(),
            vec![0x7c01, 0x0030]
        );
        let _ = fs::remove_file(bin);
        let _ = fs::remove_file(hex);
    }

    #[test]
    fn test_empty_image_rejected() {
        let empty = temp_file("empty.bin", &[]);
        let err = load_program(&empty, ImageFormat::Binary, ByteOrder::Big).unwrap_err();
        assert!(err.downcast_ref::<LoaderError>().is_some());
        let _ = fs::remove_file(empty);
    }

    #[test]
    fn test_missing_file() {
        assert!(load_program("/nonexistent/prog.bin", ImageFormat::Binary, ByteOrder::Big).is_err());
    }
}
