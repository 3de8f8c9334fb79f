use std::path::Path;

use crate::error::{ClientError, Result};
use crate::payload::{ArgumentFormatter, ArgumentsPayload};

/// Bytes that fit in one `bytes31` word.
pub const BYTES_PER_WORD: usize = 31;

/// Encodes the staging file as a Cairo `ByteArray` followed by two flags.
///
/// Layout: number of full words, each full word, pending word, pending word
/// length, `execute_scripts`, `other_flag`. Every entry is a `0x` felt.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeltArgumentFormatter;

impl ArgumentFormatter for FeltArgumentFormatter {
    fn format(
        &self,
        staging_file: &Path,
        execute_scripts: bool,
        other_flag: bool,
    ) -> Result<ArgumentsPayload> {
        let bytes = std::fs::read(staging_file).map_err(|e| {
            ClientError::Formatting(format!("cannot read {}: {}", staging_file.display(), e))
        })?;
        let mut felts = byte_array_felts(&bytes);
        felts.push(flag(execute_scripts));
        felts.push(flag(other_flag));
        Ok(ArgumentsPayload(felts))
    }
}

/// `ByteArray` serialization of `bytes` as felt strings.
pub fn byte_array_felts(bytes: &[u8]) -> Vec<String> {
    let words = bytes.chunks_exact(BYTES_PER_WORD);
    let pending = words.remainder();

    let mut felts = Vec::with_capacity(words.len() + 3);
    felts.push(format!("{:#x}", words.len()));
    felts.extend(words.map(word_felt));
    felts.push(word_felt(pending));
    felts.push(format!("{:#x}", pending.len()));
    felts
}

/// Big-endian hex of up to 31 bytes, without leading zeros.
fn word_felt(word: &[u8]) -> String {
    let hex: String = word.iter().map(|b| format!("{:02x}", b)).collect();
    let trimmed = hex.trim_start_matches('0');
    if trimmed.is_empty() {
        "0x0".to_string()
    } else {
        format!("0x{}", trimmed)
    }
}

fn flag(value: bool) -> String {
    String::from(if value { "0x1" } else { "0x0" })
}
