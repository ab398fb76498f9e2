use crate::error::{Result, WardenError};
use serde::{Deserialize, Serialize};

const KIB: f64 = 1024.0;
const MIB: f64 = KIB * 1024.0;
const GIB: f64 = MIB * 1024.0;

/// Memory threshold as written in a configuration file
///
/// Accepts either a raw byte count (`209715200`) or a human-readable string
/// with a binary unit suffix (`"200M"`, `"1.5G"`, `"512K"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MemoryValue {
    Bytes(u64),
    Text(String),
}

impl MemoryValue {
    /// Resolve to a byte count
    pub fn to_bytes(&self) -> Result<u64> {
        let bytes = match self {
            MemoryValue::Bytes(bytes) => *bytes,
            MemoryValue::Text(text) => parse_memory(text)?,
        };

        if bytes == 0 {
            return Err(WardenError::InvalidMemoryLimit(
                "memory limit must be greater than zero".to_string(),
            ));
        }

        Ok(bytes)
    }
}

/// Parse a memory string such as `"200M"` into bytes
pub fn parse_memory(input: &str) -> Result<u64> {
    let trimmed = input.trim();
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);

    let value: f64 = number
        .parse()
        .map_err(|_| WardenError::InvalidMemoryLimit(format!("'{}' has no numeric value", input)))?;

    let multiplier = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1.0,
        "K" | "KB" => KIB,
        "M" | "MB" => MIB,
        "G" | "GB" => GIB,
        other => {
            return Err(WardenError::InvalidMemoryLimit(format!(
                "unknown unit '{}' in '{}'. Use K, M or G",
                other, input
            )))
        }
    };

    let bytes = (value * multiplier).round();
    if !bytes.is_finite() || bytes <= 0.0 || bytes > u64::MAX as f64 {
        return Err(WardenError::InvalidMemoryLimit(format!(
            "'{}' is out of range",
            input
        )));
    }

    Ok(bytes as u64)
}
