//! Non-string match types: CIDR, numeric range, fuzzy similarity, length.

use super::types::MatchFn;
use crate::error::SigmaError;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

/// `cidr`: the field value is an IP address inside any of the CIDR blocks.
pub fn create_cidr_match() -> MatchFn {
    Arc::new(|field_value, values, _modifiers| {
        let ip: IpAddr = field_value
            .parse()
            .map_err(|_| SigmaError::InvalidIpAddress(field_value.to_string()))?;
        for &cidr in values {
            if ip_in_cidr(&ip, cidr)? {
                return Ok(true);
            }
        }
        Ok(false)
    })
}

fn ip_in_cidr(ip: &IpAddr, cidr: &str) -> Result<bool, SigmaError> {
    let (network_str, prefix_str) = cidr
        .split_once('/')
        .ok_or_else(|| SigmaError::InvalidCidr(cidr.to_string()))?;
    let network: IpAddr = network_str
        .parse()
        .map_err(|_| SigmaError::InvalidCidr(cidr.to_string()))?;
    let prefix: u8 = prefix_str
        .parse()
        .map_err(|_| SigmaError::InvalidCidr(cidr.to_string()))?;

    match (ip, network) {
        (IpAddr::V4(ip), IpAddr::V4(network)) => {
            if prefix > 32 {
                return Err(SigmaError::InvalidCidr(cidr.to_string()));
            }
            Ok(ipv4_in_network(*ip, network, prefix))
        }
        (IpAddr::V6(ip), IpAddr::V6(network)) => {
            if prefix > 128 {
                return Err(SigmaError::InvalidCidr(cidr.to_string()));
            }
            Ok(ipv6_in_network(*ip, network, prefix))
        }
        // Family mismatch is a non-match, not an error.
        _ => Ok(false),
    }
}

fn ipv4_in_network(ip: Ipv4Addr, network: Ipv4Addr, prefix: u8) -> bool {
    if prefix == 0 {
        return true;
    }
    let mask = u32::MAX << (32 - prefix);
    (u32::from(ip) & mask) == (u32::from(network) & mask)
}

fn ipv6_in_network(ip: Ipv6Addr, network: Ipv6Addr, prefix: u8) -> bool {
    if prefix == 0 {
        return true;
    }
    let mask = u128::MAX << (128 - prefix);
    (u128::from(ip) & mask) == (u128::from(network) & mask)
}

/// `range`: the numeric field value falls inside any of the range
/// expressions: `lo..hi` (inclusive), `>n`, `>=n`, `<n`, `<=n`, or a bare
/// number for equality.
pub fn create_range_match() -> MatchFn {
    Arc::new(|field_value, values, _modifiers| {
        let number = parse_number(field_value)?;
        for &range in values {
            if number_in_range(number, range)? {
                return Ok(true);
            }
        }
        Ok(false)
    })
}

fn parse_number(text: &str) -> Result<f64, SigmaError> {
    text.trim()
        .parse::<f64>()
        .map_err(|_| SigmaError::InvalidNumber(text.to_string()))
}

fn number_in_range(number: f64, range: &str) -> Result<bool, SigmaError> {
    let range = range.trim();
    if let Some((lo, hi)) = range.split_once("..") {
        let lo = parse_number(lo).map_err(|_| SigmaError::InvalidRange(range.to_string()))?;
        let hi = parse_number(hi).map_err(|_| SigmaError::InvalidRange(range.to_string()))?;
        if lo > hi {
            return Err(SigmaError::InvalidRange(range.to_string()));
        }
        return Ok(number >= lo && number <= hi);
    }
    if let Some(bound) = range.strip_prefix(">=") {
        return Ok(number >= parse_number(bound)?);
    }
    if let Some(bound) = range.strip_prefix("<=") {
        return Ok(number <= parse_number(bound)?);
    }
    if let Some(bound) = range.strip_prefix('>') {
        return Ok(number > parse_number(bound)?);
    }
    if let Some(bound) = range.strip_prefix('<') {
        return Ok(number < parse_number(bound)?);
    }
    Ok((number - parse_number(range)?).abs() < f64::EPSILON)
}

const DEFAULT_FUZZY_THRESHOLD: f64 = 0.8;

/// `fuzzy`: normalized Levenshtein similarity against any value reaches the
/// threshold. The threshold defaults to 0.8 and can be overridden with a
/// `threshold:0.x` modifier.
pub fn create_fuzzy_match() -> MatchFn {
    Arc::new(|field_value, values, modifiers| {
        let threshold = fuzzy_threshold(modifiers)?;
        let haystack = field_value.to_ascii_lowercase();
        Ok(values
            .iter()
            .any(|&value| similarity(&haystack, &value.to_ascii_lowercase()) >= threshold))
    })
}

fn fuzzy_threshold(modifiers: &[&str]) -> Result<f64, SigmaError> {
    for modifier in modifiers {
        if let Some(value) = modifier.strip_prefix("threshold:") {
            let threshold: f64 = value
                .parse()
                .map_err(|_| SigmaError::InvalidThreshold(value.to_string()))?;
            if !(0.0..=1.0).contains(&threshold) {
                return Err(SigmaError::InvalidThreshold(value.to_string()));
            }
            return Ok(threshold);
        }
    }
    Ok(DEFAULT_FUZZY_THRESHOLD)
}

fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / longest as f64
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];

    for (i, &ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

/// `length`: the character length of the field value satisfies any of the
/// expressions, with the same syntax as `range`.
pub fn create_length_match() -> MatchFn {
    Arc::new(|field_value, values, _modifiers| {
        let length = field_value.chars().count() as f64;
        for &expr in values {
            if number_in_range(length, expr)? {
                return Ok(true);
            }
        }
        Ok(false)
    })
}
