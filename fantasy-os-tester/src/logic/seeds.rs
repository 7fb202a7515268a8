use thiserror::Error;

/// Seed used when none are given.
pub const DEFAULT_SEED: u64 = 1337;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SeedError {
    #[error("unrecognized seed token: {0}")]
    Unrecognized(String),
}

/// Parse CLI seed tokens, accepting decimal, negative (by magnitude) and
/// `0x`-prefixed hex values. Duplicates collapse in first-seen order.
///
/// # Errors
///
/// Returns [`SeedError::Unrecognized`] for a token that is not a number.
pub fn resolve_seeds(tokens: &[String]) -> Result<Vec<u64>, SeedError> {
    let mut seeds: Vec<u64> = Vec::new();
    for token in tokens {
        if token.is_empty() {
            continue;
        }
        let seed = parse_seed(token).ok_or_else(|| SeedError::Unrecognized(token.clone()))?;
        if !seeds.contains(&seed) {
            seeds.push(seed);
        }
    }
    if seeds.is_empty() {
        seeds.push(DEFAULT_SEED);
    }
    Ok(seeds)
}

fn parse_seed(token: &str) -> Option<u64> {
    if let Some(hex) = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
    {
        return u64::from_str_radix(hex, 16).ok();
    }
    if let Ok(value) = token.parse::<u64>() {
        return Some(value);
    }
    token.parse::<i64>().ok().map(i64::unsigned_abs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(raw: &[&str]) -> Vec<String> {
        raw.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn parses_mixed_numeric_forms() {
        let seeds = resolve_seeds(&tokens(&["42", "-7", "0xff", "42"])).unwrap();
        assert_eq!(seeds, vec![42, 7, 255]);
    }

    #[test]
    fn empty_input_falls_back_to_default() {
        assert_eq!(resolve_seeds(&[]).unwrap(), vec![DEFAULT_SEED]);
    }

    #[test]
    fn rejects_words() {
        assert_eq!(
            resolve_seeds(&tokens(&["1", "orange"])),
            Err(SeedError::Unrecognized("orange".to_string()))
        );
    }
}
