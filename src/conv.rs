use std::num::ParseFloatError;

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConvError {
    #[error("invalid boolean value: {0}")]
    InvalidBoolean(String),

    #[error("invalid number: {token}")]
    InvalidNumber {
        token: String,
        #[source]
        source: ParseFloatError,
    },

    #[error("not a finite number: {0}")]
    NonFinite(String),
}

pub fn parse_bool(token: &str) -> Result<bool, ConvError> {
    if token.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if token.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(ConvError::InvalidBoolean(token.to_string()))
    }
}

pub fn parse_float(token: &str) -> Result<f64, ConvError> {
    token.parse().map_err(|source| ConvError::InvalidNumber {
        token: token.to_string(),
        source,
    })
}

/// Like [`parse_float`], but rejects `nan` and infinities, which no sink can
/// store as a reading.
pub fn parse_reading(token: &str) -> Result<f64, ConvError> {
    let value = parse_float(token)?;
    if !value.is_finite() {
        return Err(ConvError::NonFinite(token.to_string()));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bool_ignores_case() {
        for token in ["true", "TRUE", "True", "tRuE"] {
            assert_eq!(parse_bool(token), Ok(true), "{token}");
        }
        for token in ["false", "FALSE", "False", "fAlSe"] {
            assert_eq!(parse_bool(token), Ok(false), "{token}");
        }
    }

    #[test]
    fn parse_bool_rejects_other_tokens() {
        for token in ["", "1", "0", "yes", "no", "truee", " true", "t"] {
            assert_eq!(
                parse_bool(token),
                Err(ConvError::InvalidBoolean(token.to_string())),
                "{token}"
            );
        }
    }

    #[test]
    fn parse_float_accepts_decimal_and_scientific() {
        assert_eq!(parse_float("23.5"), Ok(23.5));
        assert_eq!(parse_float("-4"), Ok(-4.0));
        assert_eq!(parse_float("1e3"), Ok(1000.0));
        assert_eq!(parse_float("2.5E-1"), Ok(0.25));
    }

    #[test]
    fn parse_float_rejects_malformed_tokens() {
        for token in ["", "abc", "12abc", "1,5", "1.2.3", "--1"] {
            let err = parse_float(token).unwrap_err();
            assert!(
                matches!(&err, ConvError::InvalidNumber { token: t, .. } if t == token),
                "{token}: {err:?}"
            );
        }
    }

    #[test]
    fn parse_reading_rejects_non_finite_values() {
        for token in ["nan", "NaN", "inf", "-inf", "infinity", "1e400"] {
            assert_eq!(
                parse_reading(token),
                Err(ConvError::NonFinite(token.to_string())),
                "{token}"
            );
        }
        assert_eq!(parse_reading("55.2"), Ok(55.2));
        assert!(matches!(parse_reading("x"), Err(ConvError::InvalidNumber { .. })));
    }

    #[test]
    fn parse_float_round_trips_through_display() {
        for token in ["55.2", "20", "0.1", "74.3", "-12.75", "1e-7", "123456789.125"] {
            let value = parse_float(token).unwrap();
            assert_eq!(parse_float(&value.to_string()), Ok(value), "{token}");
        }
    }
}
