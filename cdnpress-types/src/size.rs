//! Response size distributions.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Error returned when a response size specification cannot be parsed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SizeSpecError {
    /// The string is neither a number nor a `[min,max]` pair.
    #[error("invalid response size `{0}`: expected a number or `[min,max]`")]
    Malformed(String),
    /// The range bounds are in the wrong order.
    #[error("invalid response size range: min {min} is larger than max {max}")]
    Inverted {
        /// Lower bound as given.
        min: usize,
        /// Upper bound as given.
        max: usize,
    },
}

/// The distribution of response body sizes requested by the client.
///
/// Written either as a single number (`1024`) or as a pair (`[512,65536]`). For a pair, the
/// client picks `min` with the configured split ratio and `max` otherwise.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SizeSpec {
    /// Every response has the same size.
    Fixed(usize),
    /// Responses are either `min` or `max` bytes.
    Split {
        /// The small response size.
        min: usize,
        /// The large response size.
        max: usize,
    },
}

impl SizeSpec {
    /// Picks a response size, choosing `min` of a split with probability `ratio`.
    pub fn sample<R: Rng + ?Sized>(&self, ratio: f64, rng: &mut R) -> usize {
        match *self {
            SizeSpec::Fixed(size) => size,
            SizeSpec::Split { min, max } => {
                if rng.random::<f64>() < ratio {
                    min
                } else {
                    max
                }
            }
        }
    }
}

impl Default for SizeSpec {
    fn default() -> Self {
        SizeSpec::Fixed(crate::DEFAULT_RESPONSE_SIZE)
    }
}

impl FromStr for SizeSpec {
    type Err = SizeSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || SizeSpecError::Malformed(s.to_owned());
        let trimmed = s.trim();

        let Some(inner) = trimmed
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
        else {
            return trimmed
                .parse()
                .map(SizeSpec::Fixed)
                .map_err(|_| malformed());
        };

        let (min, max) = inner.split_once(',').ok_or_else(malformed)?;
        let min: usize = min.trim().parse().map_err(|_| malformed())?;
        let max: usize = max.trim().parse().map_err(|_| malformed())?;
        if min > max {
            return Err(SizeSpecError::Inverted { min, max });
        }

        Ok(SizeSpec::Split { min, max })
    }
}

impl fmt::Display for SizeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeSpec::Fixed(size) => write!(f, "{size}"),
            SizeSpec::Split { min, max } => write!(f, "[{min},{max}]"),
        }
    }
}

impl Serialize for SizeSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SizeSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Plain numbers and `[min, max]` arrive as typed values from YAML and figment's env parser.
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(usize),
            Pair([usize; 2]),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(size) => Ok(SizeSpec::Fixed(size)),
            Raw::Pair([min, max]) if min > max => Err(serde::de::Error::custom(
                SizeSpecError::Inverted { min, max },
            )),
            Raw::Pair([min, max]) => Ok(SizeSpec::Split { min, max }),
            Raw::Text(text) => text.parse().map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    use super::*;

    #[test]
    fn parses_fixed_and_split() {
        assert_eq!("2048".parse(), Ok(SizeSpec::Fixed(2048)));
        assert_eq!(
            "[512, 65536]".parse(),
            Ok(SizeSpec::Split {
                min: 512,
                max: 65536
            })
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            "abc".parse::<SizeSpec>(),
            Err(SizeSpecError::Malformed(_))
        ));
        assert!("[1,2,3]".parse::<SizeSpec>().is_err());
        assert!("[1,".parse::<SizeSpec>().is_err());
        assert!("-5".parse::<SizeSpec>().is_err());
        assert_eq!(
            "[10,1]".parse::<SizeSpec>(),
            Err(SizeSpecError::Inverted { min: 10, max: 1 })
        );
    }

    #[test]
    fn sample_respects_ratio_extremes() {
        let spec = SizeSpec::Split { min: 1, max: 100 };
        let mut rng = SmallRng::seed_from_u64(7);

        assert!((0..100).all(|_| spec.sample(1.0, &mut rng) == 1));
        assert!((0..100).all(|_| spec.sample(0.0, &mut rng) == 100));
        assert_eq!(SizeSpec::Fixed(42).sample(0.5, &mut rng), 42);
    }

    #[test]
    fn deserializes_numbers_and_strings() {
        let fixed: SizeSpec = serde_json::from_str("2048").unwrap();
        assert_eq!(fixed, SizeSpec::Fixed(2048));

        let split: SizeSpec = serde_json::from_str(r#""[1,2]""#).unwrap();
        assert_eq!(split, SizeSpec::Split { min: 1, max: 2 });

        assert!(serde_json::from_str::<SizeSpec>(r#""[2,1]""#).is_err());
        assert_eq!(serde_json::to_string(&split).unwrap(), r#""[1,2]""#);
    }
}
