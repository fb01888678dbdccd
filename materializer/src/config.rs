use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::retry::RetryPolicy;
use crate::DigestFunction;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("failed to parse parameters: {0}")]
    InvalidParameters(String),

    #[error("{0} must be at least 1")]
    Zero(&'static str),
}

/// Configuration for a [crate::Materializer].
///
/// Can be deserialized with serde, or constructed from the query string of
/// an URL, like `materializer://?concurrency_limit=8&digest_function=blake3`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct MaterializerConfig {
    /// Maximum number of blob fetches in flight at the same time.
    pub concurrency_limit: usize,

    /// Number of attempts per fetch, including the first one.
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,

    /// The hash function digests in action results were computed with.
    pub digest_function: DigestFunction,
}

impl Default for MaterializerConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 100,
            retry_max_attempts: 5,
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 5000,
            digest_function: DigestFunction::default(),
        }
    }
}

impl MaterializerConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.concurrency_limit == 0 {
            return Err(Error::Zero("concurrency_limit"));
        }
        if self.retry_max_attempts == 0 {
            return Err(Error::Zero("retry_max_attempts"));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_max_attempts,
            Duration::from_millis(self.retry_base_delay_ms),
            Duration::from_millis(self.retry_max_delay_ms),
        )
    }
}

impl TryFrom<Url> for MaterializerConfig {
    type Error = Error;

    fn try_from(url: Url) -> Result<Self, Self::Error> {
        let config: MaterializerConfig = serde_qs::from_str(url.query().unwrap_or_default())
            .map_err(|e| Error::InvalidParameters(e.to_string()))?;
        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use url::Url;

    use super::{Error, MaterializerConfig};
    use crate::DigestFunction;

    #[test]
    fn defaults() {
        let config = MaterializerConfig::try_from(Url::parse("materializer://").unwrap())
            .expect("must parse");

        assert_eq!(MaterializerConfig::default(), config);
        assert_eq!(DigestFunction::Sha256, config.digest_function);
    }

    #[test]
    fn from_query() {
        let config = MaterializerConfig::try_from(
            Url::parse("materializer://?concurrency_limit=8&digest_function=blake3&retry_max_attempts=1")
                .unwrap(),
        )
        .expect("must parse");

        assert_eq!(8, config.concurrency_limit);
        assert_eq!(1, config.retry_max_attempts);
        assert_eq!(DigestFunction::Blake3, config.digest_function);
        assert_eq!(100, config.retry_base_delay_ms);
    }

    #[rstest]
    #[case::zero_concurrency("materializer://?concurrency_limit=0", Some(Error::Zero("concurrency_limit")))]
    #[case::zero_attempts("materializer://?retry_max_attempts=0", Some(Error::Zero("retry_max_attempts")))]
    #[case::unknown_field("materializer://?foo=bar", None)]
    #[case::unknown_digest_function("materializer://?digest_function=md5", None)]
    fn invalid(#[case] url: &str, #[case] expected: Option<Error>) {
        let e = MaterializerConfig::try_from(Url::parse(url).unwrap()).expect_err("must fail");

        match expected {
            Some(expected) => assert_eq!(expected, e),
            None => assert!(matches!(e, Error::InvalidParameters(_))),
        }
    }
}
