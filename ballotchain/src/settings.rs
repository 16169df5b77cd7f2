use crate::*;
use std::env::var;
use std::str::FromStr;
use std::time::Duration;

/// Engine-wide defaults and tunables.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub setup_minimum_hours_before_start: u32,
    pub start_vote_maximum_hours_before_start: u32,
    pub voter_token_expiration_minutes: u32,
    pub document_types: Vec<String>,

    /// Keys voter identity commitments. Tokens cannot be issued without it.
    pub identity_key: Option<IdentityKey>,

    pub retry: RetryPolicy,

    /// Entries fetched per bulletin board read
    pub page_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            setup_minimum_hours_before_start: 3,
            start_vote_maximum_hours_before_start: 6,
            voter_token_expiration_minutes: 120,
            document_types: vec!["identification_number".into(), "passport".into()],
            identity_key: None,
            retry: RetryPolicy::default(),
            page_size: 256,
        }
    }
}

impl Settings {
    /// Defaults overridden by any `BALLOTCHAIN_*` environment variables that are set.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|name| var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Settings::default();

        if let Some(v) = parse(&lookup, "BALLOTCHAIN_SETUP_MINIMUM_HOURS_BEFORE_START")? {
            settings.setup_minimum_hours_before_start = v;
        }
        if let Some(v) = parse(&lookup, "BALLOTCHAIN_START_VOTE_MAXIMUM_HOURS_BEFORE_START")? {
            settings.start_vote_maximum_hours_before_start = v;
        }
        if let Some(v) = parse(&lookup, "BALLOTCHAIN_VOTER_TOKEN_EXPIRATION_MINUTES")? {
            settings.voter_token_expiration_minutes = v;
        }
        if let Some(types) = lookup("BALLOTCHAIN_DOCUMENT_TYPES") {
            settings.document_types = types
                .split(',')
                .map(|t| t.trim().to_owned())
                .filter(|t| !t.is_empty())
                .collect();
            if settings.document_types.is_empty() {
                return Err(Error::InvalidSetting {
                    name: "BALLOTCHAIN_DOCUMENT_TYPES",
                    value: types,
                });
            }
        }
        if let Some(hex) = lookup("BALLOTCHAIN_IDENTITY_KEY") {
            match IdentityKey::from_hex(&hex) {
                Ok(key) => settings.identity_key = Some(key),
                Err(_) => {
                    return Err(Error::InvalidSetting {
                        name: "BALLOTCHAIN_IDENTITY_KEY",
                        value: "<redacted>".into(),
                    })
                }
            }
        }
        if let Some(v) = parse(&lookup, "BALLOTCHAIN_RETRY_MAX_ATTEMPTS")? {
            settings.retry.max_attempts = v;
        }
        if let Some(v) = parse(&lookup, "BALLOTCHAIN_RETRY_INITIAL_BACKOFF_MS")? {
            settings.retry.initial_backoff = Duration::from_millis(v);
        }
        if let Some(v) = parse(&lookup, "BALLOTCHAIN_RETRY_MAX_BACKOFF_MS")? {
            settings.retry.max_backoff = Duration::from_millis(v);
        }
        if let Some(v) = parse(&lookup, "BALLOTCHAIN_PAGE_SIZE")? {
            settings.page_size = v;
        }

        let hours = [
            (
                "BALLOTCHAIN_SETUP_MINIMUM_HOURS_BEFORE_START",
                settings.setup_minimum_hours_before_start,
                ElectionConfig::MAX_SCHEDULE_HOURS,
            ),
            (
                "BALLOTCHAIN_START_VOTE_MAXIMUM_HOURS_BEFORE_START",
                settings.start_vote_maximum_hours_before_start,
                ElectionConfig::MAX_SCHEDULE_HOURS,
            ),
            (
                "BALLOTCHAIN_VOTER_TOKEN_EXPIRATION_MINUTES",
                settings.voter_token_expiration_minutes,
                ElectionConfig::MAX_TOKEN_MINUTES,
            ),
        ];
        for &(name, value, max) in hours.iter() {
            if value > max {
                return Err(Error::InvalidSetting {
                    name,
                    value: value.to_string(),
                });
            }
        }

        if settings.retry.max_attempts == 0 {
            return Err(Error::InvalidSetting {
                name: "BALLOTCHAIN_RETRY_MAX_ATTEMPTS",
                value: "0".into(),
            });
        }
        if settings.page_size == 0 {
            return Err(Error::InvalidSetting {
                name: "BALLOTCHAIN_PAGE_SIZE",
                value: "0".into(),
            });
        }

        Ok(settings)
    }
}

fn parse<F, T>(lookup: &F, name: &'static str) -> Result<Option<T>, Error>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::InvalidSetting { name, value }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_in(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults() {
        let settings = Settings::from_lookup(lookup_in(&[])).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.setup_minimum_hours_before_start, 3);
        assert_eq!(settings.start_vote_maximum_hours_before_start, 6);
        assert_eq!(settings.voter_token_expiration_minutes, 120);
        assert_eq!(settings.document_types, vec!["identification_number", "passport"]);
        assert_eq!(settings.identity_key, None);
    }

    #[test]
    fn overrides() {
        let settings = Settings::from_lookup(lookup_in(&[
            ("BALLOTCHAIN_SETUP_MINIMUM_HOURS_BEFORE_START", "5"),
            ("BALLOTCHAIN_DOCUMENT_TYPES", "passport, dni"),
            ("BALLOTCHAIN_RETRY_INITIAL_BACKOFF_MS", "1"),
        ]))
        .unwrap();
        assert_eq!(settings.setup_minimum_hours_before_start, 5);
        assert_eq!(settings.document_types, vec!["passport", "dni"]);
        assert_eq!(settings.retry.initial_backoff, Duration::from_millis(1));

        let err = Settings::from_lookup(lookup_in(&[("BALLOTCHAIN_PAGE_SIZE", "lots")]))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidSetting {
                name: "BALLOTCHAIN_PAGE_SIZE",
                ..
            }
        ));
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn scheduling_bounds() {
        let err = Settings::from_lookup(lookup_in(&[(
            "BALLOTCHAIN_SETUP_MINIMUM_HOURS_BEFORE_START",
            "4294967295",
        )]))
        .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidSetting {
                name: "BALLOTCHAIN_SETUP_MINIMUM_HOURS_BEFORE_START",
                ..
            }
        ));
        assert!(Settings::from_lookup(lookup_in(&[(
            "BALLOTCHAIN_VOTER_TOKEN_EXPIRATION_MINUTES",
            "99999999"
        )]))
        .is_err());
    }

    #[test]
    fn identity_key() {
        let key = "11".repeat(32);
        let settings =
            Settings::from_lookup(lookup_in(&[("BALLOTCHAIN_IDENTITY_KEY", key.as_str())])).unwrap();
        assert_eq!(settings.identity_key, Some(IdentityKey::from_hex(&key).unwrap()));

        let err = Settings::from_lookup(lookup_in(&[("BALLOTCHAIN_IDENTITY_KEY", "1111")]))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidSetting {
                name: "BALLOTCHAIN_IDENTITY_KEY",
                ..
            }
        ));
        assert!(!err.to_string().contains("1111"));
    }
}
