//! Listener runtime configuration

use solana_sdk::pubkey::Pubkey;
use std::time::Duration;

use super::errors::ListenerError;
use crate::config::{ListenerSection, DEFAULT_MIGRATION_PROGRAM};

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Program whose logs are subscribed to
    pub migration_program: Pubkey,

    /// At least one must appear in the joined logs
    pub keyword_hints: Vec<String>,

    /// Exact log line that identifies a migration
    pub instruction_marker: String,

    /// Lifetime of signature and mint dedup entries
    pub dedup_ttl: Duration,

    /// Bounded channel between transport and listener
    pub channel_capacity: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        let section = ListenerSection::default();
        Self {
            migration_program: DEFAULT_MIGRATION_PROGRAM.parse().unwrap_or_default(),
            keyword_hints: section.keyword_hints,
            instruction_marker: section.instruction_marker,
            dedup_ttl: Duration::from_secs(section.dedup_ttl_secs),
            channel_capacity: section.channel_capacity,
        }
    }
}

impl ListenerConfig {
    pub fn validate(&self) -> Result<(), ListenerError> {
        if self.keyword_hints.iter().all(|h| h.is_empty()) {
            return Err(ListenerError::ConfigValidation(
                "keyword_hints must contain a non-empty hint".to_string(),
            ));
        }
        if self.instruction_marker.is_empty() {
            return Err(ListenerError::ConfigValidation(
                "instruction_marker cannot be empty".to_string(),
            ));
        }
        if self.dedup_ttl.is_zero() {
            return Err(ListenerError::ConfigValidation(
                "dedup_ttl must be greater than 0".to_string(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(ListenerError::ConfigValidation(
                "channel_capacity must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl TryFrom<&ListenerSection> for ListenerConfig {
    type Error = ListenerError;

    fn try_from(section: &ListenerSection) -> Result<Self, Self::Error> {
        let migration_program = section
            .migration_program
            .parse()
            .map_err(|_| ListenerError::ConfigValidation(format!(
                "invalid migration program {}",
                section.migration_program
            )))?;

        let config = Self {
            migration_program,
            keyword_hints: section.keyword_hints.clone(),
            instruction_marker: section.instruction_marker.clone(),
            dedup_ttl: Duration::from_secs(section.dedup_ttl_secs),
            channel_capacity: section.channel_capacity,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = ListenerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.migration_program.to_string(), DEFAULT_MIGRATION_PROGRAM);
        assert_eq!(config.dedup_ttl, Duration::from_secs(180));
    }

    #[test]
    fn test_from_section_rejects_bad_program() {
        let section = ListenerSection {
            migration_program: "nope".to_string(),
            ..ListenerSection::default()
        };
        assert!(ListenerConfig::try_from(&section).is_err());
    }

    #[test]
    fn test_validate_rejects_empty_hints() {
        let config = ListenerConfig {
            keyword_hints: vec![String::new()],
            ..ListenerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
