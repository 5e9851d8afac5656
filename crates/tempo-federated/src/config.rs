//! Federate configuration

use tempo_core::{FederateId, Interval, TempoError, TempoResult, MSEC};
use tempo_runtime::{CoordinationMode, RuntimeConfig};

/// Default period for re-sending a bounded NET
pub const DEFAULT_ADVANCE_MESSAGE_INTERVAL: Interval = 10 * MSEC;

/// Position and behavior of one federate in the federation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FederateConfig {
    pub federate: FederateId,
    /// Shared by every federate of one execution
    pub federation_id: String,
    pub mode: CoordinationMode,
    /// Some federate sends to this one
    pub has_upstream: bool,
    /// This federate sends to some other federate
    pub has_downstream: bool,
    /// Smallest logical delay from a physical action to a network output,
    /// `None` if no physical action reaches an output
    pub min_delay_from_physical_action_to_output: Option<Interval>,
    /// Re-send period of a bounded NET
    pub advance_message_interval: Interval,
    /// Physical-time lag added before processing a tag (decentralized)
    pub sta_offset: Interval,
}

impl FederateConfig {
    pub fn centralized(federate: FederateId, federation_id: impl Into<String>) -> Self {
        FederateConfig {
            federate,
            federation_id: federation_id.into(),
            mode: CoordinationMode::Centralized,
            has_upstream: false,
            has_downstream: false,
            min_delay_from_physical_action_to_output: None,
            advance_message_interval: DEFAULT_ADVANCE_MESSAGE_INTERVAL,
            sta_offset: 0,
        }
    }

    pub fn decentralized(federate: FederateId, federation_id: impl Into<String>, sta_offset: Interval) -> Self {
        FederateConfig {
            mode: CoordinationMode::Decentralized,
            sta_offset,
            ..FederateConfig::centralized(federate, federation_id)
        }
    }

    /// Derive from runtime settings; the topology flags start out cleared
    pub fn from_runtime(config: &RuntimeConfig, federation_id: impl Into<String>) -> TempoResult<Self> {
        let federate = config
            .federate
            .ok_or_else(|| TempoError::InvalidConfig("no federate id configured".into()))?;
        let fed = match config.coordination {
            CoordinationMode::Decentralized => FederateConfig::decentralized(federate, federation_id, config.sta_offset),
            _ => FederateConfig::centralized(federate, federation_id),
        };
        fed.validate()?;
        Ok(fed)
    }

    pub fn with_neighbors(mut self, has_upstream: bool, has_downstream: bool) -> Self {
        self.has_upstream = has_upstream;
        self.has_downstream = has_downstream;
        self
    }

    pub fn with_physical_output_delay(mut self, delay: Interval) -> Self {
        self.min_delay_from_physical_action_to_output = Some(delay);
        self
    }

    pub fn is_isolated(&self) -> bool {
        !self.has_upstream && !self.has_downstream
    }

    pub fn validate(&self) -> TempoResult<()> {
        if self.mode == CoordinationMode::None {
            return Err(TempoError::InvalidConfig("a federate needs a coordination mode".into()));
        }
        if self.federation_id.len() > u8::MAX as usize {
            return Err(TempoError::InvalidConfig(format!(
                "federation id is {} bytes, at most 255 allowed",
                self.federation_id.len()
            )));
        }
        if self.advance_message_interval <= 0 {
            return Err(TempoError::InvalidConfig("advance message interval must be positive".into()));
        }
        if self.sta_offset < 0 {
            return Err(TempoError::InvalidConfig(format!("negative STA offset {}", self.sta_offset)));
        }
        if let Some(delay) = self.min_delay_from_physical_action_to_output {
            if delay < 0 {
                return Err(TempoError::InvalidConfig(format!("negative physical output delay {}", delay)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let c = FederateConfig::centralized(FederateId::new(1), "fed");
        assert_eq!(c.mode, CoordinationMode::Centralized);
        assert_eq!(c.advance_message_interval, 10 * MSEC);
        assert!(c.is_isolated());
        assert!(c.validate().is_ok());

        let d = FederateConfig::decentralized(FederateId::new(2), "fed", 5 * MSEC).with_neighbors(true, false);
        assert_eq!(d.mode, CoordinationMode::Decentralized);
        assert_eq!(d.sta_offset, 5 * MSEC);
        assert!(!d.is_isolated());
    }

    #[test]
    fn test_from_runtime() {
        let mut runtime = RuntimeConfig::default();
        assert!(FederateConfig::from_runtime(&runtime, "fed").is_err());
        runtime.federate = Some(FederateId::new(4));
        runtime.coordination = CoordinationMode::Decentralized;
        runtime.sta_offset = MSEC;
        let fed = FederateConfig::from_runtime(&runtime, "fed").unwrap();
        assert_eq!(fed.federate, FederateId::new(4));
        assert_eq!(fed.sta_offset, MSEC);
    }

    #[test]
    fn test_validate_rejects() {
        let mut c = FederateConfig::centralized(FederateId::new(1), "x".repeat(300));
        assert!(c.validate().is_err());
        c.federation_id = "ok".into();
        c.advance_message_interval = 0;
        assert!(c.validate().is_err());
        c.advance_message_interval = MSEC;
        c.min_delay_from_physical_action_to_output = Some(-1);
        assert!(c.validate().is_err());
    }
}
