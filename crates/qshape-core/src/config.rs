//! Compiler configuration that downstream crates can serialize/deserialize.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How materialized entities relate to the owning context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryTrackingBehavior {
    /// Entities are attached to the context's state manager.
    TrackAll,
    /// Every row produces a fresh instance.
    NoTracking,
    /// Untracked, but repeated keys within one result share one instance.
    NoTrackingWithIdentityResolution,
}

impl QueryTrackingBehavior {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "trackall" | "tracking" => Ok(Self::TrackAll),
            "notracking" => Ok(Self::NoTracking),
            "notrackingwithidentityresolution" | "identityresolution" => {
                Ok(Self::NoTrackingWithIdentityResolution)
            }
            other => Err(Error::Config(format!("unknown tracking behavior '{}'", other))),
        }
    }
}

/// Where shapers read values from in a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowLayout {
    /// Rows are JSON documents; values are read by path.
    Document,
    /// Rows are value lists; values are read by column ordinal.
    Ordinal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompilerConfig {
    /// Insert runtime guards against concurrent use of one context.
    pub thread_safety_checks_enabled: bool,

    pub tracking_behavior: QueryTrackingBehavior,

    /// Explicit partition key for document-store queries.
    pub partition_key: Option<String>,

    pub row_layout: RowLayout,

    /// Max compiled plans kept by the plan cache.
    pub plan_cache_capacity: usize,

    /// Allow parameter values to appear in logs.
    pub sensitive_data_logging: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            thread_safety_checks_enabled: true,
            tracking_behavior: QueryTrackingBehavior::TrackAll,
            partition_key: None,
            row_layout: RowLayout::Document,
            plan_cache_capacity: 128,
            sensitive_data_logging: false,
        }
    }
}

impl CompilerConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `QSHAPE_THREAD_SAFETY_CHECKS`: `true`/`false`
    /// - `QSHAPE_TRACKING`: `track_all`, `no_tracking`, `no_tracking_with_identity_resolution`
    /// - `QSHAPE_PARTITION_KEY`: partition key value
    /// - `QSHAPE_ROW_LAYOUT`: `document` or `ordinal`
    /// - `QSHAPE_PLAN_CACHE_CAPACITY`: max cached plans
    /// - `QSHAPE_SENSITIVE_DATA_LOGGING`: `true`/`false`
    ///
    /// Unparseable values are ignored, as with the other settings.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("QSHAPE_THREAD_SAFETY_CHECKS") {
            if let Ok(v) = s.parse::<bool>() {
                cfg.thread_safety_checks_enabled = v;
            }
        }

        if let Ok(s) = std::env::var("QSHAPE_TRACKING") {
            if let Ok(v) = QueryTrackingBehavior::parse(&s) {
                cfg.tracking_behavior = v;
            }
        }

        if let Ok(s) = std::env::var("QSHAPE_PARTITION_KEY") {
            if !s.is_empty() {
                cfg.partition_key = Some(s);
            }
        }

        if let Ok(s) = std::env::var("QSHAPE_ROW_LAYOUT") {
            match s.as_str() {
                "document" => cfg.row_layout = RowLayout::Document,
                "ordinal" => cfg.row_layout = RowLayout::Ordinal,
                _ => {}
            }
        }

        if let Ok(s) = std::env::var("QSHAPE_PLAN_CACHE_CAPACITY") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.plan_cache_capacity = v;
            }
        }

        if let Ok(s) = std::env::var("QSHAPE_SENSITIVE_DATA_LOGGING") {
            if let Ok(v) = s.parse::<bool>() {
                cfg.sensitive_data_logging = v;
            }
        }

        cfg
    }

    /// Whether shapers should dedupe repeated keys inside one result set only.
    pub fn standalone_identity_resolution(&self) -> bool {
        self.tracking_behavior == QueryTrackingBehavior::NoTrackingWithIdentityResolution
    }

    pub fn validate(&self) -> Result<()> {
        if self.plan_cache_capacity == 0 {
            return Err(Error::Config("plan_cache_capacity must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracking_parses_loose_spellings() {
        assert_eq!(
            QueryTrackingBehavior::parse("no-tracking").unwrap(),
            QueryTrackingBehavior::NoTracking
        );
        assert_eq!(
            QueryTrackingBehavior::parse("NoTrackingWithIdentityResolution").unwrap(),
            QueryTrackingBehavior::NoTrackingWithIdentityResolution
        );
        assert!(QueryTrackingBehavior::parse("sometimes").is_err());
    }

    #[test]
    fn defaults_are_safe() {
        let cfg = CompilerConfig::default();
        assert!(cfg.thread_safety_checks_enabled);
        assert!(!cfg.standalone_identity_resolution());
        assert!(cfg.validate().is_ok());
    }
}
