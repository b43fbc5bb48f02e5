//! Naming and timing templates.
//!
//! Templates are configuration owned by the agent; the core only reads them
//! when deciding due-ness and naming new snapshots.

use std::fmt::Write;

use chrono::format::{Item, StrftimeItems};
use chrono::Weekday;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::names;
use crate::property::{epoch, Timestamp};
use crate::types::{ObjectKind, PeriodKind};

/// Name of the template every configuration provides.
pub const DEFAULT_TEMPLATE: &str = "default";

/// Timing knobs for the decision engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Minutes between frequent snapshots; also the width of the
    /// period-of-hour bucket.
    pub frequent_period: u32,
    /// First day of the week for weekly boundaries.
    pub week_starts_on: Weekday,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            frequent_period: 15,
            week_starts_on: Weekday::Mon,
        }
    }
}

impl TimingConfig {
    /// Index of the frequent-period bucket within the hour.
    pub fn period_of_hour(&self, minute: u32) -> u32 {
        minute / self.frequent_period.max(1)
    }
}

/// Snapshot naming knobs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormattingConfig {
    /// Leading component of generated names.
    pub prefix: String,
    /// strftime pattern for the timestamp component.
    pub timestamp_format: String,
    /// Joins prefix, timestamp and suffix.
    pub component_separator: String,
    /// Suffix for frequent snapshots.
    pub frequent_suffix: String,
    /// Suffix for hourly snapshots.
    pub hourly_suffix: String,
    /// Suffix for daily snapshots.
    pub daily_suffix: String,
    /// Suffix for weekly snapshots.
    pub weekly_suffix: String,
    /// Suffix for monthly snapshots.
    pub monthly_suffix: String,
    /// Suffix for yearly snapshots.
    pub yearly_suffix: String,
    /// Suffix for manual snapshots.
    pub manual_suffix: String,
    /// Suffix for temporary snapshots.
    pub temporary_suffix: String,
}

impl Default for FormattingConfig {
    fn default() -> Self {
        Self {
            prefix: "autosnap".into(),
            timestamp_format: "%Y-%m-%d_%H:%M:%S".into(),
            component_separator: "_".into(),
            frequent_suffix: "frequently".into(),
            hourly_suffix: "hourly".into(),
            daily_suffix: "daily".into(),
            weekly_suffix: "weekly".into(),
            monthly_suffix: "monthly".into(),
            yearly_suffix: "yearly".into(),
            manual_suffix: "manual".into(),
            temporary_suffix: "temporary".into(),
        }
    }
}

impl FormattingConfig {
    /// Suffix configured for `period`.
    pub fn suffix(&self, period: PeriodKind) -> &str {
        match period {
            PeriodKind::Frequent => &self.frequent_suffix,
            PeriodKind::Hourly => &self.hourly_suffix,
            PeriodKind::Daily => &self.daily_suffix,
            PeriodKind::Weekly => &self.weekly_suffix,
            PeriodKind::Monthly => &self.monthly_suffix,
            PeriodKind::Yearly => &self.yearly_suffix,
            PeriodKind::Manual => &self.manual_suffix,
            PeriodKind::Temporary => &self.temporary_suffix,
        }
    }
}

/// A named bundle of timing and formatting settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Template {
    /// Decision-engine timing.
    pub timing: TimingConfig,
    /// Snapshot naming.
    pub formatting: FormattingConfig,
}

impl Template {
    /// Checks the template can drive scheduling and produces valid names.
    pub fn validate(&self, name: &str) -> CoreResult<()> {
        let invalid = |reason: String| CoreError::InvalidTemplate {
            template: name.to_string(),
            reason,
        };

        if !(1..=60).contains(&self.timing.frequent_period) {
            return Err(invalid(format!(
                "frequent_period must be between 1 and 60 minutes, got {}",
                self.timing.frequent_period
            )));
        }
        if StrftimeItems::new(&self.formatting.timestamp_format).any(|i| matches!(i, Item::Error)) {
            return Err(invalid(format!(
                "unparseable timestamp_format '{}'",
                self.formatting.timestamp_format
            )));
        }
        for period in PeriodKind::ALL {
            let sample = self.snapshot_name(period, epoch())?;
            names::validate_name(&format!("pool@{}", sample), ObjectKind::Snapshot)
                .map_err(|e| invalid(e.to_string()))?;
        }
        Ok(())
    }

    /// `prefix SEP timestamp SEP suffix`
    pub fn snapshot_name(&self, period: PeriodKind, timestamp: Timestamp) -> CoreResult<String> {
        let fmt = &self.formatting;
        let mut name = String::new();
        write!(
            name,
            "{}{}{}{}{}",
            fmt.prefix,
            fmt.component_separator,
            timestamp.format(&fmt.timestamp_format),
            fmt.component_separator,
            fmt.suffix(period)
        )
        .map_err(|_| CoreError::InvalidTemplate {
            template: fmt.prefix.clone(),
            reason: format!("cannot format timestamp with '{}'", fmt.timestamp_format),
        })?;
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};

    #[test]
    fn test_default_template_is_valid() {
        assert!(Template::default().validate(DEFAULT_TEMPLATE).is_ok());
    }

    #[test]
    fn test_snapshot_name() {
        let ts = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 2, 3, 4, 5, 6)
            .unwrap();
        let name = Template::default().snapshot_name(PeriodKind::Daily, ts).unwrap();
        assert_eq!(name, "autosnap_2024-02-03_04:05:06_daily");
        let name = Template::default().snapshot_name(PeriodKind::Frequent, ts).unwrap();
        assert!(name.ends_with("_frequently"));
    }

    #[test]
    fn test_rejects_bad_frequent_period() {
        let mut t = Template::default();
        t.timing.frequent_period = 0;
        assert!(matches!(t.validate("x"), Err(CoreError::InvalidTemplate { .. })));
        t.timing.frequent_period = 61;
        assert!(t.validate("x").is_err());
    }

    #[test]
    fn test_rejects_names_outside_grammar() {
        let mut t = Template::default();
        t.formatting.component_separator = "/".into();
        assert!(t.validate("x").is_err());

        let mut t = Template::default();
        t.formatting.timestamp_format = "%Y-%".into();
        assert!(t.validate("x").is_err());
    }

    #[test]
    fn test_period_of_hour() {
        let timing = TimingConfig::default();
        assert_eq!(timing.period_of_hour(0), 0);
        assert_eq!(timing.period_of_hour(14), 0);
        assert_eq!(timing.period_of_hour(15), 1);
        assert_eq!(timing.period_of_hour(59), 3);
    }

    #[test]
    fn test_deserialize_partial_template() {
        let t: Template = serde_json::from_str(r#"{"timing": {"frequent_period": 5}}"#).unwrap();
        assert_eq!(t.timing.frequent_period, 5);
        assert_eq!(t.timing.week_starts_on, Weekday::Mon);
        assert_eq!(t.formatting.prefix, "autosnap");
    }
}
