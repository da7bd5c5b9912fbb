use humantime::parse_duration;
use serde::Deserialize;
use std::time::Duration;

pub fn default_app_retry_budget() -> RetryBudget {
    RetryBudget {
        max_attempts: Some(5),
        max_elapsed: None,
        base_backoff: Some(Duration::from_millis(250)),
        max_backoff: Some(Duration::from_secs(5)),
        jitter: Some(JitterMode::None),
    }
}

fn merge_retry_budget_with_defaults(
    defaults: &RetryBudget,
    overrides: Option<RetryBudget>,
) -> RetryBudget {
    let mut merged = defaults.clone();
    if let Some(override_budget) = overrides {
        if override_budget.max_attempts.is_some() {
            merged.max_attempts = override_budget.max_attempts;
        }
        if override_budget.max_elapsed.is_some() {
            merged.max_elapsed = override_budget.max_elapsed;
        }
        if override_budget.base_backoff.is_some() {
            merged.base_backoff = override_budget.base_backoff;
        }
        if override_budget.max_backoff.is_some() {
            merged.max_backoff = override_budget.max_backoff;
        }
        if override_budget.jitter.is_some() {
            merged.jitter = override_budget.jitter;
        }
    }
    merged
}

/// Stack-wide settings from the manifest's `app` section.
#[derive(Debug, Clone)]
pub struct AppSettings {
    pub stack_name: String,
    pub probe_timeout: Duration,
    pub drain_timeout: Duration,
    pub max_concurrent_starts: Option<u32>,
    pub retry_budget: Option<RetryBudget>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            stack_name: "stack".to_string(),
            probe_timeout: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(30),
            max_concurrent_starts: None,
            retry_budget: Some(default_app_retry_budget()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetryBudget {
    pub max_attempts: Option<u32>,
    pub max_elapsed: Option<Duration>,
    pub base_backoff: Option<Duration>,
    pub max_backoff: Option<Duration>,
    pub jitter: Option<JitterMode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JitterMode {
    None,
    Equal,
    Full,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawAppSection {
    #[serde(default)]
    pub(crate) stack_name: Option<String>,
    #[serde(default)]
    pub(crate) probe_timeout: Option<String>,
    #[serde(default)]
    pub(crate) drain_timeout: Option<String>,
    #[serde(default)]
    pub(crate) max_concurrent_starts: Option<u32>,
    #[serde(default)]
    pub(crate) retry_budget: Option<RawRetryBudget>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawRetryBudget {
    #[serde(default)]
    pub(crate) max_attempts: Option<u32>,
    #[serde(default)]
    pub(crate) max_elapsed: Option<String>,
    #[serde(default)]
    pub(crate) base_backoff: Option<String>,
    #[serde(default)]
    pub(crate) max_backoff: Option<String>,
    #[serde(default)]
    pub(crate) jitter: Option<String>,
}

pub(crate) fn parse_app_settings(
    raw: Option<RawAppSection>,
    errors: &mut Vec<String>,
) -> AppSettings {
    let raw = raw.unwrap_or_default();
    let mut settings = AppSettings::default();

    if let Some(value) = raw.stack_name {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            errors.push("app.stack_name must be a non-empty string".to_string());
        } else {
            settings.stack_name = trimmed.to_string();
        }
    }

    let probe_timeout = parse_duration_value("app.probe_timeout", raw.probe_timeout, errors)
        .and_then(|duration| ensure_positive_duration(duration, "app.probe_timeout", errors));
    if let Some(duration) = probe_timeout {
        settings.probe_timeout = duration;
    }

    let drain_timeout = parse_duration_value("app.drain_timeout", raw.drain_timeout, errors)
        .and_then(|duration| ensure_positive_duration(duration, "app.drain_timeout", errors));
    if let Some(duration) = drain_timeout {
        settings.drain_timeout = duration;
    }

    if let Some(limit) = raw.max_concurrent_starts {
        if limit == 0 {
            errors.push("app.max_concurrent_starts must be greater than zero when provided".to_string());
        } else {
            settings.max_concurrent_starts = Some(limit);
        }
    }

    let parsed_budget = parse_retry_budget(raw.retry_budget, errors, "app.retry_budget");
    settings.retry_budget = Some(merge_retry_budget_with_defaults(
        &default_app_retry_budget(),
        parsed_budget,
    ));

    settings
}

pub(crate) fn parse_retry_budget(
    raw: Option<RawRetryBudget>,
    errors: &mut Vec<String>,
    context_label: &str,
) -> Option<RetryBudget> {
    let raw_budget = raw?;

    let mut budget = RetryBudget {
        max_attempts: raw_budget.max_attempts,
        ..RetryBudget::default()
    };
    let max_elapsed_label = format!("{context_label}.max_elapsed");
    budget.max_elapsed = parse_duration_value(&max_elapsed_label, raw_budget.max_elapsed, errors)
        .and_then(|duration| ensure_positive_duration(duration, &max_elapsed_label, errors));

    let base_backoff_label = format!("{context_label}.base_backoff");
    budget.base_backoff =
        parse_duration_value(&base_backoff_label, raw_budget.base_backoff, errors)
            .and_then(|duration| ensure_positive_duration(duration, &base_backoff_label, errors));

    let max_backoff_label = format!("{context_label}.max_backoff");
    budget.max_backoff = parse_duration_value(&max_backoff_label, raw_budget.max_backoff, errors)
        .and_then(|duration| ensure_positive_duration(duration, &max_backoff_label, errors));

    if let Some(jitter_raw) = raw_budget.jitter {
        let trimmed = jitter_raw.trim();
        let jitter_label = format!("{context_label}.jitter");
        if trimmed.is_empty() {
            errors.push(format!(
                "{jitter_label} must be one of `none`, `equal`, or `full` (got ``)"
            ));
        } else if let Some(mode) = parse_jitter_mode(trimmed) {
            budget.jitter = Some(mode);
        } else {
            errors.push(format!(
                "{jitter_label} must be one of `none`, `equal`, or `full` (got `{trimmed}`)"
            ));
        }
    }

    if let Some(attempts) = budget.max_attempts {
        if attempts == 0 {
            errors.push(format!(
                "{context_label}.max_attempts must be greater than zero"
            ));
        }
    }

    if let (Some(base), Some(maximum)) = (budget.base_backoff, budget.max_backoff) {
        if maximum < base {
            errors.push(format!(
                "{context_label}.max_backoff must be greater than or equal to {context_label}.base_backoff"
            ));
        }
    }

    if let (Some(max_backoff), Some(max_elapsed)) = (budget.max_backoff, budget.max_elapsed) {
        if max_backoff > max_elapsed {
            errors.push(format!(
                "{context_label}.max_backoff must be less than or equal to {context_label}.max_elapsed"
            ));
        }
    }

    if budget.max_attempts.is_none()
        && budget.max_elapsed.is_none()
        && budget.base_backoff.is_none()
        && budget.max_backoff.is_none()
        && budget.jitter.is_none()
    {
        None
    } else {
        Some(budget)
    }
}

pub(crate) fn parse_jitter_mode(value: &str) -> Option<JitterMode> {
    match value.to_ascii_lowercase().as_str() {
        "none" => Some(JitterMode::None),
        "equal" => Some(JitterMode::Equal),
        "full" => Some(JitterMode::Full),
        _ => None,
    }
}

pub(crate) fn parse_duration_value(
    field_label: &str,
    raw: Option<String>,
    errors: &mut Vec<String>,
) -> Option<Duration> {
    let raw_value = raw?;

    let trimmed = raw_value.trim();
    if trimmed.is_empty() {
        errors.push(format!("{field_label} must be a non-empty duration string"));
        return None;
    }

    match parse_duration(trimmed) {
        Ok(duration) => Some(duration),
        Err(_) => {
            errors.push(format!(
                "{field_label} must be a valid duration (got `{trimmed}`)"
            ));
            None
        }
    }
}

pub(crate) fn ensure_positive_duration(
    duration: Duration,
    label: &str,
    errors: &mut Vec<String>,
) -> Option<Duration> {
    if duration.is_zero() {
        errors.push(format!("{label} must be greater than zero"));
        None
    } else {
        Some(duration)
    }
}
