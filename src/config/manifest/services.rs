use super::app::{ensure_positive_duration, parse_duration_value, parse_retry_budget};
use super::app::RawRetryBudget;
use crate::launch::StartAction;
use crate::probe::ProbeSpec;
use crate::registry::ServiceSpec;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawService {
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) start: Option<RawStartAction>,
    #[serde(default)]
    pub(crate) probe: Option<RawProbe>,
    #[serde(default)]
    pub(crate) depends_on: Vec<String>,
    #[serde(default)]
    pub(crate) retry_budget: Option<RawRetryBudget>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawStartAction {
    pub(crate) command: Vec<String>,
    #[serde(default)]
    pub(crate) env: BTreeMap<String, String>,
    #[serde(default)]
    pub(crate) working_dir: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawProbe {
    #[serde(rename = "type")]
    pub(crate) kind: String,
    #[serde(default)]
    pub(crate) addr: Option<String>,
    #[serde(default)]
    pub(crate) url: Option<String>,
    #[serde(default)]
    pub(crate) expect_status: Option<u16>,
    #[serde(default)]
    pub(crate) command: Vec<String>,
    #[serde(default)]
    pub(crate) timeout: Option<String>,
}

pub(crate) fn parse_services(
    raw_services: Vec<RawService>,
    errors: &mut Vec<String>,
) -> Vec<ServiceSpec> {
    let mut seen_services = HashSet::new();
    let mut services = Vec::with_capacity(raw_services.len());

    for service in raw_services {
        let RawService {
            name,
            start,
            probe,
            depends_on,
            retry_budget,
        } = service;

        let name = name.trim().to_string();
        if name.is_empty() {
            errors.push("service name must be a non-empty string".to_string());
            continue;
        }

        if !seen_services.insert(name.clone()) {
            errors.push(format!("duplicate service definition for `{}`", name));
            continue;
        }

        let start = start.and_then(|raw| parse_start_action(&name, raw, errors));
        let (probe, probe_timeout) = parse_probe(&name, probe, errors);
        let retry = parse_retry_budget(
            retry_budget,
            errors,
            &format!("service `{}` retry_budget", name),
        );
        let depends_on = depends_on
            .into_iter()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .collect();

        services.push(ServiceSpec {
            name,
            start,
            probe,
            probe_timeout,
            depends_on,
            retry,
        });
    }

    services
}

fn parse_start_action(
    service: &str,
    raw: RawStartAction,
    errors: &mut Vec<String>,
) -> Option<StartAction> {
    let argv: Vec<String> = raw
        .command
        .into_iter()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect();

    if argv.is_empty() {
        errors.push(format!("service `{service}` start.command must not be empty"));
        return None;
    }

    Some(StartAction {
        argv,
        env: raw.env,
        working_dir: raw.working_dir.map(PathBuf::from),
    })
}

fn parse_probe(
    service: &str,
    raw: Option<RawProbe>,
    errors: &mut Vec<String>,
) -> (ProbeSpec, Option<Duration>) {
    let Some(raw_probe) = raw else {
        return (ProbeSpec::None, None);
    };

    let timeout_label = format!("service `{service}` probe.timeout");
    let timeout = parse_duration_value(&timeout_label, raw_probe.timeout.clone(), errors)
        .and_then(|duration| ensure_positive_duration(duration, &timeout_label, errors));

    let kind = raw_probe.kind.trim().to_ascii_lowercase();
    let spec = match kind.as_str() {
        "tcp" => match raw_probe.addr.as_deref().map(str::trim) {
            Some(addr) if !addr.is_empty() => ProbeSpec::Tcp {
                addr: addr.to_string(),
            },
            _ => {
                errors.push(format!(
                    "service `{service}` probe of type `tcp` requires a non-empty addr"
                ));
                ProbeSpec::None
            }
        },
        "http" => parse_http_probe(service, &raw_probe, errors),
        "command" => {
            let argv: Vec<String> = raw_probe
                .command
                .iter()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .collect();
            if argv.is_empty() {
                errors.push(format!(
                    "service `{service}` probe of type `command` requires a non-empty command"
                ));
                ProbeSpec::None
            } else {
                ProbeSpec::Command { argv }
            }
        }
        "none" => ProbeSpec::None,
        other => {
            errors.push(format!(
                "service `{service}` probe.type must be one of `tcp`, `http`, `command`, or `none` (got `{other}`)"
            ));
            ProbeSpec::None
        }
    };

    (spec, timeout)
}

fn parse_http_probe(service: &str, raw_probe: &RawProbe, errors: &mut Vec<String>) -> ProbeSpec {
    let url = match raw_probe.url.as_deref().map(str::trim) {
        Some(url) if !url.is_empty() => url.to_string(),
        _ => {
            errors.push(format!(
                "service `{service}` probe of type `http` requires a non-empty url"
            ));
            return ProbeSpec::None;
        }
    };

    if url::Url::parse(&url).is_err() {
        errors.push(format!(
            "service `{service}` probe.url must be a valid URL (got `{url}`)"
        ));
        return ProbeSpec::None;
    }

    let expect_status = raw_probe.expect_status.unwrap_or(200);
    if !(100..=599).contains(&expect_status) {
        errors.push(format!(
            "service `{service}` probe.expect_status must be within 100..=599 (got `{expect_status}`)"
        ));
        return ProbeSpec::None;
    }

    ProbeSpec::Http { url, expect_status }
}
