/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2026 ByteDance and/or its affiliates.
 */

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, anyhow};
use humanize_rs::ParseError;
use yaml_rust::{Yaml, yaml};

use super::RateLimitWrapConfig;

fn normalize_key(raw: &str) -> String {
    raw.to_lowercase().replace('-', "_")
}

fn foreach_kv<F>(table: &yaml::Hash, mut f: F) -> anyhow::Result<()>
where
    F: FnMut(&str, &Yaml) -> anyhow::Result<()>,
{
    for (k, v) in table.iter() {
        if let Yaml::String(key) = k {
            f(key, v).context(format!("failed to parse value of key {key}"))?;
        } else {
            return Err(anyhow!("key in hash should be string"));
        }
    }
    Ok(())
}

fn as_duration(v: &Yaml) -> anyhow::Result<Duration> {
    match v {
        Yaml::String(value) => match humanize_rs::duration::parse(value) {
            Ok(v) => Ok(v),
            Err(ParseError::MissingUnit) => {
                if let Ok(u) = u64::from_str(value) {
                    Ok(Duration::from_secs(u))
                } else if let Ok(f) = f64::from_str(value) {
                    Duration::try_from_secs_f64(f).map_err(anyhow::Error::new)
                } else {
                    Err(anyhow!("invalid duration string"))
                }
            }
            Err(e) => Err(anyhow!("invalid humanize duration string: {e}")),
        },
        Yaml::Integer(value) => {
            let u = u64::try_from(*value).map_err(|_| anyhow!("negative duration value"))?;
            Ok(Duration::from_secs(u))
        }
        Yaml::Real(s) => {
            let f = f64::from_str(s).map_err(|e| anyhow!("invalid f64 value: {e}"))?;
            Duration::try_from_secs_f64(f).map_err(anyhow::Error::new)
        }
        _ => Err(anyhow!(
            "yaml value type for humanize duration should be 'string' or 'integer' or 'real'"
        )),
    }
}

fn as_usize(v: &Yaml) -> anyhow::Result<usize> {
    match v {
        Yaml::String(s) => Ok(usize::from_str(s)?),
        Yaml::Integer(i) => Ok(usize::try_from(*i)?),
        _ => Err(anyhow!(
            "yaml value type for 'usize' should be 'string' or 'integer'"
        )),
    }
}

impl RateLimitWrapConfig {
    pub fn parse_yaml(v: &Yaml) -> anyhow::Result<Self> {
        let mut config = RateLimitWrapConfig::default();
        match v {
            Yaml::Hash(map) => {
                foreach_kv(map, |k, v| match normalize_key(k).as_str() {
                    "wait_timeout" | "pacing_timeout" => {
                        let timeout = as_duration(v)
                            .context(format!("invalid humanize duration value for key {k}"))?;
                        config.set_wait_timeout(timeout);
                        Ok(())
                    }
                    "discard_yield_count" | "discard_yield" => {
                        let count =
                            as_usize(v).context(format!("invalid usize value for key {k}"))?;
                        config.set_discard_yield_count(count);
                        Ok(())
                    }
                    _ => Err(anyhow!("invalid key {k}")),
                })?;
            }
            Yaml::String(_) | Yaml::Integer(_) | Yaml::Real(_) => {
                let timeout = as_duration(v).context("invalid wait timeout value")?;
                config.set_wait_timeout(timeout);
            }
            Yaml::Null => {}
            _ => return Err(anyhow!("invalid yaml value type for rate limit wrap config")),
        }
        Ok(config)
    }
}
