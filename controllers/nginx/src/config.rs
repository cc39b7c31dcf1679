//! Command line and environment configuration.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use humantime_serde::re::humantime;

use crate::error::ControllerError;

/// Nginx operator: converges Nginx objects into Deployments.
#[derive(Parser, Debug, Clone)]
#[command(name = "nginx-controller")]
pub struct Args {
    /// Address for /metrics, /healthz and /readyz. Empty disables the server.
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    pub metrics_addr: String,

    /// Only reconcile Nginx objects matching this label selector
    #[arg(long, env = "LABEL_SELECTOR")]
    pub label_selector: Option<String>,

    /// Operator version reported in logs and the build_info metric
    #[arg(long = "version", env = "OPERATOR_VERSION", default_value = "v0")]
    pub operator_version: String,

    /// Namespace to watch; all namespaces when unset
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub namespace: Option<String>,

    /// Maximum number of objects reconciled in parallel
    #[arg(long, env = "RECONCILE_CONCURRENCY", default_value_t = 4)]
    pub concurrency: u16,

    /// Deadline for a single reconcile pass ("30s", "5m")
    #[arg(
        long,
        env = "RECONCILE_TIMEOUT",
        default_value = "5m",
        value_parser = humantime::parse_duration
    )]
    pub reconcile_timeout: Duration,
}

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub metrics_addr: Option<SocketAddr>,
    pub label_selector: Option<String>,
    pub version: String,
    pub namespace: Option<String>,
    pub concurrency: u16,
    pub reconcile_timeout: Duration,
}

impl Args {
    /// Checks values clap cannot check on its own.
    pub fn into_config(self) -> Result<Config, ControllerError> {
        let metrics_addr = match self.metrics_addr.trim() {
            "" => None,
            addr => Some(addr.parse::<SocketAddr>().map_err(|e| {
                ControllerError::InvalidConfig(format!("invalid metrics address {addr:?}: {e}"))
            })?),
        };

        let label_selector = match self.label_selector.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(selector) => {
                validate_label_selector(selector)?;
                Some(selector.to_string())
            }
        };

        if self.concurrency == 0 {
            return Err(ControllerError::InvalidConfig(
                "concurrency must be greater than 0".to_string(),
            ));
        }
        if self.reconcile_timeout.is_zero() {
            return Err(ControllerError::InvalidConfig(
                "reconcile timeout must be greater than 0".to_string(),
            ));
        }

        Ok(Config {
            metrics_addr,
            label_selector,
            version: self.operator_version,
            namespace: self.namespace.filter(|ns| !ns.is_empty()),
            concurrency: self.concurrency,
            reconcile_timeout: self.reconcile_timeout,
        })
    }
}

/// Splits a selector on commas outside of `in (...)` value sets.
fn selector_terms(selector: &str) -> Vec<&str> {
    let mut terms = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in selector.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                terms.push(&selector[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    terms.push(&selector[start..]);
    terms
}

/// Light syntax check: every term is non-empty and names a key.
pub fn validate_label_selector(selector: &str) -> Result<(), ControllerError> {
    for term in selector_terms(selector) {
        let term = term.trim();
        let invalid = |why: &str| {
            ControllerError::InvalidConfig(format!("invalid label selector {selector:?}: {why}"))
        };
        if term.is_empty() {
            return Err(invalid("empty term"));
        }

        let body = term.strip_prefix('!').unwrap_or(term).trim_start();
        let key_end = [" notin ", " in ", "!=", "==", "="]
            .iter()
            .filter_map(|op| body.find(op))
            .min()
            .unwrap_or(body.len());
        let key = body[..key_end].trim();
        if key.is_empty() {
            return Err(invalid(&format!("term {term:?} has no key")));
        }
        if key.contains(char::is_whitespace) {
            return Err(invalid(&format!("key {key:?} contains whitespace")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Config, ControllerError> {
        let mut argv = vec!["nginx-controller"];
        argv.extend_from_slice(args);
        Args::try_parse_from(argv).unwrap().into_config()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.metrics_addr, Some("0.0.0.0:8080".parse().unwrap()));
        assert_eq!(config.version, "v0");
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.reconcile_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_flags() {
        let config = parse(&[
            "--metrics-addr",
            "127.0.0.1:9090",
            "--label-selector",
            "team=web,tier in (edge, core)",
            "--version",
            "v1.4.0",
            "--namespace",
            "apps",
            "--concurrency",
            "8",
            "--reconcile-timeout",
            "45s",
        ])
        .unwrap();
        assert_eq!(config.metrics_addr, Some("127.0.0.1:9090".parse().unwrap()));
        assert_eq!(config.label_selector.as_deref(), Some("team=web,tier in (edge, core)"));
        assert_eq!(config.version, "v1.4.0");
        assert_eq!(config.namespace.as_deref(), Some("apps"));
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.reconcile_timeout, Duration::from_secs(45));
    }

    #[test]
    fn test_empty_metrics_addr_disables_server() {
        let config = parse(&["--metrics-addr", ""]).unwrap();
        assert_eq!(config.metrics_addr, None);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            parse(&["--concurrency", "0"]),
            Err(ControllerError::InvalidConfig(_))
        ));
        assert!(matches!(
            parse(&["--metrics-addr", "not-an-addr"]),
            Err(ControllerError::InvalidConfig(_))
        ));
        assert!(Args::try_parse_from(["nginx-controller", "--reconcile-timeout", "soon"]).is_err());
    }

    #[test]
    fn test_label_selector_validation() {
        for ok in [
            "app=web",
            "app==web",
            "app!=web",
            "app",
            "!app",
            "env in (a,b),tier notin (x)",
        ] {
            assert!(validate_label_selector(ok).is_ok(), "{ok}");
        }
        for bad in ["app=web,", ",app", "=web", "a b=c", "app=web,,tier=x"] {
            assert!(validate_label_selector(bad).is_err(), "{bad}");
        }
    }
}
