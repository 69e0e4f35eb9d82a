//! `${VAR}` expansion for repository locations and credentials.
//!
//! Only uppercase `[A-Z_][A-Z0-9_]*` names are expanded; `$${VAR}` stays as
//! the literal text `${VAR}`.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::schema::IcyConfig;

/// `$${NAME}` (escaped) or `${NAME}`.
static REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\$?)\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid env reference regex"));

/// A referenced variable is unset or empty.
#[derive(Debug, thiserror::Error)]
#[error("Missing env var \"{var_name}\" referenced at config path: {config_path}")]
pub struct MissingEnvVarError {
    pub var_name: String,
    pub config_path: String,
}

/// Expands references in `raw`, looking values up with `lookup`.
pub fn expand<F>(raw: &str, path: &str, lookup: &F) -> Result<String, MissingEnvVarError>
where
    F: Fn(&str) -> Option<String>,
{
    if !raw.contains("${") {
        return Ok(raw.to_string());
    }

    let mut missing = None;
    let expanded = REFERENCE.replace_all(raw, |caps: &Captures| {
        let name = &caps[2];
        if !caps[1].is_empty() {
            return format!("${{{name}}}");
        }
        match lookup(name).filter(|v| !v.is_empty()) {
            Some(value) => value,
            None => {
                missing.get_or_insert_with(|| MissingEnvVarError {
                    var_name: name.to_string(),
                    config_path: path.to_string(),
                });
                String::new()
            }
        }
    });

    match missing {
        Some(err) => Err(err),
        None => Ok(expanded.into_owned()),
    }
}

/// Expands references in every string field that may carry secrets or paths.
pub fn resolve_env_vars(config: IcyConfig) -> Result<IcyConfig, MissingEnvVarError> {
    resolve_env_vars_with(config, |name| std::env::var(name).ok())
}

/// Same as [`resolve_env_vars`] with an explicit variable source.
pub fn resolve_env_vars_with<F>(mut config: IcyConfig, lookup: F) -> Result<IcyConfig, MissingEnvVarError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(root) = config.plugins.as_mut().and_then(|p| p.root.as_mut()) {
        *root = expand(root, "plugins.root", &lookup)?;
    }
    if let Some(dir) = config.logging.as_mut().and_then(|l| l.dir.as_mut()) {
        *dir = expand(dir, "logging.dir", &lookup)?;
    }
    for (i, repo) in config.repositories.iter_mut().enumerate() {
        repo.location = expand(&repo.location, &format!("repositories[{i}].location"), &lookup)?;
        if let Some(login) = repo.login.as_mut() {
            *login = expand(login, &format!("repositories[{i}].login"), &lookup)?;
        }
        if let Some(password) = repo.password.as_mut() {
            *password = expand(password, &format!("repositories[{i}].password"), &lookup)?;
        }
    }
    Ok(config)
}

/// Names of all variables referenced by `raw`, escaped ones excluded.
pub fn referenced_vars(raw: &str) -> Vec<String> {
    REFERENCE
        .captures_iter(raw)
        .filter(|caps| caps[1].is_empty())
        .map(|caps| caps[2].to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::RepositoryConfig;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn expands_repository_password() {
        let cfg = IcyConfig {
            repositories: vec![RepositoryConfig {
                name: "private".into(),
                location: "https://${REPO_HOST}/plugins.xml".into(),
                login: Some("lab".into()),
                password: Some("${REPO_PASSWORD}".into()),
                ..Default::default()
            }],
            ..Default::default()
        };
        let cfg = resolve_env_vars_with(cfg, env(&[("REPO_HOST", "repo.lab"), ("REPO_PASSWORD", "s3cr3t")]))
            .unwrap();
        assert_eq!(cfg.repositories[0].location, "https://repo.lab/plugins.xml");
        assert_eq!(cfg.repositories[0].password.as_deref(), Some("s3cr3t"));
    }

    #[test]
    fn missing_var_names_the_path() {
        let err = expand("${NOPE}", "repositories[0].password", &env(&[])).unwrap_err();
        assert_eq!(err.var_name, "NOPE");
        assert!(err.to_string().contains("repositories[0].password"));
    }

    #[test]
    fn escaped_reference_is_literal() {
        let out = expand("cost $${PRICE}", "x", &env(&[("PRICE", "1")])).unwrap();
        assert_eq!(out, "cost ${PRICE}");
        assert!(referenced_vars("$${PRICE} ${HOME_DIR}") == vec!["HOME_DIR".to_string()]);
    }
}
