// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dynamic provider credentials
//!
//! A workspace opts a cloud provider in with an environment variable
//! `TFC_<PROVIDER>_PROVIDER_AUTH[_TAG]=true`; the tag selects an aliased
//! provider block. For each enabled provider a workload identity token is
//! minted for the configured audience and written to the working
//! directory, and the paths are handed to the engine both as environment
//! variables (default block) and as a variables file (every block).

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use ork_core::{JobId, Phase};
use serde::Serialize;
use serde_json::{json, Value};

use super::OperationError;
use crate::client::JobClient;

pub const CREDENTIALS_FILE: &str = "dynamic_credentials.auto.tfvars.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Aws,
    Azure,
    Gcp,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::Aws, Provider::Azure, Provider::Gcp];

    fn upper(&self) -> &'static str {
        match self {
            Provider::Aws => "AWS",
            Provider::Azure => "AZURE",
            Provider::Gcp => "GCP",
        }
    }

    fn lower(&self) -> &'static str {
        match self {
            Provider::Aws => "aws",
            Provider::Azure => "azure",
            Provider::Gcp => "gcp",
        }
    }
}

#[derive(Debug, Default, Serialize)]
struct ProviderConfigs {
    default: Option<Value>,
    aliases: BTreeMap<String, Value>,
}

impl ProviderConfigs {
    fn add(&mut self, tag: &str, config: Value) {
        match tag.strip_prefix('_') {
            Some(alias) => {
                self.aliases.insert(alias.to_string(), config);
            }
            None => self.default = Some(config),
        }
    }
}

#[derive(Debug, Default, Serialize)]
struct CredentialsFile {
    #[serde(
        rename = "tfc_aws_dynamic_credentials",
        skip_serializing_if = "Option::is_none"
    )]
    aws: Option<ProviderConfigs>,
    #[serde(
        rename = "tfc_azure_dynamic_credentials",
        skip_serializing_if = "Option::is_none"
    )]
    azure: Option<ProviderConfigs>,
    #[serde(
        rename = "tfc_gcp_dynamic_credentials",
        skip_serializing_if = "Option::is_none"
    )]
    gcp: Option<ProviderConfigs>,
}

impl CredentialsFile {
    fn configs(&mut self, provider: Provider) -> &mut ProviderConfigs {
        let slot = match provider {
            Provider::Aws => &mut self.aws,
            Provider::Azure => &mut self.azure,
            Provider::Gcp => &mut self.gcp,
        };
        slot.get_or_insert_with(ProviderConfigs::default)
    }

    fn is_empty(&self) -> bool {
        self.aws.is_none() && self.azure.is_none() && self.gcp.is_none()
    }
}

/// Provider auth toggles found in `env`, as `(provider, tag)` pairs
pub fn enabled_providers(
    env: &HashMap<String, String>,
) -> Result<Vec<(Provider, String)>, OperationError> {
    let mut enabled = Vec::new();
    for provider in Provider::ALL {
        let prefix = format!("TFC_{}_PROVIDER_AUTH", provider.upper());
        let mut keys: Vec<&String> = env.keys().filter(|k| k.starts_with(&prefix)).collect();
        keys.sort();
        for key in keys {
            let tag = &key[prefix.len()..];
            if !tag.is_empty() && !tag.starts_with('_') {
                return Err(OperationError::Credentials(format!(
                    "expected environment variable to have format TFC_<cloud>_PROVIDER_AUTH[_TAG]; instead got: {key}"
                )));
            }
            let value = &env[key];
            if parse_bool(value).ok_or_else(|| {
                OperationError::Credentials(format!("{key} must be true or false, got {value:?}"))
            })? {
                enabled.push((provider, tag.to_string()));
            }
        }
    }
    Ok(enabled)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

/// First variable found among `names`
fn lookup(env: &HashMap<String, String>, names: &[String]) -> Result<String, OperationError> {
    names
        .iter()
        .find_map(|n| env.get(n).cloned())
        .ok_or_else(|| {
            OperationError::Credentials(format!(
                "at least one of the required environment variables was not found: {}",
                names.join(", ")
            ))
        })
}

fn provider_var(
    env: &HashMap<String, String>,
    provider: Provider,
    tag: &str,
    name: &str,
) -> Result<String, OperationError> {
    let p = provider.upper();
    lookup(
        env,
        &[format!("TFC_{p}_{name}{tag}"), format!("TFC_DEFAULT_{p}_{name}")],
    )
}

/// Phase-specific value, falling back to the run-wide one
fn run_var(
    env: &HashMap<String, String>,
    provider: Provider,
    tag: &str,
    phase: Phase,
    name: &str,
) -> Result<String, OperationError> {
    let p = provider.upper();
    let ph = phase.as_str().to_uppercase();
    lookup(
        env,
        &[
            format!("TFC_{p}_{ph}_{name}{tag}"),
            format!("TFC_DEFAULT_{p}_{ph}_{name}"),
            format!("TFC_{p}_RUN_{name}{tag}"),
            format!("TFC_DEFAULT_{p}_RUN_{name}"),
        ],
    )
}

/// Set up every enabled provider, returning the environment variables to
/// add for the engine
pub async fn setup(
    jobs: &dyn JobClient,
    job: &JobId,
    phase: Phase,
    dir: &Path,
    env: &HashMap<String, String>,
) -> Result<Vec<(String, String)>, OperationError> {
    let mut exported = Vec::new();
    let mut file = CredentialsFile::default();
    for (provider, tag) in enabled_providers(env)? {
        let audience = provider_var(env, provider, &tag, "WORKLOAD_IDENTITY_AUDIENCE")?;
        let token = jobs
            .generate_dynamic_credentials_token(job, &audience)
            .await?;
        let token_path = write(dir, provider, &tag, "token", token.as_bytes())?;
        let token_path_str = token_path.display().to_string();
        let (config, env_vars) = match provider {
            Provider::Aws => {
                let role = run_var(env, provider, &tag, phase, "ROLE_ARN")?;
                (
                    json!({ "role_arn": role, "web_identity_token_file": token_path_str }),
                    vec![
                        ("AWS_ROLE_ARN".to_string(), role),
                        ("AWS_WEB_IDENTITY_TOKEN_FILE".to_string(), token_path_str.clone()),
                    ],
                )
            }
            Provider::Azure => {
                let client_id = run_var(env, provider, &tag, phase, "CLIENT_ID")?;
                (
                    json!({ "client_id": client_id, "oidc_token_file_path": token_path_str }),
                    vec![
                        ("ARM_CLIENT_ID".to_string(), client_id),
                        ("ARM_USE_OIDC".to_string(), "true".to_string()),
                        ("ARM_OIDC_TOKEN_FILE_PATH".to_string(), token_path_str.clone()),
                    ],
                )
            }
            Provider::Gcp => {
                let credentials = json!({
                    "type": "external_account",
                    "audience": audience,
                    "subject_token_type": "urn:ietf:params:oauth:token-type:jwt",
                    "token_url": "https://sts.googleapis.com/v1/token",
                    "credential_source": { "file": token_path_str },
                });
                let path = write(
                    dir,
                    provider,
                    &tag,
                    "credentials.json",
                    credentials.to_string().as_bytes(),
                )?
                .display()
                .to_string();
                (
                    json!({ "credentials": path }),
                    vec![("GOOGLE_APPLICATION_CREDENTIALS".to_string(), path)],
                )
            }
        };
        if tag.is_empty() {
            exported.extend(env_vars);
        }
        file.configs(provider).add(&tag, config);
        tracing::debug!(
            job_id = %job,
            provider = provider.lower(),
            tag,
            "configured dynamic credentials"
        );
    }
    if !file.is_empty() {
        let contents = serde_json::to_vec(&file).map_err(|e| {
            OperationError::Credentials(format!("encoding {CREDENTIALS_FILE}: {e}"))
        })?;
        std::fs::write(dir.join(CREDENTIALS_FILE), contents)
            .map_err(|e| OperationError::io("writing dynamic credentials", e))?;
    }
    Ok(exported)
}

fn write(
    dir: &Path,
    provider: Provider,
    tag: &str,
    name: &str,
    data: &[u8],
) -> Result<PathBuf, OperationError> {
    let path = dir.join(format!("{}{}_{}", provider.lower(), tag, name));
    std::fs::write(&path, data)
        .map_err(|e| OperationError::io("writing dynamic credentials", e))?;
    Ok(path)
}

#[cfg(test)]
#[path = "credentials_tests.rs"]
mod tests;
