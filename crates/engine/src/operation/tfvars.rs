// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Writing engine variables to `terraform.tfvars`

use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use ork_adapters::{Variable, VariableCategory};

pub const TFVARS_FILE: &str = "terraform.tfvars";

/// Append engine-category variables to the variables file in `dir`,
/// keeping whatever the configuration already put there
pub fn write_terraform_vars(dir: &Path, vars: &[Variable]) -> io::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .mode(0o600)
        .open(dir.join(TFVARS_FILE))?;
    file.write_all(render(vars).as_bytes())
}

/// Variables file fragment, starting on a fresh line
pub fn render(vars: &[Variable]) -> String {
    let mut out = String::from("\n");
    for var in vars
        .iter()
        .filter(|v| v.category == VariableCategory::Terraform)
    {
        out.push_str(&var.key);
        out.push_str(" = ");
        if var.hcl {
            out.push_str(&var.value);
        } else if var.value.contains('\n') {
            let mut delimiter = String::from("EOT");
            while var.value.contains(&delimiter) {
                delimiter.push('T');
            }
            out.push_str(&format!("<<{delimiter}\n{}\n{delimiter}", var.value));
        } else {
            out.push('"');
            out.push_str(&escape(&var.value));
            out.push('"');
        }
        out.push('\n');
    }
    out
}

fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace("${", "$${")
        .replace("%{", "%%{")
}

#[cfg(test)]
#[path = "tfvars_tests.rs"]
mod tests;
