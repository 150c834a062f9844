// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use yare::parameterized;

use super::*;

#[parameterized(
    plain = { Variable::terraform("region", "eu-west-1"), "region = \"eu-west-1\"\n" },
    quoted = { Variable::terraform("motd", r#"say "hi" \o/"#), "motd = \"say \\\"hi\\\" \\\\o/\"\n" },
    interpolation = { Variable::terraform("tmpl", "${var.x}"), "tmpl = \"$${var.x}\"\n" },
    hcl = { Variable::terraform("tags", "{ env = \"prod\" }").hcl(), "tags = { env = \"prod\" }\n" },
    heredoc = { Variable::terraform("script", "a\nb"), "script = <<EOT\na\nb\nEOT\n" },
    heredoc_collision = { Variable::terraform("doc", "EOT\nEOTT"), "doc = <<EOTTT\nEOT\nEOTT\nEOTTT\n" },
)]
fn renders_variable(var: Variable, expected: &str) {
    assert_eq!(render(&[var]), format!("\n{expected}"));
}

#[test]
fn skips_environment_variables() {
    let out = render(&[
        Variable::env("AWS_REGION", "eu-west-1"),
        Variable::terraform("count", "3"),
    ]);
    assert_eq!(out, "\ncount = \"3\"\n");
}

#[test]
fn appends_to_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(TFVARS_FILE), "size = \"small\"").unwrap();

    write_terraform_vars(dir.path(), &[Variable::terraform("name", "web")]).unwrap();

    let written = std::fs::read_to_string(dir.path().join(TFVARS_FILE)).unwrap();
    assert_eq!(written, "size = \"small\"\nname = \"web\"\n");
}
