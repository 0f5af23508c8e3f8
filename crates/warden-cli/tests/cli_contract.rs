#![allow(deprecated)]

//! Exit-code and output contract of the `warden` binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn warden(data: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("warden").expect("warden binary");
    cmd.env_remove("RUST_LOG").arg("--data-dir").arg(data.path());
    cmd
}

#[test]
fn contract_put_list_show_remove() {
    let data = TempDir::new().unwrap();

    warden(&data)
        .args(["rules", "put", "--name", "tmp"])
        .args(["--condition", r#"[signer "*, o=ACME;-"]"#])
        .args(["--permission", r#"(file "/tmp/*" "read")"#])
        .assert()
        .success()
        .stdout("tmp\n");
    warden(&data)
        .args(["rules", "put", "--deny", "--permission", "(all)"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("rule-2"));

    warden(&data)
        .args(["rules", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            r#"ALLOW { [signer "*, o=ACME;-"] (file "/tmp/*" "read") } "tmp""#,
        ))
        .stdout(predicate::str::starts_with("DENY { (all) }"));

    warden(&data)
        .args(["rules", "show", "tmp"])
        .assert()
        .success()
        .stdout(predicate::str::contains("access: ALLOW"))
        .stdout(predicate::str::contains(r#"condition: [signer "*, o=ACME;-"]"#));

    warden(&data).args(["rules", "remove", "tmp"]).assert().success();
    warden(&data).args(["rules", "show", "tmp"]).assert().code(1);
    warden(&data).args(["rules", "remove", "tmp"]).assert().code(1);
}

#[test]
fn contract_put_rejects_malformed_input_with_4() {
    let data = TempDir::new().unwrap();

    warden(&data)
        .args(["rules", "put", "--permission", "(file \"/tmp"])
        .assert()
        .code(4);
    warden(&data)
        .args(["rules", "put", "--condition", r#"[moon "full"]"#])
        .args(["--permission", "(all)"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("unknown condition type: moon"));
    warden(&data)
        .args(["rules", "put", "--condition", r#"[signer "cn=a;-x"]"#])
        .args(["--permission", "(all)"])
        .assert()
        .code(4);

    warden(&data)
        .args(["rules", "list"])
        .assert()
        .success()
        .stdout("");
}

#[test]
fn contract_import_export_roundtrip() {
    let data = TempDir::new().unwrap();
    let file = data.path().join("rules.txt");
    fs::write(
        &file,
        "# managed rules\n\
         DENY { (file \"/etc/shadow\" \"read\") } \"shadow\"\n\
         \n\
         ALLOW { [location \"file:/trusted/*\"] (file \"/etc/*\" \"read\") } \"etc\"\n\
         ALLOW { (file \"/tmp/*\" \"read,write\") }\n",
    )
    .unwrap();

    warden(&data)
        .args(["rules", "import"])
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("imported 3 rule(s)"));

    let out = warden(&data).args(["rules", "export"]).assert().success();
    let stdout = String::from_utf8_lossy(&out.get_output().stdout).into_owned();
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], r#"DENY { (file "/etc/shadow" "read") } "shadow""#);
    assert!(lines[2].ends_with(r#" "rule-1.1""#), "unexpected name: {}", lines[2]);

    // Exported text imports back to the same table.
    let exported = data.path().join("export.txt");
    fs::write(&exported, &stdout).unwrap();
    warden(&data).args(["rules", "import"]).arg(&exported).assert().success();
    warden(&data)
        .args(["rules", "export"])
        .assert()
        .success()
        .stdout(stdout);
}

#[test]
fn contract_import_malformed_line_exits_4_and_keeps_table() {
    let data = TempDir::new().unwrap();
    warden(&data)
        .args(["rules", "put", "--name", "keep", "--permission", "(all)"])
        .assert()
        .success();

    let file = data.path().join("bad.txt");
    fs::write(&file, "ALLOW { (all) } \"a\"\nMAYBE { (all) } \"b\"\n").unwrap();
    warden(&data)
        .args(["rules", "import"])
        .arg(&file)
        .assert()
        .code(4)
        .stderr(predicate::str::contains("bad.txt:2"));

    warden(&data)
        .args(["rules", "show", "keep"])
        .assert()
        .success();
}

#[test]
fn contract_declared_and_default_lists() {
    let data = TempDir::new().unwrap();
    let origin = "file:/units/a.jar";

    warden(&data).args(["declared", "get", origin]).assert().code(1);
    warden(&data)
        .args(["declared", "set", origin, r#"(file "/tmp/*" "read")"#, "(net)"])
        .assert()
        .success();
    warden(&data)
        .args(["declared", "get", origin])
        .assert()
        .success()
        .stdout("(file \"/tmp/*\" \"read\")\n(net)\n");
    warden(&data)
        .args(["declared", "list"])
        .assert()
        .success()
        .stdout(format!("{origin}\n"));

    // An empty list is kept distinct from no list.
    warden(&data).args(["declared", "set", origin]).assert().success();
    warden(&data)
        .args(["declared", "get", origin])
        .assert()
        .success()
        .stdout("");
    warden(&data).args(["declared", "clear", origin]).assert().success();
    warden(&data).args(["declared", "get", origin]).assert().code(1);

    warden(&data).args(["default", "set", "(all)"]).assert().success();
    warden(&data)
        .args(["default", "get"])
        .assert()
        .success()
        .stdout("(all)\n");
    warden(&data).args(["default", "clear"]).assert().success();
    warden(&data).args(["default", "get"]).assert().code(1);

    warden(&data)
        .args(["declared", "set", origin, "(file"])
        .assert()
        .code(4);
}

#[test]
fn contract_match_names_and_chains() {
    let data = TempDir::new().unwrap();

    warden(&data)
        .args(["match", "--pattern", "*, o=ACME;-"])
        .args(["--dn", "cn=Dev, o=ACME", "--dn", "cn=ACME-CA, o=ACME"])
        .assert()
        .success()
        .stdout("match\n");
    warden(&data)
        .args(["match", "--pattern", "*, o=ACME;-", "--dn", "cn=Dev, o=Other"])
        .assert()
        .code(1)
        .stdout("no match\n");

    warden(&data)
        .args(["match", "--pattern", "cn=*,o=ACME;*"])
        .args(["--cert", "cn=Dev, o=ACME|cn=ACME-CA, o=ACME"])
        .args(["--cert", "cn=ACME-CA, o=ACME"])
        .assert()
        .success()
        .stdout("match anchor=1\n");

    // Issuer of the leaf is not the subject of the next certificate.
    warden(&data)
        .args(["match", "--pattern", "-"])
        .args(["--cert", "cn=Dev, o=ACME|cn=Elsewhere"])
        .args(["--cert", "cn=ACME-CA, o=ACME"])
        .assert()
        .code(4);

    warden(&data)
        .args(["match", "--pattern", "cn=a;-x", "--dn", "cn=a"])
        .assert()
        .code(4);
}

#[test]
fn contract_usage_errors_exit_2() {
    let data = TempDir::new().unwrap();
    warden(&data).args(["rules", "put"]).assert().code(2);
    warden(&data)
        .args(["match", "--pattern", "-", "--dn", "cn=a", "--cert", "cn=a"])
        .assert()
        .code(2);

    let config = data.path().join("warden.yaml");
    fs::write(&config, "no_such_key: 1\n").unwrap();
    warden(&data)
        .arg("--config")
        .arg(&config)
        .args(["rules", "list"])
        .assert()
        .code(2);
}
