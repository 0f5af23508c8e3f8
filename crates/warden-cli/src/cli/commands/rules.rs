use std::fs;

use anyhow::Context;
use warden_core::{Access, ConditionInfo, PermissionInfo, PolicyServices, RuleSpec, TableError};

use super::super::args::{PutArgs, RulesCmd};
use crate::exit_codes::{CONFLICT, MALFORMED, NOT_FOUND, SUCCESS};

pub fn run(cmd: RulesCmd, services: &PolicyServices) -> anyhow::Result<i32> {
    match cmd {
        RulesCmd::List => {
            for entry in services.table.get_all() {
                println!("{}", entry.encode());
            }
            Ok(SUCCESS)
        }
        RulesCmd::Show { name } => {
            let Some(entry) = services.table.get(&name) else {
                eprintln!("no rule named {name:?}");
                return Ok(NOT_FOUND);
            };
            println!("name: {}", entry.name());
            println!("access: {}", entry.access());
            for condition in entry.conditions() {
                println!("condition: {condition}");
            }
            for permission in entry.permissions() {
                println!("permission: {}", permission.encode());
            }
            Ok(SUCCESS)
        }
        RulesCmd::Put(args) => put(args, services),
        RulesCmd::Remove { name } => {
            let removed = services
                .table
                .get(&name)
                .is_some_and(|entry| services.table.remove(&entry));
            if removed {
                Ok(SUCCESS)
            } else {
                eprintln!("no rule named {name:?}");
                Ok(NOT_FOUND)
            }
        }
        RulesCmd::Import { file } => {
            let text = fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let mut specs = Vec::new();
            for (line_no, line) in text.lines().enumerate() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                match RuleSpec::parse(line) {
                    Ok(spec) => specs.push(spec),
                    Err(e) => {
                        eprintln!("{}:{}: {e}", file.display(), line_no + 1);
                        return Ok(MALFORMED);
                    }
                }
            }

            let count = specs.len();
            let mut update = services.table.begin_update();
            update.replace_all(specs);
            match services.table.commit(update) {
                Ok(()) => {
                    println!("imported {count} rule(s), generation {}", services.table.generation());
                    Ok(SUCCESS)
                }
                Err(e) => Ok(report(&e)),
            }
        }
        RulesCmd::Export { output } => {
            let mut out = String::new();
            for entry in services.table.get_all() {
                out.push_str(&entry.encode());
                out.push('\n');
            }
            match output {
                Some(path) => fs::write(&path, out)
                    .with_context(|| format!("failed to write {}", path.display()))?,
                None => print!("{out}"),
            }
            Ok(SUCCESS)
        }
    }
}

fn put(args: PutArgs, services: &PolicyServices) -> anyhow::Result<i32> {
    let mut spec = RuleSpec::new(if args.deny { Access::Deny } else { Access::Allow });
    spec.name = args.name;
    for text in &args.conditions {
        match ConditionInfo::parse(text) {
            Ok(condition) => spec.conditions.push(condition),
            Err(e) => {
                eprintln!("error: {e}");
                return Ok(MALFORMED);
            }
        }
    }
    for text in &args.permissions {
        match PermissionInfo::parse(text) {
            Ok(permission) => spec.permissions.push(permission),
            Err(e) => {
                eprintln!("error: {e}");
                return Ok(MALFORMED);
            }
        }
    }

    match services.table.put_rule(spec) {
        Ok(entry) => {
            println!("{}", entry.name());
            Ok(SUCCESS)
        }
        Err(e) => Ok(report(&e)),
    }
}

fn report(error: &TableError) -> i32 {
    eprintln!("error: {error}");
    if error.is_conflict() {
        eprintln!("hint: the rule table changed while importing; run the command again");
        return CONFLICT;
    }
    error.exit_code()
}
