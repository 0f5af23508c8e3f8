use warden_core::{PermissionInfo, PolicyServices, SpecError};

use super::super::args::{DeclaredCmd, DefaultCmd};
use crate::exit_codes::{MALFORMED, NOT_FOUND, SUCCESS};

pub fn run_declared(cmd: DeclaredCmd, services: &PolicyServices) -> anyhow::Result<i32> {
    let locations = &services.locations;
    match cmd {
        DeclaredCmd::List => {
            for origin in locations.origins() {
                println!("{origin}");
            }
            Ok(SUCCESS)
        }
        DeclaredCmd::Get { origin } => match locations.get_declared(&origin) {
            Some(list) => Ok(print_list(&list)),
            None => {
                eprintln!("no declared permissions for {origin:?}");
                Ok(NOT_FOUND)
            }
        },
        DeclaredCmd::Set { origin, permissions } => match parse_list(&permissions) {
            Ok(list) => {
                locations.set_declared(&origin, Some(list));
                Ok(SUCCESS)
            }
            Err(code) => Ok(code),
        },
        DeclaredCmd::Clear { origin } => {
            if locations.get_declared(&origin).is_none() {
                eprintln!("no declared permissions for {origin:?}");
                return Ok(NOT_FOUND);
            }
            locations.set_declared(&origin, None);
            Ok(SUCCESS)
        }
    }
}

pub fn run_default(cmd: DefaultCmd, services: &PolicyServices) -> anyhow::Result<i32> {
    let locations = &services.locations;
    match cmd {
        DefaultCmd::Get => match locations.get_default() {
            Some(list) => Ok(print_list(&list)),
            None => {
                eprintln!("no default permissions set");
                Ok(NOT_FOUND)
            }
        },
        DefaultCmd::Set { permissions } => match parse_list(&permissions) {
            Ok(list) => {
                locations.set_default(Some(list));
                Ok(SUCCESS)
            }
            Err(code) => Ok(code),
        },
        DefaultCmd::Clear => {
            locations.set_default(None);
            Ok(SUCCESS)
        }
    }
}

fn print_list(list: &[PermissionInfo]) -> i32 {
    for permission in list {
        println!("{}", permission.encode());
    }
    SUCCESS
}

fn parse_list(texts: &[String]) -> Result<Vec<PermissionInfo>, i32> {
    texts
        .iter()
        .map(|text| PermissionInfo::parse(text))
        .collect::<Result<Vec<_>, SpecError>>()
        .map_err(|e| {
            eprintln!("error: {e}");
            MALFORMED
        })
}
