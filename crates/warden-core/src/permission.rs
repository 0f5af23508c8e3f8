//! Permission specs and implication.
//!
//! A permission is a `(kind "name" "actions")` triple. Kind `all` implies
//! every permission. Otherwise a granted permission implies a requested one
//! of the same kind when its name matches (exact, `*`, or a trailing `*`
//! prefix) and its actions are a superset (`*` grants every action).

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::codec::{quote, Scanner};
use crate::errors::SpecError;

/// Kind that implies every permission.
pub const ALL_KIND: &str = "all";

/// Kind used for implicit data-area access.
pub const FILE_KIND: &str = "file";

/// Kind used for implicit identity-scoped administration.
pub const ADMIN_KIND: &str = "admin";

/// Textual permission spec as stored in rule tables and declared lists.
/// An empty name is the same as no name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PermissionInfo {
    pub kind: String,
    pub name: Option<String>,
    pub actions: Option<String>,
}

impl PermissionInfo {
    pub fn new(kind: impl Into<String>, name: Option<&str>, actions: Option<&str>) -> Self {
        Self {
            kind: kind.into(),
            name: name.filter(|n| !n.is_empty()).map(String::from),
            actions: actions.map(String::from),
        }
    }

    pub fn all() -> Self {
        Self::new(ALL_KIND, None, None)
    }

    /// Parse `(kind "name" "actions")`; name and actions are optional.
    pub fn parse(text: &str) -> Result<Self, SpecError> {
        let mut scanner = Scanner::new(text);
        let info = Self::read(&mut scanner)?;
        scanner.finish()?;
        Ok(info)
    }

    pub(crate) fn read(scanner: &mut Scanner<'_>) -> Result<Self, SpecError> {
        scanner.expect('(')?;
        let kind = scanner.word()?.to_string();
        let mut name = None;
        let mut actions = None;
        if scanner.peek() == Some('"') {
            name = Some(scanner.quoted()?).filter(|n| !n.is_empty());
            if scanner.peek() == Some('"') {
                actions = Some(scanner.quoted()?);
            }
        }
        scanner.expect(')')?;
        Ok(Self {
            kind,
            name,
            actions,
        })
    }

    pub fn encode(&self) -> String {
        let mut out = format!("({}", self.kind);
        // Actions are positional, so a missing name is written as "".
        match (self.name.as_deref().filter(|n| !n.is_empty()), &self.actions) {
            (Some(name), Some(actions)) => {
                out.push(' ');
                out.push_str(&quote(name));
                out.push(' ');
                out.push_str(&quote(actions));
            }
            (None, Some(actions)) => {
                out.push_str(" \"\" ");
                out.push_str(&quote(actions));
            }
            (Some(name), None) => {
                out.push(' ');
                out.push_str(&quote(name));
            }
            (None, None) => {}
        }
        out.push(')');
        out
    }
}

impl fmt::Display for PermissionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for PermissionInfo {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Actions {
    All,
    Set(BTreeSet<String>),
}

impl Actions {
    fn parse(text: &str) -> Self {
        let mut set = BTreeSet::new();
        for action in text.split(',').map(str::trim).filter(|a| !a.is_empty()) {
            if action == "*" {
                return Self::All;
            }
            set.insert(action.to_lowercase());
        }
        Self::Set(set)
    }

    fn implies(&self, requested: &Actions) -> bool {
        match (self, requested) {
            (Self::All, _) => true,
            (Self::Set(_), Self::All) => false,
            (Self::Set(granted), Self::Set(wanted)) => wanted.is_subset(granted),
        }
    }
}

/// A resolved permission, either granted or requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permission {
    kind: String,
    name: String,
    actions: Actions,
}

impl Permission {
    pub fn new(kind: impl Into<String>, name: impl Into<String>, actions: &str) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            actions: Actions::parse(actions),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn implies(&self, requested: &Permission) -> bool {
        if self.kind == ALL_KIND {
            return true;
        }
        self.kind == requested.kind
            && name_implies(&self.name, &requested.name)
            && self.actions.implies(&requested.actions)
    }
}

impl From<&PermissionInfo> for Permission {
    fn from(info: &PermissionInfo) -> Self {
        Self::new(
            info.kind.clone(),
            info.name.clone().unwrap_or_default(),
            info.actions.as_deref().unwrap_or(""),
        )
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.actions {
            Actions::All => write!(f, "({} {:?} \"*\")", self.kind, self.name),
            Actions::Set(set) => {
                let actions = set.iter().cloned().collect::<Vec<_>>().join(",");
                write!(f, "({} {:?} {:?})", self.kind, self.name, actions)
            }
        }
    }
}

fn name_implies(granted: &str, requested: &str) -> bool {
    if granted == "*" || granted == requested {
        return true;
    }
    granted
        .strip_suffix('*')
        .is_some_and(|prefix| requested.starts_with(prefix))
}

/// An ordered permission collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSet {
    permissions: Vec<Permission>,
}

impl PermissionSet {
    pub fn new(permissions: Vec<Permission>) -> Self {
        Self { permissions }
    }

    /// The unrestricted set.
    pub fn all() -> Self {
        Self::new(vec![Permission::new(ALL_KIND, "", "")])
    }

    pub fn from_infos(infos: &[PermissionInfo]) -> Self {
        Self::new(infos.iter().map(Permission::from).collect())
    }

    pub fn implies(&self, requested: &Permission) -> bool {
        self.permissions.iter().any(|p| p.implies(requested))
    }

    pub fn is_empty(&self) -> bool {
        self.permissions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Permission> {
        self.permissions.iter()
    }
}

/// Permissions every unit holds over itself: its data area and
/// administration scoped to its own id.
pub fn implicit_permissions(unit_id: u64, data_dir: Option<&str>) -> PermissionSet {
    let mut permissions = Vec::with_capacity(3);
    if let Some(dir) = data_dir {
        let dir = dir.trim_end_matches('/');
        permissions.push(Permission::new(FILE_KIND, dir, "read,write,delete"));
        permissions.push(Permission::new(
            FILE_KIND,
            format!("{dir}/*"),
            "read,write,delete",
        ));
    }
    permissions.push(Permission::new(
        ADMIN_KIND,
        format!("(id={unit_id})"),
        "resource,metadata,class,context",
    ));
    PermissionSet::new(permissions)
}
