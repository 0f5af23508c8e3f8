use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "warden",
    version,
    about = "Administer conditional permissions: rule table, declared lists and signer patterns"
)]
pub struct Cli {
    /// State directory (overrides config and WARDEN_DATA_DIR)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// YAML config file (default: ./warden.yaml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log output format on stderr
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Conditional rule table
    Rules(RulesArgs),
    /// Per-origin declared permission lists
    Declared(DeclaredArgs),
    /// Default permission list
    Default(DefaultArgs),
    /// Test a signer-chain pattern
    Match(MatchArgs),
    Version,
}

#[derive(Args, Debug)]
pub struct RulesArgs {
    #[command(subcommand)]
    pub cmd: RulesCmd,
}

#[derive(Subcommand, Debug)]
pub enum RulesCmd {
    /// Print all rules in evaluation order
    List,
    /// Print one rule
    Show { name: String },
    /// Insert a rule at the front, or replace the rule with the same name in place
    Put(PutArgs),
    /// Remove a rule by name
    Remove { name: String },
    /// Replace the whole table from a file of encoded rules, one per line
    Import {
        file: PathBuf,
    },
    /// Write the table as encoded rules, one per line
    Export {
        /// Output file (default: stdout)
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
pub struct PutArgs {
    /// Rule name (synthesized when omitted)
    #[arg(long)]
    pub name: Option<String>,

    /// Make this a DENY rule
    #[arg(long)]
    pub deny: bool,

    /// Condition, e.g. '[signer "*, o=ACME;-"]'
    #[arg(long = "condition")]
    pub conditions: Vec<String>,

    /// Permission, e.g. '(file "/tmp/*" "read")'
    #[arg(long = "permission", required = true)]
    pub permissions: Vec<String>,
}

#[derive(Args, Debug)]
pub struct DeclaredArgs {
    #[command(subcommand)]
    pub cmd: DeclaredCmd,
}

#[derive(Subcommand, Debug)]
pub enum DeclaredCmd {
    /// Origins with a declared list
    List,
    Get { origin: String },
    /// Set the list; no permissions means an empty (deny-all) list
    Set {
        origin: String,
        permissions: Vec<String>,
    },
    Clear { origin: String },
}

#[derive(Args, Debug)]
pub struct DefaultArgs {
    #[command(subcommand)]
    pub cmd: DefaultCmd,
}

#[derive(Subcommand, Debug)]
pub enum DefaultCmd {
    Get,
    Set { permissions: Vec<String> },
    Clear,
}

#[derive(Args, Debug)]
pub struct MatchArgs {
    /// Chain pattern, e.g. '*, o=ACME;-'
    #[arg(long)]
    pub pattern: String,

    /// Signer DN, leaf first (repeatable)
    #[arg(long = "dn", conflicts_with = "certs")]
    pub dns: Vec<String>,

    /// Certificate as SUBJECT|ISSUER, leaf first; SUBJECT alone is self-signed (repeatable)
    #[arg(long = "cert")]
    pub certs: Vec<String>,
}
