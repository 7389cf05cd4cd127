use clap::{Args, Parser, Subcommand};

/// Traffic engine process entrypoint: starts the fleet by default, or runs
/// one of the operator subcommands and exits.
#[derive(Parser)]
#[command(name = "traffic-engine", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start every subsystem worker and serve until a shutdown signal (default).
    Run,
    /// Apply (or verify) every crate's schema against the configured database
    /// and exit. Every store's `init_db` is `CREATE TABLE IF NOT EXISTS`, so
    /// this is safe to run repeatedly and before every deploy.
    Migrate,
    /// Operator account bootstrapping.
    Account {
        #[command(subcommand)]
        action: AccountCommand,
    },
}

#[derive(Subcommand)]
pub enum AccountCommand {
    /// Register a brand-new account (status=new, phase=1, day_in_phase=1).
    Add(AccountAddArgs),
    /// List accounts, optionally filtered by status.
    List {
        #[arg(long)]
        status: Option<String>,
    },
}

#[derive(Args)]
pub struct AccountAddArgs {
    /// Opaque identifier for the phone number used to register the account.
    #[arg(long)]
    pub phone_identifier: String,
    /// Audience cohort: zozh|mama|business|student|universal.
    #[arg(long)]
    pub segment: String,
    #[arg(long)]
    pub display_name: String,
    #[arg(long)]
    pub bio: Option<String>,
    /// IANA zone override; omit to use `fleet.default_timezone`.
    #[arg(long)]
    pub timezone: Option<String>,
}
