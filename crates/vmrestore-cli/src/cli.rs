use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use vmrestore_core::work::RestoreOptions;

#[derive(Debug, Parser)]
#[command(name = "vmrestore")]
#[command(bin_name = "vmrestore")]
#[command(version)]
#[command(about = "Restore VMs from a backup with live progress, cancel and cleanup")]
pub struct Cli {
    #[arg(
        long,
        global = true,
        help = "Write a diagnostics log under ~/.config/vmrestore/diagnostics"
    )]
    pub diagnostics: bool,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    #[command(about = "Run the interactive restore wizard (default)")]
    Wizard,
    #[command(about = "Restore VMs without the wizard, printing progress to stdout")]
    Restore(RestoreArgs),
    #[command(about = "Run environment and configuration checks")]
    Doctor,
}

#[derive(Debug, Args)]
pub struct RestoreArgs {
    #[arg(long, help = "Backup file or directory")]
    pub source: PathBuf,
    #[arg(long = "vm", required = true, help = "VM to restore; repeat for several")]
    pub vms: Vec<String>,
    #[arg(long, help = "VM that holds the backup")]
    pub source_vm: Option<String>,
    #[arg(long, help = "The backup is encrypted")]
    pub encrypted: bool,
    #[arg(long, help = "File whose first line is the backup passphrase")]
    pub passphrase_file: Option<PathBuf>,
    #[arg(long, help = "Use the default template and netvm when missing")]
    pub ignore_missing: bool,
    #[arg(long, help = "Ignore username mismatch")]
    pub ignore_username_mismatch: bool,
    #[arg(long, help = "Only verify the backup")]
    pub verify_only: bool,
}

impl RestoreArgs {
    /// Flags given on the command line switch options on; config defaults stay otherwise.
    pub fn options(&self, defaults: RestoreOptions) -> RestoreOptions {
        let mut options = defaults;
        if self.ignore_missing {
            options.set_ignore_missing(true);
        }
        options.ignore_username_mismatch |= self.ignore_username_mismatch;
        options.verify_only |= self.verify_only;
        options
    }
}
