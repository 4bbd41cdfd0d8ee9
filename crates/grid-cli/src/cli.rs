use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use grid_core::{EDITABLE_METADATA_FIELDS, LeaseAccess};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "grid")]
#[command(about = "Apply batch updates to Grid images and wait for them to land", long_about = None)]
pub struct Cli {
    #[arg(long, global = true, help = "Config file (defaults to ~/.grid/config.toml)")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Set a metadata field on one or more images")]
    SetField {
        #[arg(value_parser = clap::builder::PossibleValuesParser::new(EDITABLE_METADATA_FIELDS), help = "Metadata field to edit")]
        field: String,

        #[arg(help = "New value for the field")]
        value: String,

        #[arg(required = true, help = "Image ids")]
        images: Vec<String>,
    },

    #[command(about = "Archive or unarchive images")]
    Archive {
        #[arg(long, help = "Remove the archived flag instead of setting it")]
        unarchive: bool,

        #[arg(required = true, help = "Image ids")]
        images: Vec<String>,
    },

    #[command(about = "Attach a lease to images")]
    LeaseCreate {
        #[arg(long, value_enum, help = "Kind of restriction")]
        access: AccessArg,

        #[arg(long, help = "Lease start (RFC 3339)")]
        start: Option<DateTime<Utc>>,

        #[arg(long, help = "Lease end (RFC 3339)")]
        end: Option<DateTime<Utc>>,

        #[arg(long, help = "Free-text notes")]
        notes: Option<String>,

        #[arg(required = true, help = "Image ids")]
        images: Vec<String>,
    },

    #[command(about = "Remove a lease from images")]
    LeaseDelete {
        #[arg(help = "Lease id")]
        lease_id: String,

        #[arg(required = true, help = "Image ids the lease is attached to")]
        images: Vec<String>,
    },

    #[command(about = "Show configuration")]
    Config {
        #[arg(long, help = "Print the full configuration as TOML")]
        full: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum AccessArg {
    AllowUse,
    DenyUse,
    AllowSyndication,
    DenySyndication,
}

impl From<AccessArg> for LeaseAccess {
    fn from(access: AccessArg) -> Self {
        match access {
            AccessArg::AllowUse => Self::AllowUse,
            AccessArg::DenyUse => Self::DenyUse,
            AccessArg::AllowSyndication => Self::AllowSyndication,
            AccessArg::DenySyndication => Self::DenySyndication,
        }
    }
}
