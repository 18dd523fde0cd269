use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Clone, Parser)]
#[command(name = "javadoc-index")]
#[command(about = "Index Java API source archives and resolve classes to their documentation")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, value_name = "FILE")]
    pub db: Option<PathBuf>,

    /// Where source archives are staged while being ingested.
    #[arg(long, value_name = "DIR")]
    pub downloads: Option<PathBuf>,

    /// Runtime install providing the standard library sources.
    #[arg(long, value_name = "DIR")]
    pub java_home: Option<PathBuf>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Queue an ADD event.
    Add {
        name: String,
        base_url: String,

        /// Source archive URL or local path. Ignored for the standard library
        /// when a runtime home is known.
        #[arg(long, value_name = "URL", default_value = "")]
        download_url: String,

        #[arg(long, value_name = "USER", default_value = "admin")]
        by: String,
    },
    /// Queue a DELETE event. TARGET is an API id or name.
    Delete {
        target: String,

        #[arg(long, value_name = "USER", default_value = "admin")]
        by: String,
    },
    /// Queue an UPDATE event, optionally replacing the API's URLs.
    Update {
        target: String,

        #[arg(long, value_name = "URL")]
        base_url: Option<String>,

        #[arg(long, value_name = "URL")]
        download_url: Option<String>,

        #[arg(long, value_name = "USER", default_value = "admin")]
        by: String,
    },
    /// Queue a RELOAD event.
    Reload {
        target: String,

        #[arg(long, value_name = "USER", default_value = "admin")]
        by: String,
    },
    /// Execute queued events.
    Dispatch {
        /// Process what is queued now and exit.
        #[arg(long)]
        once: bool,

        #[arg(long, value_name = "SECS", default_value_t = 5)]
        interval_secs: u64,
    },
    Events,
    Event {
        id: Uuid,
    },
    Apis,
    /// Look up a class, creating a stub record if it is not indexed yet.
    Class {
        api: String,
        class_name: String,
    },
    Stats,
    Clear,
}
