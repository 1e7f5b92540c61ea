use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "uplink")]
#[command(about = "Resumable upload and deletion queues", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to $UPLINK_CONFIG or config/uplink.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Upload a file and wait for it to finish
    Upload(UploadArgs),
    /// Show the queued upload or last failure for a resource
    Status(ResourceArgs),
    /// Cancel any upload for a resource and delete it remotely
    Delete(ResourceArgs),
    /// List recorded upload failures
    Failures,
    /// Resume work left over from a previous run
    Resume,
}

#[derive(clap::Args, Debug)]
pub struct UploadArgs {
    /// Local file to upload
    pub file: PathBuf,

    /// Uri of the remote resource the upload slot was created for
    #[arg(long)]
    pub resource_uri: String,

    /// Upload link from the slot ticket (required by the http transport)
    #[arg(long)]
    pub upload_link: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct ResourceArgs {
    /// Remote resource uri
    pub resource_uri: String,
}
