//! Command line configuration.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "hsml-runtime")]
#[command(version)]
#[command(about = "Loads HSML scenes into a live, scriptable 3D view", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Open an HSML document in the viewer
    View(ViewOptions),

    /// Serve a directory over HTTP
    Serve(ServeOptions),
}

#[derive(clap::Args, Debug, Clone, PartialEq)]
pub struct ViewOptions {
    /// HSML document to load
    pub document: PathBuf,

    /// Run without a window and print the final scene state
    #[arg(long)]
    pub summary_only: bool,

    /// Frames to simulate in summary mode
    #[arg(long, default_value_t = 1)]
    pub frames: u32,

    /// Skip <script> elements
    #[arg(long)]
    pub no_scripts: bool,
}

#[derive(clap::Args, Debug, Clone, PartialEq)]
pub struct ServeOptions {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Directory to serve
    #[arg(long, default_value = "public")]
    pub root: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_view_options() {
        let cli = Cli::try_parse_from([
            "hsml-runtime",
            "view",
            "scene.hsml",
            "--summary-only",
            "--frames",
            "3",
        ])
        .unwrap();
        assert_eq!(
            cli.command,
            Command::View(ViewOptions {
                document: PathBuf::from("scene.hsml"),
                summary_only: true,
                frames: 3,
                no_scripts: false,
            })
        );
    }

    #[test]
    fn serve_flags_override_defaults() {
        let cli =
            Cli::try_parse_from(["hsml-runtime", "serve", "--port", "9000", "--root", "site"])
                .unwrap();
        assert_eq!(
            cli.command,
            Command::Serve(ServeOptions {
                port: 9000,
                root: PathBuf::from("site"),
            })
        );
    }

    #[test]
    fn view_requires_a_document() {
        assert!(Cli::try_parse_from(["hsml-runtime", "view"]).is_err());
        assert!(Cli::try_parse_from(["hsml-runtime"]).is_err());
    }
}
