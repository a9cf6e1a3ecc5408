//! Print the gateway's OpenAPI document as JSON.

use std::io::Write;

use clap::Parser;
use color_eyre::eyre::Result;
use utoipa::OpenApi;
use venue_gateway::doc::ApiDoc;

/// Write the OpenAPI document to stdout.
#[derive(Debug, Parser)]
#[command(name = "openapi-dump")]
struct Args {
    /// Indent the JSON output.
    #[arg(long)]
    pretty: bool,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    let doc = ApiDoc::openapi();
    let json = if args.pretty {
        doc.to_pretty_json()?
    } else {
        doc.to_json()?
    };
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{json}")?;
    Ok(())
}
