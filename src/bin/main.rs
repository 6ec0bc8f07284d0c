//! Catalog inspection CLI

use clap::{Parser, Subcommand};
use openstack_agents::parse_catalog;

#[derive(Parser)]
#[command(name = "openstack-agents")]
#[command(about = "Inspect OpenStack agent image-profile catalogs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a catalog file for structural errors
    Validate {
        /// Path to the YAML catalog
        file: String,
    },
    /// Print the parsed profiles of a catalog file
    Show {
        /// Path to the YAML catalog
        file: String,
        /// Emit JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Validate { file } => {
            let text = std::fs::read_to_string(&file)?;
            match parse_catalog(&text) {
                Ok(profiles) => {
                    println!("OK: {} profile(s)", profiles.len());
                    Ok(())
                }
                Err(e) => {
                    eprintln!("{}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Show { file, json } => {
            let text = std::fs::read_to_string(&file)?;
            let profiles = parse_catalog(&text)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&profiles)?);
            } else {
                for p in &profiles {
                    println!(
                        "{}: image={} flavor={} network={} volume_size={} floating_ip={}",
                        p.name, p.image, p.flavor, p.network, p.volume_size, p.auto_floating_ip
                    );
                }
            }
            Ok(())
        }
    }
}
