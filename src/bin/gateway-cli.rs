use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use rpc_gateway::config;
use rpc_gateway::routing::{BodyBinding, RouteTable, ServiceDescription};

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Offline checks for the RPC gateway", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the route table and list routes in lookup order
    Routes {
        /// Service description file (TOML)
        #[arg(short, long)]
        services: PathBuf,
    },
    /// Load and validate a configuration file (environment applied)
    Config {
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(long)]
        env_prefix: Option<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Routes { services } => print_routes(services),
        Commands::Config { config, env_prefix } => print_config(config, env_prefix),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn print_routes(services: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let description = ServiceDescription::load(&services)?;
    let table = RouteTable::build(&description)?;

    for route in table.routes() {
        let body = match &route.body {
            BodyBinding::None => "-".to_string(),
            BodyBinding::Whole => "*".to_string(),
            BodyBinding::Field(field) => field.dotted(),
        };
        println!(
            "{:<7} {:<40} {:<40} body={}{}",
            route.http_method.as_str(),
            route.template.as_str(),
            route.rpc.to_string(),
            body,
            if route.server_streaming { " (stream)" } else { "" },
        );
    }
    Ok(())
}

fn print_config(
    path: Option<PathBuf>,
    env_prefix: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = config::load_config(path.as_deref(), env_prefix)?;
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
