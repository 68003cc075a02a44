//! Command-line interface parsing and handling

pub mod history;
pub mod model_list;
pub mod say;
pub mod settings;

use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::cli::history::show_history;
use crate::cli::model_list::list_models;
use crate::cli::say::{run_say, SayOptions};
use crate::cli::settings::{set_value, unset_value};
use crate::core::builtin_models::ModelCatalog;
use crate::core::config::Config;
use crate::core::store::FileStore;

const LOG_ENV: &str = "TUTORCHAT_LOG";

#[derive(Parser)]
#[command(name = "tutorchat", version)]
#[command(about = "Streaming AI tutor chat with automatic vision model switching")]
#[command(
    long_about = "tutorchat sends a question to GLM or Doubao and streams the model's \
reasoning and answer into the terminal. Attaching an image switches the turn to the \
vision model; text-only turns use the text model.\n\n\
Environment Variables:\n\
  GLM_API_KEY       API key for GLM models (unless set with 'tutorchat set api-key glm')\n\
  DOUBAO_API_KEY    API key for the Doubao vision model\n\
  TUTORCHAT_LOG     Log filter, e.g. 'debug' or 'tutorchat=trace' (default: warn)\n\n\
Press Ctrl+C while a response is streaming to stop it and keep what arrived."
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ask a question and stream the answer
    Say {
        /// The question (may be empty when attaching files)
        #[arg(trailing_var_arg = true)]
        prompt: Vec<String>,
        /// Attach an image (JPEG, PNG, GIF or WebP); repeatable
        #[arg(short = 'i', long = "image", value_name = "FILE")]
        images: Vec<PathBuf>,
        /// Attach a document; repeatable
        #[arg(short = 'f', long = "file", value_name = "FILE")]
        files: Vec<PathBuf>,
        /// Model to start from
        #[arg(short = 'm', long)]
        model: Option<String>,
        /// Deep-thinking mode: longer, more focused answers
        #[arg(short = 't', long)]
        think: bool,
        /// Continue a saved conversation
        #[arg(short = 'c', long, value_name = "ID")]
        conversation: Option<String>,
        /// Do not write the conversation to disk
        #[arg(long)]
        no_save: bool,
    },
    /// List available models
    Models,
    /// List saved conversations, or print one
    History {
        /// Conversation id to print
        conversation: Option<String>,
    },
    /// Set configuration values; without a key, print the configuration
    Set {
        key: Option<String>,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        value: Vec<String>,
    },
    /// Unset configuration values
    Unset {
        key: String,
        /// Provider, for per-provider keys
        value: Option<String>,
    },
}

/// Logs go to stderr so they never mix with the streamed answer.
fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

pub fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();
    tokio::runtime::Runtime::new()?.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let mut config = Config::load()?;

    match args.command {
        Commands::Say {
            prompt,
            images,
            files,
            model,
            think,
            conversation,
            no_save,
        } => {
            let options = SayOptions {
                prompt,
                images,
                files,
                model,
                think,
                conversation,
                no_save,
            };
            run_say(options, &config).await
        }
        Commands::Models => {
            list_models(&ModelCatalog::builtin()?, &config);
            Ok(())
        }
        Commands::History { conversation } => {
            let store = FileStore::new(config.data_dir()?);
            show_history(&store, conversation.as_deref()).await
        }
        Commands::Set { key: None, .. } => {
            println!("{}", config.describe());
            Ok(())
        }
        Commands::Set {
            key: Some(key),
            value,
        } => {
            let catalog = ModelCatalog::builtin()?;
            match set_value(&mut config, &catalog, &key, &value) {
                Ok(message) => {
                    config.save()?;
                    println!("{message}");
                    Ok(())
                }
                Err(err) => {
                    eprintln!("{err}");
                    std::process::exit(1);
                }
            }
        }
        Commands::Unset { key, value } => {
            let catalog = ModelCatalog::builtin()?;
            match unset_value(&mut config, &catalog, &key, value.as_deref()) {
                Ok(message) => {
                    config.save()?;
                    println!("{message}");
                    Ok(())
                }
                Err(err) => {
                    eprintln!("{err}");
                    std::process::exit(1);
                }
            }
        }
    }
}
