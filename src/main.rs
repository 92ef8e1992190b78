mod app;
mod composer;
mod config;
mod delivery;
mod draft;
mod eml;
mod pdf_preview;
mod sheet;
mod store_directory;
mod templates;

use app::{AppState, ReplyOutput, ReplyRequest};
use clap::{Parser, Subcommand};
use config::{Backend, Config};
use pdf_preview::PageOne;
use sheet::SheetFormat;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "invoice-reply", about = "Draft billing replies for uploaded invoices")]
struct Cli {
    #[arg(long, default_value = ".config/invoice_reply.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload or inspect the store list
    Stores {
        #[command(subcommand)]
        action: StoresCmd,
    },
    /// List the response templates
    Templates,
    /// Show page 1 of an invoice
    Preview { pdf: PathBuf },
    /// Build the email reply for an invoice
    Reply {
        #[arg(long)]
        pdf: PathBuf,
        #[arg(long)]
        template: String,
        /// Store number(s), comma or space separated
        #[arg(long)]
        stores: Option<String>,
        /// Overrides `delivery.backend` from the config
        #[arg(long, value_enum)]
        deliver: Option<Backend>,
        #[arg(long)]
        json: bool,
    },
    /// Print what a saved .eml draft contains
    Inspect { file: PathBuf },
    /// Edit the config file
    Config {
        #[command(subcommand)]
        action: ConfigCmd,
    },
}

#[derive(Subcommand, Debug)]
enum StoresCmd {
    /// Replace the store list with an .xlsx or .csv file
    Upload { file: PathBuf },
    /// Print the active store list
    Show {
        #[arg(long, default_value_t = 20)]
        head: usize,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCmd {
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // init tracing
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    match cli.command {
        Command::Stores { action } => match action {
            StoresCmd::Upload { file } => {
                let mut state = AppState::open_for_upload(&cfg.store_list_path)?;
                upload_stores(&mut state, &file)?;
            }
            StoresCmd::Show { head } => {
                let state = AppState::open(&cfg.store_list_path)?;
                show_stores(&state, head);
            }
        },
        Command::Templates => {
            for tpl in templates::TEMPLATES.iter() {
                let flags = match (tpl.needs_store, tpl.attach_file) {
                    (true, true) => "store #, attachment",
                    (true, false) => "store #",
                    (false, true) => "attachment",
                    (false, false) => "",
                };
                println!("{:<34} {:<20} {}", tpl.option, flags, tpl.reply);
            }
        }
        Command::Preview { pdf } => {
            let bytes = fs::read(&pdf)?;
            print_preview(&bytes);
        }
        Command::Reply {
            pdf,
            template,
            stores,
            deliver,
            json,
        } => {
            let state = AppState::open(&cfg.store_list_path)?;
            let tpl = templates::find(&template).ok_or_else(|| {
                format!("unknown template '{template}'; run `invoice-reply templates`")
            })?;
            let bytes = fs::read(&pdf)?;
            let pdf_name = file_name(&pdf);

            if !json {
                print_preview(&bytes);
            } else {
                app::preview_invoice(&bytes);
            }

            let output = state.generate_reply(ReplyRequest {
                template: tpl,
                store_input: stores.as_deref(),
                pdf_name: &pdf_name,
                pdf_bytes: &bytes,
                recipient: &cfg.recipient,
                sender: cfg.sender.clone(),
            })?;

            let backend = deliver.unwrap_or(cfg.delivery.backend);
            let client = connect_client(backend, &cfg, &cli.config).await;
            let written = output.finish(&cfg.output_dir, client.as_deref()).await?;

            if json {
                print_reply_json(tpl, &output, &written)?;
            } else {
                print_reply(&output, &written);
            }
        }
        Command::Inspect { file } => {
            let parsed = eml::parse(&fs::read(&file)?)?;
            if let Some(sender) = &parsed.sender {
                println!("From:    {sender}");
            }
            println!("To:      {}", parsed.recipient);
            println!("Subject: {}", parsed.subject);
            for att in &parsed.attachments {
                println!("Attach:  {} ({}, {} bytes)", att.filename, att.mime_type, att.bytes.len());
            }
            println!("\n{}", parsed.body_text);
        }
        Command::Config { action } => match action {
            ConfigCmd::Set { key, value } => Config::set_value(&cli.config, &key, &value)?,
        },
    }

    Ok(())
}

fn upload_stores(state: &mut AppState, file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = fs::read(file)?;
    let directory = state.upload_store_list(&bytes, SheetFormat::from_path(file))?;

    println!("Store list uploaded and saved successfully.");
    if !directory.has_store_column() {
        println!("Warning: no 'store number' column; store lookups will fail.");
    }
    if directory.flagged() > 0 {
        println!("Skipped {} row(s) without a store number.", directory.flagged());
    }
    print!("{}", directory.head(5));
    info!(path = %state.store_path().display(), "Store list replaced");
    Ok(())
}

fn show_stores(state: &AppState, head: usize) {
    match state.directory() {
        Some(directory) => {
            println!("{} store(s) in {}", directory.len(), state.store_path().display());
            println!("Columns: {}\n", directory.headers().join(", "));
            print!("{}", directory.head(head));
        }
        None => println!("Please upload a store list to continue."),
    }
}

fn print_preview(bytes: &[u8]) {
    let Some(preview) = app::preview_invoice(bytes) else {
        println!("(no preview available)\n");
        return;
    };
    println!("--- Page 1 of {} ---", preview.pages);
    match preview.first_page {
        PageOne::Text(text) => println!("{text}"),
        PageOne::ScannedImage => println!("(scanned page, no text layer)"),
    }
    println!("--- End preview ---\n");
}

fn print_reply(output: &ReplyOutput, written: &[PathBuf]) {
    if let Some(table) = &output.resolved.attachment {
        print!("{table}");
        println!();
    }
    println!("Email Body:\n{}\n", output.message.body_text);
    for path in written {
        println!("Saved {}", path.display());
    }
}

fn print_reply_json(
    tpl: &templates::Template,
    output: &ReplyOutput,
    written: &[PathBuf],
) -> Result<(), serde_json::Error> {
    let report = serde_json::json!({
        "template": tpl,
        "outcome": output.resolved.outcome,
        "subject": output.message.subject,
        "recipient": output.message.recipient,
        "body": output.message.body_text,
        "stores": output.resolved.attachment.as_ref().map(|t| t.store_numbers()),
        "attachments": output
            .message
            .attachments
            .iter()
            .map(|a| a.filename.as_str())
            .collect::<Vec<_>>(),
        "files": written.iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Set up the delivery backend. A setup failure only costs the delivery;
/// the .eml is written regardless.
async fn connect_client(
    backend: Backend,
    cfg: &Config,
    config_path: &Path,
) -> Option<Box<dyn delivery::Deliver>> {
    match delivery::connect(backend, cfg, config_path).await {
        Ok(client) => client,
        Err(e) => {
            warn!(error = %e, "Delivery skipped");
            None
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "invoice.pdf".to_string())
}
