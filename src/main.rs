//! forge – command-line prompt → PDF generator.
//!
//! Usage:
//!   forge <prompt.txt> [--pages N] [--profile P] [--title T] [--author A]
//!         [--kind book|guide] [--theme NAME] [--config forge.toml]
//!
//! Runs one create → attach → generate cycle against the configured
//! completion endpoint and writes the artifact to local storage.

use std::{env, fs, path::PathBuf, process, sync::Arc};

use book_forge::completion::OpenAiCompletion;
use book_forge::storage::LocalObjectStore;
use book_forge::{BookForge, DocumentKind, ForgeConfig, GenerateRequest, NewDocument, Profile};

const OWNER: &str = "cli";

struct Args {
    prompt_path: PathBuf,
    pages: u32,
    profile: Profile,
    title: Option<String>,
    author: String,
    kind: DocumentKind,
    theme: Option<String>,
    config_path: PathBuf,
}

fn parse_args(args: &[String]) -> Args {
    let mut prompt_path: Option<PathBuf> = None;
    let mut pages = 5u32;
    let mut profile = Profile::Generic;
    let mut title = None;
    let mut author = String::new();
    let mut kind = DocumentKind::Book;
    let mut theme = None;
    let mut config_path = PathBuf::from("forge.toml");

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        let mut value = |flag: &str| match iter.next() {
            Some(v) => v.clone(),
            None => {
                eprintln!("Missing value for {flag}");
                print_usage(&args[0]);
                process::exit(1);
            }
        };
        match arg.as_str() {
            "--pages" | "-p" => {
                let raw = value(arg);
                pages = match raw.parse() {
                    Ok(n) if n > 0 => n,
                    _ => {
                        eprintln!("--pages expects a positive number, got '{raw}'");
                        process::exit(1);
                    }
                };
            }
            "--profile" => profile = Profile::from_name(&value(arg)),
            "--title" | "-t" => title = Some(value(arg)),
            "--author" | "-a" => author = value(arg),
            "--kind" => {
                let raw = value(arg);
                kind = DocumentKind::from_name(&raw).unwrap_or_else(|| {
                    eprintln!("--kind expects 'book' or 'guide', got '{raw}'");
                    process::exit(1);
                });
            }
            "--theme" => theme = Some(value(arg)),
            "--config" | "-c" => config_path = PathBuf::from(value(arg)),
            "--help" | "-h" => {
                print_usage(&args[0]);
                process::exit(0);
            }
            other if other.starts_with('-') => {
                eprintln!("Unknown flag: {other}");
                print_usage(&args[0]);
                process::exit(1);
            }
            path => {
                if prompt_path.is_some() {
                    eprintln!("Unexpected argument: {path}");
                    print_usage(&args[0]);
                    process::exit(1);
                }
                prompt_path = Some(PathBuf::from(path));
            }
        }
    }

    let Some(prompt_path) = prompt_path else {
        eprintln!("Error: no prompt file specified.");
        print_usage(&args[0]);
        process::exit(1);
    };

    Args {
        prompt_path,
        pages,
        profile,
        title,
        author,
        kind,
        theme,
        config_path,
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let argv: Vec<String> = env::args().collect();
    let args = parse_args(&argv);

    let prompt = match fs::read_to_string(&args.prompt_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error reading '{}': {e}", args.prompt_path.display());
            process::exit(1);
        }
    };
    let config = match ForgeConfig::load(&args.config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };
    let completion = match OpenAiCompletion::from_env(&config.completion) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };
    let storage = LocalObjectStore::new(&config.storage.root, config.storage.public_base_url.clone());

    // Default title: stem of the prompt filename.
    let title = args.title.unwrap_or_else(|| {
        args.prompt_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("Untitled")
            .to_string()
    });

    let forge = BookForge::in_memory(config, Arc::new(storage), Arc::new(completion));

    let result = async {
        let doc = forge
            .create_document(NewDocument {
                owner_id: OWNER.to_string(),
                title,
                author: args.author,
                kind: args.kind,
                profile: args.profile,
                theme: args.theme,
                font: None,
            })
            .await?;
        forge.attach_prompt(doc.id, OWNER, &prompt).await?;
        forge
            .generate_part(GenerateRequest {
                document_id: doc.id,
                owner_id: OWNER.to_string(),
                pages: args.pages,
                ..GenerateRequest::default()
            })
            .await
    }
    .await;

    match result {
        Ok(part) => {
            eprintln!(
                "Wrote '{}' ({} page{})",
                part.artifact_url,
                part.page_count,
                if part.page_count == 1 { "" } else { "s" }
            );
        }
        Err(e) => {
            eprintln!("Error generating document: {e}");
            if e.is_retryable() {
                eprintln!("(this error is transient; retrying may succeed)");
            }
            process::exit(1);
        }
    }
}

fn print_usage(prog: &str) {
    eprintln!("forge – prompt to PDF book/guide generator (book-forge)");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  {prog} <prompt.txt> [--pages N] [--profile P] [--title T] [--author A]");
    eprintln!("        [--kind book|guide] [--theme NAME] [--config forge.toml]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  <prompt.txt>   Source text or prompt for the part");
    eprintln!();
    eprintln!("Flags:");
    eprintln!("  --pages, -p    Page target for the part (default: 5)");
    eprintln!("  --profile      narrative | memoir | nonfiction | generic (default: generic)");
    eprintln!("  --title, -t    Document title (default: prompt filename stem)");
    eprintln!("  --author, -a   Author printed on the title page");
    eprintln!("  --kind         book (with title page) or guide (default: book)");
    eprintln!("  --theme        classic | parchment | midnight | sunset or a configured theme");
    eprintln!("  --config, -c   TOML configuration file (default: forge.toml)");
    eprintln!("  --help         Print this message");
    eprintln!();
    eprintln!("The completion API key is read from the variable named by");
    eprintln!("[completion].api_key_env (default: OPENAI_API_KEY).");
}
