//! Pipewise CLI Entry Point
//!
//! Provides command-line interface for executing operation pipelines from
//! a manifest file.
//!
//! # Usage
//!
//! ```bash
//! # Execute an operation's pipeline
//! pipewise article.yaml save
//!
//! # Pass invocation arguments as JSON
//! pipewise article.yaml save --args '{"title": "hello"}'
//!
//! # Execute in the privileged environment
//! pipewise article.yaml save --scope privileged --session s-1
//!
//! # List operations and registered steps
//! pipewise article.yaml --list
//! ```

use std::env;
use std::process::ExitCode;

use log::{error, info, warn};
use serde_json::{json, Value};

use pipewise::engine::Engine;
use pipewise::spec::load_manifest;
use pipewise::{EnvironmentHandle, ExecutionContext, ScopeTag, APP_NAME, VERSION};

/// Default manifest file used when none is specified.
const DEFAULT_MANIFEST: &str = "pipeline.yaml";

/// Session id attached to the privileged environment handle when none is
/// given.
const DEFAULT_SESSION: &str = "cli";

/// Command-line configuration parsed from arguments.
#[derive(Debug)]
struct Config {
    manifest_path: String,
    operation: Option<String>,
    arguments: Value,
    scope: ScopeTag,
    session_id: String,
    list: bool,
    verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            manifest_path: DEFAULT_MANIFEST.to_string(),
            operation: None,
            arguments: json!({}),
            scope: ScopeTag::Restricted,
            session_id: DEFAULT_SESSION.to_string(),
            list: false,
            verbose: false,
        }
    }
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME, VERSION);
    println!("Middleware Composition and Execution Engine");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: pipewise [OPTIONS] <MANIFEST_FILE> [OPERATION]");
    println!();
    println!("Arguments:");
    println!("  <MANIFEST_FILE>     Path to pipeline manifest YAML file");
    println!("  [OPERATION]         Operation to execute (required unless --list)");
    println!();
    println!("Options:");
    println!("  --args JSON         Invocation arguments as a JSON value");
    println!("  --scope SCOPE       Execution scope: privileged or restricted (default: restricted)");
    println!("  --session ID        Session id for the privileged environment handle");
    println!("  --list              List operations and registered steps");
    println!("  --verbose           Enable debug logging");
    println!("  --help              Show this help message");
    println!("  --version           Show version information");
    println!();
    println!("Examples:");
    println!("  pipewise article.yaml save");
    println!("  pipewise article.yaml save --args '{{\"title\": \"hello\"}}'");
    println!("  pipewise article.yaml save --scope privileged --session s-1");
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut positional_index = 0;
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--list" => {
                config.list = true;
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--args" => {
                i += 1;
                if i >= args.len() {
                    return Err("--args requires a JSON argument".to_string());
                }
                config.arguments = serde_json::from_str(&args[i])
                    .map_err(|e| format!("Invalid JSON for --args: {}", e))?;
            }
            "--scope" => {
                i += 1;
                if i >= args.len() {
                    return Err("--scope requires a value".to_string());
                }
                config.scope = match args[i].as_str() {
                    "privileged" => ScopeTag::Privileged,
                    "restricted" => ScopeTag::Restricted,
                    other => return Err(format!("Invalid scope: {}", other)),
                };
            }
            "--session" => {
                i += 1;
                if i >= args.len() {
                    return Err("--session requires an id argument".to_string());
                }
                config.session_id = args[i].clone();
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                // Positional argument
                match positional_index {
                    0 => config.manifest_path = arg.clone(),
                    1 => config.operation = Some(arg.clone()),
                    _ => return Err(format!("Unexpected argument: {}", arg)),
                }
                positional_index += 1;
            }
        }
        i += 1;
    }

    if !config.list && config.operation.is_none() {
        return Err("An operation is required unless --list is given".to_string());
    }

    Ok(config)
}

/// Prints the manifest's operations and the registry's step tables.
async fn list_manifest(engine: &Engine, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let manifest = load_manifest(&config.manifest_path)?;

    println!("Subject: {}", manifest.subject);
    println!();
    println!("Operations:");
    for (operation, specs) in &manifest.operations {
        println!("  {} ({} step(s))", operation, specs.len());
        for spec in specs {
            println!("    - {}", spec.name());
        }
    }

    let registered = engine.registry().registered().await;
    println!();
    println!("Registered steps:");
    println!("  dual:       {}", registered.dual.join(", "));
    println!("  privileged: {}", registered.privileged.join(", "));
    println!("  restricted: {}", registered.restricted.join(", "));

    let missing = manifest.unresolvable(engine.registry(), config.scope).await;
    if !missing.is_empty() {
        warn!(
            "Unresolvable under the {} scope: {}",
            config.scope,
            missing.join(", ")
        );
    }

    Ok(())
}

/// Main application entry point.
async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    // Parse arguments
    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    // Setup logging
    setup_logging(config.verbose);

    // Print banner
    print_banner();

    let engine = Engine::with_default_registry();
    engine.registry().ensure_builtins().await;

    if config.list {
        return list_manifest(&engine, &config).await;
    }

    // Load manifest
    info!("Loading manifest: {}", config.manifest_path);
    let manifest = load_manifest(&config.manifest_path).map_err(|e| {
        error!("Failed to load manifest: {}", e);
        e
    })?;

    let operation = config
        .operation
        .as_deref()
        .ok_or("An operation is required")?;
    let specs = manifest.operation(operation).ok_or_else(|| {
        format!(
            "Manifest for '{}' declares no operation named '{}'",
            manifest.subject, operation
        )
    })?;

    info!(
        "Executing {}.{} with {} declared step(s), scope '{}'",
        manifest.subject,
        operation,
        specs.len(),
        config.scope
    );

    let mut ctx = ExecutionContext::new(
        manifest.subject.clone(),
        operation,
        config.arguments.clone(),
        config.scope,
    );
    if config.scope == ScopeTag::Privileged {
        ctx = ctx.with_handle(EnvironmentHandle::new(config.session_id.clone()));
    }

    let outcome = engine.execute_chain(specs, ctx.into_shared()).await?;

    println!();
    match outcome.payload() {
        Some(payload) => println!("Terminated with payload: {}", payload),
        None => println!("Completed without a terminal payload"),
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("pipewise")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_positional_arguments() {
        let config = parse_arguments(&args(&["article.yaml", "save"])).unwrap();
        assert_eq!(config.manifest_path, "article.yaml");
        assert_eq!(config.operation.as_deref(), Some("save"));
        assert_eq!(config.scope, ScopeTag::Restricted);
    }

    #[test]
    fn test_parse_scope_and_session() {
        let config = parse_arguments(&args(&[
            "article.yaml",
            "save",
            "--scope",
            "privileged",
            "--session",
            "s-9",
        ]))
        .unwrap();
        assert_eq!(config.scope, ScopeTag::Privileged);
        assert_eq!(config.session_id, "s-9");
    }

    #[test]
    fn test_parse_args_json() {
        let config =
            parse_arguments(&args(&["article.yaml", "save", "--args", r#"{"n": 1}"#])).unwrap();
        assert_eq!(config.arguments, json!({ "n": 1 }));

        let err =
            parse_arguments(&args(&["article.yaml", "save", "--args", "{broken"])).unwrap_err();
        assert!(err.contains("Invalid JSON"));
    }

    #[test]
    fn test_operation_required_without_list() {
        assert!(parse_arguments(&args(&["article.yaml"])).is_err());
        assert!(parse_arguments(&args(&["article.yaml", "--list"])).is_ok());
    }

    #[test]
    fn test_unknown_option_rejected() {
        let err = parse_arguments(&args(&["article.yaml", "save", "--nope"])).unwrap_err();
        assert!(err.contains("Unknown option"));
    }

    #[test]
    fn test_invalid_scope_rejected() {
        let err =
            parse_arguments(&args(&["article.yaml", "save", "--scope", "root"])).unwrap_err();
        assert!(err.contains("Invalid scope"));
    }
}
