//! ssm-ctl CLI - parameter files for the SSM Parameter Store

use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};

use clap::{ArgAction, Args, Parser, Subcommand};
use colored::Colorize;
use serde_yaml::{Mapping, Value};
use tracing_subscriber::EnvFilter;

use ssm_ctl::client::{PathOptions, SsmClient};
use ssm_ctl::config::SsmCtlConfig;
use ssm_ctl::document::{CompilationUnit, DocumentCompiler, ResolvedUnit};
use ssm_ctl::error::{FixSuggestion, Result, SsmCtlError};
use ssm_ctl::prompt::{Prompter, TerminalPrompter};
use ssm_ctl::registry::{Bindings, ResolveContext};
use ssm_ctl::store::create_backend;

#[derive(Parser)]
#[command(name = "ssm-ctl")]
#[command(about = "Manage SSM parameters from YAML parameter files")]
#[command(version)]
struct Cli {
    /// Parameter store backend (aws, memory)
    #[arg(long, global = true, default_value = "aws")]
    backend: String,

    /// AWS profile (overrides config and environment)
    #[arg(long, global = true)]
    profile: Option<String>,

    /// AWS region (overrides config and environment)
    #[arg(long, global = true)]
    region: Option<String>,

    /// Custom service endpoint
    #[arg(long, global = true)]
    endpoint_url: Option<String>,

    /// More logging (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Push the parameters in one or more files
    Push {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Overwrite existing parameters unless a parameter says otherwise
        #[arg(long, conflicts_with = "no_overwrite")]
        overwrite: bool,

        /// Keep existing parameters even when the config enables overwrite
        #[arg(long)]
        no_overwrite: bool,

        /// Delete everything under the .FLUSH paths first
        #[arg(long)]
        delete: bool,

        /// Print the compiled parameters instead of pushing them
        #[arg(long)]
        dry_run: bool,

        #[command(flatten)]
        inputs: InputArgs,

        #[command(flatten)]
        secure_inputs: SecureInputArgs,

        #[command(flatten)]
        interaction: InteractionArgs,
    },

    /// Delete the .FLUSH paths and every parameter in the files
    Delete {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        #[command(flatten)]
        inputs: InputArgs,

        #[command(flatten)]
        interaction: InteractionArgs,
    },

    /// Write the parameters under one or more paths as a parameter file
    Download {
        #[arg(required = true)]
        paths: Vec<String>,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Keep SecureStrings as the service returns them
        #[arg(long)]
        no_reencrypt: bool,

        /// Key to re-encrypt SecureStrings with
        #[arg(long, conflicts_with = "no_reencrypt")]
        reencrypt_key: Option<String>,
    },

    /// Encrypt values into a parameter file as EncryptedValue entries
    ///
    /// ssm-ctl encrypt FILE KEY_ID PATH VALUE [PATH VALUE]...
    /// ssm-ctl encrypt --prompt [--echo] FILE KEY_ID PATH [PATH]...
    Encrypt {
        file: PathBuf,

        key_id: String,

        #[arg(required = true)]
        args: Vec<String>,

        /// Read each value from the terminal
        #[arg(long)]
        prompt: bool,

        /// Show values while typing them
        #[arg(long, requires = "prompt")]
        echo: bool,
    },

    /// Print the plaintext of every EncryptedValue in a file
    Decrypt { file: PathBuf },

    /// Compare the files against what is stored under their .FLUSH paths
    Diff {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        #[command(flatten)]
        inputs: InputArgs,

        #[command(flatten)]
        secure_inputs: SecureInputArgs,

        #[command(flatten)]
        interaction: InteractionArgs,
    },

    /// Parse and merge files without contacting the store
    Validate {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[derive(Args)]
struct InputArgs {
    /// Input value
    #[arg(long = "input", num_args = 2, value_names = ["NAME", "VALUE"], action = ArgAction::Append)]
    input: Vec<String>,
}

#[derive(Args)]
struct SecureInputArgs {
    /// Input value given as ciphertext
    #[arg(long = "secure-input", num_args = 2, value_names = ["NAME", "CIPHERTEXT"], action = ArgAction::Append)]
    secure_input: Vec<String>,
}

#[derive(Args)]
struct InteractionArgs {
    /// Echo prompted input
    #[arg(long, conflicts_with = "no_echo")]
    echo: bool,

    /// Hide prompted input
    #[arg(long)]
    no_echo: bool,

    /// Prompt for missing inputs
    #[arg(long, conflicts_with = "no_prompt")]
    prompt: bool,

    /// Fail on missing inputs instead of prompting
    #[arg(long)]
    no_prompt: bool,
}

impl InteractionArgs {
    fn echo(&self, default: Option<bool>) -> Option<bool> {
        match (self.echo, self.no_echo) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => default,
        }
    }

    fn prompt(&self, default: bool) -> bool {
        match (self.prompt, self.no_prompt) {
            (true, _) => true,
            (_, true) => false,
            _ => default,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("{} {}", "Error:".red().bold(), e);
        if let Some(suggestion) = e.fix_suggestion() {
            eprintln!("  {} {}", "Fix:".yellow(), suggestion);
        }
        std::process::exit(1);
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let mut config = SsmCtlConfig::load()?.with_env();
    if cli.profile.is_some() {
        config.aws.profile = cli.profile;
    }
    if cli.region.is_some() {
        config.aws.region = cli.region;
    }
    if cli.endpoint_url.is_some() {
        config.aws.endpoint_url = cli.endpoint_url;
    }
    let backend = cli.backend;

    match cli.command {
        Commands::Push {
            files,
            overwrite,
            no_overwrite,
            delete,
            dry_run,
            inputs,
            secure_inputs,
            interaction,
        } => {
            let client = connect(&backend, &config)?;
            let resolved = load_and_resolve(
                &files,
                &inputs,
                &secure_inputs.secure_input,
                &interaction,
                &config,
            )?;
            let flag = match (overwrite, no_overwrite) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            push(&client, &resolved, config.defaults.overwrite_or(flag), delete, dry_run)
        }
        Commands::Delete {
            files,
            inputs,
            interaction,
        } => {
            let client = connect(&backend, &config)?;
            let resolved = load_and_resolve(&files, &inputs, &[], &interaction, &config)?;
            flush(&client, &resolved)?;
            progress("Deleting", "parameters");
            let deleted = client.delete(&resolved.names(&client)?)?;
            println!("{} {} parameters deleted", "✓".green(), deleted);
            Ok(())
        }
        Commands::Download {
            paths,
            output,
            no_reencrypt,
            reencrypt_key,
        } => {
            let mut client = connect(&backend, &config)?;
            if let Some(key) = reencrypt_key.as_deref() {
                client.set_reencrypt_key(Some(key), None);
            }
            download(&client, &paths, output.as_deref(), !no_reencrypt)
        }
        Commands::Encrypt {
            file,
            key_id,
            args,
            prompt,
            echo,
        } => {
            let client = connect(&backend, &config)?;
            encrypt(&client, &file, &key_id, &args, prompt, echo)
        }
        Commands::Decrypt { file } => {
            let client = connect(&backend, &config)?;
            decrypt(&client, &file)
        }
        Commands::Diff {
            files,
            inputs,
            secure_inputs,
            interaction,
        } => {
            let client = connect(&backend, &config)?;
            let resolved = load_and_resolve(
                &files,
                &inputs,
                &secure_inputs.secure_input,
                &interaction,
                &config,
            )?;
            diff(&client, &resolved)
        }
        Commands::Validate { files } => validate(&files),
    }
}

fn progress(verb: &str, target: impl Display) {
    eprintln!("{} {} {}...", "→".cyan(), verb, target);
}

fn connect(backend: &str, config: &SsmCtlConfig) -> Result<SsmClient> {
    let (store, cipher) =
        create_backend(backend, &config.aws).map_err(|e| SsmCtlError::ConfigError {
            reason: format!("{:#}", e),
        })?;
    let mut client = SsmClient::new(store, cipher).with_batch_size(config.defaults.batch_size);
    if let Some(key) = config.crypto.reencrypt_key.as_deref() {
        client.set_reencrypt_key(Some(key), None);
    }
    Ok(client)
}

fn load_documents(files: &[PathBuf]) -> Result<CompilationUnit> {
    let compiler = DocumentCompiler::default();
    let mut unit = CompilationUnit::default();
    for file in files {
        progress("Loading", file.display());
        let text = fs::read_to_string(file)?;
        unit = unit.merge(compiler.parse_str(&text)?)?;
    }
    Ok(unit)
}

fn load_and_resolve(
    files: &[PathBuf],
    inputs: &InputArgs,
    secure_inputs: &[String],
    interaction: &InteractionArgs,
    config: &SsmCtlConfig,
) -> Result<ResolvedUnit> {
    let mut unit = load_documents(files)?;
    for pair in inputs.input.chunks_exact(2) {
        unit.supply_input(&pair[0], pair[1].as_str(), false)?;
    }
    for pair in secure_inputs.chunks_exact(2) {
        unit.supply_input(&pair[0], pair[1].as_str(), true)?;
    }

    progress("Processing", "inputs");
    let mut prompter = TerminalPrompter::new();
    unit.register().resolve(
        &mut prompter,
        interaction.prompt(config.defaults.prompt),
        interaction.echo(config.defaults.echo),
    )
}

fn flush(client: &SsmClient, resolved: &ResolvedUnit) -> Result<()> {
    for path in resolved.flush_paths(client)? {
        progress("Flushing", &path);
        client.delete_path(&path, true, Vec::new())?;
    }
    Ok(())
}

fn push(
    client: &SsmClient,
    resolved: &ResolvedUnit,
    overwrite: bool,
    delete: bool,
    dry_run: bool,
) -> Result<()> {
    if dry_run {
        let document = resolved.compile(client, delete, true)?;
        println!("*** PARAMETERS TO PUSH ***");
        print!("{}", serde_yaml::to_string(&document)?);
        return Ok(());
    }

    if delete {
        flush(client, resolved)?;
    }

    progress("Putting", "parameters");
    let ctx = resolved.context(client);
    let written = client.batch_put(resolved.parameters(), &ctx, overwrite)?;
    println!("{} {} parameters written", "✓".green(), written);
    Ok(())
}

fn download(
    client: &SsmClient,
    paths: &[String],
    output: Option<&Path>,
    reencrypt: bool,
) -> Result<()> {
    let options = PathOptions {
        full: true,
        reencrypt,
        ..PathOptions::default()
    };
    let mut parameters = Vec::new();
    for path in paths {
        progress("Reading", path);
        parameters.extend(client.get_path(path, &options)?.into_parameters());
    }

    let bindings = Bindings::default();
    let ctx = ResolveContext::new(&bindings, client);
    let document = DocumentCompiler::compile(&parameters, paths, false, &ctx)?;
    let text = serde_yaml::to_string(&document)?;

    match output {
        Some(path) => {
            fs::write(path, text)?;
            eprintln!(
                "{} {} parameters written to {}",
                "✓".green(),
                parameters.len(),
                path.display()
            );
        }
        None => print!("{}", text),
    }
    Ok(())
}

fn encrypt(
    client: &SsmClient,
    file: &Path,
    key_id: &str,
    args: &[String],
    prompt: bool,
    echo: bool,
) -> Result<()> {
    let mut document = if file.exists() {
        match serde_yaml::from_str::<Value>(&fs::read_to_string(file)?)? {
            Value::Null => Mapping::new(),
            Value::Mapping(document) => document,
            _ => {
                return Err(SsmCtlError::InvalidDocument {
                    reason: format!("{} is not a mapping", file.display()),
                })
            }
        }
    } else {
        Mapping::new()
    };

    let key_id = client.format_key_id(key_id)?;

    let values: Vec<(String, String)> = if prompt {
        let mut prompter = TerminalPrompter::new();
        args.iter()
            .map(|path| {
                prompter
                    .read_line(&format!("{}: ", path), echo)
                    .map(|value| (path.clone(), value))
                    .map_err(|e| SsmCtlError::PromptFailed {
                        name: path.clone(),
                        reason: format!("{:#}", e),
                    })
            })
            .collect::<Result<_>>()?
    } else {
        if args.len() % 2 != 0 {
            return Err(SsmCtlError::InvalidOptions {
                reason: "provide a value for every path".to_string(),
            });
        }
        args.chunks_exact(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect()
    };

    for (path, value) in &values {
        let ciphertext = client.encrypt(value, &key_id)?;
        let entry = document
            .entry(Value::from(path.as_str()))
            .or_insert(Value::Null);
        if !entry.is_mapping() {
            *entry = Value::Mapping(Mapping::new());
        }
        if let Value::Mapping(fields) = entry {
            fields.insert("EncryptedValue".into(), ciphertext.into());
            fields.insert("KeyId".into(), key_id.as_str().into());
        }
    }

    fs::write(file, serde_yaml::to_string(&document)?)?;
    eprintln!(
        "{} {} values encrypted into {}",
        "✓".green(),
        values.len(),
        file.display()
    );
    Ok(())
}

fn decrypt(client: &SsmClient, file: &Path) -> Result<()> {
    let document: Value = serde_yaml::from_str(&fs::read_to_string(file)?)?;
    let Value::Mapping(root) = document else {
        return Ok(());
    };

    for (path, data) in &root {
        let (Some(path), Value::Mapping(fields)) = (path.as_str(), data) else {
            continue;
        };
        let Some(ciphertext) = fields.get("EncryptedValue").and_then(Value::as_str) else {
            continue;
        };
        let key_id = fields.get("KeyId").and_then(Value::as_str);
        println!("{}: {}", path, client.decrypt(ciphertext, key_id)?);
    }
    Ok(())
}

fn diff(client: &SsmClient, resolved: &ResolvedUnit) -> Result<()> {
    let paths = resolved.flush_paths(client)?;
    let names = resolved.names(client)?;
    let diff = client.diff_paths(&paths, &names)?;

    for name in &diff.add {
        println!("{} {}", "+".green(), name);
    }
    for name in &diff.overwrite {
        println!("{} {}", "~".yellow(), name);
    }
    for name in &diff.remove {
        println!("{} {}", "-".red(), name);
    }
    eprintln!(
        "{} to add, {} to overwrite, {} to remove",
        diff.add.len(),
        diff.overwrite.len(),
        diff.remove.len()
    );
    Ok(())
}

fn validate(files: &[PathBuf]) -> Result<()> {
    let unit = load_documents(files)?;
    let registered = unit.register();

    println!("{} {} file(s) valid", "✓".green(), files.len());
    println!("  Parameters: {}", registered.unit().parameters.len());
    println!("  Inputs: {}", registered.inputs().len());
    println!("  Variables: {}", registered.registry().len());
    println!("  Flush paths: {}", registered.unit().flush_paths.len());
    Ok(())
}
