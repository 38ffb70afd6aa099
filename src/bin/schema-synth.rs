//! schema-synth CLI
//!
//! Command-line interface for generating flattened schemas from an annotated
//! declaration model and for checking feature-gate expressions.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use schema_synth::{
    builtin_registry, evaluate, generate, load_declarations, validate_gate_expr, FeatureGateMap,
    GenerateOptions, TargetKind, TypeIdent,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "schema-synth")]
#[command(about = "Generate flattened schemas from annotated declarations")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Target {
    Package,
    Type,
    Field,
}

impl From<Target> for TargetKind {
    fn from(target: Target) -> Self {
        match target {
            Target::Package => TargetKind::Package,
            Target::Type => TargetKind::Type,
            Target::Field => TargetKind::Field,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Build and flatten schemas for declarations in a model file
    Generate {
        /// Declaration model (JSON)
        decls: PathBuf,

        /// Root declaration as module.Name (repeatable; default: every declaration)
        #[arg(long = "type", short = 't')]
        types: Vec<String>,

        /// Feature gates, e.g. alpha=true,beta=false
        #[arg(long, default_value = "")]
        feature_gates: String,

        /// Comma-separated gate names expressions may use
        #[arg(long, value_delimiter = ',')]
        known_gates: Option<Vec<String>>,

        /// Reject unknown gate names and malformed gate settings
        #[arg(long)]
        strict_gates: bool,

        /// Output file (stdout if not specified)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Evaluate a feature-gate expression
    EvalGate {
        /// Expression, e.g. "(alpha&beta)|gamma"
        expr: String,

        /// Feature gates, e.g. alpha=true,beta=false
        #[arg(long, default_value = "")]
        feature_gates: String,

        /// Comma-separated gate names the expression may use
        #[arg(long, value_delimiter = ',')]
        known_gates: Option<Vec<String>>,

        /// Reject unknown gate names and malformed gate settings
        #[arg(long)]
        strict_gates: bool,
    },

    /// List the built-in markers registered for a target kind
    Markers {
        #[arg(long, value_enum, default_value = "field")]
        target: Target,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Generate {
            decls,
            types,
            feature_gates,
            known_gates,
            strict_gates,
            output,
            pretty,
        } => run_generate(GenerateArgs {
            decls,
            types,
            feature_gates,
            known_gates,
            strict_gates,
            output,
            pretty,
        }),

        Commands::EvalGate {
            expr,
            feature_gates,
            known_gates,
            strict_gates,
        } => run_eval_gate(&expr, &feature_gates, known_gates, strict_gates),

        Commands::Markers { target } => run_markers(target.into()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

struct GenerateArgs {
    decls: PathBuf,
    types: Vec<String>,
    feature_gates: String,
    known_gates: Option<Vec<String>>,
    strict_gates: bool,
    output: Option<PathBuf>,
    pretty: bool,
}

fn gate_options(
    feature_gates: &str,
    known_gates: Option<Vec<String>>,
    strict_gates: bool,
) -> Result<GenerateOptions, u8> {
    let gates = FeatureGateMap::parse(feature_gates, strict_gates).map_err(|e| {
        eprintln!("Error: {}", e);
        2u8
    })?;
    let mut options = GenerateOptions::new(gates).strict_gates(strict_gates);
    if let Some(known) = known_gates {
        options = options.known_gates(known);
    }
    Ok(options)
}

fn run_generate(args: GenerateArgs) -> Result<(), u8> {
    let GenerateArgs {
        decls: decls_path,
        types,
        feature_gates,
        known_gates,
        strict_gates,
        output,
        pretty,
    } = args;

    let decls = load_declarations(&decls_path).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    let roots = if types.is_empty() {
        decls.idents()
    } else {
        types
            .iter()
            .map(|t| {
                TypeIdent::parse(t).ok_or_else(|| {
                    eprintln!("Error: invalid type \"{}\": expected module.Name", t);
                    2u8
                })
            })
            .collect::<Result<Vec<_>, _>>()?
    };

    let options = gate_options(&feature_gates, known_gates, strict_gates)?;
    let registry = builtin_registry().map_err(|e| {
        eprintln!("Error: {}", e);
        2u8
    })?;

    let manifest = generate(&decls, &registry, &roots, &options).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    let json_output = if pretty {
        serde_json::to_string_pretty(&manifest)
    } else {
        serde_json::to_string(&manifest)
    }
    .map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })?;

    match output {
        Some(path) => {
            std::fs::write(&path, &json_output).map_err(|e| {
                eprintln!("Error writing to {}: {}", path.display(), e);
                3u8
            })?;
        }
        None => {
            println!("{}", json_output);
        }
    }

    if manifest.has_errors() {
        for diag in &manifest.diagnostics {
            eprintln!("error[{}]: {}", diag.kind, diag);
        }
        return Err(1);
    }
    Ok(())
}

fn run_eval_gate(
    expr: &str,
    feature_gates: &str,
    known_gates: Option<Vec<String>>,
    strict_gates: bool,
) -> Result<(), u8> {
    let options = gate_options(feature_gates, known_gates, strict_gates)?;

    let enabled = validate_gate_expr(expr, options.known_gates.as_ref(), options.strict_gates)
        .and_then(|()| evaluate(expr, &options.gates))
        .map_err(|e| {
            eprintln!("Error: {}", e);
            2u8
        })?;

    println!("{}", enabled);
    Ok(())
}

fn run_markers(target: TargetKind) -> Result<(), u8> {
    let registry = builtin_registry().map_err(|e| {
        eprintln!("Error: {}", e);
        2u8
    })?;
    for name in registry.names(target) {
        println!("+{}", name);
    }
    Ok(())
}
