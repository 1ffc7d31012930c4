//! riskctl - Command-line interface for cohort-risk
//!
//! Commands:
//! - train: Train a model artifact from student-term records
//! - score: Score records against an artifact and print the ranked report
//! - validate: Validate input records without training or scoring
//! - inspect: Describe a model artifact and check its integrity
//! - schema: Print the input or artifact schema

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use cohort_risk::config::{RiskConfig, CONFIG_ENV_VAR};
use cohort_risk::model::{TrainedModel, ARTIFACT_FORMAT_VERSION};
use cohort_risk::pipeline::{latest_term_records, score_batch, train_from_records, RunSummary};
use cohort_risk::ranking::RankingReporter;
use cohort_risk::schema::{RawStudentRecord, RecordAdapter, INPUT_FIELDS};
use cohort_risk::types::RiskScore;
use cohort_risk::{RiskError, VERSION};

/// riskctl - Rank students by predicted risk for outreach
#[derive(Parser)]
#[command(name = "riskctl")]
#[command(version = VERSION)]
#[command(about = "Train and apply student risk models", long_about = None)]
struct Cli {
    /// Config file (JSON); falls back to $RISKCTL_CONFIG, then defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a model artifact from student-term records
    Train {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Where to write the model artifact
        #[arg(short, long)]
        model: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Score records and print the ranked report
    Score {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Model artifact to score with
        #[arg(short, long)]
        model: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "text")]
        output_format: OutputFormat,

        /// Only report the N highest-risk entries
        #[arg(long)]
        top: Option<usize>,

        /// Score only each student's most recent term
        #[arg(long)]
        latest_term: bool,
    },

    /// Validate input records
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Describe a model artifact and check its integrity
    Inspect {
        /// Model artifact path
        #[arg(short, long)]
        model: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print schema information
    Schema {
        /// Schema to print
        #[arg(value_enum)]
        schema_type: SchemaType,

        /// Output as JSON schema
        #[arg(long)]
        json_schema: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// JSON array of records
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one score per line)
    Ndjson,
    /// JSON array of scores
    Json,
    /// Pretty-printed JSON
    JsonPretty,
    /// Human-readable table
    Text,
}

#[derive(Clone, ValueEnum)]
enum SchemaType {
    /// Input record schema
    Input,
    /// Model artifact schema
    Artifact,
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string()));
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so stdout carries only the report
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<(), RiskCliError> {
    match cli.command {
        Commands::Train {
            input,
            model,
            input_format,
            json,
        } => {
            let config = load_config(cli.config.as_deref())?;
            cmd_train(&input, &model, input_format, json, &config)
        }

        Commands::Score {
            input,
            model,
            output,
            input_format,
            output_format,
            top,
            latest_term,
        } => {
            let config = load_config(cli.config.as_deref())?;
            cmd_score(
                &input,
                &model,
                &output,
                input_format,
                output_format,
                top,
                latest_term,
                &config,
            )
        }

        Commands::Validate {
            input,
            input_format,
            json,
        } => cmd_validate(&input, input_format, json),

        Commands::Inspect { model, json } => cmd_inspect(&model, json),

        Commands::Schema { schema_type, json_schema } => cmd_schema(schema_type, json_schema),
    }
}

fn load_config(flag: Option<&Path>) -> Result<RiskConfig, RiskCliError> {
    let from_env = std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from);
    match flag.map(Path::to_path_buf).or(from_env) {
        Some(path) => Ok(RiskConfig::from_path(&path)?),
        None => Ok(RiskConfig::default()),
    }
}

fn read_records(input: &Path, format: &InputFormat) -> Result<Vec<RawStudentRecord>, RiskCliError> {
    let input_data = if input.to_string_lossy() == "-" {
        if atty::is(atty::Stream::Stdin) {
            return Err(RiskCliError::InteractiveStdin);
        }
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        fs::read_to_string(input)?
    };

    let rows = match format {
        InputFormat::Ndjson => RecordAdapter::parse_ndjson(&input_data)?,
        InputFormat::Json => RecordAdapter::parse_array(&input_data)?,
    };

    if rows.is_empty() {
        return Err(RiskCliError::NoRecords);
    }
    Ok(rows)
}

fn cmd_train(
    input: &Path,
    model_path: &Path,
    input_format: InputFormat,
    json: bool,
    config: &RiskConfig,
) -> Result<(), RiskCliError> {
    let rows = read_records(input, &input_format)?;
    let report = train_from_records(&rows, config)?;
    report.model.save(model_path)?;

    let model = &report.model;
    if json {
        let out = serde_json::json!({
            "model_id": model.model_id,
            "model_path": model_path.display().to_string(),
            "training_examples": model.training_examples,
            "low_confidence": model.low_confidence,
            "confidence_flags": model.confidence_flags,
            "validation": model.validation,
            "summary": report.summary,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("Training Report");
        println!("===============");
        print_summary(&report.summary);
        println!("Model:            {}", model.model_id);
        println!("Written to:       {}", model_path.display());
        println!("Features:         {}", model.feature_names.join(", "));
        println!(
            "Classes:          {} at-risk / {} not at-risk",
            model.class_counts.at_risk, model.class_counts.not_at_risk
        );
        match &model.validation {
            Some(metrics) => println!("Validation:       {}", metrics),
            None => println!("Validation:       none"),
        }
        if model.low_confidence {
            println!("\nLOW CONFIDENCE:");
            for flag in &model.confidence_flags {
                println!("  - {}", serde_json::to_string(flag)?);
            }
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_score(
    input: &Path,
    model_path: &Path,
    output: &Path,
    input_format: InputFormat,
    output_format: OutputFormat,
    top: Option<usize>,
    latest_term: bool,
    config: &RiskConfig,
) -> Result<(), RiskCliError> {
    let model = TrainedModel::load(model_path)?;
    let rows = read_records(input, &input_format)?;

    let mut batch = RecordAdapter::validate_batch(&rows);
    if latest_term {
        batch.records = latest_term_records(batch.records);
    }
    let report = score_batch(&model, batch, config)?;

    let ranked = match top {
        Some(n) => RankingReporter::top(&report.ranked, n),
        None => &report.ranked[..],
    };

    let output_data = format_output(ranked, &report.summary, &output_format)?;
    if output.to_string_lossy() == "-" {
        print!("{}", output_data);
    } else {
        fs::write(output, output_data)?;
    }

    Ok(())
}

fn cmd_validate(input: &Path, input_format: InputFormat, json: bool) -> Result<(), RiskCliError> {
    let rows = read_records(input, &input_format)?;
    let report = RecordAdapter::validate_batch(&rows).report();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total rows:    {}", report.rows_read);
        println!("Valid rows:    {}", report.valid_rows);
        println!("Dropped rows:  {}", report.dropped_rows);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!("  - {}", err.error);
            }
        }
        if !report.warnings.is_empty() {
            println!("\nWarnings:");
            for w in &report.warnings {
                println!("  - Row {} ({}): {} {}", w.row, w.student_id, w.field, w.message);
            }
        }
    }

    if report.dropped_rows > 0 {
        Err(RiskCliError::ValidationFailed(report.dropped_rows))
    } else {
        Ok(())
    }
}

fn cmd_inspect(model_path: &Path, json: bool) -> Result<(), RiskCliError> {
    let model = TrainedModel::load(model_path)?;
    let importance = model.feature_importance();

    if json {
        let features: Vec<serde_json::Value> = model
            .feature_names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                serde_json::json!({
                    "name": name,
                    "imputation_value": model.imputation_values[i],
                    "scaling_mean": model.scaling.means[i],
                    "scaling_scale": model.scaling.scales[i],
                    "coefficient": model.coefficients[i],
                })
            })
            .collect();
        let out = serde_json::json!({
            "model_id": model.model_id,
            "format_version": model.format_version,
            "trained_at": model.trained_at,
            "training_examples": model.training_examples,
            "class_counts": model.class_counts,
            "low_confidence": model.low_confidence,
            "confidence_flags": model.confidence_flags,
            "validation": model.validation,
            "intercept": model.intercept,
            "features": features,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("Model Artifact");
        println!("==============");
        println!("Model:            {}", model.model_id);
        println!("Format version:   {}", model.format_version);
        println!("Trained at:       {}", model.trained_at.to_rfc3339());
        println!("Examples:         {}", model.training_examples);
        println!(
            "Classes:          {} at-risk / {} not at-risk",
            model.class_counts.at_risk, model.class_counts.not_at_risk
        );
        match &model.validation {
            Some(metrics) => println!("Validation:       {}", metrics),
            None => println!("Validation:       none"),
        }
        println!("Low confidence:   {}", model.low_confidence);
        for flag in &model.confidence_flags {
            println!("  - {}", serde_json::to_string(flag)?);
        }
        println!("\nFeature importance (standardized coefficients):");
        for (name, coef) in importance {
            println!("  {:<40} {:>+9.4}", name, coef);
        }
    }

    Ok(())
}

fn cmd_schema(schema_type: SchemaType, json_schema: bool) -> Result<(), RiskCliError> {
    match schema_type {
        SchemaType::Input => {
            if json_schema {
                println!("{}", get_input_json_schema());
            } else {
                println!("Input Schema: one student-term record per row");
                println!();
                println!("Required:");
                println!("  - student_id: non-empty string");
                println!("  - term: season and year, e.g. \"Fall 2024\" or \"Spring2025\"");
                println!();
                println!("Optional (absent or null):");
                println!("  - final_score: 0-100");
                println!("  - attendance_percentage: 0-100");
                println!("  - lms_logins_per_week: non-negative integer");
                println!("  - disciplinary_incidents: non-negative integer");
                println!("  - parental_education: free-text category");
                println!();
                println!("Fields: {}", INPUT_FIELDS.join(", "));
            }
        }
        SchemaType::Artifact => {
            if json_schema {
                println!("{}", get_artifact_json_schema());
            } else {
                println!("Artifact Schema: format version {}", ARTIFACT_FORMAT_VERSION);
                println!();
                println!("- format_version, model_id, trained_at, seed");
                println!("- feature_names: frozen feature order");
                println!("- imputation_values: training value used for nulls, per feature");
                println!("- scaling: {{ means, scales }} per feature");
                println!("- coefficients, intercept: logistic regression on the standardized scale");
                println!("- training_examples, class_counts");
                println!("- low_confidence, confidence_flags");
                println!("- validation: held-out metrics, when a split was made");
            }
        }
    }

    Ok(())
}

// Helper functions

fn print_summary(summary: &RunSummary) {
    println!("Rows read:        {}", summary.rows_read);
    println!("Rows dropped:     {}", summary.dropped_rows);
    println!("Records used:     {}", summary.records_used);
    println!("Imputed values:   {}", summary.imputations.total);
    for (feature, count) in &summary.imputations.by_feature {
        println!("  - {}: {}", feature, count);
    }
    if summary.low_confidence_labels > 0 {
        println!("Low-conf labels:  {}", summary.low_confidence_labels);
    }
}

fn format_output(
    scores: &[RiskScore],
    summary: &RunSummary,
    format: &OutputFormat,
) -> Result<String, RiskCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut lines: Vec<String> = Vec::new();
            for score in scores {
                lines.push(serde_json::to_string(score)?);
            }
            Ok(lines.join("\n") + "\n")
        }
        OutputFormat::Json => Ok(serde_json::to_string(scores)? + "\n"),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(scores)? + "\n"),
        OutputFormat::Text => {
            let mut out = String::new();
            out.push_str(&format!(
                "{:>4}  {:<16} {:<12} {:>7}  {:<6}  {}\n",
                "RANK", "STUDENT", "TERM", "PROB", "TIER", "SIGNALS"
            ));
            for (i, score) in scores.iter().enumerate() {
                let signals: Vec<String> = score
                    .contributing_signals
                    .iter()
                    .map(|s| format!("{}={}", s.feature, s.value))
                    .collect();
                out.push_str(&format!(
                    "{:>4}  {:<16} {:<12} {:>7.4}  {:<6}  {}\n",
                    i + 1,
                    score.student_id,
                    score.term.to_string(),
                    score.probability,
                    score.tier.as_str(),
                    signals.join(", ")
                ));
            }
            if let Some(tiers) = summary.tiers {
                out.push_str(&format!(
                    "\n{} HIGH, {} MEDIUM, {} LOW ({} rows dropped, {} values imputed)\n",
                    tiers.high, tiers.medium, tiers.low, summary.dropped_rows, summary.imputations.total
                ));
            }
            Ok(out)
        }
    }
}

fn get_input_json_schema() -> String {
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": "student_term_record",
        "description": "One student's state in one academic term",
        "type": "object",
        "required": ["student_id", "term"],
        "properties": {
            "student_id": { "type": "string", "minLength": 1 },
            "term": { "type": "string", "pattern": "^(?i)(spring|summer|fall|autumn)[ _-]?[0-9]{4}$" },
            "final_score": { "type": ["number", "null"], "minimum": 0, "maximum": 100 },
            "attendance_percentage": { "type": ["number", "null"], "minimum": 0, "maximum": 100 },
            "lms_logins_per_week": { "type": ["integer", "null"], "minimum": 0 },
            "disciplinary_incidents": { "type": ["integer", "null"], "minimum": 0 },
            "parental_education": { "type": ["string", "null"] }
        }
    })
    .to_string()
}

fn get_artifact_json_schema() -> String {
    let number_array = serde_json::json!({ "type": "array", "items": { "type": "number" } });
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": "cohort_risk_model",
        "description": "Trained risk model artifact",
        "type": "object",
        "required": [
            "format_version", "model_id", "trained_at", "feature_names",
            "imputation_values", "scaling", "coefficients", "intercept",
            "training_examples", "class_counts", "low_confidence",
            "confidence_flags", "seed"
        ],
        "properties": {
            "format_version": { "type": "integer", "const": ARTIFACT_FORMAT_VERSION },
            "model_id": { "type": "string", "format": "uuid" },
            "trained_at": { "type": "string", "format": "date-time" },
            "feature_names": { "type": "array", "items": { "type": "string" } },
            "imputation_values": number_array,
            "scaling": {
                "type": "object",
                "properties": { "means": number_array, "scales": number_array }
            },
            "coefficients": number_array,
            "intercept": { "type": "number" },
            "training_examples": { "type": "integer" },
            "class_counts": {
                "type": "object",
                "properties": {
                    "not_at_risk": { "type": "integer" },
                    "at_risk": { "type": "integer" }
                }
            },
            "low_confidence": { "type": "boolean" },
            "confidence_flags": { "type": "array", "items": { "type": "object" } },
            "validation": { "type": "object" },
            "seed": { "type": "integer" }
        }
    })
    .to_string()
}

// Error types

#[derive(Debug)]
enum RiskCliError {
    Io(io::Error),
    Risk(RiskError),
    Json(serde_json::Error),
    NoRecords,
    InteractiveStdin,
    ValidationFailed(usize),
}

impl From<io::Error> for RiskCliError {
    fn from(e: io::Error) -> Self {
        RiskCliError::Io(e)
    }
}

impl From<RiskError> for RiskCliError {
    fn from(e: RiskError) -> Self {
        RiskCliError::Risk(e)
    }
}

impl From<serde_json::Error> for RiskCliError {
    fn from(e: serde_json::Error) -> Self {
        RiskCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl CliError {
    fn new(code: &str, message: String, hint: &str) -> Self {
        CliError {
            code: code.to_string(),
            message,
            hint: Some(hint.to_string()),
        }
    }
}

impl From<RiskCliError> for CliError {
    fn from(e: RiskCliError) -> Self {
        match e {
            RiskCliError::Io(e) => CliError::new("IO_ERROR", e.to_string(), "Check file paths and permissions"),
            RiskCliError::Json(e) => CliError::new("JSON_ERROR", e.to_string(), "Check JSON syntax"),
            RiskCliError::NoRecords => CliError::new(
                "NO_RECORDS",
                "No records found in input".to_string(),
                "Ensure input file is not empty",
            ),
            RiskCliError::InteractiveStdin => CliError::new(
                "INTERACTIVE_STDIN",
                "Refusing to read records from an interactive terminal".to_string(),
                "Pipe records in or pass a file with --input",
            ),
            RiskCliError::ValidationFailed(count) => CliError::new(
                "VALIDATION_FAILED",
                format!("{} rows failed validation", count),
                "Fix validation errors and retry",
            ),
            RiskCliError::Risk(e) => {
                let message = e.to_string();
                match e {
                    RiskError::InsufficientData { .. } => {
                        CliError::new("INSUFFICIENT_DATA", message, "Provide more labeled records")
                    }
                    RiskError::DegenerateLabels { .. } => CliError::new(
                        "DEGENERATE_LABELS",
                        message,
                        "Every record got the same label; review the labeling rules or the input term",
                    ),
                    RiskError::FeatureMismatch { .. }
                    | RiskError::VectorLength { .. }
                    | RiskError::LabelCountMismatch { .. }
                    | RiskError::UnknownFeature(_) => CliError::new(
                        "FEATURE_MISMATCH",
                        message,
                        "Retrain the model or fix the configured feature list",
                    ),
                    RiskError::NoFeatures => CliError::new(
                        "NO_FEATURES",
                        message,
                        "Records need at least one observed numeric field or category",
                    ),
                    RiskError::IncompatibleArtifact(_) | RiskError::NoModel => CliError::new(
                        "INCOMPATIBLE_ARTIFACT",
                        message,
                        "Run 'riskctl inspect' on the artifact or retrain it",
                    ),
                    RiskError::InvalidConfig(_) => CliError::new(
                        "INVALID_CONFIG",
                        message,
                        "Check the file passed with --config or $RISKCTL_CONFIG",
                    ),
                    RiskError::ParseError(_) | RiskError::Json(_) => CliError::new(
                        "PARSE_ERROR",
                        message,
                        "Run 'riskctl schema input' for the expected record format",
                    ),
                    RiskError::Io(_) => CliError::new("IO_ERROR", message, "Check file paths and permissions"),
                }
            }
        }
    }
}
